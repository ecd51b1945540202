//! TCP protocol - RFC 793
//!
//! Header parsing for flow classification and checksum calculation after
//! address rewriting.

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum TCP header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// TCP protocol number for pseudo-header
pub const PROTOCOL_NUMBER: u8 = 6;

/// Checksum field offset
const CHECKSUM_OFFSET: usize = 16;

/// PSH|ACK, the flags of an established data segment
const PSH_ACK: u8 = 0x18;

fn header_len(buffer: &[u8]) -> Result<usize> {
    if buffer.len() < MIN_HEADER_SIZE {
        return Err(Error::Parse("TCP header too short".into()));
    }

    let header_len = (buffer[12] >> 4) as usize * 4;
    if header_len < MIN_HEADER_SIZE {
        return Err(Error::Parse("TCP data offset too small".into()));
    }

    if buffer.len() < header_len {
        return Err(Error::Parse("TCP header truncated".into()));
    }

    Ok(header_len)
}

/// Parsed TCP header (zero-copy reference)
#[derive(Debug)]
pub struct TcpHeader<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> TcpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let header_len = header_len(buffer)?;
        Ok(Self { buffer, header_len })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[CHECKSUM_OFFSET], self.buffer[CHECKSUM_OFFSET + 1]])
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    /// Validate checksum with pseudo-header
    pub fn validate_checksum(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        tcp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

/// Recompute the checksum of a TCP segment in place.
pub fn update_checksum(segment: &mut [u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Result<()> {
    header_len(segment)?;

    segment[CHECKSUM_OFFSET] = 0;
    segment[CHECKSUM_OFFSET + 1] = 0;

    let sum = tcp_checksum(src_ip, dst_ip, segment);
    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
    Ok(())
}

/// Calculate TCP checksum with pseudo-header (RFC 793)
///
/// Pseudo-header:
/// ```text
/// +--------+--------+--------+--------+
/// |          Source Address           |
/// +--------+--------+--------+--------+
/// |        Destination Address        |
/// +--------+--------+--------+--------+
/// |  Zero  |Protocol|   TCP Length    |
/// +--------+--------+--------+--------+
/// ```
pub fn tcp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, tcp_segment: &[u8]) -> u16 {
    super::pseudo_header_checksum(src_ip, dst_ip, PROTOCOL_NUMBER, tcp_segment)
}

/// TCP segment builder (no options)
#[derive(Debug, Clone, Default)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq_num: u32,
    ack_num: u32,
    window: u16,
    payload: Vec<u8>,
}

impl TcpBuilder {
    pub fn new() -> Self {
        Self {
            window: 64240,
            ..Default::default()
        }
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn seq_num(mut self, seq: u32) -> Self {
        self.seq_num = seq;
        self
    }

    pub fn ack_num(mut self, ack: u32) -> Self {
        self.ack_num = ack;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Build the segment with a checksum valid for the given addresses
    pub fn build(self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let mut buffer = vec![0u8; MIN_HEADER_SIZE + self.payload.len()];

        buffer[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.seq_num.to_be_bytes());
        buffer[8..12].copy_from_slice(&self.ack_num.to_be_bytes());
        buffer[12] = ((MIN_HEADER_SIZE / 4) as u8) << 4;
        buffer[13] = PSH_ACK;
        buffer[14..16].copy_from_slice(&self.window.to_be_bytes());
        buffer[MIN_HEADER_SIZE..].copy_from_slice(&self.payload);

        let sum = tcp_checksum(src_ip, dst_ip, &buffer);
        buffer[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());

        buffer
    }
}
