//! Ethernet II frame parsing and in-place rewriting

use super::MacAddr;
use crate::{Error, Result};

/// Ethernet header size (dst MAC + src MAC + EtherType)
pub const HEADER_SIZE: usize = 14;
/// Maximum Ethernet frame size (without FCS)
pub const MAX_FRAME_SIZE: usize = 1514;

const DST_MAC: std::ops::Range<usize> = 0..6;
const SRC_MAC: std::ops::Range<usize> = 6..12;

fn mac_at(buffer: &[u8], range: std::ops::Range<usize>) -> MacAddr {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buffer[range]);
    MacAddr(mac)
}

/// Parsed Ethernet frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse an Ethernet frame from a buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        mac_at(self.buffer, DST_MAC)
    }

    pub fn src_mac(&self) -> MacAddr {
        mac_at(self.buffer, SRC_MAC)
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buffer[12], self.buffer[13]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer
    }
}

/// Mutable view over a captured frame, rewritten in place.
#[derive(Debug)]
pub struct FrameMut<'a> {
    buffer: &'a mut [u8],
}

impl<'a> FrameMut<'a> {
    pub fn parse(buffer: &'a mut [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        mac_at(self.buffer, DST_MAC)
    }

    pub fn src_mac(&self) -> MacAddr {
        mac_at(self.buffer, SRC_MAC)
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buffer[12], self.buffer[13]])
    }

    pub fn set_dst_mac(&mut self, mac: MacAddr) {
        self.buffer[DST_MAC].copy_from_slice(&mac.0);
    }

    pub fn set_src_mac(&mut self, mac: MacAddr) {
        self.buffer[SRC_MAC].copy_from_slice(&mac.0);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[HEADER_SIZE..]
    }
}

/// Builder for constructing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_SIZE),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.buffer.extend_from_slice(&ethertype.to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
