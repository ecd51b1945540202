//! Wire formats touched by the rebind engine
//!
//! Every view is a bounds-checked accessor over the captured bytes. Offsets and
//! byte order follow the on-wire layout exactly.

pub mod ethernet;
pub mod ipv4;
pub mod tcp;
pub mod types;
pub mod udp;

pub use types::*;

use std::net::Ipv4Addr;

/// One's complement checksum over the IPv4 pseudo-header plus a transport
/// segment (RFC 768 / RFC 793).
pub(crate) fn pseudo_header_checksum(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    protocol: u8,
    segment: &[u8],
) -> u16 {
    let mut sum: u32 = 0;

    let src = src_ip.octets();
    let dst = dst_ip.octets();

    sum += u16::from_be_bytes([src[0], src[1]]) as u32;
    sum += u16::from_be_bytes([src[2], src[3]]) as u32;
    sum += u16::from_be_bytes([dst[0], dst[1]]) as u32;
    sum += u16::from_be_bytes([dst[2], dst[3]]) as u32;
    sum += protocol as u32;
    sum += segment.len() as u32;

    for i in (0..segment.len()).step_by(2) {
        let word = if i + 1 < segment.len() {
            u16::from_be_bytes([segment[i], segment[i + 1]])
        } else {
            // Pad with zero if odd length
            u16::from_be_bytes([segment[i], 0])
        };
        sum = sum.wrapping_add(word as u32);
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}
