//! Checksum recomputation after header rewriting
//!
//! The transport checksum covers the IPv4 addresses through the
//! pseudo-header, so it is always recomputed first and the IP header
//! checksum last.

use crate::protocol::ethernet::FrameMut;
use crate::protocol::ipv4::{Ipv4HeaderMut, Protocol};
use crate::protocol::{tcp, udp, EtherType};
use crate::{Error, Result};

/// Recompute the checksums of an Ethernet/IPv4 frame in place
pub fn recompute(frame: &mut [u8]) -> Result<()> {
    let mut eth = FrameMut::parse(frame)?;
    if EtherType::from_u16(eth.ethertype()) != Some(EtherType::Ipv4) {
        return Err(Error::Parse("not an IPv4 frame".into()));
    }

    let mut ip = Ipv4HeaderMut::parse(eth.payload_mut())?;
    recompute_ipv4(&mut ip)
}

/// Recompute the transport checksum (TCP or UDP), then the IPv4 header
/// checksum. Other transports only get the header checksum.
pub fn recompute_ipv4(ip: &mut Ipv4HeaderMut<'_>) -> Result<()> {
    let src = ip.src_addr();
    let dst = ip.dst_addr();

    match Protocol::from_u8(ip.protocol()) {
        Some(Protocol::Tcp) => tcp::update_checksum(ip.payload_mut(), src, dst)?,
        Some(Protocol::Udp) => udp::update_checksum(ip.payload_mut(), src, dst)?,
        _ => {}
    }

    ip.update_checksum();
    Ok(())
}
