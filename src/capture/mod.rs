//! Frame capture and injection
//!
//! The rebind engine never talks to a driver directly. It is handed frames by
//! a [`CaptureEngine`] through the [`FrameHandler`] it registered, and answers
//! each one with a [`Decision`]. Backends:
//! - AF_PACKET: Linux raw sockets, one tokio task per filter slot, with a
//!   TUN device as the receive path for restored replies

mod af_packet;
mod engine;
mod pcap;
mod tun;

pub use af_packet::{AfPacketSocket, PacketType, RxInfo};
pub use engine::AfPacketEngine;
pub use pcap::PcapWriter;
pub use tun::{TunDevice, RECEIVE_DEVICE};

use crate::protocol::MacAddr;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// What the capture layer should do with a frame after the handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Let the frame continue on its original path
    Pass,
    /// Redirect the (possibly rewritten) frame to the peer adapter: out of
    /// it for outbound frames, into the local stack behind it for inbound
    Route,
    /// Discard the frame
    Drop,
}

/// Which way a frame was travelling when it was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the local stack towards the wire
    Outbound,
    /// Received from the wire towards the local stack
    Inbound,
}

/// Directional frame callbacks.
///
/// Called from the capture layer's worker threads, possibly concurrently.
/// Each invocation owns its frame exclusively for the duration of the call.
pub trait FrameHandler: Send + Sync {
    fn outbound(&self, frame: &mut [u8]) -> Decision;

    fn inbound(&self, frame: &mut [u8]) -> Decision;

    fn handle(&self, direction: Direction, frame: &mut [u8]) -> Decision {
        match direction {
            Direction::Outbound => self.outbound(frame),
            Direction::Inbound => self.inbound(frame),
        }
    }
}

/// Opaque capture-layer handle of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterHandle(pub u32);

impl fmt::Display for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// WAN medium of a capture interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WanType {
    /// Ordinary LAN adapter
    #[default]
    None,
    /// Point-to-point IP link (PPP)
    Ip,
    /// Layer 3 tunnel without a link-layer header
    Tunnel,
}

/// An interface as enumerated by the capture layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInterface {
    pub handle: AdapterHandle,
    pub internal_name: String,
    pub hw_address: MacAddr,
    /// Local endpoints of virtual links (WAN interfaces only)
    pub virtual_links: Option<Vec<Ipv4Addr>>,
    pub wan_type: WanType,
}

/// Capture/injection layer with two independent filter slots.
pub trait CaptureEngine: Send + Sync {
    /// Interfaces the engine can filter on
    fn interfaces(&self) -> &[CaptureInterface];

    /// Install the handler invoked for every captured frame
    fn register(&self, handler: Arc<dyn FrameHandler>);

    /// Begin filtering `handle` in `slot`. Returns false on failure.
    fn start(&self, handle: AdapterHandle, slot: usize) -> bool;

    /// Stop filtering in `slot`. Once this returns, no handler call for the
    /// slot is running or will start. Stopping an idle slot is a no-op.
    fn stop(&self, slot: usize);
}

/// Append-only sink for rewritten frames. Implementations serialize
/// concurrent writers themselves.
pub trait CaptureLog: Send + Sync {
    fn append(&self, frame: &[u8]);
}
