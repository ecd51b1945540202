//! Rebind engine
//!
//! Outbound frames owned by the target application are moved from the
//! default adapter to the rebind adapter; replies addressed to the rebind
//! adapter are moved back so the application sees them on the address it
//! originally used.
//!
//! ```text
//!  app ──▶ default (outbound) ──rewrite src ip/mac, dst mac──▶ rebind ──▶ gateway
//!  app ◀── default ◀──rewrite dst ip/mac── rebind (inbound) ◀── gateway
//! ```

use super::binding::RebindConfig;
use super::checksum;
use super::flow::{FlowKey, FlowResolver};
use crate::capture::{CaptureLog, Decision, Direction, FrameHandler};
use crate::process::ProcessTable;
use crate::protocol::ethernet::{self, Frame, FrameMut};
use crate::protocol::ipv4::{Ipv4Header, Ipv4HeaderMut, Protocol};
use crate::protocol::tcp::TcpHeader;
use crate::protocol::udp::UdpHeader;
use crate::protocol::EtherType;
use crate::telemetry::RebindStats;
use crate::Result;
use std::net::SocketAddrV4;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Transport of a classified frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Tcp,
    Udp,
}

/// Addressing of an Ethernet/IPv4 TCP or UDP frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Classified {
    transport: Transport,
    src: SocketAddrV4,
    dst: SocketAddrV4,
}

/// Parse every header the rewrite will touch. None means the frame is not
/// IPv4 TCP/UDP or is malformed.
fn classify(frame: &[u8]) -> Option<Classified> {
    let eth = Frame::parse(frame).ok()?;
    if EtherType::from_u16(eth.ethertype()) != Some(EtherType::Ipv4) {
        return None;
    }

    let ip = Ipv4Header::parse(eth.payload()).ok()?;
    let (transport, src_port, dst_port) = match Protocol::from_u8(ip.protocol())? {
        Protocol::Tcp => {
            let tcp = TcpHeader::parse(ip.payload()).ok()?;
            (Transport::Tcp, tcp.src_port(), tcp.dst_port())
        }
        Protocol::Udp => {
            let udp = UdpHeader::parse(ip.payload()).ok()?;
            (Transport::Udp, udp.src_port(), udp.dst_port())
        }
        Protocol::Icmp => return None,
    };

    Some(Classified {
        transport,
        src: SocketAddrV4::new(ip.src_addr(), src_port),
        dst: SocketAddrV4::new(ip.dst_addr(), dst_port),
    })
}

/// Split a frame into its Ethernet and IPv4 headers so both can be held
/// mutably at once.
fn split_headers(frame: &mut [u8]) -> Result<(FrameMut<'_>, Ipv4HeaderMut<'_>)> {
    if frame.len() < ethernet::HEADER_SIZE {
        return Err(crate::Error::Parse("frame too short".into()));
    }

    let (link, network) = frame.split_at_mut(ethernet::HEADER_SIZE);
    Ok((FrameMut::parse(link)?, Ipv4HeaderMut::parse(network)?))
}

/// Frame rewriter for a single application
pub struct RebindEngine {
    config: Arc<RebindConfig>,
    resolver: FlowResolver,
    capture_log: Option<Arc<dyn CaptureLog>>,
    stats: Arc<RebindStats>,
}

impl RebindEngine {
    pub fn new(
        config: Arc<RebindConfig>,
        table: Arc<dyn ProcessTable>,
        stats: Arc<RebindStats>,
    ) -> Self {
        Self {
            config,
            resolver: FlowResolver::new(table, Arc::clone(&stats)),
            capture_log: None,
            stats,
        }
    }

    /// Append every rewritten frame to `log`
    pub fn with_capture_log(mut self, log: Arc<dyn CaptureLog>) -> Self {
        self.capture_log = Some(log);
        self
    }

    pub fn config(&self) -> &Arc<RebindConfig> {
        &self.config
    }

    pub fn stats(&self) -> &Arc<RebindStats> {
        &self.stats
    }

    fn pass(&self) -> Decision {
        self.stats.passed.inc();
        Decision::Pass
    }

    fn log_frame(&self, frame: &[u8]) {
        if let Some(log) = &self.capture_log {
            log.append(frame);
        }
    }

    /// Handle a frame leaving the default adapter
    pub fn process_outbound(&self, frame: &mut [u8]) -> Decision {
        let Some(flow) = classify(frame) else {
            return self.pass();
        };

        // Frames already moved to the rebind adapter come back through the
        // tap with the rebind source address and stop here.
        if *flow.src.ip() != self.config.default_binding().ip {
            return self.pass();
        }

        let key = match flow.transport {
            Transport::Tcp => FlowKey::tcp(flow.src, flow.dst),
            Transport::Udp => FlowKey::udp(flow.src),
        };

        match self.resolver.resolve(&key) {
            Some(process) if self.config.matches_application(&process.name) => {
                trace!("{} owned by {}", key, process);
            }
            Some(process) => {
                trace!("{} owned by {}, not rebound", key, process);
                return self.pass();
            }
            None => {
                trace!("{} has no known owner", key);
                self.stats.classification_misses.inc();
                return self.pass();
            }
        }

        if let Err(e) = self.rewrite_outbound(frame) {
            debug!("Outbound rewrite of {} failed: {}", key, e);
            return self.pass();
        }

        self.log_frame(frame);
        self.stats.outbound_routed.inc();
        Decision::Route
    }

    fn rewrite_outbound(&self, frame: &mut [u8]) -> Result<()> {
        let rebind = self.config.rebind_binding();
        let (mut eth, mut ip) = split_headers(frame)?;

        ip.set_src_addr(rebind.ip);
        eth.set_src_mac(rebind.mac);
        eth.set_dst_mac(self.config.gateway().mac);

        // Transport header was validated by classify on these same bytes
        checksum::recompute_ipv4(&mut ip)
    }

    /// Handle a frame arriving on the rebind adapter
    pub fn process_inbound(&self, frame: &mut [u8]) -> Decision {
        let Some(flow) = classify(frame) else {
            return self.pass();
        };

        if *flow.dst.ip() != self.config.rebind_binding().ip {
            return self.pass();
        }

        if let Err(e) = self.rewrite_inbound(frame) {
            debug!("Inbound rewrite to {} failed: {}", flow.dst, e);
            return self.pass();
        }

        trace!("{} -> {} moved back to default adapter", flow.src, flow.dst);
        self.log_frame(frame);
        self.stats.inbound_routed.inc();
        Decision::Route
    }

    fn rewrite_inbound(&self, frame: &mut [u8]) -> Result<()> {
        let default = self.config.default_binding();
        let (mut eth, mut ip) = split_headers(frame)?;

        ip.set_dst_addr(default.ip);
        eth.set_dst_mac(default.mac);

        checksum::recompute_ipv4(&mut ip)
    }

    /// Run a handler, turning a panic into a pass so a single bad frame
    /// never takes the capture worker down.
    fn guarded(
        &self,
        direction: Direction,
        frame: &mut [u8],
        process: fn(&Self, &mut [u8]) -> Decision,
    ) -> Decision {
        match panic::catch_unwind(AssertUnwindSafe(|| process(self, frame))) {
            Ok(decision) => decision,
            Err(_) => {
                self.stats.faults.inc();
                error!("{:?} frame handler panicked, passing frame", direction);
                Decision::Pass
            }
        }
    }
}

impl FrameHandler for RebindEngine {
    fn outbound(&self, frame: &mut [u8]) -> Decision {
        self.guarded(Direction::Outbound, frame, Self::process_outbound)
    }

    fn inbound(&self, frame: &mut [u8]) -> Decision {
        self.guarded(Direction::Inbound, frame, Self::process_inbound)
    }
}
