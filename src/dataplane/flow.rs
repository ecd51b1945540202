//! Flow ownership resolution

use crate::process::{ProcessIdentity, ProcessTable, TcpSession};
use crate::telemetry::RebindStats;
use std::fmt;
use std::net::SocketAddrV4;
use std::sync::Arc;
use tracing::{debug, trace};

/// Identifies the socket a frame belongs to, from the local host's side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKey {
    Tcp(TcpSession),
    /// Local endpoint of a UDP socket
    Udp(SocketAddrV4),
}

impl FlowKey {
    pub fn tcp(local: SocketAddrV4, remote: SocketAddrV4) -> Self {
        FlowKey::Tcp(TcpSession { local, remote })
    }

    pub fn udp(local: SocketAddrV4) -> Self {
        FlowKey::Udp(local)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowKey::Tcp(session) => write!(f, "TCP {}", session),
            FlowKey::Udp(local) => write!(f, "UDP {}", local),
        }
    }
}

/// Cached lookup with a single forced refresh on miss
pub struct FlowResolver {
    table: Arc<dyn ProcessTable>,
    stats: Arc<RebindStats>,
}

impl FlowResolver {
    pub fn new(table: Arc<dyn ProcessTable>, stats: Arc<RebindStats>) -> Self {
        Self { table, stats }
    }

    fn lookup(&self, key: &FlowKey) -> Option<Arc<ProcessIdentity>> {
        match key {
            FlowKey::Tcp(session) => self.table.lookup_tcp(session),
            FlowKey::Udp(local) => self.table.lookup_udp(*local),
        }
    }

    /// Owner of the flow, or None when it stays unknown after one refresh
    pub fn resolve(&self, key: &FlowKey) -> Option<Arc<ProcessIdentity>> {
        if let Some(process) = self.lookup(key) {
            return Some(process);
        }

        let (refresh_tcp, refresh_udp) = match key {
            FlowKey::Tcp(_) => (true, false),
            FlowKey::Udp(_) => (false, true),
        };

        self.stats.resolver_refreshes.inc();
        trace!("{} not in process table, refreshing", key);
        if let Err(e) = self.table.actualize(refresh_tcp, refresh_udp) {
            debug!("Process table refresh failed: {}", e);
        }

        self.lookup(key)
    }
}
