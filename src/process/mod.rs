//! Socket ownership lookup
//!
//! Maps a TCP session or UDP endpoint to the process that owns the socket.
//! Implementations keep a cached table and rebuild it on demand through
//! [`ProcessTable::actualize`]; they synchronise internally so lookups and
//! refreshes may run from any capture worker.

mod procfs;

pub use procfs::{parse_socket_table, ProcfsTable, SocketEntry};

use crate::Result;
use std::fmt;
use std::net::SocketAddrV4;
use std::sync::Arc;

/// Owner of a socket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    pub name: String,
    pub pid: u32,
}

impl ProcessIdentity {
    pub fn new(name: impl Into<String>, pid: u32) -> Self {
        Self {
            name: name.into(),
            pid,
        }
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.pid)
    }
}

/// A TCP connection as seen from this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpSession {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
}

impl fmt::Display for TcpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

/// Cached socket-to-process table
pub trait ProcessTable: Send + Sync {
    fn lookup_tcp(&self, session: &TcpSession) -> Option<Arc<ProcessIdentity>>;

    fn lookup_udp(&self, endpoint: SocketAddrV4) -> Option<Arc<ProcessIdentity>>;

    /// Rebuild the selected tables from the OS
    fn actualize(&self, refresh_tcp: bool, refresh_udp: bool) -> Result<()>;
}
