//! procfs-backed process table
//!
//! Sockets come from `/proc/net/tcp` and `/proc/net/udp`, owners from the
//! `socket:[inode]` links under `/proc/<pid>/fd`.

use super::{ProcessIdentity, ProcessTable, TcpSession};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace};

/// One row of /proc/net/{tcp,udp}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketEntry {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub inode: u64,
}

/// Parse `0100007F:0035`: native-endian hex address, big-endian hex port
fn parse_endpoint(field: &str) -> Result<SocketAddrV4> {
    let (addr, port) = field
        .split_once(':')
        .ok_or_else(|| Error::Parse(format!("invalid socket endpoint: {}", field)))?;

    let addr = u32::from_str_radix(addr, 16)
        .map_err(|_| Error::Parse(format!("invalid socket address: {}", addr)))?;
    let port = u16::from_str_radix(port, 16)
        .map_err(|_| Error::Parse(format!("invalid socket port: {}", port)))?;

    Ok(SocketAddrV4::new(Ipv4Addr::from(addr.to_ne_bytes()), port))
}

/// Parse the IPv4 socket table format shared by /proc/net/tcp and
/// /proc/net/udp
///
/// ```text
///   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///    0: 0100007F:0277 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 21044 ...
/// ```
///
/// Entries without an inode (TIME_WAIT, orphaned) are skipped.
pub fn parse_socket_table(content: &str) -> Result<Vec<SocketEntry>> {
    let mut entries = Vec::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 10 {
            return Err(Error::Parse(format!("short socket entry: {}", line.trim())));
        }

        let inode: u64 = fields[9]
            .parse()
            .map_err(|_| Error::Parse(format!("invalid socket inode: {}", fields[9])))?;
        if inode == 0 {
            continue;
        }

        entries.push(SocketEntry {
            local: parse_endpoint(fields[1])?,
            remote: parse_endpoint(fields[2])?,
            inode,
        });
    }

    Ok(entries)
}

/// `socket:[12345]` → 12345
fn socket_inode(link: &Path) -> Option<u64> {
    link.to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn basename(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Full image name of a process.
///
/// `comm` is cut to 15 bytes by the kernel, so the basename of the `exe`
/// link is preferred, then `argv[0]` from `cmdline`. `exe` is unreadable
/// for other users' processes and `cmdline` is empty for kernel threads.
fn process_name(pid_dir: &Path) -> String {
    if let Ok(exe) = fs::read_link(pid_dir.join("exe")) {
        let exe = exe.to_string_lossy();
        // Replaced or unlinked binaries keep a marker after the path
        let exe = exe.strip_suffix(" (deleted)").unwrap_or(&exe);
        if let Some(name) = basename(exe) {
            return name.to_string();
        }
    }

    if let Ok(cmdline) = fs::read(pid_dir.join("cmdline")) {
        let argv0 = cmdline.split(|&b| b == 0).next().unwrap_or_default();
        if let Some(name) = basename(&String::from_utf8_lossy(argv0)) {
            return name.to_string();
        }
    }

    fs::read_to_string(pid_dir.join("comm"))
        .map(|s| s.trim_end().to_string())
        .unwrap_or_default()
}

/// Map every socket inode visible under `proc_root` to its owning process.
///
/// Processes whose fd directory cannot be read (exited, other users) are
/// skipped.
fn socket_owners(proc_root: &Path) -> Result<HashMap<u64, Arc<ProcessIdentity>>> {
    let mut owners = HashMap::new();

    for entry in fs::read_dir(proc_root).map_err(Error::Io)? {
        let Ok(entry) = entry else { continue };
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };

        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };

        let mut identity: Option<Arc<ProcessIdentity>> = None;
        for fd in fds.flatten() {
            let Some(inode) = fs::read_link(fd.path()).ok().as_deref().and_then(socket_inode)
            else {
                continue;
            };

            let owner = identity.get_or_insert_with(|| {
                Arc::new(ProcessIdentity {
                    name: process_name(&entry.path()),
                    pid,
                })
            });
            owners.insert(inode, Arc::clone(owner));
        }
    }

    Ok(owners)
}

/// Process table built from procfs
#[derive(Debug)]
pub struct ProcfsTable {
    proc_root: PathBuf,
    tcp: RwLock<HashMap<TcpSession, Arc<ProcessIdentity>>>,
    udp: RwLock<HashMap<SocketAddrV4, Arc<ProcessIdentity>>>,
}

impl ProcfsTable {
    /// Empty table over `/proc`
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Empty table over an alternate procfs mount
    pub fn with_root<P: Into<PathBuf>>(proc_root: P) -> Self {
        Self {
            proc_root: proc_root.into(),
            tcp: RwLock::new(HashMap::new()),
            udp: RwLock::new(HashMap::new()),
        }
    }

    /// Table over `/proc`, populated once
    pub fn load() -> Result<Self> {
        let table = Self::new();
        table.actualize(true, true)?;
        Ok(table)
    }

    fn read_sockets(&self, name: &str) -> Result<Vec<SocketEntry>> {
        let content =
            fs::read_to_string(self.proc_root.join("net").join(name)).map_err(Error::Io)?;
        parse_socket_table(&content)
    }

    pub fn tcp_len(&self) -> usize {
        self.tcp.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn udp_len(&self) -> usize {
        self.udp.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for ProcfsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for ProcfsTable {
    fn lookup_tcp(&self, session: &TcpSession) -> Option<Arc<ProcessIdentity>> {
        self.tcp
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .cloned()
    }

    fn lookup_udp(&self, endpoint: SocketAddrV4) -> Option<Arc<ProcessIdentity>> {
        let udp = self.udp.read().unwrap_or_else(PoisonError::into_inner);
        udp.get(&endpoint)
            .or_else(|| udp.get(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, endpoint.port())))
            .cloned()
    }

    fn actualize(&self, refresh_tcp: bool, refresh_udp: bool) -> Result<()> {
        if !refresh_tcp && !refresh_udp {
            return Ok(());
        }

        let owners = socket_owners(&self.proc_root)?;

        if refresh_tcp {
            let table: HashMap<TcpSession, Arc<ProcessIdentity>> = self
                .read_sockets("tcp")?
                .into_iter()
                .filter_map(|s| {
                    let owner = owners.get(&s.inode)?;
                    Some((
                        TcpSession {
                            local: s.local,
                            remote: s.remote,
                        },
                        owner.clone(),
                    ))
                })
                .collect();
            trace!("TCP table rebuilt with {} sessions", table.len());
            *self.tcp.write().unwrap_or_else(PoisonError::into_inner) = table;
        }

        if refresh_udp {
            let table: HashMap<SocketAddrV4, Arc<ProcessIdentity>> = self
                .read_sockets("udp")?
                .into_iter()
                .filter_map(|s| Some((s.local, owners.get(&s.inode)?.clone())))
                .collect();
            trace!("UDP table rebuilt with {} endpoints", table.len());
            *self.udp.write().unwrap_or_else(PoisonError::into_inner) = table;
        }

        debug!(
            "Process table refreshed (tcp: {}, udp: {})",
            refresh_tcp, refresh_udp
        );
        Ok(())
    }
}
