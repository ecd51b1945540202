//! Linux adapter enumeration
//!
//! - `/sys/class/net/<if>/{ifindex,address,type}` for link properties
//! - `getifaddrs(3)` for IPv4 addresses
//! - `/proc/net/route` for routes and gateways
//! - `/proc/net/arp` for gateway hardware addresses

use super::{AdapterEnumerator, Gateway, HostAdapter, IfType, Route, RoutingTable};
use crate::capture::{AdapterHandle, CaptureInterface, WanType};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::ffi::CStr;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SYSFS_NET: &str = "/sys/class/net";
pub const PROC_ROOT: &str = "/proc";

// ARPHRD_* from <linux/if_arp.h>
const ARPHRD_ETHER: u16 = 1;
const ARPHRD_PPP: u16 = 512;
const ARPHRD_TUNNEL: u16 = 768;
const ARPHRD_LOOPBACK: u16 = 772;
const ARPHRD_SIT: u16 = 776;
const ARPHRD_IPGRE: u16 = 778;
const ARPHRD_NONE: u16 = 65534;

const RTF_UP: u16 = 0x0001;
const RTF_GATEWAY: u16 = 0x0002;

/// ARP entry is complete
const ATF_COM: u16 = 0x02;

/// Link properties of one interface as exposed by sysfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsInterface {
    pub name: String,
    pub ifindex: u32,
    pub address: MacAddr,
    /// ARPHRD_* link type
    pub arphrd: u16,
    pub wireless: bool,
    pub driver: Option<String>,
}

impl SysfsInterface {
    pub fn if_type(&self) -> IfType {
        match self.arphrd {
            ARPHRD_ETHER if self.wireless => IfType::Wireless,
            ARPHRD_ETHER => IfType::Ethernet,
            ARPHRD_PPP => IfType::Ppp,
            ARPHRD_LOOPBACK => IfType::Loopback,
            ARPHRD_TUNNEL | ARPHRD_SIT | ARPHRD_IPGRE | ARPHRD_NONE => IfType::Tunnel,
            other => IfType::Other(other),
        }
    }

    pub fn wan_type(&self) -> WanType {
        match self.if_type() {
            IfType::Ppp => WanType::Ip,
            IfType::Tunnel => WanType::Tunnel,
            _ => WanType::None,
        }
    }

    fn description(&self) -> String {
        match &self.driver {
            Some(driver) => format!("{} ({})", self.if_type(), driver),
            None => self.if_type().to_string(),
        }
    }
}

fn read_trimmed(path: &Path) -> Result<String> {
    Ok(fs::read_to_string(path)
        .map_err(Error::Io)?
        .trim()
        .to_string())
}

fn read_interface(dir: &Path, name: String) -> Result<SysfsInterface> {
    let ifindex = read_trimmed(&dir.join("ifindex"))?
        .parse()
        .map_err(|_| Error::Parse(format!("{}: invalid ifindex", name)))?;

    let arphrd = read_trimmed(&dir.join("type"))?
        .parse()
        .map_err(|_| Error::Parse(format!("{}: invalid link type", name)))?;

    // Point-to-point links have an empty address
    let address = read_trimmed(&dir.join("address"))
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(MacAddr::ZERO);

    let wireless = dir.join("wireless").exists() || dir.join("phy80211").exists();

    let driver = fs::read_link(dir.join("device").join("driver"))
        .ok()
        .and_then(|link| link.file_name().map(|n| n.to_string_lossy().into_owned()));

    Ok(SysfsInterface {
        name,
        ifindex,
        address,
        arphrd,
        wireless,
        driver,
    })
}

/// Read every interface under a sysfs `class/net` directory, ordered by ifindex
pub fn read_sysfs_interfaces(root: &Path) -> Result<Vec<SysfsInterface>> {
    let mut interfaces = Vec::new();

    for entry in fs::read_dir(root).map_err(Error::Io)? {
        let entry = entry.map_err(Error::Io)?;
        let name = entry.file_name().to_string_lossy().into_owned();

        match read_interface(&entry.path(), name.clone()) {
            Ok(iface) => interfaces.push(iface),
            Err(e) => debug!("Skipping interface {}: {}", name, e),
        }
    }

    interfaces.sort_by_key(|i| i.ifindex);
    Ok(interfaces)
}

/// IPv4 addresses per interface, in `getifaddrs` order
pub fn ipv4_addresses() -> Result<Vec<(String, Vec<Ipv4Addr>)>> {
    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    let mut pairs = Vec::new();
    let mut cursor = ifap;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_name.is_null() {
            continue;
        }
        if i32::from(unsafe { (*entry.ifa_addr).sa_family }) != libc::AF_INET {
            continue;
        }

        let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();
        pairs.push((name, ip));
    }

    unsafe { libc::freeifaddrs(ifap) };
    Ok(group_addresses(pairs))
}

/// Group (label, address) pairs by interface. Alias labels such as
/// `eth0:1` are folded into their interface.
fn group_addresses(
    pairs: impl IntoIterator<Item = (String, Ipv4Addr)>,
) -> Vec<(String, Vec<Ipv4Addr>)> {
    let mut grouped: Vec<(String, Vec<Ipv4Addr>)> = Vec::new();

    for (label, ip) in pairs {
        let name = label.split(':').next().unwrap_or(&label).to_string();
        match grouped.iter_mut().find(|(n, _)| *n == name) {
            Some((_, addrs)) => addrs.push(ip),
            None => grouped.push((name, vec![ip])),
        }
    }

    grouped
}

fn addresses_of<'a>(addrs: &'a [(String, Vec<Ipv4Addr>)], name: &str) -> &'a [Ipv4Addr] {
    addrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, a)| a.as_slice())
        .unwrap_or(&[])
}

/// Join sysfs link data with interface addresses into the capture layer's
/// interface list
pub fn build_capture_interfaces(
    sysfs: &[SysfsInterface],
    addrs: &[(String, Vec<Ipv4Addr>)],
) -> Vec<CaptureInterface> {
    sysfs
        .iter()
        .map(|iface| {
            let wan_type = iface.wan_type();
            let virtual_links = match wan_type {
                WanType::Ip => Some(addresses_of(addrs, &iface.name).to_vec()),
                _ => None,
            };

            CaptureInterface {
                handle: AdapterHandle(iface.ifindex),
                internal_name: iface.name.clone(),
                hw_address: iface.address,
                virtual_links,
                wan_type,
            }
        })
        .collect()
}

/// Interfaces of this host as seen by the AF_PACKET engine
pub fn capture_interfaces() -> Result<Vec<CaptureInterface>> {
    let sysfs = read_sysfs_interfaces(Path::new(SYSFS_NET))?;
    let addrs = ipv4_addresses()?;
    Ok(build_capture_interfaces(&sysfs, &addrs))
}

/// Parse an address field of /proc/net/route, printed as the kernel's
/// native-endian hex of the network-order word
fn parse_hex_ipv4(field: &str) -> Result<Ipv4Addr> {
    let value = u32::from_str_radix(field, 16)
        .map_err(|_| Error::Parse(format!("invalid route address: {}", field)))?;
    Ok(Ipv4Addr::from(value.to_ne_bytes()))
}

/// Parse /proc/net/route
///
/// ```text
/// Iface  Destination  Gateway   Flags  RefCnt  Use  Metric  Mask      MTU  Window  IRTT
/// eth0   00000000     0101A8C0  0003   0       0    100     00000000  0    0       0
/// ```
pub fn parse_route_table(content: &str) -> Result<RoutingTable> {
    let mut table = RoutingTable::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 8 {
            return Err(Error::Parse(format!("short route entry: {}", line)));
        }

        let flags = u16::from_str_radix(fields[3], 16)
            .map_err(|_| Error::Parse(format!("invalid route flags: {}", fields[3])))?;
        if flags & RTF_UP == 0 {
            continue;
        }

        let gateway = parse_hex_ipv4(fields[2])?;
        let next_hop = (flags & RTF_GATEWAY != 0 && !gateway.is_unspecified()).then_some(gateway);

        let metric = fields[6]
            .parse()
            .map_err(|_| Error::Parse(format!("invalid route metric: {}", fields[6])))?;
        let mask = parse_hex_ipv4(fields[7])?;

        table.add(Route {
            destination: parse_hex_ipv4(fields[1])?,
            prefix_len: u32::from(mask).count_ones() as u8,
            next_hop,
            interface: fields[0].to_string(),
            metric,
        });
    }

    Ok(table)
}

/// Resolved entry of the neighbour cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub hw_address: MacAddr,
    pub device: String,
}

/// Parse /proc/net/arp, keeping complete entries only
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         02:00:00:00:00:01     *        eth0
/// ```
pub fn parse_arp_table(content: &str) -> Vec<ArpEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }

            let flags = u16::from_str_radix(fields[2].trim_start_matches("0x"), 16).ok()?;
            if flags & ATF_COM == 0 {
                return None;
            }

            let hw_address: MacAddr = fields[3].parse().ok()?;
            if hw_address.is_zero() {
                return None;
            }

            Some(ArpEntry {
                ip: fields[0].parse().ok()?,
                hw_address,
                device: fields[5].to_string(),
            })
        })
        .collect()
}

/// Assemble adapter descriptors. Loopback and address-less interfaces are
/// left out.
pub fn build_adapters(
    sysfs: &[SysfsInterface],
    addrs: &[(String, Vec<Ipv4Addr>)],
    routes: &RoutingTable,
    arp: &[ArpEntry],
) -> Vec<HostAdapter> {
    sysfs
        .iter()
        .filter(|iface| iface.if_type() != IfType::Loopback)
        .filter_map(|iface| {
            let unicast = addresses_of(addrs, &iface.name).to_vec();
            if unicast.is_empty() {
                return None;
            }

            let mut gateways: Vec<Gateway> = Vec::new();
            for route in routes.routes() {
                let Some(ip) = route.next_hop else {
                    continue;
                };
                if route.interface != iface.name
                    || !route.is_default()
                    || gateways.iter().any(|g| g.ip == ip)
                {
                    continue;
                }

                let hw_address = arp
                    .iter()
                    .find(|e| e.ip == ip && e.device == iface.name)
                    .map(|e| e.hw_address);
                gateways.push(Gateway { ip, hw_address });
            }

            Some(HostAdapter {
                adapter_name: iface.name.clone(),
                friendly_name: iface.name.clone(),
                description: iface.description(),
                if_type: iface.if_type(),
                unicast,
                gateways,
            })
        })
        .collect()
}

/// Adapter enumeration backed by sysfs, procfs and getifaddrs
#[derive(Debug, Clone)]
pub struct LinuxAdapters {
    sysfs_root: PathBuf,
    proc_root: PathBuf,
}

impl LinuxAdapters {
    pub fn new() -> Self {
        Self::with_roots(SYSFS_NET, PROC_ROOT)
    }

    /// Read sysfs and procfs from alternate mount points
    pub fn with_roots<S: Into<PathBuf>, P: Into<PathBuf>>(sysfs_root: S, proc_root: P) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            proc_root: proc_root.into(),
        }
    }

    fn routes(&self) -> Result<RoutingTable> {
        let content =
            fs::read_to_string(self.proc_root.join("net/route")).map_err(Error::Io)?;
        parse_route_table(&content)
    }

    fn arp(&self) -> Vec<ArpEntry> {
        fs::read_to_string(self.proc_root.join("net/arp"))
            .map(|content| parse_arp_table(&content))
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Result<(Vec<HostAdapter>, RoutingTable)> {
        let sysfs = read_sysfs_interfaces(&self.sysfs_root)?;
        let addrs = ipv4_addresses()?;
        let routes = self.routes()?;
        let adapters = build_adapters(&sysfs, &addrs, &routes, &self.arp());
        Ok((adapters, routes))
    }
}

impl Default for LinuxAdapters {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterEnumerator for LinuxAdapters {
    fn adapters(&self) -> Result<Vec<HostAdapter>> {
        Ok(self.snapshot()?.0)
    }

    fn best_adapter(&self, probe: Ipv4Addr) -> Result<Option<HostAdapter>> {
        let (adapters, routes) = self.snapshot()?;
        Ok(routable(adapters, &routes, probe).into_iter().next())
    }

    fn routable_adapters(&self, probe: Ipv4Addr) -> Result<Vec<HostAdapter>> {
        let (adapters, routes) = self.snapshot()?;
        Ok(routable(adapters, &routes, probe))
    }
}

/// Adapters holding a route to `probe`, ordered like the routes
fn routable(adapters: Vec<HostAdapter>, routes: &RoutingTable, probe: Ipv4Addr) -> Vec<HostAdapter> {
    let mut result: Vec<HostAdapter> = Vec::new();

    for route in routes.matching(probe) {
        if result.iter().any(|a| a.adapter_name == route.interface) {
            continue;
        }
        if let Some(adapter) = adapters.iter().find(|a| a.adapter_name == route.interface) {
            result.push(adapter.clone());
        }
    }

    result
}
