//! Host network adapters
//!
//! Describes the adapters of the machine in OS terms (names, addresses,
//! gateways) and answers "which adapter reaches this destination" queries.
//! The capture layer has its own view of the same interfaces; the binding
//! resolver joins the two.

pub mod linux;
mod route;

pub use linux::LinuxAdapters;
pub use route::{Route, RoutingTable};

use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;

/// Link type of a host adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfType {
    Ethernet,
    Wireless,
    /// Point-to-point protocol link (dial-up, PPPoE, mobile broadband)
    Ppp,
    Loopback,
    Tunnel,
    Other(u16),
}

impl fmt::Display for IfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IfType::Ethernet => write!(f, "Ethernet"),
            IfType::Wireless => write!(f, "Wireless"),
            IfType::Ppp => write!(f, "PPP"),
            IfType::Loopback => write!(f, "Loopback"),
            IfType::Tunnel => write!(f, "Tunnel"),
            IfType::Other(t) => write!(f, "type {}", t),
        }
    }
}

/// A gateway of an adapter and, when known, its link-layer address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    pub ip: Ipv4Addr,
    pub hw_address: Option<MacAddr>,
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hw_address {
            Some(mac) => write!(f, "{} : {}", self.ip, mac),
            None => write!(f, "{} : (unresolved)", self.ip),
        }
    }
}

/// Host adapter descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAdapter {
    /// OS name the capture layer's interface names are matched against
    pub adapter_name: String,
    pub friendly_name: String,
    pub description: String,
    pub if_type: IfType,
    /// IPv4 unicast addresses in enumeration order
    pub unicast: Vec<Ipv4Addr>,
    pub gateways: Vec<Gateway>,
}

impl HostAdapter {
    pub fn is_ppp(&self) -> bool {
        self.if_type == IfType::Ppp
    }

    pub fn has_address(&self, ip: Ipv4Addr) -> bool {
        self.unicast.contains(&ip)
    }

    /// The address used as the adapter's source address
    pub fn last_unicast(&self) -> Option<Ipv4Addr> {
        self.unicast.last().copied()
    }

    /// The gateway used as the adapter's next hop
    pub fn last_gateway(&self) -> Option<&Gateway> {
        self.gateways.last()
    }
}

impl fmt::Display for HostAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\t{}\t:\t{}", self.friendly_name, self.description)?;
        for ip in &self.unicast {
            writeln!(f, "\t\t{}", ip)?;
        }
        writeln!(f, "\tGateway:")?;
        for gw in &self.gateways {
            writeln!(f, "\t\t{}", gw)?;
        }
        Ok(())
    }
}

/// Source of host adapter descriptors and route queries
pub trait AdapterEnumerator {
    /// All adapters with at least one IPv4 address
    fn adapters(&self) -> Result<Vec<HostAdapter>>;

    /// The adapter the host would use to reach `probe`
    fn best_adapter(&self, probe: Ipv4Addr) -> Result<Option<HostAdapter>>;

    /// Every adapter with a route to `probe`, best first
    fn routable_adapters(&self, probe: Ipv4Addr) -> Result<Vec<HostAdapter>>;

    /// Look an adapter up by OS name or friendly name
    fn adapter(&self, name: &str) -> Result<HostAdapter> {
        self.adapters()?
            .into_iter()
            .find(|a| a.adapter_name == name || a.friendly_name == name)
            .ok_or_else(|| Error::InterfaceNotFound {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_adapter() -> HostAdapter {
        HostAdapter {
            adapter_name: "wlan0".to_string(),
            friendly_name: "wlan0".to_string(),
            description: "Wireless (iwlwifi)".to_string(),
            if_type: IfType::Wireless,
            unicast: vec![Ipv4Addr::new(192, 168, 1, 9), Ipv4Addr::new(192, 168, 1, 10)],
            gateways: vec![Gateway {
                ip: Ipv4Addr::new(192, 168, 1, 1),
                hw_address: Some(MacAddr([0x02, 0, 0, 0, 0, 0x01])),
            }],
        }
    }

    #[test]
    fn test_last_address_and_gateway() {
        let adapter = make_adapter();
        assert_eq!(adapter.last_unicast(), Some(Ipv4Addr::new(192, 168, 1, 10)));
        assert_eq!(
            adapter.last_gateway().map(|g| g.ip),
            Some(Ipv4Addr::new(192, 168, 1, 1))
        );
        assert!(adapter.has_address(Ipv4Addr::new(192, 168, 1, 9)));
        assert!(!adapter.is_ppp());
    }

    #[test]
    fn test_display_listing() {
        let text = make_adapter().to_string();
        assert!(text.starts_with("\twlan0\t:\tWireless (iwlwifi)\n"));
        assert!(text.contains("\t\t192.168.1.9\n"));
        assert!(text.contains("\tGateway:\n"));
        assert!(text.contains("\t\t192.168.1.1 : 02:00:00:00:00:01\n"));
    }

    struct Fixed(Vec<HostAdapter>);

    impl AdapterEnumerator for Fixed {
        fn adapters(&self) -> Result<Vec<HostAdapter>> {
            Ok(self.0.clone())
        }

        fn best_adapter(&self, _probe: Ipv4Addr) -> Result<Option<HostAdapter>> {
            Ok(self.0.first().cloned())
        }

        fn routable_adapters(&self, _probe: Ipv4Addr) -> Result<Vec<HostAdapter>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_adapter_by_name() {
        let enumerator = Fixed(vec![make_adapter()]);
        assert_eq!(enumerator.adapter("wlan0").unwrap().adapter_name, "wlan0");
        assert!(matches!(
            enumerator.adapter("eth7"),
            Err(Error::InterfaceNotFound { name }) if name == "eth7"
        ));
    }
}
