//! Adapter bindings
//!
//! Joins host adapter descriptors with the capture layer's interface list and
//! freezes the addressing the rebind engine rewrites frames with.

use crate::capture::{AdapterHandle, CaptureInterface, WanType};
use crate::host::HostAdapter;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{info, warn};

/// Which side of the rebind an adapter is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Where the application's traffic would normally go
    Default,
    /// Where the application's traffic is moved to
    Rebind,
}

impl Role {
    /// Capture slot the role is filtered in
    pub fn slot(self) -> usize {
        match self {
            Role::Default => 0,
            Role::Rebind => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Default => write!(f, "default"),
            Role::Rebind => write!(f, "rebind"),
        }
    }
}

/// A host adapter pinned to a capture interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterBinding {
    pub role: Role,
    pub handle: AdapterHandle,
    pub interface_name: String,
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

/// Next hop of the rebind adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayBinding {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// Find the capture interface backing a host adapter.
///
/// PPP adapters are matched by address against the interface's virtual-link
/// endpoints. Other adapters match when the interface name contains the
/// adapter name; an exact name match wins over a substring match.
pub fn find_capture_interface<'a>(
    interfaces: &'a [CaptureInterface],
    adapter: &HostAdapter,
) -> Option<&'a CaptureInterface> {
    if adapter.is_ppp() {
        return interfaces.iter().find(|iface| {
            iface
                .virtual_links
                .as_ref()
                .is_some_and(|links| links.iter().any(|ip| adapter.has_address(*ip)))
        });
    }

    interfaces
        .iter()
        .find(|iface| iface.internal_name == adapter.adapter_name)
        .or_else(|| {
            interfaces
                .iter()
                .find(|iface| iface.internal_name.contains(&adapter.adapter_name))
        })
}

fn missing(role: Role, what: &'static str) -> Error {
    Error::MissingAddress {
        role: role.to_string(),
        what,
    }
}

/// Everything the rebind engine needs to rewrite frames. Built once before
/// filtering starts and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebindConfig {
    default: AdapterBinding,
    rebind: AdapterBinding,
    gateway: GatewayBinding,
    application: String,
}

impl RebindConfig {
    pub fn new(
        default: AdapterBinding,
        rebind: AdapterBinding,
        gateway: GatewayBinding,
        application: impl Into<String>,
    ) -> Self {
        Self {
            default,
            rebind,
            gateway,
            application: application.into(),
        }
    }

    /// Resolve both adapters against the capture interfaces.
    ///
    /// Either every binding resolves or an error naming the failing adapter
    /// is returned.
    pub fn resolve(
        interfaces: &[CaptureInterface],
        default_adapter: &HostAdapter,
        rebind_adapter: &HostAdapter,
        application: &str,
    ) -> Result<Self> {
        let default_if = find_capture_interface(interfaces, default_adapter).ok_or_else(|| {
            Error::AdapterNotFound {
                role: Role::Default.to_string(),
            }
        })?;

        let rebind_if = find_capture_interface(interfaces, rebind_adapter).ok_or_else(|| {
            Error::AdapterNotFound {
                role: Role::Rebind.to_string(),
            }
        })?;

        if rebind_if.wan_type != WanType::None {
            return Err(Error::UnsupportedTunnel {
                name: rebind_if.internal_name.clone(),
            });
        }

        if default_if.wan_type != WanType::None {
            warn!(
                "Default interface {} has no link-layer header, its frames will not be rebound",
                default_if.internal_name
            );
        }

        let gateway = rebind_adapter
            .last_gateway()
            .ok_or_else(|| missing(Role::Rebind, "IPv4 gateway"))?;
        let gateway = GatewayBinding {
            ip: gateway.ip,
            mac: gateway
                .hw_address
                .ok_or_else(|| missing(Role::Rebind, "resolved gateway hardware address"))?,
        };

        let rebind_ip = rebind_adapter
            .last_unicast()
            .ok_or_else(|| missing(Role::Rebind, "IPv4 address"))?;
        let default_ip = default_adapter
            .last_unicast()
            .ok_or_else(|| missing(Role::Default, "IPv4 address"))?;

        let config = Self::new(
            AdapterBinding {
                role: Role::Default,
                handle: default_if.handle,
                interface_name: default_if.internal_name.clone(),
                mac: default_if.hw_address,
                ip: default_ip,
            },
            AdapterBinding {
                role: Role::Rebind,
                handle: rebind_if.handle,
                interface_name: rebind_if.internal_name.clone(),
                mac: rebind_if.hw_address,
                ip: rebind_ip,
            },
            gateway,
            application,
        );

        info!(
            "Rebinding '{}' from {} ({}) to {} ({}) via {}",
            config.application,
            config.default.interface_name,
            config.default.ip,
            config.rebind.interface_name,
            config.rebind.ip,
            config.gateway.ip
        );

        Ok(config)
    }

    pub fn default_binding(&self) -> &AdapterBinding {
        &self.default
    }

    pub fn rebind_binding(&self) -> &AdapterBinding {
        &self.rebind
    }

    pub fn binding(&self, role: Role) -> &AdapterBinding {
        match role {
            Role::Default => &self.default,
            Role::Rebind => &self.rebind,
        }
    }

    pub fn gateway(&self) -> &GatewayBinding {
        &self.gateway
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Case-sensitive substring match of a process name against the target
    pub fn matches_application(&self, process_name: &str) -> bool {
        process_name.contains(&self.application)
    }
}

impl fmt::Display for RebindConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rebind parameters:")?;
        writeln!(f)?;
        writeln!(f, "Application name: {}", self.application)?;
        writeln!(f, "Rebind adapter source MAC: {}", self.rebind.mac)?;
        writeln!(f, "Default adapter source MAC: {}", self.default.mac)?;
        writeln!(f, "Rebind adapter gateway MAC: {}", self.gateway.mac)?;
        writeln!(f, "Rebind adapter source IP address: {}", self.rebind.ip)?;
        writeln!(f, "Default adapter source IP address: {}", self.default.ip)
    }
}
