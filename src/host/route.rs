//! Host routing table snapshot

use std::net::Ipv4Addr;

/// Route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network
    pub destination: Ipv4Addr,
    /// Network prefix length
    pub prefix_len: u8,
    /// Next hop (None for directly connected)
    pub next_hop: Option<Ipv4Addr>,
    /// Outgoing interface name
    pub interface: String,
    /// Route metric
    pub metric: u32,
}

impl Route {
    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = if self.prefix_len == 0 {
            0
        } else {
            !0u32 << (32 - u32::from(self.prefix_len.min(32)))
        };

        (u32::from(addr) & mask) == (u32::from(self.destination) & mask)
    }
}

/// Routing table ordered for longest prefix match, lowest metric first among
/// equal prefixes
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Add a route
    pub fn add(&mut self, route: Route) {
        // Several interfaces may carry the same prefix (multiple default routes)
        self.routes.retain(|r| {
            r.destination != route.destination
                || r.prefix_len != route.prefix_len
                || r.interface != route.interface
        });

        self.routes.push(route);

        self.routes.sort_by(|a, b| {
            b.prefix_len
                .cmp(&a.prefix_len)
                .then(a.metric.cmp(&b.metric))
        });
    }

    /// Lookup route using longest prefix match
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&Route> {
        self.matching(addr).next()
    }

    /// Every route covering `addr`, best first
    pub fn matching(&self, addr: Ipv4Addr) -> impl Iterator<Item = &Route> {
        self.routes.iter().filter(move |r| r.contains(addr))
    }

    /// Get all routes
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<Route> for RoutingTable {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        let mut table = RoutingTable::new();
        for route in iter {
            table.add(route);
        }
        table
    }
}
