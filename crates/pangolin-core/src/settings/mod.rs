//! Network settings distributed to the platform VPN layer
//!
//! The backend computes [`NetworkSettings`] whenever routing state changes and
//! commits them to the [`NetworkSettingsStore`] under a new version. The
//! platform side polls the version and fetches the full payload only when it
//! moved, see [`SettingsPoller`].

pub mod poller;
pub mod store;

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub use poller::SettingsPoller;
pub use store::{NetworkSettingsStore, SettingsSnapshot};

/// IPv4 route pushed to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Route {
    /// Destination network address
    pub destination_address: String,

    /// Dotted-quad subnet mask
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_mask: Option<String>,

    /// Next hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_address: Option<String>,

    /// Route is the default route
    #[serde(default)]
    pub is_default: bool,
}

impl Ipv4Route {
    /// Prefix length derived from the subnet mask
    ///
    /// A missing or unparsable mask is a host route (32).
    #[must_use]
    pub fn prefix_length(&self) -> u8 {
        self.subnet_mask
            .as_deref()
            .map_or(32, subnet_mask_to_prefix_length)
    }

    /// Whether applying this route captures all IPv4 traffic
    #[must_use]
    pub fn captures_default(&self) -> bool {
        self.is_default || self.prefix_length() == 0
    }
}

/// IPv6 route pushed to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Route {
    /// Destination network address
    pub destination_address: String,

    /// Network prefix length
    #[serde(default)]
    pub network_prefix_length: u8,

    /// Next hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_address: Option<String>,

    /// Route is the default route
    #[serde(default)]
    pub is_default: bool,
}

impl Ipv6Route {
    /// Prefix length used when installing the route (0 means host route)
    #[must_use]
    pub fn effective_prefix_length(&self) -> u8 {
        if self.network_prefix_length > 0 {
            self.network_prefix_length
        } else {
            128
        }
    }
}

/// Convert a dotted-quad subnet mask to a prefix length
///
/// Counts set bits, so `255.255.255.0` yields 24. Unparsable masks yield 32.
#[must_use]
pub fn subnet_mask_to_prefix_length(mask: &str) -> u8 {
    mask.trim()
        .parse::<Ipv4Addr>()
        .map_or(32, |addr| u32::from(addr).count_ones() as u8)
}

/// Network configuration for the tunnel interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Remote tunnel address shown by the platform
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_remote_address: Option<String>,

    /// Interface MTU
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,

    /// Resolvers to install
    pub dns_servers: Vec<String>,

    /// Interface IPv4 addresses
    pub ipv4_addresses: Vec<String>,

    /// Subnet mask per IPv4 address (same index)
    pub ipv4_subnet_masks: Vec<String>,

    /// IPv4 routes sent through the tunnel
    pub ipv4_included_routes: Vec<Ipv4Route>,

    /// IPv4 routes kept outside the tunnel
    pub ipv4_excluded_routes: Vec<Ipv4Route>,

    /// Interface IPv6 addresses
    pub ipv6_addresses: Vec<String>,

    /// Prefix length per IPv6 address (same index, decimal strings)
    pub ipv6_network_prefixes: Vec<String>,

    /// IPv6 routes sent through the tunnel
    pub ipv6_included_routes: Vec<Ipv6Route>,

    /// IPv6 routes kept outside the tunnel
    pub ipv6_excluded_routes: Vec<Ipv6Route>,
}

impl NetworkSettings {
    /// Whether any included route captures all traffic
    #[must_use]
    pub fn has_default_route(&self) -> bool {
        self.ipv4_included_routes.iter().any(Ipv4Route::captures_default)
            || self.ipv6_included_routes.iter().any(|r| r.is_default)
    }

    /// IPv4 interface addresses paired with their prefix lengths
    ///
    /// Addresses without a matching mask are host addresses (/32).
    #[must_use]
    pub fn ipv4_interface_addresses(&self) -> Vec<(String, u8)> {
        self.ipv4_addresses
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                let prefix = self
                    .ipv4_subnet_masks
                    .get(i)
                    .map_or(32, |m| subnet_mask_to_prefix_length(m));
                (addr.clone(), prefix)
            })
            .collect()
    }

    /// IPv6 interface addresses paired with their prefix lengths
    ///
    /// Addresses without a parsable prefix are host addresses (/128).
    #[must_use]
    pub fn ipv6_interface_addresses(&self) -> Vec<(String, u8)> {
        self.ipv6_addresses
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                let prefix = self
                    .ipv6_network_prefixes
                    .get(i)
                    .and_then(|p| p.trim().parse::<u8>().ok())
                    .filter(|p| *p <= 128)
                    .unwrap_or(128);
                (addr.clone(), prefix)
            })
            .collect()
    }

    /// Merge a control-plane update into these settings
    ///
    /// Addresses and routes are appended without duplicates; scalar fields and
    /// the DNS list are replaced when the update carries them.
    pub fn apply(&mut self, update: NetworkUpdate) {
        if let Some(mtu) = update.mtu {
            self.mtu = Some(mtu);
        }
        if let Some(dns) = update.dns_servers {
            self.dns_servers = dns;
        }
        for (addr, mask) in update.ipv4_addresses {
            if !self.ipv4_addresses.contains(&addr) {
                self.ipv4_addresses.push(addr);
                self.ipv4_subnet_masks.push(mask);
            }
        }
        for (addr, prefix) in update.ipv6_addresses {
            if !self.ipv6_addresses.contains(&addr) {
                self.ipv6_addresses.push(addr);
                self.ipv6_network_prefixes.push(prefix.to_string());
            }
        }
        merge_unique(&mut self.ipv4_included_routes, update.ipv4_included_routes);
        merge_unique(&mut self.ipv4_excluded_routes, update.ipv4_excluded_routes);
        merge_unique(&mut self.ipv6_included_routes, update.ipv6_included_routes);
        merge_unique(&mut self.ipv6_excluded_routes, update.ipv6_excluded_routes);
    }
}

fn merge_unique<T: PartialEq>(into: &mut Vec<T>, items: Vec<T>) {
    for item in items {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

/// Routing change pushed by the control plane while the tunnel runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkUpdate {
    /// Replacement MTU
    pub mtu: Option<u16>,
    /// Replacement resolver list
    pub dns_servers: Option<Vec<String>>,
    /// IPv4 addresses with dotted-quad masks
    pub ipv4_addresses: Vec<(String, String)>,
    /// IPv6 addresses with prefix lengths
    pub ipv6_addresses: Vec<(String, u8)>,
    /// IPv4 routes to add to the tunnel
    pub ipv4_included_routes: Vec<Ipv4Route>,
    /// IPv4 routes to keep outside the tunnel
    pub ipv4_excluded_routes: Vec<Ipv4Route>,
    /// IPv6 routes to add to the tunnel
    pub ipv6_included_routes: Vec<Ipv6Route>,
    /// IPv6 routes to keep outside the tunnel
    pub ipv6_excluded_routes: Vec<Ipv6Route>,
}
