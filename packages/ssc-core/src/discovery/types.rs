//! Shared types for SSC device discovery.

use std::net::{IpAddr, Ipv6Addr};

use thiserror::Error;

use crate::config::AddressFamily;
use crate::device::Capability;

/// Errors that can occur while starting discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The platform denied the multicast capability.
    #[error("multicast unavailable: {0}")]
    Multicast(String),

    /// The mDNS daemon could not be created or configured.
    #[error("mDNS daemon error: {0}")]
    MdnsDaemon(String),
}

/// Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// One resolved service announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// DNS-SD instance name, for logging.
    pub name: String,
    /// Capability implied by the service type that resolved.
    pub capability: Capability,
    /// Every address in the resolved records.
    pub addresses: Vec<IpAddr>,
}

/// Returns true for IPv6 `fe80::/10` and IPv4 `169.254.0.0/16` addresses.
pub fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => is_link_local_v6(v6),
    }
}

fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Returns true if `ip` can identify a device on the network.
fn is_routable(ip: &IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified() && !is_link_local(ip)
}

/// Picks the first routable address of `family` from a resolution.
pub fn first_routable_address(addresses: &[IpAddr], family: AddressFamily) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|ip| family.matches(ip) && is_routable(ip))
        .copied()
}

/// Picks the address discovery listens on for each usable interface.
///
/// An interface is usable when it carries a routable address of `family`;
/// the first such address represents it. Interfaces that only carry
/// link-local or loopback addresses are dropped. Interfaces keep the order in
/// which they first appear.
pub fn usable_interface_addresses(
    interfaces: &[(String, IpAddr)],
    family: AddressFamily,
) -> Vec<IpAddr> {
    let mut chosen: Vec<(&str, IpAddr)> = Vec::new();
    for (name, ip) in interfaces {
        if !family.matches(ip) || !is_routable(ip) {
            log::trace!("[Discovery] Skipping {} address {}", name, ip);
            continue;
        }
        if chosen.iter().any(|(seen, _)| *seen == name.as_str()) {
            log::trace!("[Discovery] {} already represented, skipping {}", name, ip);
            continue;
        }
        chosen.push((name.as_str(), *ip));
    }
    chosen.into_iter().map(|(_, ip)| ip).collect()
}
