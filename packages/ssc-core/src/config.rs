//! Core configuration.
//!
//! [`Config`] carries the protocol constants and timeouts shared by the
//! transports, the managed connections and the discovery engine. All fields
//! have defaults matching the reference device behaviour.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Well-known SSC port shared by the TCP and UDP transports.
pub const SSC_PORT: u16 = 45;

/// DNS-SD service type advertised by devices that accept SSC over TCP.
pub const TCP_SERVICE_TYPE: &str = "_ssc._tcp.local.";

/// DNS-SD service type advertised by devices that accept SSC over UDP.
pub const UDP_SERVICE_TYPE: &str = "_ssc._udp.local.";

/// Address family used for discovery and device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4 addresses.
    Ipv4,
    /// IPv6 addresses (SSC devices are addressed by global IPv6).
    #[default]
    Ipv6,
}

impl AddressFamily {
    /// Returns true if `ip` belongs to this family.
    pub fn matches(self, ip: &std::net::IpAddr) -> bool {
        match self {
            Self::Ipv4 => ip.is_ipv4(),
            Self::Ipv6 => ip.is_ipv6(),
        }
    }
}

/// Configuration for the SSC core.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Port used by both transports.
    pub ssc_port: u16,

    /// Close a managed connection after this many seconds without activity.
    pub idle_timeout_secs: u64,

    /// Upper bound on TCP connection setup (milliseconds).
    pub connect_timeout_ms: u64,

    /// Upper bound on a single request/response round trip (milliseconds).
    pub request_timeout_ms: u64,

    /// Default duration of a discovery run (milliseconds).
    pub discovery_timeout_ms: u64,

    /// Address family to discover and connect over.
    pub address_family: AddressFamily,

    /// Service type browsed for TCP-capable devices.
    pub tcp_service_type: String,

    /// Service type browsed for UDP-capable devices.
    pub udp_service_type: String,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ssc_port == 0 {
            return Err("ssc_port must be >= 1".to_string());
        }
        if self.idle_timeout_secs == 0 {
            return Err("idle_timeout_secs must be >= 1".to_string());
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err("request and connect timeouts must be >= 1ms".to_string());
        }
        if self.tcp_service_type == self.udp_service_type {
            return Err("tcp_service_type and udp_service_type must differ".to_string());
        }
        for ty in [&self.tcp_service_type, &self.udp_service_type] {
            // mdns-sd requires the fully qualified form with trailing dot
            if !ty.ends_with(".local.") {
                return Err(format!("service type {:?} must end with \".local.\"", ty));
            }
        }
        Ok(())
    }

    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Discovery run duration as a [`Duration`].
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssc_port: SSC_PORT,
            idle_timeout_secs: 30,
            connect_timeout_ms: 5000,
            request_timeout_ms: 3000,
            discovery_timeout_ms: 10_000,
            address_family: AddressFamily::Ipv6,
            tcp_service_type: TCP_SERVICE_TYPE.to_string(),
            udp_service_type: UDP_SERVICE_TYPE.to_string(),
        }
    }
}
