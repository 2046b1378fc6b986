//! SSC Core - discovery and control of SSC audio devices.
//!
//! SSC devices expose their configuration as a tree of dot-separated paths
//! (`device.identity.vendor`, `audio.out.level`) that is read and written
//! with nested JSON messages over TCP or UDP port 45. Devices announce
//! themselves over DNS-SD as `_ssc._tcp` and/or `_ssc._udp`.
//!
//! # Architecture
//!
//! - [`codec`]: path validation, envelope wrap/unwrap
//! - [`transport`]: TCP line and UDP datagram transports
//! - [`connection`]: managed connection with lazy connect, auto-reconnect and
//!   idle disconnect; the request-level [`SscConnection`] protocol
//! - [`device`]: device records and per-device sessions
//! - [`schema`]: schema walker and value limits
//! - [`discovery`]: bounded-time mDNS discovery engine
//! - [`volume`]: volume forwarding to a set of devices
//! - [`events`]: domain events and the emitter abstraction
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TransportConnector`](transport::TransportConnector): opening transports
//! - [`BrowseBackend`](discovery::BrowseBackend): service browsing
//! - [`MulticastLock`](multicast::MulticastLock): platform multicast grant
//! - [`EventEmitter`](events::EventEmitter): emitting domain events
//!
//! Each trait has a default implementation for desktop and server hosts.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod connection;
pub mod device;
pub mod discovery;
pub mod error;
pub mod events;
pub mod multicast;
pub mod schema;
pub mod transport;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types at the crate root
pub use codec::{unwrap, wrap, ConfigPath};
pub use config::{AddressFamily, Config};
pub use connection::{ConnectionGuard, ManagedConnection, SscConnection};
pub use device::{Capabilities, Capability, Device, DeviceIdentity, DeviceSession};
pub use discovery::{DiscoveryDeps, DiscoveryEngine, DiscoveryError, Resolution};
pub use error::{DiscoveryResult, ErrorCode, SscError, SscResult};
pub use events::{DiscoveryEvent, EventEmitter, LoggingEventEmitter, NoopEventEmitter, VolumeEvent};
pub use multicast::{HostMulticastLock, MulticastLock};
pub use schema::{Limits, LimitsKind};
pub use transport::{NetworkConnector, Transport, TransportConnector, TransportKind};
pub use volume::{VolumeApplyResult, VolumeError, VolumeForwarder, VolumeSettings};
