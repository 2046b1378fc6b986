//! SSC device records and per-device sessions.
//!
//! A [`Device`] is plain data: address, transport capabilities and, once
//! retrieved, the identity strings. Equality and hashing use the address
//! alone so the same device seen over both service types stays one entry.
//!
//! A [`DeviceSession`] owns the [`ManagedConnection`] to one device and
//! offers the high-level operations on it.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::connection::{
    scalar_to_string, ConnectionGuard, ManagedConnection, SscConnection, TransportFactory,
};
use crate::error::SscResult;
use crate::schema::{self, Limits};
use crate::transport::{TransportConnector, TransportKind};

/// Path of the vendor string.
pub const VENDOR_PATH: &str = "device.identity.vendor";

/// Path of the product string.
pub const PRODUCT_PATH: &str = "device.identity.product";

/// Path of the user-assigned device name.
pub const NAME_PATH: &str = "device.name";

/// Transport capability learned from one advertised service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Advertised `_ssc._tcp`.
    Tcp,
    /// Advertised `_ssc._udp`.
    Udp,
}

/// Transports a device is known to accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub supports_tcp: bool,
    #[serde(default)]
    pub supports_udp: bool,
}

impl Capabilities {
    /// Returns the union of both capability sets. Flags are never cleared.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            supports_tcp: self.supports_tcp || other.supports_tcp,
            supports_udp: self.supports_udp || other.supports_udp,
        }
    }

    /// Returns these capabilities with `capability` added.
    #[must_use]
    pub fn with(self, capability: Capability) -> Self {
        self.merge(capability.into())
    }

    /// Returns true if no transport is supported.
    pub fn is_empty(self) -> bool {
        !self.supports_tcp && !self.supports_udp
    }
}

impl From<Capability> for Capabilities {
    fn from(capability: Capability) -> Self {
        Self {
            supports_tcp: capability == Capability::Tcp,
            supports_udp: capability == Capability::Udp,
        }
    }
}

/// Identity strings read from the device itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub product: String,
    pub vendor: String,
}

/// A device on the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// IP address in textual form, without brackets or port.
    pub address: String,
    #[serde(flatten)]
    pub capabilities: Capabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<DeviceIdentity>,
}

impl Device {
    /// Creates a device without identity.
    pub fn new(address: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            address: address.into(),
            capabilities,
            identity: None,
        }
    }

    /// Returns this device with `identity` attached.
    #[must_use]
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Name for display: the device name if known, otherwise the address.
    pub fn display_name(&self) -> &str {
        self.identity
            .as_ref()
            .map_or(self.address.as_str(), |identity| identity.name.as_str())
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Control session for one device.
///
/// All operations share one managed connection, so they are serialized
/// per device and reuse the open transport.
pub struct DeviceSession {
    device: Arc<RwLock<Device>>,
    connection: ManagedConnection,
}

impl DeviceSession {
    /// Creates a session; no connection is opened until the first operation.
    pub fn new(device: &Device, connector: Arc<dyn TransportConnector>, config: &Config) -> Self {
        let device = Arc::new(RwLock::new(device.clone()));

        let target = Arc::clone(&device);
        let factory: TransportFactory = Arc::new(move || {
            let connector = Arc::clone(&connector);
            let (address, capabilities) = {
                let device = target.read();
                (device.address.clone(), device.capabilities)
            };
            async move {
                let kind = TransportKind::select(&address, capabilities)?;
                log::info!("[Device] Connecting to {} via {}", address, kind);
                connector.connect(&address, kind).await
            }
            .boxed()
        });

        let address = device.read().address.clone();
        Self {
            device,
            connection: ManagedConnection::new(address, factory, config.idle_timeout()),
        }
    }

    /// Returns a snapshot of the device record.
    pub fn device(&self) -> Device {
        self.device.read().clone()
    }

    /// Returns the device address.
    pub fn address(&self) -> String {
        self.device.read().address.clone()
    }

    /// Adds capabilities. The next connect picks its transport from the merged set.
    pub fn merge_capabilities(&self, capabilities: Capabilities) {
        let mut device = self.device.write();
        device.capabilities = device.capabilities.merge(capabilities);
    }

    /// Returns true while the underlying connection is logically open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Takes the device lock for a sequence of requests.
    pub async fn acquire(&self) -> SscResult<ConnectionGuard<'_>> {
        self.connection.acquire().await
    }

    /// Reads vendor, product and name, returning an enriched copy of the device.
    ///
    /// The three reads share one connection acquisition.
    pub async fn retrieve_identity(&self) -> SscResult<Device> {
        let mut link = self.acquire().await?;
        let vendor = scalar_to_string(&link.get_value(VENDOR_PATH).await?);
        let product = scalar_to_string(&link.get_value(PRODUCT_PATH).await?);
        let name = scalar_to_string(&link.get_value(NAME_PATH).await?);
        drop(link);

        let device = self.device();
        log::info!(
            "[Device] {} identified as {} ({} {})",
            device.address,
            name,
            vendor,
            product
        );
        Ok(device.with_identity(DeviceIdentity {
            name,
            product,
            vendor,
        }))
    }

    /// Sends a raw request envelope.
    pub async fn send(&self, request: Value) -> SscResult<Value> {
        self.acquire().await?.send(request).await
    }

    /// Reads the scalar at `path`.
    pub async fn get_value(&self, path: &str) -> SscResult<Value> {
        self.acquire().await?.get_value(path).await
    }

    /// Writes `value` at `path`, returning the echoed value.
    pub async fn set_value(&self, path: &str, value: Value) -> SscResult<Value> {
        self.acquire().await?.set_value(path, value).await
    }

    /// Measures one `osc.ping` round trip.
    pub async fn ping(&self) -> SscResult<Duration> {
        self.acquire().await?.ping().await
    }

    /// Lists every leaf path of the device configuration.
    pub async fn expand_schema(&self) -> SscResult<Vec<String>> {
        let mut link = self.acquire().await?;
        schema::expand_schema(&mut link, None).await
    }

    /// Reads the limits of one path.
    pub async fn limits(&self, path: &str) -> SscResult<Limits> {
        let mut link = self.acquire().await?;
        schema::limits(&mut link, path).await
    }

    /// Reads limits for each non-`osc.` path in order.
    pub async fn limits_for_schema(&self, paths: &[String]) -> SscResult<Vec<(String, Limits)>> {
        let mut link = self.acquire().await?;
        schema::limits_for_schema(&mut link, paths).await
    }

    /// Closes the connection now instead of waiting for the idle timeout.
    pub async fn close(&self) -> SscResult<()> {
        self.connection.close().await
    }
}
