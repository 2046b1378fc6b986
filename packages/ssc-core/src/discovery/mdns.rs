//! mDNS/DNS-SD browsing.
//!
//! Discovery listens on each usable interface separately. A
//! [`BrowseBackend`] opens one [`BrowseSession`] per interface address; the
//! session browses every SSC service type and forwards each resolved service
//! as a [`Resolution`] into the engine's channel.
//!
//! [`MdnsBackend`] is the real implementation on top of `mdns-sd`: one
//! daemon per interface, restricted to that interface's address.

use std::net::IpAddr;

use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::types::{DiscoveryError, DiscoveryResult, Resolution};
use crate::device::Capability;

/// A service type to browse and the capability it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseTarget {
    pub service_type: String,
    pub capability: Capability,
}

/// Source of service resolutions.
pub trait BrowseBackend: Send + Sync {
    /// Lists local `(interface name, address)` pairs.
    fn interface_addresses(&self) -> Vec<(String, IpAddr)>;

    /// Starts browsing `services` on the interface holding `interface`.
    ///
    /// Must be called from within a Tokio runtime.
    fn open_session(
        &self,
        interface: IpAddr,
        services: &[BrowseTarget],
        sink: mpsc::UnboundedSender<Resolution>,
    ) -> DiscoveryResult<Box<dyn BrowseSession>>;
}

/// An active per-interface browse.
pub trait BrowseSession: Send {
    /// Stops browsing and releases the listener. Idempotent.
    fn close(&mut self);
}

/// Backend using one `mdns-sd` daemon per interface.
#[derive(Debug, Default)]
pub struct MdnsBackend;

impl BrowseBackend for MdnsBackend {
    fn interface_addresses(&self) -> Vec<(String, IpAddr)> {
        match local_ip_address::list_afinet_netifas() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                log::warn!("[mDNS] Failed to list network interfaces: {}", e);
                Vec::new()
            }
        }
    }

    fn open_session(
        &self,
        interface: IpAddr,
        services: &[BrowseTarget],
        sink: mpsc::UnboundedSender<Resolution>,
    ) -> DiscoveryResult<Box<dyn BrowseSession>> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::MdnsDaemon(e.to_string()))?;
        let restrict = daemon
            .disable_interface(IfKind::All)
            .and_then(|()| daemon.enable_interface(IfKind::Addr(interface)));
        if let Err(e) = restrict {
            let _ = daemon.shutdown();
            return Err(DiscoveryError::MdnsDaemon(e.to_string()));
        }

        let mut session = MdnsSession {
            interface,
            daemon: Some(daemon),
            browsing: Vec::new(),
            pumps: Vec::new(),
        };
        for target in services {
            let Some(daemon) = session.daemon.as_ref() else {
                break;
            };
            let receiver = match daemon.browse(&target.service_type) {
                Ok(receiver) => receiver,
                Err(e) => {
                    session.close();
                    return Err(DiscoveryError::MdnsDaemon(e.to_string()));
                }
            };
            log::debug!("[mDNS] Browsing {} on {}", target.service_type, interface);

            let capability = target.capability;
            let sink = sink.clone();
            session.pumps.push(tokio::spawn(async move {
                while let Ok(event) = receiver.recv_async().await {
                    match event {
                        ServiceEvent::ServiceFound(ty, name) => {
                            log::trace!("[mDNS] Found {} ({})", name, ty);
                        }
                        ServiceEvent::ServiceResolved(info) => {
                            log::debug!("[mDNS] Resolved {}", info.fullname);
                            let resolution = Resolution {
                                name: info.fullname.clone(),
                                capability,
                                addresses: info.addresses.iter().map(|a| a.to_ip_addr()).collect(),
                            };
                            if sink.send(resolution).is_err() {
                                break;
                            }
                        }
                        ServiceEvent::SearchStopped(ty) => {
                            log::trace!("[mDNS] Search for {} stopped", ty);
                            break;
                        }
                        _ => {}
                    }
                }
            }));
            session.browsing.push(target.service_type.clone());
        }
        Ok(Box::new(session))
    }
}

struct MdnsSession {
    interface: IpAddr,
    daemon: Option<ServiceDaemon>,
    browsing: Vec<String>,
    pumps: Vec<JoinHandle<()>>,
}

impl BrowseSession for MdnsSession {
    fn close(&mut self) {
        let Some(daemon) = self.daemon.take() else {
            return;
        };
        for service_type in self.browsing.drain(..) {
            if let Err(e) = daemon.stop_browse(&service_type) {
                log::warn!("[mDNS] Failed to stop browse of {}: {:?}", service_type, e);
            }
        }
        if let Err(e) = daemon.shutdown() {
            log::warn!("[mDNS] Failed to shut down daemon on {}: {:?}", self.interface, e);
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        log::debug!("[mDNS] Listener on {} closed", self.interface);
    }
}

impl Drop for MdnsSession {
    fn drop(&mut self) {
        self.close();
    }
}
