//! SSC device discovery.
//!
//! The [`DiscoveryEngine`] browses `_ssc._tcp` and `_ssc._udp` on every usable
//! interface for a bounded time and maintains a table of devices keyed by
//! address. The first routable address of each resolution identifies the
//! device; TCP and UDP advertisements of the same device merge into one
//! entry. Devices without identity get one background identity lookup.
//!
//! The table and the running flag are published through `watch` channels;
//! readers only ever see complete snapshots.
//!
//! # Generations
//!
//! Every `start` opens a new generation and clears the table. Identity
//! lookups carry the generation they were started in and their results are
//! discarded if the engine has since stopped or restarted.

mod mdns;
mod types;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::device::{Capability, Device, DeviceSession};
use crate::error::SscResult;
use crate::events::{now_millis, DiscoveryEvent, EventEmitter, LoggingEventEmitter};
use crate::multicast::{HostMulticastLock, MulticastLock};
use crate::transport::{NetworkConnector, TransportConnector};

pub use mdns::{BrowseBackend, BrowseSession, BrowseTarget, MdnsBackend};
pub use types::{
    first_routable_address, is_link_local, usable_interface_addresses, DiscoveryError,
    DiscoveryResult, Resolution,
};

/// Collaborators of the discovery engine.
pub struct DiscoveryDeps {
    /// Source of service resolutions.
    pub backend: Arc<dyn BrowseBackend>,
    /// Opens transports for identity lookups.
    pub connector: Arc<dyn TransportConnector>,
    /// Platform multicast capability.
    pub multicast: Arc<dyn MulticastLock>,
    /// Receives discovery events.
    pub emitter: Arc<dyn EventEmitter>,
}

impl DiscoveryDeps {
    /// Real network collaborators: mDNS browsing, TCP/UDP sockets, logged events.
    pub fn network(config: &Config) -> Self {
        Self {
            backend: Arc::new(MdnsBackend),
            connector: Arc::new(NetworkConnector::new(config)),
            multicast: Arc::new(HostMulticastLock::default()),
            emitter: Arc::new(LoggingEventEmitter),
        }
    }
}

#[derive(Default)]
struct DeviceTable {
    devices: Vec<Device>,
    /// Addresses with an identity lookup in flight.
    pending_identity: HashSet<String>,
    running: bool,
    generation: u64,
}

impl DeviceTable {
    /// Adds the device or merges `capability` into the existing entry.
    ///
    /// Returns the entry and whether it changed.
    fn upsert(&mut self, address: &str, capability: Capability) -> (&Device, bool) {
        match self.devices.iter().position(|d| d.address == address) {
            Some(index) => {
                let device = &mut self.devices[index];
                let merged = device.capabilities.with(capability);
                let changed = merged != device.capabilities;
                device.capabilities = merged;
                (&self.devices[index], changed)
            }
            None => {
                self.devices.push(Device::new(address, capability.into()));
                (&self.devices[self.devices.len() - 1], true)
            }
        }
    }
}

#[derive(Clone)]
struct RunState {
    cancel: CancellationToken,
    sink: mpsc::UnboundedSender<Resolution>,
}

struct Inner {
    config: Config,
    deps: DiscoveryDeps,
    table: Mutex<DeviceTable>,
    run: Mutex<Option<RunState>>,
    /// Interface listeners keyed by local address.
    sessions: Mutex<HashMap<IpAddr, Box<dyn BrowseSession>>>,
    identity_tasks: Mutex<Vec<JoinHandle<()>>>,
    devices_tx: watch::Sender<Vec<Device>>,
    running_tx: watch::Sender<bool>,
}

/// Bounded-time SSC device discovery.
///
/// Cheap to clone; clones share the same table and listeners.
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Arc<Inner>,
}

impl DiscoveryEngine {
    /// Creates an idle engine.
    pub fn new(config: Config, deps: DiscoveryDeps) -> Self {
        let (devices_tx, _) = watch::channel(Vec::new());
        let (running_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                deps,
                table: Mutex::new(DeviceTable::default()),
                run: Mutex::new(None),
                sessions: Mutex::new(HashMap::new()),
                identity_tasks: Mutex::new(Vec::new()),
                devices_tx,
                running_tx,
            }),
        }
    }

    /// Starts a discovery run that stops by itself after `run_for`.
    ///
    /// Clears the device table and opens a listener on every usable
    /// interface. Calling this while a run is active does nothing.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, run_for: Duration) -> DiscoveryResult<()> {
        let inner = &self.inner;
        let run = {
            let mut table = inner.table.lock();
            if table.running {
                log::debug!("[Discovery] Start ignored, already running");
                return Ok(());
            }
            inner.deps.multicast.acquire()?;
            table.devices.clear();
            table.pending_identity.clear();
            table.running = true;
            table.generation += 1;
            inner.devices_tx.send_replace(Vec::new());

            // Installed before the table unlocks so a concurrent stop cancels it
            let cancel = CancellationToken::new();
            let (sink, resolutions) = mpsc::unbounded_channel();
            tokio::spawn(pump_resolutions(
                Arc::downgrade(inner),
                resolutions,
                cancel.clone(),
            ));
            tokio::spawn(stop_after(Arc::downgrade(inner), run_for, cancel.clone()));
            let run = RunState { cancel, sink };
            *inner.run.lock() = Some(run.clone());

            inner.running_tx.send_replace(true);
            log::info!(
                "[Discovery] Starting run {} for {}ms",
                table.generation,
                run_for.as_millis()
            );
            inner.deps.emitter.emit_discovery(DiscoveryEvent::Started {
                generation: table.generation,
                timestamp: now_millis(),
            });
            run
        };

        let interfaces = usable_interface_addresses(
            &inner.deps.backend.interface_addresses(),
            inner.config.address_family,
        );
        if interfaces.is_empty() {
            log::warn!("[Discovery] No usable network interfaces, nothing will be found");
        }
        for interface in interfaces {
            inner.open_listener(interface, &run);
        }
        Ok(())
    }

    /// Starts a run with the configured discovery timeout.
    pub fn start_default(&self) -> DiscoveryResult<()> {
        self.start(self.inner.config.discovery_timeout())
    }

    /// Opens a listener on one more interface of the current run.
    ///
    /// Does nothing when not running or when the interface already has one.
    pub fn listen_on(&self, interface: IpAddr) {
        let Some(run) = self.inner.run.lock().clone() else {
            return;
        };
        self.inner.open_listener(interface, &run);
    }

    /// Ends the current run. Does nothing when not running.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Stops the run and aborts identity lookups still in flight.
    pub fn shutdown(&self) {
        self.inner.stop();
        for task in self.inner.identity_tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Returns true while a run is active.
    pub fn is_running(&self) -> bool {
        self.inner.table.lock().running
    }

    /// Returns the current table snapshot.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.devices_tx.borrow().clone()
    }

    /// Returns the generation of the latest run (0 before the first start).
    pub fn generation(&self) -> u64 {
        self.inner.table.lock().generation
    }

    /// Number of interfaces with an open listener.
    pub fn listener_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Subscribes to table snapshots.
    pub fn subscribe_devices(&self) -> watch::Receiver<Vec<Device>> {
        self.inner.devices_tx.subscribe()
    }

    /// Subscribes to the running flag.
    pub fn subscribe_running(&self) -> watch::Receiver<bool> {
        self.inner.running_tx.subscribe()
    }

    /// Table snapshots as a stream, starting with the current one.
    pub fn device_stream(&self) -> WatchStream<Vec<Device>> {
        WatchStream::new(self.subscribe_devices())
    }

    /// Feeds one resolution into the table, as the listeners do.
    pub fn handle_resolution(&self, resolution: Resolution) {
        self.inner.handle_resolution(resolution);
    }
}

impl Inner {
    fn services(&self) -> [BrowseTarget; 2] {
        [
            BrowseTarget {
                service_type: self.config.udp_service_type.clone(),
                capability: Capability::Udp,
            },
            BrowseTarget {
                service_type: self.config.tcp_service_type.clone(),
                capability: Capability::Tcp,
            },
        ]
    }

    /// Opens a listener for `run` unless that run has already been stopped.
    ///
    /// `stop` cancels the run before draining `sessions`, and the check here
    /// happens under the `sessions` lock, so a listener is either refused or
    /// closed by that `stop`.
    fn open_listener(&self, interface: IpAddr, run: &RunState) {
        let mut sessions = self.sessions.lock();
        if run.cancel.is_cancelled() {
            log::debug!("[Discovery] Run stopped, not listening on {}", interface);
            return;
        }
        if sessions.contains_key(&interface) {
            log::debug!("[Discovery] Already listening on {}", interface);
            return;
        }
        match self
            .deps
            .backend
            .open_session(interface, &self.services(), run.sink.clone())
        {
            Ok(session) => {
                log::info!("[Discovery] Listening on {}", interface);
                sessions.insert(interface, session);
            }
            Err(e) => log::warn!("[Discovery] Failed to listen on {}: {}", interface, e),
        }
    }

    fn stop(&self) {
        let mut table = self.table.lock();
        if !table.running {
            return;
        }
        table.running = false;
        if let Some(run) = self.run.lock().take() {
            run.cancel.cancel();
        }
        for (interface, mut session) in self.sessions.lock().drain() {
            log::debug!("[Discovery] Closing listener on {}", interface);
            session.close();
        }
        if self.deps.multicast.is_held() {
            self.deps.multicast.release();
        }
        self.running_tx.send_replace(false);
        log::info!(
            "[Discovery] Run {} stopped with {} device(s)",
            table.generation,
            table.devices.len()
        );
        self.deps.emitter.emit_discovery(DiscoveryEvent::Stopped {
            device_count: table.devices.len(),
            timestamp: now_millis(),
        });
    }

    fn handle_resolution(self: &Arc<Self>, resolution: Resolution) {
        let Some(ip) = first_routable_address(&resolution.addresses, self.config.address_family)
        else {
            log::info!(
                "[Discovery] No routable address for {}, ignoring",
                resolution.name
            );
            return;
        };
        let address = ip.to_string();

        let lookup = {
            let mut table = self.table.lock();
            if !table.running {
                return;
            }
            let generation = table.generation;
            let (device, changed) = table.upsert(&address, resolution.capability);
            let device = device.clone();
            if changed {
                log::debug!(
                    "[Discovery] {} via {:?} (tcp={}, udp={})",
                    address,
                    resolution.capability,
                    device.capabilities.supports_tcp,
                    device.capabilities.supports_udp
                );
                self.devices_tx.send_replace(table.devices.clone());
                self.deps.emitter.emit_discovery(DiscoveryEvent::DeviceUpdated {
                    device: device.clone(),
                    timestamp: now_millis(),
                });
            }
            let needs_identity =
                device.identity.is_none() && table.pending_identity.insert(address.clone());
            needs_identity.then_some((device, generation))
        };

        if let Some((device, generation)) = lookup {
            self.spawn_identity_lookup(device, generation);
        }
    }

    fn spawn_identity_lookup(self: &Arc<Self>, device: Device, generation: u64) {
        let inner = Arc::downgrade(self);
        let connector = Arc::clone(&self.deps.connector);
        let config = self.config.clone();
        let task = tokio::spawn(async move {
            let session = DeviceSession::new(&device, connector, &config);
            let result = session.retrieve_identity().await;
            if let Err(e) = session.close().await {
                log::debug!("[Discovery] Closing {} after lookup: {}", device.address, e);
            }
            if let Some(inner) = inner.upgrade() {
                inner.finish_identity_lookup(&device.address, generation, result);
            }
        });

        let mut tasks = self.identity_tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    fn finish_identity_lookup(&self, address: &str, generation: u64, result: SscResult<Device>) {
        let mut table = self.table.lock();
        if !table.running || table.generation != generation {
            log::debug!(
                "[Discovery] Discarding identity of {} from run {}",
                address,
                generation
            );
            return;
        }
        table.pending_identity.remove(address);

        let identified = match result {
            Ok(identified) => identified,
            Err(e) => {
                log::warn!("[Discovery] Identity lookup for {} failed: {}", address, e);
                self.deps.emitter.emit_discovery(DiscoveryEvent::IdentityFailed {
                    address: address.to_string(),
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                return;
            }
        };
        let Some(entry) = table.devices.iter_mut().find(|d| d.address == address) else {
            return;
        };
        // Capabilities may have grown while the lookup ran
        entry.identity = identified.identity;
        let device = entry.clone();
        self.devices_tx.send_replace(table.devices.clone());
        self.deps
            .emitter
            .emit_discovery(DiscoveryEvent::IdentityResolved {
                device,
                timestamp: now_millis(),
            });
    }
}

async fn pump_resolutions(
    inner: Weak<Inner>,
    mut resolutions: mpsc::UnboundedReceiver<Resolution>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = resolutions.recv() => {
                let Some(resolution) = next else { break };
                let Some(inner) = inner.upgrade() else { break };
                inner.handle_resolution(resolution);
            }
        }
    }
    log::trace!("[Discovery] Resolution pump finished");
}

async fn stop_after(inner: Weak<Inner>, run_for: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(run_for) => {
            if let Some(inner) = inner.upgrade() {
                log::debug!("[Discovery] Run timed out after {}ms", run_for.as_millis());
                inner.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Capabilities, DeviceIdentity};
    use crate::events::VolumeEvent;
    use crate::test_fixtures::{FixtureDevice, FixtureNetwork};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const LAN: &str = "2001:db8::10";
    const SPEAKER: &str = "2001:db8::20";

    /// Backend whose sessions hand their sinks to the test.
    #[derive(Default)]
    struct FakeBackend {
        interfaces: Vec<(String, IpAddr)>,
        sinks: Mutex<Vec<mpsc::UnboundedSender<Resolution>>>,
        opened: Mutex<Vec<IpAddr>>,
        closed: Arc<AtomicUsize>,
        /// Runs once, the next time interfaces are listed.
        on_list: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl FakeBackend {
        fn with_interfaces(addresses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                interfaces: addresses
                    .iter()
                    .map(|a| ("eth0".to_string(), a.parse().unwrap()))
                    .collect(),
                ..Default::default()
            })
        }

        fn announce(&self, capability: Capability, addresses: &[&str]) {
            let resolution = Resolution {
                name: "speaker._ssc._udp.local.".to_string(),
                capability,
                addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
            };
            for sink in self.sinks.lock().iter() {
                let _ = sink.send(resolution.clone());
            }
        }
    }

    struct FakeSession {
        closed: Arc<AtomicUsize>,
    }

    impl BrowseSession for FakeSession {
        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl BrowseBackend for FakeBackend {
        fn interface_addresses(&self) -> Vec<(String, IpAddr)> {
            let hook = self.on_list.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            self.interfaces.clone()
        }

        fn open_session(
            &self,
            interface: IpAddr,
            services: &[BrowseTarget],
            sink: mpsc::UnboundedSender<Resolution>,
        ) -> DiscoveryResult<Box<dyn BrowseSession>> {
            assert_eq!(services.len(), 2);
            self.sinks.lock().push(sink);
            self.opened.lock().push(interface);
            Ok(Box::new(FakeSession {
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    struct DeniedMulticast;

    impl MulticastLock for DeniedMulticast {
        fn acquire(&self) -> DiscoveryResult<()> {
            Err(DiscoveryError::Multicast("denied".into()))
        }
        fn release(&self) {}
        fn is_held(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<DiscoveryEvent>>,
        volume: AtomicBool,
    }

    impl EventEmitter for RecordingEmitter {
        fn emit_discovery(&self, event: DiscoveryEvent) {
            self.events.lock().push(event);
        }
        fn emit_volume(&self, _event: VolumeEvent) {
            self.volume.store(true, Ordering::SeqCst);
        }
    }

    impl RecordingEmitter {
        fn count(&self, pred: impl Fn(&DiscoveryEvent) -> bool) -> usize {
            self.events.lock().iter().filter(|e| pred(e)).count()
        }
    }

    struct Harness {
        engine: DiscoveryEngine,
        backend: Arc<FakeBackend>,
        network: Arc<FixtureNetwork>,
        emitter: Arc<RecordingEmitter>,
        multicast: Arc<HostMulticastLock>,
    }

    fn harness() -> Harness {
        let backend = FakeBackend::with_interfaces(&[LAN, "fe80::1"]);
        let network = FixtureNetwork::new();
        let emitter = Arc::new(RecordingEmitter::default());
        let multicast = Arc::new(HostMulticastLock::default());
        let engine = DiscoveryEngine::new(
            Config::default(),
            DiscoveryDeps {
                backend: backend.clone(),
                connector: network.clone(),
                multicast: multicast.clone(),
                emitter: emitter.clone(),
            },
        );
        Harness {
            engine,
            backend,
            network,
            emitter,
            multicast,
        }
    }

    async fn wait_for(engine: &DiscoveryEngine, pred: impl Fn(&[Device]) -> bool) -> Vec<Device> {
        let mut rx = engine.subscribe_devices();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let devices = rx.borrow_and_update();
                    if pred(&devices) {
                        return devices.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("device table never matched")
    }

    fn identified(devices: &[Device]) -> bool {
        !devices.is_empty() && devices.iter().all(|d| d.identity.is_some())
    }

    #[tokio::test]
    async fn start_opens_one_listener_per_usable_interface() {
        let h = harness();
        h.engine.start(Duration::from_secs(60)).unwrap();

        assert!(h.engine.is_running());
        assert!(*h.engine.subscribe_running().borrow());
        assert!(h.multicast.is_held());
        assert_eq!(*h.backend.opened.lock(), vec![LAN.parse::<IpAddr>().unwrap()]);

        // Same interface again is a no-op
        h.engine.listen_on(LAN.parse().unwrap());
        assert_eq!(h.engine.listener_count(), 1);
        h.engine.listen_on("2001:db8::11".parse().unwrap());
        assert_eq!(h.engine.listener_count(), 2);
    }

    #[tokio::test]
    async fn start_while_running_is_ignored() {
        let h = harness();
        h.engine.start(Duration::from_secs(60)).unwrap();
        h.engine.start(Duration::from_secs(60)).unwrap();
        assert_eq!(h.engine.generation(), 1);
        assert_eq!(h.backend.opened.lock().len(), 1);
    }

    #[tokio::test]
    async fn denied_multicast_fails_start() {
        let engine = DiscoveryEngine::new(
            Config::default(),
            DiscoveryDeps {
                backend: FakeBackend::with_interfaces(&[LAN]),
                connector: FixtureNetwork::new(),
                multicast: Arc::new(DeniedMulticast),
                emitter: Arc::new(RecordingEmitter::default()),
            },
        );
        assert!(matches!(
            engine.start(Duration::from_secs(1)),
            Err(DiscoveryError::Multicast(_))
        ));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn tcp_and_udp_advertisements_merge_and_identify_once() {
        let h = harness();
        h.network.add(SPEAKER, FixtureDevice::new());
        h.engine.start(Duration::from_secs(60)).unwrap();

        h.backend.announce(Capability::Udp, &["fe80::20", SPEAKER]);
        h.backend.announce(Capability::Tcp, &[SPEAKER]);

        let devices = wait_for(&h.engine, |d| {
            identified(d) && d[0].capabilities.supports_tcp && d[0].capabilities.supports_udp
        })
        .await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, SPEAKER);
        assert_eq!(
            devices[0].identity,
            Some(DeviceIdentity {
                name: "Lobby".into(),
                product: "SP 01".into(),
                vendor: "Sennheiser".into(),
            })
        );
        assert_eq!(
            h.emitter
                .count(|e| matches!(e, DiscoveryEvent::IdentityResolved { .. })),
            1
        );
    }

    #[tokio::test]
    async fn resolution_without_routable_address_is_ignored() {
        let h = harness();
        h.engine.start(Duration::from_secs(60)).unwrap();
        h.engine.handle_resolution(Resolution {
            name: "x".into(),
            capability: Capability::Tcp,
            addresses: vec!["fe80::1".parse().unwrap(), "10.0.0.1".parse().unwrap()],
        });
        assert!(h.engine.devices().is_empty());
    }

    #[tokio::test]
    async fn failed_identity_keeps_device_and_allows_retry() {
        let h = harness();
        h.engine.start(Duration::from_secs(60)).unwrap();

        // Nothing listens at SPEAKER yet
        h.engine.handle_resolution(Resolution {
            name: "x".into(),
            capability: Capability::Tcp,
            addresses: vec![SPEAKER.parse().unwrap()],
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while h
                .emitter
                .count(|e| matches!(e, DiscoveryEvent::IdentityFailed { .. }))
                == 0
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let devices = h.engine.devices();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].identity.is_none());

        h.network.add(SPEAKER, FixtureDevice::new());
        h.engine.handle_resolution(Resolution {
            name: "x".into(),
            capability: Capability::Tcp,
            addresses: vec![SPEAKER.parse().unwrap()],
        });
        wait_for(&h.engine, identified).await;
    }

    #[tokio::test]
    async fn stop_closes_listeners_and_releases_multicast() {
        let h = harness();
        h.engine.start(Duration::from_secs(60)).unwrap();
        h.engine.stop();

        assert!(!h.engine.is_running());
        assert!(!*h.engine.subscribe_running().borrow());
        assert!(!h.multicast.is_held());
        assert_eq!(h.backend.closed.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.listener_count(), 0);

        // Second stop is a no-op
        h.engine.stop();
        assert_eq!(
            h.emitter.count(|e| matches!(e, DiscoveryEvent::Stopped { .. })),
            1
        );
    }

    #[tokio::test]
    async fn stop_during_start_leaves_no_listener_open() {
        let h = harness();
        let engine = h.engine.clone();
        *h.backend.on_list.lock() = Some(Box::new(move || engine.stop()));

        h.engine.start(Duration::from_secs(60)).unwrap();
        assert!(!h.engine.is_running());
        assert_eq!(h.engine.listener_count(), 0);
        assert!(h.backend.opened.lock().is_empty());
        assert!(!h.multicast.is_held());

        // The next run is unaffected
        h.engine.start(Duration::from_secs(60)).unwrap();
        assert!(h.engine.is_running());
        assert_eq!(h.engine.listener_count(), 1);
        h.engine.stop();
        assert_eq!(h.backend.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listeners_follow_interfaces_not_addresses() {
        let backend = FakeBackend::with_interfaces(&[LAN, "2001:db8::11", "fe80::1"]);
        let engine = DiscoveryEngine::new(
            Config::default(),
            DiscoveryDeps {
                backend: backend.clone(),
                connector: FixtureNetwork::new(),
                multicast: Arc::new(HostMulticastLock::default()),
                emitter: Arc::new(RecordingEmitter::default()),
            },
        );
        engine.start(Duration::from_secs(60)).unwrap();
        assert_eq!(*backend.opened.lock(), vec![LAN.parse::<IpAddr>().unwrap()]);
        engine.stop();
    }

    #[tokio::test]
    async fn resolutions_after_stop_are_dropped() {
        let h = harness();
        h.engine.start(Duration::from_secs(60)).unwrap();
        h.engine.stop();
        h.engine.handle_resolution(Resolution {
            name: "x".into(),
            capability: Capability::Udp,
            addresses: vec![SPEAKER.parse().unwrap()],
        });
        assert!(h.engine.devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_after_timeout() {
        let h = harness();
        let mut running = h.engine.subscribe_running();
        h.engine.start(Duration::from_secs(10)).unwrap();
        assert!(*running.borrow_and_update());

        running.changed().await.unwrap();
        assert!(!*running.borrow());
        assert!(!h.engine.is_running());
        assert!(!h.multicast.is_held());
    }

    #[tokio::test]
    async fn restart_clears_table_and_discards_stale_lookups() {
        let h = harness();
        let connector = h.network.add(SPEAKER, FixtureDevice::new());
        connector.set_delay(Duration::from_millis(200));
        h.engine.start(Duration::from_secs(60)).unwrap();
        h.engine.handle_resolution(Resolution {
            name: "x".into(),
            capability: Capability::Udp,
            addresses: vec![SPEAKER.parse().unwrap()],
        });
        assert_eq!(h.engine.devices().len(), 1);

        h.engine.stop();
        h.engine.start(Duration::from_secs(60)).unwrap();
        assert_eq!(h.engine.generation(), 2);
        assert!(h.engine.devices().is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.engine.devices().is_empty());
        assert_eq!(
            h.emitter
                .count(|e| matches!(e, DiscoveryEvent::IdentityResolved { .. })),
            0
        );
    }

    #[tokio::test]
    async fn device_stream_yields_snapshots() {
        use futures::StreamExt;

        let h = harness();
        let mut stream = h.engine.device_stream();
        assert_eq!(stream.next().await, Some(Vec::new()));

        h.engine.start(Duration::from_secs(60)).unwrap();
        h.engine.handle_resolution(Resolution {
            name: "x".into(),
            capability: Capability::Tcp,
            addresses: vec![SPEAKER.parse().unwrap()],
        });
        let snapshot = stream.next().await.unwrap();
        assert_eq!(
            snapshot,
            vec![Device::new(SPEAKER, Capabilities::from(Capability::Tcp))]
        );
        assert!(!h.emitter.volume.load(Ordering::SeqCst));
    }
}
