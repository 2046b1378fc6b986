//! Shared test fixtures.
//!
//! [`FixtureDevice`] answers SSC requests from an in-memory configuration
//! tree, schema and limits table. [`FixtureConnector`] hands out
//! [`FixtureTransport`]s bound to one device and counts what happens to them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::codec::{wrap_path, ConfigPath};
use crate::connection::SscConnection;
use crate::error::{SscError, SscResult};
use crate::transport::{Transport, TransportConnector, TransportKind};

#[derive(Default)]
struct FixtureState {
    values: Value,
    schema: Value,
    limits: HashMap<String, Value>,
    errors: HashMap<String, String>,
    requests: Vec<Value>,
}

/// In-memory SSC device.
pub(crate) struct FixtureDevice {
    state: Mutex<FixtureState>,
}

impl FixtureDevice {
    /// Device with the identity values set and no schema.
    pub fn new() -> Arc<Self> {
        let device = Arc::new(Self {
            state: Mutex::new(FixtureState {
                values: json!({}),
                schema: json!({}),
                ..Default::default()
            }),
        });
        device.set("device.identity.vendor", json!("Sennheiser"));
        device.set("device.identity.product", json!("SP 01"));
        device.set("device.name", json!("Lobby"));
        device.set("audio.out.level", json!(0));
        device
    }

    /// Stores `value` at `path`.
    pub fn set(&self, path: &str, value: Value) {
        let path = ConfigPath::parse(path).unwrap();
        let mut state = self.state.lock();
        insert_at(&mut state.values, path.segments(), value);
    }

    /// Reads the value at `path`.
    pub fn get(&self, path: &str) -> Option<Value> {
        let path = ConfigPath::parse(path).unwrap();
        let state = self.state.lock();
        lookup(&state.values, path.segments()).cloned()
    }

    /// Replaces the schema tree. Leaves are `null`, containers are objects.
    pub fn set_schema(&self, schema: Value) {
        self.state.lock().schema = schema;
    }

    /// Registers the limits record returned for `path`.
    pub fn set_limits(&self, path: &str, record: Value) {
        self.state.lock().limits.insert(path.to_string(), record);
    }

    /// Makes every request touching `path` fail with `message`.
    pub fn fail_path(&self, path: &str, message: &str) {
        self.state
            .lock()
            .errors
            .insert(path.to_string(), message.to_string());
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.state.lock().requests.clone()
    }

    /// Answers one request envelope.
    pub fn handle(&self, request: &Value) -> Value {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        let (segments, leaf) = single_key_walk(request);
        let path = segments.join(".");
        if let Some(message) = state.errors.get(&path) {
            return json!({"osc": {"error": message}});
        }

        match path.as_str() {
            "osc.ping" => json!({"osc": {"ping": leaf}}),
            "osc.schema" => answer_schema(&state.schema, leaf),
            "osc.limits" => answer_limits(&state.limits, leaf),
            _ if leaf.is_null() => match lookup(&state.values, &segments) {
                Some(value) => wrap_segments(&segments, value.clone()),
                None => json!({"osc": {"error": format!("404 {} not found", path)}}),
            },
            _ => {
                insert_at(&mut state.values, &segments, leaf.clone());
                wrap_segments(&segments, leaf.clone())
            }
        }
    }
}

/// Follows single-key objects down to the addressed leaf.
fn single_key_walk(message: &Value) -> (Vec<String>, &Value) {
    let mut segments = Vec::new();
    let mut current = message;
    while let Some(level) = current.as_object().filter(|level| level.len() == 1) {
        let (key, value) = level.iter().next().unwrap();
        segments.push(key.clone());
        current = value;
        if key == "osc" {
            // osc.<op> takes an arbitrary payload
            if let Some((op, payload)) = current.as_object().and_then(|o| o.iter().next()) {
                segments.push(op.clone());
                return (segments, payload);
            }
        }
    }
    (segments, current)
}

fn lookup<'v>(tree: &'v Value, segments: &[String]) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(tree, |current, segment| current.as_object()?.get(segment))
}

fn insert_at(tree: &mut Value, segments: &[String], value: Value) {
    let (last, parents) = segments.split_last().unwrap();
    let mut current = tree;
    for segment in parents {
        current = current
            .as_object_mut()
            .unwrap()
            .entry(segment.clone())
            .or_insert_with(|| json!({}));
    }
    current.as_object_mut().unwrap().insert(last.clone(), value);
}

fn wrap_segments(segments: &[String], value: Value) -> Value {
    wrap_path(&ConfigPath::parse(&segments.join(".")).unwrap(), value)
}

/// One level of the schema: containers collapse to `{}`, leaves stay `null`.
fn shallow(node: &Value) -> Value {
    let mut level = Map::new();
    if let Some(children) = node.as_object() {
        for (key, child) in children {
            let marker = if child.is_null() { Value::Null } else { json!({}) };
            level.insert(key.clone(), marker);
        }
    }
    Value::Object(level)
}

fn answer_schema(schema: &Value, payload: &Value) -> Value {
    if payload.is_null() {
        return json!({"osc": {"schema": [shallow(schema)]}});
    }
    let (segments, _) = single_key_walk(&payload[0]);
    let node = lookup(schema, &segments).cloned().unwrap_or(Value::Null);
    json!({"osc": {"schema": [wrap_segments(&segments, shallow(&node))]}})
}

fn answer_limits(limits: &HashMap<String, Value>, payload: &Value) -> Value {
    let (segments, _) = single_key_walk(&payload[0]);
    match limits.get(&segments.join(".")) {
        Some(record) => json!({"osc": {"limits": [wrap_segments(&segments, json!([record]))]}}),
        None => json!({"osc": {"error": "404 no limits"}}),
    }
}

/// Counters shared by all transports from one connector.
#[derive(Default)]
pub(crate) struct TransportStats {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub round_trips: AtomicUsize,
    pub overlaps: AtomicUsize,
    in_flight: AtomicBool,
}

/// Transport answering from a [`FixtureDevice`].
pub(crate) struct FixtureTransport {
    device: Arc<FixtureDevice>,
    kind: TransportKind,
    connected: bool,
    epoch: usize,
    connector_epoch: Arc<AtomicUsize>,
    delay: Duration,
    stats: Arc<TransportStats>,
}

impl FixtureTransport {
    /// Standalone transport, handy for driving [`SscConnection`] directly.
    pub fn direct(device: Arc<FixtureDevice>) -> Self {
        Self {
            device,
            kind: TransportKind::Reliable,
            connected: true,
            epoch: 0,
            connector_epoch: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            stats: Arc::new(TransportStats::default()),
        }
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn round_trip(&mut self, request: &Value) -> SscResult<Value> {
        if !self.connected {
            return Err(SscError::NotConnected);
        }
        if self.connector_epoch.load(Ordering::SeqCst) != self.epoch {
            self.connected = false;
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
        }
        if self.stats.in_flight.swap(true, Ordering::SeqCst) {
            self.stats.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.device.handle(request);
        self.stats.in_flight.store(false, Ordering::SeqCst);
        self.stats.round_trips.fetch_add(1, Ordering::SeqCst);
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) -> SscResult<()> {
        self.connected = false;
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}

#[async_trait]
impl SscConnection for FixtureTransport {
    async fn exchange(&mut self, request: &Value) -> SscResult<Value> {
        self.round_trip(request).await
    }
}

/// Connector producing [`FixtureTransport`]s for one device.
pub(crate) struct FixtureConnector {
    device: Arc<FixtureDevice>,
    pub stats: Arc<TransportStats>,
    epoch: Arc<AtomicUsize>,
    delay: Mutex<Duration>,
    refuse: AtomicBool,
    kinds: Mutex<Vec<TransportKind>>,
}

impl FixtureConnector {
    pub fn new(device: Arc<FixtureDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            stats: Arc::new(TransportStats::default()),
            epoch: Arc::new(AtomicUsize::new(0)),
            delay: Mutex::new(Duration::ZERO),
            refuse: AtomicBool::new(false),
            kinds: Mutex::new(Vec::new()),
        })
    }

    /// Delays every round trip of transports opened afterwards.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Makes subsequent connects fail with connection refused.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Breaks every transport opened so far; their next round trip fails.
    pub fn break_open_transports(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Kinds of all transports opened so far, in order.
    pub fn opened_kinds(&self) -> Vec<TransportKind> {
        self.kinds.lock().clone()
    }

    pub fn open(&self, kind: TransportKind) -> SscResult<Box<dyn Transport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        self.kinds.lock().push(kind);
        Ok(Box::new(FixtureTransport {
            device: Arc::clone(&self.device),
            kind,
            connected: true,
            epoch: self.epoch.load(Ordering::SeqCst),
            connector_epoch: Arc::clone(&self.epoch),
            delay: *self.delay.lock(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

#[async_trait]
impl TransportConnector for FixtureConnector {
    async fn connect(&self, _address: &str, kind: TransportKind) -> SscResult<Box<dyn Transport>> {
        self.open(kind)
    }
}

/// Connector serving several fixture devices keyed by address.
#[derive(Default)]
pub(crate) struct FixtureNetwork {
    devices: Mutex<HashMap<String, Arc<FixtureConnector>>>,
}

impl FixtureNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a device at `address` and returns its connector for inspection.
    pub fn add(&self, address: &str, device: Arc<FixtureDevice>) -> Arc<FixtureConnector> {
        let connector = FixtureConnector::new(device);
        self.devices
            .lock()
            .insert(address.to_string(), Arc::clone(&connector));
        connector
    }
}

#[async_trait]
impl TransportConnector for FixtureNetwork {
    async fn connect(&self, address: &str, kind: TransportKind) -> SscResult<Box<dyn Transport>> {
        let connector = self.devices.lock().get(address).cloned();
        match connector {
            Some(connector) => connector.open(kind),
            None => Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into()),
        }
    }
}
