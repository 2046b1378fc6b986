//! Managed SSC connections.
//!
//! A [`ManagedConnection`] hides the connect/reconnect/idle-disconnect churn
//! behind one operation: [`ManagedConnection::acquire`] hands out an exclusive
//! [`ConnectionGuard`] with a live transport. Guards serialize all requests
//! to a device. Releasing a guard records activity and arms the idle watcher,
//! which closes the transport once the device has been quiet for the idle
//! timeout.
//!
//! The request-level protocol (error translation, scalar reads, ping) lives
//! on the [`SscConnection`] trait so the schema walker can run against any
//! request/response channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::codec::{unwrap, wrap};
use crate::error::{SscError, SscResult};
use crate::transport::{Transport, TransportKind};

/// Path of the error field a device sets instead of answering.
pub const ERROR_PATH: &str = "osc.error";

/// Path of the echo operation.
pub const PING_PATH: &str = "osc.ping";

/// Grace added to each idle check so a check never lands exactly on the threshold.
const IDLE_CHECK_SLACK: Duration = Duration::from_millis(50);

/// Builds a fresh transport each time the managed connection needs one.
pub type TransportFactory =
    Arc<dyn Fn() -> BoxFuture<'static, SscResult<Box<dyn Transport>>> + Send + Sync>;

/// Request/response channel speaking the SSC message protocol.
#[async_trait]
pub trait SscConnection: Send {
    /// Performs one raw round trip without inspecting the response.
    async fn exchange(&mut self, request: &Value) -> SscResult<Value>;

    /// Sends a request envelope and returns the response envelope.
    ///
    /// A response carrying `osc.error` becomes [`SscError::Protocol`].
    async fn send(&mut self, request: Value) -> SscResult<Value> {
        let response = self.exchange(&request).await?;
        check_error_field(&response)?;
        log::debug!("[SSC] Tx: {} Rx: {}", request, response);
        Ok(response)
    }

    /// Reads the scalar value at `path`.
    async fn get_value(&mut self, path: &str) -> SscResult<Value> {
        let response = self.send(wrap(path, Value::Null)?).await?;
        let value = unwrap(path, &response)?;
        if value.is_object() || value.is_array() {
            return Err(SscError::InvalidResponse(format!(
                "expected a scalar at {}, got {}",
                path, value
            )));
        }
        Ok(value.clone())
    }

    /// Writes `value` at `path` and returns the value the device echoed back.
    async fn set_value(&mut self, path: &str, value: Value) -> SscResult<Value> {
        let response = self.send(wrap(path, value)?).await?;
        Ok(unwrap(path, &response)?.clone())
    }

    /// Sends a random token to `osc.ping` and returns the round-trip time.
    async fn ping(&mut self) -> SscResult<Duration> {
        let token = Value::String(uuid::Uuid::new_v4().to_string());
        let started = Instant::now();
        let response = self.send(wrap(PING_PATH, token.clone())?).await?;
        let echoed = unwrap(PING_PATH, &response)?;
        if *echoed != token {
            return Err(SscError::InvalidResponse(format!(
                "ping echoed {} instead of {}",
                echoed, token
            )));
        }
        Ok(started.elapsed())
    }
}

/// Fails with [`SscError::Protocol`] if `response` carries a non-null `osc.error`.
pub fn check_error_field(response: &Value) -> SscResult<()> {
    match unwrap(ERROR_PATH, response) {
        Ok(Value::Null) | Err(_) => Ok(()),
        Ok(error) => Err(SscError::Protocol(scalar_to_string(error))),
    }
}

/// Renders a JSON value as plain text, without quotes for strings.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct Shared {
    label: String,
    factory: TransportFactory,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    connected: AtomicBool,
    last_activity: Mutex<Instant>,
    idle_watcher: Mutex<Option<JoinHandle<()>>>,
    idle_timeout: Duration,
}

impl Shared {
    fn is_idle(&self) -> bool {
        self.last_activity.lock().elapsed() > self.idle_timeout
    }

    fn close_locked(&self, slot: &mut Option<Box<dyn Transport>>) -> SscResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        match slot.take() {
            Some(mut transport) => transport.disconnect(),
            None => Ok(()),
        }
    }
}

/// Lazily connecting, auto-reconnecting, idle-closing wrapper around one transport.
pub struct ManagedConnection {
    shared: Arc<Shared>,
}

impl ManagedConnection {
    /// Creates a disconnected managed connection.
    ///
    /// `label` identifies the device in log output.
    pub fn new(label: impl Into<String>, factory: TransportFactory, idle_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                factory,
                transport: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                last_activity: Mutex::new(Instant::now()),
                idle_watcher: Mutex::new(None),
                idle_timeout,
            }),
        }
    }

    /// Takes the exclusive lock on this connection, connecting first if needed.
    ///
    /// If the factory fails the error is returned and the connection stays
    /// disconnected; the next call tries again.
    pub async fn acquire(&self) -> SscResult<ConnectionGuard<'_>> {
        let mut slot = self.shared.transport.lock().await;
        let usable = slot.as_ref().is_some_and(|t| t.is_connected());
        if !usable {
            if slot.take().is_some() {
                log::info!(
                    "[Connection] Reconnecting {} due to closed connection",
                    self.shared.label
                );
            }
            self.shared.connected.store(false, Ordering::SeqCst);
            let transport = (self.shared.factory)().await?;
            log::debug!(
                "[Connection] {} connected via {}",
                self.shared.label,
                transport.kind()
            );
            *slot = Some(transport);
            self.shared.connected.store(true, Ordering::SeqCst);
        }
        Ok(ConnectionGuard { owner: self, slot })
    }

    /// Returns the logical connected flag.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Closes the transport now, waiting for any in-flight request first.
    pub async fn close(&self) -> SscResult<()> {
        let mut slot = self.shared.transport.lock().await;
        self.shared.close_locked(&mut slot)
    }

    /// Records activity and makes sure an idle watcher is running.
    fn touch(&self) {
        *self.shared.last_activity.lock() = Instant::now();

        let mut watcher = self.shared.idle_watcher.lock();
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "[Connection] No runtime available, idle timeout disabled for {}",
                self.shared.label
            );
            return;
        };
        let period = self.shared.idle_timeout + IDLE_CHECK_SLACK;
        *watcher = Some(runtime.spawn(watch_idle(Arc::downgrade(&self.shared), period)));
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.idle_watcher.lock().take() {
            handle.abort();
        }
    }
}

async fn watch_idle(shared: Weak<Shared>, period: Duration) {
    loop {
        tokio::time::sleep(period).await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if !shared.connected.load(Ordering::SeqCst) {
            return;
        }
        log::trace!("[Connection] Checking {} for idle timeout", shared.label);
        if !shared.is_idle() {
            continue;
        }

        let mut slot = shared.transport.lock().await;
        // Activity may have been recorded while we waited for the lock
        if !shared.is_idle() {
            continue;
        }
        log::info!(
            "[Connection] Closing connection to {} due to inactivity",
            shared.label
        );
        if let Err(e) = shared.close_locked(&mut slot) {
            log::error!("[Connection] Idle close of {} failed: {}", shared.label, e);
        }
        return;
    }
}

/// Exclusive access to a connected transport.
///
/// Dropping the guard records activity, re-arms the idle watcher and lets
/// the next request through.
pub struct ConnectionGuard<'a> {
    owner: &'a ManagedConnection,
    slot: tokio::sync::MutexGuard<'a, Option<Box<dyn Transport>>>,
}

impl ConnectionGuard<'_> {
    /// Returns the kind of the active transport.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.slot.as_ref().map(|t| t.kind())
    }
}

#[async_trait]
impl SscConnection for ConnectionGuard<'_> {
    async fn exchange(&mut self, request: &Value) -> SscResult<Value> {
        let transport = self
            .slot
            .as_mut()
            .filter(|t| t.is_connected())
            .ok_or(SscError::NotConnected)?;
        transport.round_trip(request).await
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        let still_connected = self.slot.as_ref().is_some_and(|t| t.is_connected());
        self.owner
            .shared
            .connected
            .store(still_connected, Ordering::SeqCst);
        self.owner.touch();
    }
}
