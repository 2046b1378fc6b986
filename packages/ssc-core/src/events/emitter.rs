//! Event emitter abstraction for decoupling the engine from event delivery.

use super::{DiscoveryEvent, VolumeEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a discovery event.
    fn emit_discovery(&self, event: DiscoveryEvent);

    /// Emits a volume forwarding event.
    fn emit_volume(&self, event: VolumeEvent);
}

/// No-op emitter. Events are silently discarded.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_discovery(&self, _event: DiscoveryEvent) {}

    fn emit_volume(&self, _event: VolumeEvent) {}
}

/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_discovery(&self, event: DiscoveryEvent) {
        tracing::debug!(?event, "discovery_event");
    }

    fn emit_volume(&self, event: VolumeEvent) {
        tracing::debug!(?event, "volume_event");
    }
}
