//! Event system for discovery and volume forwarding.
//!
//! Domain events are emitted through the [`EventEmitter`] trait so the
//! engine does not care whether they end up in a log, a UI or nowhere.

mod emitter;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::device::Device;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery Events
// ─────────────────────────────────────────────────────────────────────────────

/// Discovery run lifecycle and device table changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryEvent {
    /// A discovery run began with an empty table.
    #[serde(rename_all = "camelCase")]
    Started {
        generation: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A device was added or gained a capability.
    DeviceUpdated {
        device: Device,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Identity retrieval enriched a device.
    IdentityResolved {
        device: Device,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Identity retrieval failed; the device stays in the table without identity.
    IdentityFailed {
        address: String,
        error: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The run ended, by timeout or by request.
    #[serde(rename_all = "camelCase")]
    Stopped {
        device_count: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Volume Events
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one volume fan-out.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VolumeEvent {
    #[serde(rename_all = "camelCase")]
    Applied {
        target: f64,
        success_count: usize,
        total: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}
