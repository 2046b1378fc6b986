//! Volume forwarding.
//!
//! Maps a local volume level onto the configured user range and writes the
//! result to every controlled device concurrently. Device sessions are kept
//! across calls, so consecutive volume changes reuse the open transports.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codec::ConfigPath;
use crate::config::Config;
use crate::device::{Device, DeviceSession};
use crate::events::{now_millis, EventEmitter, VolumeEvent};
use crate::transport::TransportConnector;

/// Default SSC path of the output level.
pub const DEFAULT_CONTROL_PATH: &str = "audio.out.level";

/// Errors from volume forwarding.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// Nothing to apply the volume to, or unusable settings.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every device rejected the write. Holds `(address, error)` pairs.
    #[error("all volume commands failed: {0:?}")]
    AllFailed(Vec<(String, String)>),
}

/// Range mapping between local volume and device level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    /// Device level for the lowest non-zero local volume.
    pub user_min_volume: f64,
    /// Device level for full local volume.
    pub user_max_volume: f64,
    /// Lowest level the device accepts.
    pub speaker_min_volume: f64,
    /// Highest level the device accepts.
    pub speaker_max_volume: f64,
    /// SSC path written on each device.
    pub control_path: String,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            user_min_volume: 35.0,
            user_max_volume: 95.0,
            speaker_min_volume: 0.0,
            speaker_max_volume: 100.0,
            control_path: DEFAULT_CONTROL_PATH.to_string(),
        }
    }
}

impl VolumeSettings {
    /// Validates the settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.user_min_volume > self.user_max_volume {
            return Err("user_min_volume must not exceed user_max_volume".to_string());
        }
        if self.speaker_min_volume > self.speaker_max_volume {
            return Err("speaker_min_volume must not exceed speaker_max_volume".to_string());
        }
        ConfigPath::parse(&self.control_path)
            .map(|_| ())
            .map_err(|e| format!("control_path: {}", e))
    }

    /// Maps a local `current / max` volume onto the device level.
    ///
    /// Zero stays zero (muted). Anything else lands in the user range,
    /// clamped to what the device accepts.
    pub fn target_volume(&self, current: u32, max: u32) -> f64 {
        if current == 0 {
            return 0.0;
        }
        let ratio = if max == 0 {
            1.0
        } else {
            f64::from(current) / f64::from(max)
        };
        let target = self.user_min_volume + (self.user_max_volume - self.user_min_volume) * ratio;
        target.clamp(self.speaker_min_volume, self.speaker_max_volume)
    }
}

/// Result of one volume fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeApplyResult {
    /// Level written to the devices.
    pub target: f64,
    /// Number of devices that accepted the level.
    pub success: usize,
    /// Number of devices attempted.
    pub total: usize,
    /// List of (address, error) tuples for failures.
    pub failures: Vec<(String, String)>,
}

/// Forwards volume changes to a set of controlled devices.
pub struct VolumeForwarder {
    config: Config,
    connector: Arc<dyn TransportConnector>,
    emitter: Arc<dyn EventEmitter>,
    settings: RwLock<VolumeSettings>,
    sessions: Mutex<Vec<Arc<DeviceSession>>>,
}

impl VolumeForwarder {
    /// Creates a forwarder with no controlled devices.
    pub fn new(
        config: Config,
        connector: Arc<dyn TransportConnector>,
        emitter: Arc<dyn EventEmitter>,
        settings: VolumeSettings,
    ) -> Self {
        Self {
            config,
            connector,
            emitter,
            settings: RwLock::new(settings),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Returns the current settings.
    pub fn settings(&self) -> VolumeSettings {
        self.settings.read().clone()
    }

    /// Replaces the settings used by subsequent [`apply`](Self::apply) calls.
    pub fn set_settings(&self, settings: VolumeSettings) {
        *self.settings.write() = settings;
    }

    /// Returns the controlled devices.
    pub fn devices(&self) -> Vec<Device> {
        self.sessions.lock().iter().map(|s| s.device()).collect()
    }

    /// Replaces the controlled devices if the set changed.
    ///
    /// Sessions of devices that stay with unchanged capabilities are kept
    /// along with their open connections. Returns true if anything changed.
    pub fn set_devices(&self, devices: &[Device]) -> bool {
        let mut sessions = self.sessions.lock();
        let unchanged = sessions.len() == devices.len()
            && sessions.iter().zip(devices).all(|(session, device)| {
                let current = session.device();
                current.address == device.address && current.capabilities == device.capabilities
            });
        if unchanged {
            return false;
        }

        let mut next = Vec::with_capacity(devices.len());
        for device in devices {
            let reused = sessions.iter().find(|s| {
                let current = s.device();
                current.address == device.address && current.capabilities == device.capabilities
            });
            next.push(match reused {
                Some(session) => Arc::clone(session),
                None => Arc::new(DeviceSession::new(
                    device,
                    Arc::clone(&self.connector),
                    &self.config,
                )),
            });
        }
        log::info!("[Volume] Controlling {} device(s)", next.len());
        *sessions = next;
        true
    }

    /// Maps `current / max` to a device level and writes it to every device.
    pub async fn apply(&self, current: u32, max: u32) -> Result<VolumeApplyResult, VolumeError> {
        let target = self.settings.read().target_volume(current, max);
        self.apply_level(target).await
    }

    /// Writes `target` to every controlled device concurrently.
    pub async fn apply_level(&self, target: f64) -> Result<VolumeApplyResult, VolumeError> {
        let path = self.settings.read().control_path.clone();
        let sessions: Vec<_> = self.sessions.lock().iter().cloned().collect();
        if sessions.is_empty() {
            return Err(VolumeError::InvalidRequest(
                "no devices to control".to_string(),
            ));
        }
        let Some(level) = serde_json::Number::from_f64(target).map(Value::Number) else {
            return Err(VolumeError::InvalidRequest(format!(
                "volume {} is not a finite number",
                target
            )));
        };

        let futures: Vec<_> = sessions
            .iter()
            .map(|session| {
                let path = path.as_str();
                let level = level.clone();
                async move {
                    session
                        .set_value(path, level)
                        .await
                        .map_err(|e| (session.address(), e.to_string()))
                }
            })
            .collect();

        let results = join_all(futures).await;
        let (successes, failures): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);

        let success_count = successes.len();
        let failure_details: Vec<_> = failures.into_iter().filter_map(|r| r.err()).collect();
        for (address, error) in &failure_details {
            log::warn!("[Volume] Setting {} on {} failed: {}", path, address, error);
        }

        self.emitter.emit_volume(VolumeEvent::Applied {
            target,
            success_count,
            total: sessions.len(),
            timestamp: now_millis(),
        });

        if success_count == 0 {
            return Err(VolumeError::AllFailed(failure_details));
        }
        log::debug!(
            "[Volume] Set {} to {} on {}/{} device(s)",
            path,
            target,
            success_count,
            sessions.len()
        );
        Ok(VolumeApplyResult {
            target,
            success: success_count,
            total: sessions.len(),
            failures: failure_details,
        })
    }
}
