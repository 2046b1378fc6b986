//! CLI configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use ssc_core::{AddressFamily, Capabilities, Device, VolumeSettings};

/// CLI configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// SSC port of the devices.
    /// Override: `SSC_PORT`
    pub ssc_port: u16,

    /// Seconds of inactivity before a connection is closed.
    pub idle_timeout_secs: u64,

    /// Upper bound on a single request (milliseconds).
    /// Override: `SSC_REQUEST_TIMEOUT_MS`
    pub request_timeout_ms: u64,

    /// Upper bound on TCP connection setup (milliseconds).
    pub connect_timeout_ms: u64,

    /// Default discovery run duration (milliseconds).
    /// Override: `SSC_DISCOVERY_TIMEOUT_MS`
    pub discovery_timeout_ms: u64,

    /// Address family to discover and connect over.
    pub address_family: AddressFamily,

    /// Devices controlled by the `volume` command.
    pub devices: Vec<Device>,

    /// Volume mapping. `volume.control_path` override: `SSC_CONTROL_PATH`
    pub volume: VolumeSettings,
}

impl Default for CliConfig {
    fn default() -> Self {
        let core = ssc_core::Config::default();
        Self {
            ssc_port: core.ssc_port,
            idle_timeout_secs: core.idle_timeout_secs,
            request_timeout_ms: core.request_timeout_ms,
            connect_timeout_ms: core.connect_timeout_ms,
            discovery_timeout_ms: core.discovery_timeout_ms,
            address_family: core.address_family,
            devices: Vec::new(),
            volume: VolumeSettings::default(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies overrides looked up by variable name.
    ///
    /// Unparsable values are ignored with a warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    log::warn!("Ignoring {}={:?}: not a valid value", key, raw);
                    None
                }
            }
        }

        if let Some(port) = parsed("SSC_PORT", lookup("SSC_PORT")) {
            self.ssc_port = port;
        }
        if let Some(ms) = parsed("SSC_REQUEST_TIMEOUT_MS", lookup("SSC_REQUEST_TIMEOUT_MS")) {
            self.request_timeout_ms = ms;
        }
        if let Some(ms) = parsed("SSC_DISCOVERY_TIMEOUT_MS", lookup("SSC_DISCOVERY_TIMEOUT_MS")) {
            self.discovery_timeout_ms = ms;
        }
        if let Some(path) = lookup("SSC_CONTROL_PATH") {
            self.volume.control_path = path;
        }

        // Note: SSC_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to ssc-core's Config type and validates both layers.
    pub fn to_core_config(&self) -> Result<ssc_core::Config> {
        let core = ssc_core::Config {
            ssc_port: self.ssc_port,
            idle_timeout_secs: self.idle_timeout_secs,
            connect_timeout_ms: self.connect_timeout_ms,
            request_timeout_ms: self.request_timeout_ms,
            discovery_timeout_ms: self.discovery_timeout_ms,
            address_family: self.address_family,
            ..Default::default()
        };
        core.validate()
            .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
        self.volume
            .validate()
            .map_err(|e| anyhow!("Invalid volume configuration: {}", e))?;
        Ok(core)
    }

    /// Capabilities of a configured device, if the address is listed.
    pub fn capabilities_of(&self, address: &str) -> Option<Capabilities> {
        self.devices
            .iter()
            .find(|d| d.address == address)
            .map(|d| d.capabilities)
    }
}
