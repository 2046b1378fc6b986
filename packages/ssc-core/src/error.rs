//! Centralized error types for the SSC core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Exposes stable machine-readable codes through [`ErrorCode`]
//! - Re-exports the per-subsystem result aliases

use std::io;

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::volume::VolumeError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths (CLI output, logs, front ends).
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Errors raised by the codec, transports, connections and SSC operations.
#[derive(Debug, Error)]
pub enum SscError {
    /// Empty path, or a path with an empty segment, given to the codec.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// A path segment was absent while unwrapping an envelope.
    #[error("path {path} not found in message {message}")]
    PathNotFound {
        /// The full dot path that was requested.
        path: String,
        /// The message that was searched, for diagnostics.
        message: String,
    },

    /// Operation attempted on a closed logical connection.
    #[error("device is not connected")]
    NotConnected,

    /// I/O failure during connect, send or receive (timeouts use `TimedOut`).
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The device answered with an explicit `osc.error` field.
    #[error("error response from device: {0}")]
    Protocol(String),

    /// A limits record carried an unrecognized `type` tag.
    #[error("unknown limits type {0:?}")]
    UnknownLimitsType(String),

    /// The device advertises neither TCP nor UDP support.
    #[error("device {0} does not support any connection type")]
    UnsupportedDevice(String),

    /// Disconnect attempted while a send was in flight.
    #[error("cannot disconnect while sending")]
    Busy,

    /// The device answered with a message of the wrong shape or invalid JSON.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SscError {
    /// Builds a transport timeout error for an operation.
    pub(crate) fn timed_out(operation: &str, after: std::time::Duration) -> Self {
        Self::Transport(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out after {}ms", operation, after.as_millis()),
        ))
    }

    /// Returns true if the error came from the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<serde_json::Error> for SscError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

impl ErrorCode for SscError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "invalid_path",
            Self::PathNotFound { .. } => "path_not_found",
            Self::NotConnected => "not_connected",
            Self::Transport(e) if e.kind() == io::ErrorKind::TimedOut => "transport_timeout",
            Self::Transport(_) => "transport_error",
            Self::Protocol(_) => "protocol_error",
            Self::UnknownLimitsType(_) => "unknown_limits_type",
            Self::UnsupportedDevice(_) => "unsupported_device",
            Self::Busy => "busy",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::Multicast(_) => "multicast_unavailable",
            Self::MdnsDaemon(_) => "mdns_daemon_failed",
        }
    }
}

impl ErrorCode for VolumeError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::AllFailed(_) => "all_devices_failed",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::discovery::DiscoveryResult;

/// Convenient Result alias for SSC operations.
pub type SscResult<T> = Result<T, SscError>;
