//! SSC message codec.
//!
//! SSC messages address configuration values by nesting: the path
//! `audio.out.level` with value `42` travels as
//! `{"audio":{"out":{"level":42}}}`. [`wrap`] builds such an envelope and
//! [`unwrap`] walks it back down to the leaf.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{SscError, SscResult};

/// A validated, non-empty configuration path such as `device.identity.vendor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigPath {
    segments: Vec<String>,
}

impl ConfigPath {
    /// Parses a dot-separated path.
    ///
    /// Fails with [`SscError::InvalidPath`] for an empty path or one with an
    /// empty segment (`a..b`, `.a`, `a.`).
    pub fn parse(path: &str) -> SscResult<Self> {
        if path.is_empty() {
            return Err(SscError::InvalidPath(path.to_string()));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(SscError::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Returns the path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: &str) -> SscResult<Self> {
        if segment.is_empty() || segment.contains('.') {
            return Err(SscError::InvalidPath(format!("{}.{}", self, segment)));
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Returns true if this path lies under `prefix` (segment-wise).
    pub fn starts_with(&self, prefix: &ConfigPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for ConfigPath {
    type Err = SscError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Wraps `value` into a nested envelope at `path`.
pub fn wrap(path: &str, value: Value) -> SscResult<Value> {
    Ok(wrap_path(&ConfigPath::parse(path)?, value))
}

/// Wraps `value` into a nested envelope at an already validated path.
pub fn wrap_path(path: &ConfigPath, value: Value) -> Value {
    path.segments().iter().rev().fold(value, |inner, segment| {
        let mut level = Map::with_capacity(1);
        level.insert(segment.clone(), inner);
        Value::Object(level)
    })
}

/// Returns the value stored at `path` inside `envelope`.
pub fn unwrap<'v>(path: &str, envelope: &'v Value) -> SscResult<&'v Value> {
    unwrap_path(&ConfigPath::parse(path)?, envelope)
}

/// Returns the value stored at an already validated path inside `envelope`.
///
/// A level that is not a mapping counts as a missing segment.
pub fn unwrap_path<'v>(path: &ConfigPath, envelope: &'v Value) -> SscResult<&'v Value> {
    path.segments()
        .iter()
        .try_fold(envelope, |current, segment| {
            current.as_object().and_then(|level| level.get(segment))
        })
        .ok_or_else(|| SscError::PathNotFound {
            path: path.to_string(),
            message: envelope.to_string(),
        })
}
