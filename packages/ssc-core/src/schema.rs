//! Schema discovery and value limits.
//!
//! Devices describe their configuration tree through `osc.schema`, one level
//! per request: leaves come back as `null`, containers as objects to descend
//! into. [`expand_schema`] walks the whole tree depth-first and returns every
//! leaf path. [`limits`] reads the `osc.limits` record of one path.

use std::str::FromStr;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::codec::{unwrap, unwrap_path, wrap, wrap_path, ConfigPath};
use crate::connection::{scalar_to_string, SscConnection};
use crate::error::{SscError, SscResult};

/// Path of the schema operation.
pub const SCHEMA_PATH: &str = "osc.schema";

/// Path of the limits operation.
pub const LIMITS_PATH: &str = "osc.limits";

/// Prefix of the protocol's own paths, which carry no limits.
const PROTOCOL_PREFIX: &str = "osc.";

/// Value type of a configuration path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimitsKind {
    Number,
    String,
    Boolean,
    Container,
}

impl FromStr for LimitsKind {
    type Err = SscError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Number" => Ok(Self::Number),
            "String" => Ok(Self::String),
            "Boolean" => Ok(Self::Boolean),
            "Container" => Ok(Self::Container),
            other => Err(SscError::UnknownLimitsType(other.to_string())),
        }
    }
}

/// Value constraints of one configuration path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Limits {
    pub kind: LimitsKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increment: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values, rendered as text. Empty when unrestricted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Human readable label per entry of `options`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub option_descriptions: Vec<String>,
}

impl Limits {
    /// Parses a limits record such as `{"type":"Number","min":0,"max":100}`.
    ///
    /// Numeric and text fields of the wrong JSON type are treated as absent.
    pub fn from_record(record: &Value) -> SscResult<Self> {
        let record = record.as_object().ok_or_else(|| {
            SscError::InvalidResponse(format!("limits record is not an object: {}", record))
        })?;
        let kind = match record.get("type") {
            Some(Value::String(tag)) => tag.parse()?,
            Some(other) => return Err(SscError::UnknownLimitsType(scalar_to_string(other))),
            None => {
                return Err(SscError::InvalidResponse(
                    "limits record has no type".to_string(),
                ))
            }
        };

        let number = |key: &str| record.get(key).and_then(Value::as_f64);
        let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            kind,
            min: number("min"),
            max: number("max"),
            increment: number("inc"),
            units: text("units"),
            description: text("desc"),
            options: text_list(record, "option"),
            option_descriptions: text_list(record, "option_desc"),
        })
    }

    /// Returns `(min, max)` with the given defaults filled in.
    pub fn range(&self, default_min: f64, default_max: f64) -> (f64, f64) {
        (
            self.min.unwrap_or(default_min),
            self.max.unwrap_or(default_max),
        )
    }
}

fn text_list(record: &Map<String, Value>, key: &str) -> Vec<String> {
    match record.get(key) {
        Some(Value::Array(items)) => items.iter().map(scalar_to_string).collect(),
        _ => Vec::new(),
    }
}

/// Asks for one schema level: the root when `path` is `None`.
async fn query_schema<C>(conn: &mut C, path: Option<&ConfigPath>) -> SscResult<Vec<Value>>
where
    C: SscConnection + ?Sized,
{
    let payload = match path {
        None => Value::Null,
        Some(path) => Value::Array(vec![wrap_path(path, Value::Null)]),
    };
    let response = conn.send(wrap(SCHEMA_PATH, payload)?).await?;
    match unwrap(SCHEMA_PATH, &response)? {
        Value::Array(nodes) => Ok(nodes.clone()),
        other => Err(SscError::InvalidResponse(format!(
            "schema response is not a list: {}",
            other
        ))),
    }
}

/// Lists every leaf path under `path` (or the whole tree), depth-first.
///
/// Leaves appear in the order the device returns keys. A failure anywhere
/// in the walk fails the whole expansion.
pub fn expand_schema<'a, C>(
    conn: &'a mut C,
    path: Option<ConfigPath>,
) -> BoxFuture<'a, SscResult<Vec<String>>>
where
    C: SscConnection + ?Sized,
{
    async move {
        let nodes = query_schema(conn, path.as_ref()).await?;
        let mut leaves = Vec::new();
        for node in nodes {
            let level = match &path {
                None => node,
                Some(path) => unwrap_path(path, &node)?.clone(),
            };
            let Value::Object(children) = level else {
                return Err(SscError::InvalidResponse(format!(
                    "schema level {} is not an object",
                    path.as_ref().map_or_else(|| "<root>".to_string(), ToString::to_string)
                )));
            };
            for (key, child) in children {
                let child_path = match &path {
                    None => ConfigPath::parse(&key)?,
                    Some(path) => path.child(&key)?,
                };
                if child.is_null() {
                    leaves.push(child_path.to_string());
                } else {
                    leaves.extend(expand_schema(&mut *conn, Some(child_path)).await?);
                }
            }
        }
        Ok(leaves)
    }
    .boxed()
}

/// Reads the limits record of `path`.
///
/// The device answers `{"osc":{"limits":[<path-envelope>]}}` where the
/// envelope holds either the record itself or a list whose first element
/// is the record.
pub async fn limits<C>(conn: &mut C, path: &str) -> SscResult<Limits>
where
    C: SscConnection + ?Sized,
{
    let target = ConfigPath::parse(path)?;
    let payload = Value::Array(vec![wrap_path(&target, Value::Null)]);
    let response = conn.send(wrap(LIMITS_PATH, payload)?).await?;

    let envelope = first_if_list(unwrap(LIMITS_PATH, &response)?, LIMITS_PATH)?;
    let record = first_if_list(unwrap_path(&target, envelope)?, path)?;
    Limits::from_record(record)
}

fn first_if_list<'v>(value: &'v Value, what: &str) -> SscResult<&'v Value> {
    match value {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| SscError::InvalidResponse(format!("{} returned an empty list", what))),
        other => Ok(other),
    }
}

/// Reads limits for each path in order, skipping the protocol's `osc.` paths.
///
/// Requests are sequential on the same connection; the first failure aborts.
pub async fn limits_for_schema<C>(conn: &mut C, paths: &[String]) -> SscResult<Vec<(String, Limits)>>
where
    C: SscConnection + ?Sized,
{
    let mut result = Vec::with_capacity(paths.len());
    for path in paths.iter().filter(|p| !p.starts_with(PROTOCOL_PREFIX)) {
        let record = limits(conn, path).await?;
        result.push((path.clone(), record));
    }
    Ok(result)
}
