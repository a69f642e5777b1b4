//! The schema a decoded telemetry sample must match.
//!
//! A device frame such as
//!
//! ```json
//! {"paramId":1,"value":85,"tiangId":5,"status":"normal"}
//! ```
//!
//! becomes a [`SensorReading`] with `param_id = 1`, `value = 85` and the two
//! remaining fields kept verbatim in `extra`.  Documents without a `paramId`
//! or with a `null` value are rejected with [`ReadingError::Schema`] instead
//! of being forwarded with missing fields.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Why a document could not be turned into a [`SensorReading`].
#[derive(Debug, Error)]
pub enum ReadingError {
    /// The text is not JSON at all.
    #[error("malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The JSON is valid but is not an object.
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// The object is missing required fields or has fields of the wrong type.
    #[error("reading does not match schema: {0}")]
    Schema(#[source] serde_json::Error),
}

/// A parameter identifier: the device's numeric id or a string path.
///
/// Any JSON number is accepted, negative and fractional ids included.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamId {
    Numeric(Number),
    Path(String),
}

impl ParamId {
    /// Interprets a topic segment: an integer becomes `Numeric`, anything
    /// else a `Path`.
    pub fn from_segment(segment: &str) -> Self {
        if let Ok(n) = segment.parse::<u64>() {
            return ParamId::from(n);
        }
        segment
            .parse::<i64>()
            .map(|n| ParamId::Numeric(Number::from(n)))
            .unwrap_or_else(|_| ParamId::Path(segment.to_string()))
    }
}

impl From<u64> for ParamId {
    fn from(id: u64) -> Self {
        ParamId::Numeric(Number::from(id))
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamId::Numeric(n) => write!(f, "{n}"),
            ParamId::Path(p) => f.write_str(p),
        }
    }
}

/// The measured value.  `null` is not a valid reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    /// Kept as a JSON number so `85` is re-emitted as `85`, not `85.0`.
    Number(Number),
    Text(String),
    Flag(bool),
    Series(Vec<Value>),
    Structured(Map<String, Value>),
}

impl SensorValue {
    /// The value as `f64`, when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

/// One decoded telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub param_id: ParamId,
    pub value: SensorValue,
    /// Every other field of the source document, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SensorReading {
    /// Parses and validates one JSON document.
    ///
    /// # Errors
    ///
    /// See [`ReadingError`].
    pub fn from_json(text: &str) -> Result<Self, ReadingError> {
        let value: Value = serde_json::from_str(text).map_err(ReadingError::Malformed)?;
        Self::from_value(value)
    }

    /// Validates an already-parsed JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ReadingError::NotAnObject`] or [`ReadingError::Schema`].
    pub fn from_value(value: Value) -> Result<Self, ReadingError> {
        if !value.is_object() {
            return Err(ReadingError::NotAnObject(json_kind(&value)));
        }
        serde_json::from_value(value).map_err(ReadingError::Schema)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
