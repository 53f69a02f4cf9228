//! Wire structures exchanged with the remote controller.
//!
//! # Command
//!
//! ```json
//! {"id": "7", "method": "uia.element.tap", "params": [12, 0.5, 0.5]}
//! ```
//!
//! `id` is an opaque correlation token (any JSON value) echoed back verbatim.
//! A missing `params` is an empty list.
//!
//! # Result envelope
//!
//! ```json
//! {"id": "7", "result": null, "error": null}
//! ```
//!
//! `result: false` and `result: null` are distinct. Handler results are
//! passed through unchanged.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::element::Point;
use crate::error::BridgeError;

/// Result sent before the first command, announcing the bridge is ready.
pub const STANDBY_RESULT: &str = "BootstrapStandBy";

/// Result sent in reply to a release request.
pub const RELEASED_RESULT: &str = "released";

/// Method name that ends the session without going through the registry.
pub const RELEASE_METHOD: &str = "release";

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A command received from the controller. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, deserialize_with = "params_or_null")]
    pub params: Vec<Value>,
}

fn params_or_null<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Command {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Parses one command from its JSON text.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text.trim())?)
    }
}

/// The reply to one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub id: Value,
    pub result: Value,
    pub error: Option<String>,
}

impl ResultEnvelope {
    /// The envelope offered before any command has been received.
    pub fn standby() -> Self {
        Self::ok(Value::Null, Value::String(STANDBY_RESULT.to_string()))
    }

    /// `{id: null, result: null, error: null}`, sent when the payload already
    /// travelled out-of-band.
    pub fn empty() -> Self {
        Self::ok(Value::Null, Value::Null)
    }

    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn err(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn released(id: Value) -> Self {
        Self::ok(id, Value::String(RELEASED_RESULT.to_string()))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Goes into the envelope's `result` as is.
    Value(Value),
    /// The payload was delivered out-of-band; reply with the empty envelope.
    DoNotReturn,
    /// The controller asked to end the session.
    Release,
}

impl Reply {
    /// A reply with `result: null`.
    pub fn none() -> Self {
        Reply::Value(Value::Null)
    }

    pub fn value(v: impl Serialize) -> Self {
        Reply::Value(serde_json::to_value(v).unwrap_or(Value::Null))
    }
}

// ---------------------------------------------------------------------------
// Positional parameters
// ---------------------------------------------------------------------------

/// Typed access to a command's positional parameters.
///
/// Missing parameters and explicit `null`s are treated alike. The `truthy_*`
/// accessors additionally treat `0`, `false` and `""` as absent, for
/// parameters that fall back to a default whenever they are not set.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    values: &'a [Value],
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl<'a> Params<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw parameter, or `None` when missing or `null`.
    pub fn get(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index).filter(|v| !v.is_null())
    }

    /// The raw parameter, or `None` when it is not truthy.
    pub fn truthy(&self, index: usize) -> Option<&'a Value> {
        self.values.get(index).filter(|v| is_truthy(v))
    }

    pub fn required(&self, index: usize) -> Result<&'a Value, BridgeError> {
        self.get(index)
            .ok_or_else(|| BridgeError::invalid_argument(index, "missing parameter"))
    }

    pub fn str(&self, index: usize) -> Result<&'a str, BridgeError> {
        self.required(index)?
            .as_str()
            .ok_or_else(|| BridgeError::invalid_argument(index, "expected a string"))
    }

    pub fn opt_str(&self, index: usize) -> Result<Option<&'a str>, BridgeError> {
        match self.get(index) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| BridgeError::invalid_argument(index, "expected a string")),
        }
    }

    /// A non-empty string, or `None`.
    pub fn truthy_str(&self, index: usize) -> Result<Option<&'a str>, BridgeError> {
        Ok(self.opt_str(index)?.filter(|s| !s.is_empty()))
    }

    pub fn f64(&self, index: usize) -> Result<f64, BridgeError> {
        number(self.required(index)?, index)
    }

    pub fn opt_f64(&self, index: usize) -> Result<Option<f64>, BridgeError> {
        self.get(index).map(|v| number(v, index)).transpose()
    }

    /// A non-zero number, or `None`.
    pub fn truthy_f64(&self, index: usize) -> Result<Option<f64>, BridgeError> {
        self.truthy(index).map(|v| number(v, index)).transpose()
    }

    pub fn i64(&self, index: usize) -> Result<i64, BridgeError> {
        let v = self.required(index)?;
        v.as_i64()
            .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| BridgeError::invalid_argument(index, "expected an integer"))
    }

    pub fn point(&self, index: usize) -> Result<Point, BridgeError> {
        self.deserialize(index)
    }

    pub fn opt_point(&self, index: usize) -> Result<Option<Point>, BridgeError> {
        self.opt_deserialize(index)
    }

    /// Deserializes a structured parameter.
    pub fn deserialize<T: DeserializeOwned>(&self, index: usize) -> Result<T, BridgeError> {
        serde_json::from_value(self.required(index)?.clone())
            .map_err(|e| BridgeError::invalid_argument(index, e.to_string()))
    }

    pub fn opt_deserialize<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>, BridgeError> {
        match self.get(index) {
            None => Ok(None),
            Some(_) => self.deserialize(index).map(Some),
        }
    }

    /// An argument list for direct-call methods (`null` or missing is empty).
    pub fn list(&self, index: usize) -> Result<&'a [Value], BridgeError> {
        match self.get(index) {
            None => Ok(&[]),
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(_) => Err(BridgeError::invalid_argument(index, "expected a list")),
        }
    }
}

fn number(value: &Value, index: usize) -> Result<f64, BridgeError> {
    match value {
        Value::Number(n) => n.as_f64(),
        // "5" as well as 5
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| BridgeError::invalid_argument(index, "expected a number"))
}
