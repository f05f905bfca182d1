//! XML-RPC transport adapter
//!
//! The controller speaks XML-RPC in both directions: the bridge calls methods on
//! the controller (`client`) and the controller calls back into the bridge
//! (`server`). Both sides share the value model and `codec`.

pub mod client;
pub mod codec;
pub mod server;

use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;

pub use client::RpcClient;
pub use codec::MethodCall;

/// Fault code for a request body that is not a well-formed method call
pub const FAULT_PARSE_ERROR: i64 = -32700;
/// Fault code for a method the bridge does not serve
pub const FAULT_METHOD_NOT_FOUND: i64 = -32601;

/// An XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `i4`, `int` or `i8`
    Int(i64),
    Boolean(bool),
    Double(f64),
    /// `string` or an untyped `<value>`
    String(String),
    /// `dateTime.iso8601`, kept as transmitted
    DateTime(String),
    Base64(Vec<u8>),
    Array(Vec<Value>),
    /// Members in document order
    Struct(Vec<(String, Value)>),
    Nil,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn members(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Look up a struct member by name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.members()?
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Render the value as a bus payload
    ///
    /// Strings go out verbatim, scalars in their shortest textual form and
    /// containers as JSON. No type coercion happens beyond that.
    pub fn to_payload(&self) -> String {
        match self {
            Value::String(s) | Value::DateTime(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Nil => "null".to_string(),
            Value::Base64(_) | Value::Array(_) | Value::Struct(_) => self.to_json().to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Value::Int(i) => Json::from(*i),
            Value::Boolean(b) => Json::Bool(*b),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) | Value::DateTime(s) => Json::String(s.clone()),
            Value::Base64(bytes) => {
                Json::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            },
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Struct(members) => Json::Object(
                members
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
            Value::Nil => Json::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

/// Fault reply (`faultCode` / `faultString`)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fault {code}: {message}")]
pub struct Fault {
    pub code: i64,
    pub message: String,
}

impl Fault {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(FAULT_PARSE_ERROR, format!("parse error: {}", detail))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            FAULT_METHOD_NOT_FOUND,
            format!("requested method not found: {}", method),
        )
    }
}

/// Failure of an outgoing call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// Connection refused, reset, DNS failure and the like
    #[error("transport error: {0}")]
    Transport(String),

    /// Controller answered with a non-success HTTP status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Malformed XML in request or response
    #[error("codec error: {0}")]
    Codec(String),

    /// Controller answered with a fault
    #[error(transparent)]
    Fault(#[from] Fault),
}

impl RpcError {
    pub fn fault(code: i64, message: impl Into<String>) -> Self {
        RpcError::Fault(Fault::new(code, message))
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        RpcError::Codec(msg.into())
    }

    pub fn fault_code(&self) -> Option<i64> {
        match self {
            RpcError::Fault(fault) => Some(fault.code),
            _ => None,
        }
    }
}

/// Outgoing side of the RPC transport
///
/// Every call is an independent request/response pair. Implementations must not
/// retry and must not impose their own timeouts.
#[async_trait]
pub trait RpcCaller: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_payloads_are_verbatim() {
        assert_eq!(Value::Boolean(true).to_payload(), "true");
        assert_eq!(Value::Int(-3).to_payload(), "-3");
        assert_eq!(Value::Double(0.5).to_payload(), "0.5");
        assert_eq!(Value::Double(21.0).to_payload(), "21");
        assert_eq!(Value::from("0.50").to_payload(), "0.50");
        assert_eq!(Value::from("").to_payload(), "");
    }

    #[test]
    fn test_container_payloads_are_json() {
        let value = Value::Struct(vec![
            ("LEVEL".to_string(), Value::Double(0.25)),
            ("WORKING".to_string(), Value::Boolean(false)),
        ]);
        assert_eq!(value.to_payload(), r#"{"LEVEL":0.25,"WORKING":false}"#);

        let list = Value::Array(vec![Value::Int(1), Value::Nil]);
        assert_eq!(list.to_payload(), "[1,null]");
    }

    #[test]
    fn test_struct_lookup() {
        let value = Value::Struct(vec![
            ("ADDRESS".to_string(), Value::from("ABC1234:1")),
            ("OPERATIONS".to_string(), Value::Int(5)),
        ]);
        assert_eq!(value.get("ADDRESS").and_then(Value::as_str), Some("ABC1234:1"));
        assert_eq!(value.get("OPERATIONS").and_then(Value::as_i64), Some(5));
        assert!(value.get("TYPE").is_none());
        assert!(Value::Int(1).get("ADDRESS").is_none());
    }

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::fault(-5, "Unknown paramset");
        assert_eq!(err.to_string(), "fault -5: Unknown paramset");
        assert_eq!(err.fault_code(), Some(-5));
        assert_eq!(RpcError::HttpStatus(500).fault_code(), None);
    }
}
