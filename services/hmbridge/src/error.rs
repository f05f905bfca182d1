//! Error handling for the bridge service
//!
//! Only configuration errors are fatal. Everything raised while the bridge is
//! running is logged at the point of failure and the affected operation dropped.

use thiserror::Error;

use crate::xmlrpc::RpcError;

/// Bridge service error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors (invalid filter pattern, missing address, bad URL)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Outgoing RPC call failed (transport or controller fault)
    #[error("RPC error: {0}")]
    RpcError(#[from] RpcError),

    /// MQTT client errors
    #[error("MQTT error: {0}")]
    MqttError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Internal errors (task join, channel closed)
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the bridge service
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::ConfigError(msg.into())
    }

    pub fn mqtt(msg: impl Into<String>) -> Self {
        BridgeError::MqttError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::InternalError(msg.into())
    }

    /// Whether the error must stop the process at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::ConfigError(_) | BridgeError::IoError(_))
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::ConfigError(err.to_string())
    }
}

impl From<regex::Error> for BridgeError {
    fn from(err: regex::Error) -> Self {
        BridgeError::ConfigError(format!("Invalid filter pattern: {}", err))
    }
}

impl From<url::ParseError> for BridgeError {
    fn from(err: url::ParseError) -> Self {
        BridgeError::ConfigError(format!("Invalid URL: {}", err))
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::MqttError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BridgeError {
    fn from(err: tokio::task::JoinError) -> Self {
        BridgeError::InternalError(format!("Task failed: {}", err))
    }
}
