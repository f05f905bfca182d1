//! HomeMatic IP ⇄ MQTT bridge
//!
//! Registers an XML-RPC callback with the CCU, republishes every datapoint
//! event as a retained MQTT message under `{name}/status/...` and turns
//! messages on `{name}/set/...` into `setValue` calls.
//!
//! # Modules
//!
//! - `xmlrpc`: value model, codec, client and callback server
//! - `mqtt`: bus adapter on top of rumqttc
//! - `dispatcher`: inbound method routing, multicall unwrapping
//! - `event` / `command`: the two translation directions
//! - `session`: `init` / `ping` / deregistration
//! - `provisioning`: `reportValueUsage` declarations through a concurrency-1 queue
//! - `bridge`: startup and shutdown sequencing

pub mod address;
pub mod bridge;
pub mod command;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod filter;
pub mod mqtt;
pub mod provisioning;
pub mod session;
pub mod test_utils;
pub mod xmlrpc;

pub use bridge::Bridge;
pub use config::{BridgeConfig, CliArgs};
pub use error::{BridgeError, Result};
