//! Inbound RPC method dispatch
//!
//! The controller calls back into the bridge with a small, fixed set of
//! methods. Names are resolved to [`RpcMethod`] once; anything unknown lands in
//! [`RpcMethod::NotFound`], which is logged and never takes the server down.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::address::DeviceAddress;
use crate::event::EventTranslator;
use crate::xmlrpc::{Fault, Value};

/// Address of the controller's own virtual device
pub const CENTRAL_ADDRESS: &str = "CENTRAL:0";
/// Datapoint echoing our `ping`
pub const PONG_DATAPOINT: &str = "PONG";

/// Methods served to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    NotFound,
    Multicall,
    ListMethods,
    Event,
    ListDevices,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 5] = [
        RpcMethod::NotFound,
        RpcMethod::Multicall,
        RpcMethod::ListMethods,
        RpcMethod::Event,
        RpcMethod::ListDevices,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RpcMethod::NotFound => "notFound",
            RpcMethod::Multicall => "system.multicall",
            RpcMethod::ListMethods => "system.listMethods",
            RpcMethod::Event => "event",
            RpcMethod::ListDevices => "listDevices",
        }
    }

    /// Resolve a method name, defaulting to `NotFound`
    pub fn resolve(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|method| method.name() == name)
            .unwrap_or(RpcMethod::NotFound)
    }
}

pub struct Dispatcher {
    events: Arc<EventTranslator>,
}

impl Dispatcher {
    pub fn new(events: Arc<EventTranslator>) -> Self {
        Self { events }
    }

    /// Handle one top-level call
    pub async fn dispatch(&self, method: &str, params: &[Value]) -> Result<Value, Fault> {
        debug!("rpc < {}", method);
        match RpcMethod::resolve(method) {
            RpcMethod::NotFound => {
                not_found(method);
                Err(Fault::method_not_found(method))
            },
            RpcMethod::Multicall => Ok(self.multicall(params).await),
            RpcMethod::ListMethods => Ok(list_methods()),
            RpcMethod::Event => Ok(self.event(params).await),
            RpcMethod::ListDevices => Ok(Value::Array(Vec::new())),
        }
    }

    /// `system.multicall(calls[])`
    ///
    /// One empty placeholder per entry, whatever the entry did.
    async fn multicall(&self, params: &[Value]) -> Value {
        let Some(calls) = params.first().and_then(Value::as_array) else {
            warn!("rpc < system.multicall without call list");
            return Value::Array(Vec::new());
        };

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let name = call.get("methodName").and_then(Value::as_str);
            let call_params = call
                .get("params")
                .and_then(Value::as_array)
                .unwrap_or_default();

            match name.map(RpcMethod::resolve) {
                Some(RpcMethod::Event) => {
                    self.event(call_params).await;
                },
                Some(RpcMethod::ListMethods | RpcMethod::ListDevices) => {
                    debug!("rpc < {} (multicall)", name.unwrap_or_default());
                },
                // Nested multicalls are not unwrapped
                _ => not_found(name.unwrap_or("<missing methodName>")),
            }
            results.push(Value::from(""));
        }

        Value::Array(results)
    }

    /// `event(interfaceId, address, datapoint, value)`
    async fn event(&self, params: &[Value]) -> Value {
        let [_, address, datapoint, value, ..] = params else {
            warn!("rpc < event with {} params, expected 4", params.len());
            return Value::from("");
        };
        let (Some(address), Some(datapoint)) = (address.as_str(), datapoint.as_str()) else {
            warn!("rpc < event with non-string address or datapoint");
            return Value::from("");
        };

        if address == CENTRAL_ADDRESS && datapoint == PONG_DATAPOINT {
            debug!("rpc < {} {} {}", address, datapoint, value.to_payload());
            return Value::from("");
        }

        debug!(
            "rpc < event {} {} {}",
            DeviceAddress::parse(address),
            datapoint,
            value.to_payload()
        );
        if let Err(e) = self.events.translate(address, datapoint, value).await {
            error!("mqtt > {}.{}: {}", address, datapoint, e);
        }
        Value::from("")
    }
}

fn list_methods() -> Value {
    Value::Array(RpcMethod::ALL.iter().map(|m| Value::from(m.name())).collect())
}

fn not_found(method: &str) {
    warn!("rpc < method {} does not exist", method);
}
