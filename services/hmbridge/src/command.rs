//! Bus command → controller `setValue`
//!
//! Every message on the command filter becomes one independent outgoing call.
//! Commands are neither queued nor rate limited and a failed call is only
//! logged.

use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::BridgeContext;
use crate::mqtt::BusMessage;
use crate::xmlrpc::{RpcCaller, RpcError, Value};

/// How a command payload becomes the `setValue` value parameter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CommandEncoding {
    /// Payload text sent as a string
    #[default]
    Raw,
    /// JSON scalars sent typed, anything else as a string
    Json,
}

impl CommandEncoding {
    pub fn encode(self, payload: &str) -> Value {
        match self {
            CommandEncoding::Raw => Value::from(payload),
            CommandEncoding::Json => json_scalar(payload).unwrap_or_else(|| Value::from(payload)),
        }
    }
}

fn json_scalar(payload: &str) -> Option<Value> {
    match serde_json::from_str::<serde_json::Value>(payload.trim()).ok()? {
        serde_json::Value::Bool(b) => Some(Value::Boolean(b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Double)),
        serde_json::Value::String(s) => Some(Value::String(s)),
        _ => None,
    }
}

pub struct CommandTranslator {
    ctx: Arc<BridgeContext>,
    rpc: Arc<dyn RpcCaller>,
    encoding: CommandEncoding,
}

impl CommandTranslator {
    pub fn new(ctx: Arc<BridgeContext>, rpc: Arc<dyn RpcCaller>, encoding: CommandEncoding) -> Self {
        Self { ctx, rpc, encoding }
    }

    /// Spawn the `setValue` call for one message
    ///
    /// Returns `None` when the topic is not a command topic.
    pub fn handle(&self, message: &BusMessage) -> Option<JoinHandle<()>> {
        let Some(dp) = self.ctx.parse_set_topic(&message.topic) else {
            warn!("mqtt < {} is not a command topic", message.topic);
            return None;
        };

        let payload = String::from_utf8_lossy(&message.payload);
        debug!("mqtt < {} {}", message.topic, payload);

        let address = dp.address.to_string();
        let params = vec![
            Value::from(address.as_str()),
            Value::from(dp.datapoint.as_str()),
            self.encoding.encode(&payload),
        ];
        let rpc = Arc::clone(&self.rpc);

        Some(tokio::spawn(async move {
            debug!("rpc > setValue {} {}", address, dp.datapoint);
            match rpc.call("setValue", params).await {
                Ok(_) => debug!("rpc < setValue {} {} ok", address, dp.datapoint),
                Err(RpcError::Fault(fault)) => error!(
                    "rpc < setValue {} {} fault {} {}",
                    address, dp.datapoint, fault.code, fault.message
                ),
                Err(e) => error!("rpc < setValue {} {}: {}", address, dp.datapoint, e),
            }
        }))
    }

    /// Consume command messages until the bus side closes the channel
    pub async fn run(self, mut inbound: mpsc::Receiver<BusMessage>) {
        while let Some(message) = inbound.recv().await {
            self.handle(&message);
        }
        info!("command channel closed");
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::test_utils::MockRpc;
    use tracing_test::traced_test;

    fn translator(rpc: Arc<MockRpc>, encoding: CommandEncoding) -> CommandTranslator {
        let ctx = Arc::new(BridgeContext::with_session_id("hmip", "http://h:3126", "s"));
        CommandTranslator::new(ctx, rpc, encoding)
    }

    fn message(topic: &str, payload: &str) -> BusMessage {
        BusMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_encoding() {
        assert_eq!(CommandEncoding::Raw.encode("0.5"), Value::from("0.5"));
        assert_eq!(CommandEncoding::Json.encode("0.5"), Value::Double(0.5));
        assert_eq!(CommandEncoding::Json.encode("21"), Value::Int(21));
        assert_eq!(CommandEncoding::Json.encode("true"), Value::Boolean(true));
        assert_eq!(CommandEncoding::Json.encode("\"AUTO\""), Value::from("AUTO"));
        assert_eq!(CommandEncoding::Json.encode("AUTO"), Value::from("AUTO"));
        assert_eq!(CommandEncoding::Json.encode("[1,2]"), Value::from("[1,2]"));
    }

    #[tokio::test]
    async fn test_set_value_call() {
        let rpc = Arc::new(MockRpc::new());
        let commands = translator(rpc.clone(), CommandEncoding::Raw);

        commands
            .handle(&message("hmip/set/ABC1234/1/LEVEL", "0.5"))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            rpc.calls(),
            vec![(
                "setValue".to_string(),
                vec![Value::from("ABC1234:1"), Value::from("LEVEL"), Value::from("0.5")]
            )]
        );
    }

    #[tokio::test]
    async fn test_device_root_command() {
        let rpc = Arc::new(MockRpc::new());
        let commands = translator(rpc.clone(), CommandEncoding::Json);

        commands
            .handle(&message("hmip/set/ABC1234//INSTALL_TEST", "true"))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            rpc.calls()[0].1,
            vec![Value::from("ABC1234"), Value::from("INSTALL_TEST"), Value::Boolean(true)]
        );
    }

    #[tokio::test]
    async fn test_non_command_topic_ignored() {
        let rpc = Arc::new(MockRpc::new());
        let commands = translator(rpc.clone(), CommandEncoding::Raw);

        assert!(commands.handle(&message("hmip/set/ABC1234/1", "1")).is_none());
        assert!(rpc.calls().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fault_is_logged_and_swallowed() {
        let rpc = Arc::new(MockRpc::with_responder(|_, _| {
            Err(RpcError::fault(-5, "Unknown paramset"))
        }));
        let commands = translator(rpc.clone(), CommandEncoding::Raw);

        commands
            .handle(&message("hmip/set/ABC1234/1/LEVEL", "0.5"))
            .unwrap()
            .await
            .unwrap();
        commands
            .handle(&message("hmip/set/ABC1234/2/LEVEL", "1"))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(rpc.calls().len(), 2);
        assert!(logs_contain("fault -5 Unknown paramset"));
    }

    #[tokio::test]
    async fn test_run_until_channel_closed() {
        let rpc = Arc::new(MockRpc::new());
        let commands = translator(rpc.clone(), CommandEncoding::Raw);
        let (tx, rx) = mpsc::channel(4);

        tx.send(message("hmip/set/ABC1234/1/LEVEL", "0.2")).await.unwrap();
        tx.send(message("hmip/set/ABC1234/2/LEVEL", "0.8")).await.unwrap();
        drop(tx);
        commands.run(rx).await;

        assert!(rpc.wait_for_calls(2).await);
        assert_eq!(rpc.calls().len(), 2);
    }
}
