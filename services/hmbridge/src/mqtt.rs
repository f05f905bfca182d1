//! MQTT bus adapter
//!
//! Wraps a `rumqttc` client. The event loop runs in its own task; it marks the
//! bridge online and (re)subscribes the command filter on every CONNACK, and
//! hands incoming command messages to the command path over a channel.
//!
//! Publishing never waits on the broker: while it is unreachable the request
//! queue fills up and further publishes fail fast instead of stalling callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::context::BridgeContext;
use crate::error::{BridgeError, Result};

const DEFAULT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 100;
const INBOUND_CAPACITY: usize = 100;

/// Publishing side of the bus
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()>;
}

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker location parsed from `mqtt://[user:pass@]host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
}

impl BrokerEndpoint {
    pub fn parse(broker_url: &str) -> Result<Self> {
        let url = url::Url::parse(broker_url)?;
        if !matches!(url.scheme(), "mqtt" | "tcp") {
            return Err(BridgeError::config(format!(
                "Unsupported broker URL scheme '{}' (expected mqtt:// or tcp://)",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BridgeError::config(format!("Broker URL has no host: {}", broker_url)))?
            .to_string();

        let credentials = match (url.username(), url.password()) {
            ("", _) => None,
            (user, password) => Some((user.to_string(), password.unwrap_or_default().to_string())),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            credentials,
        })
    }
}

/// Match an MQTT topic against a filter, returning the wildcard captures
///
/// `+` captures exactly one level, a trailing `#` captures the remaining levels
/// joined by `/`. Returns `None` when the topic does not match.
pub fn match_topic<'a>(filter: &str, topic: &'a str) -> Option<Vec<&'a str>> {
    let mut captures = Vec::new();
    let mut levels = topic.split('/');
    let mut consumed = 0usize;

    for pattern in filter.split('/') {
        if pattern == "#" {
            captures.push(topic.get(consumed..).unwrap_or_default());
            return Some(captures);
        }

        let level = levels.next()?;
        consumed += level.len() + 1;
        match pattern {
            "+" => captures.push(level),
            literal if literal == level => {},
            _ => return None,
        }
    }

    levels.next().is_none().then_some(captures)
}

fn mqtt_options(endpoint: &BrokerEndpoint, ctx: &BridgeContext) -> MqttOptions {
    let mut options = MqttOptions::new(ctx.instance_name(), &endpoint.host, endpoint.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_last_will(LastWill::new(
        ctx.online_topic(),
        "false",
        QoS::AtMostOnce,
        true,
    ));
    if let Some((user, password)) = &endpoint.credentials {
        options.set_credentials(user, password);
    }
    options
}

/// Connected bus client
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttBus {
    /// Create the client and start its event loop
    ///
    /// The returned receiver yields every message arriving on the command filter.
    pub fn connect(
        broker_url: &str,
        ctx: &BridgeContext,
    ) -> Result<(Self, mpsc::Receiver<BusMessage>)> {
        let endpoint = BrokerEndpoint::parse(broker_url)?;
        info!("mqtt trying to connect {}", broker_url);

        let (client, eventloop) = AsyncClient::new(mqtt_options(&endpoint, ctx), REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let session = EventLoopSession {
            client: client.clone(),
            online_topic: ctx.online_topic(),
            set_filter: ctx.set_filter(),
            broker_url: broker_url.to_string(),
            connected: Arc::clone(&connected),
            inbound: tx,
        };
        tokio::spawn(session.run(eventloop));

        Ok((Self { client, connected }, rx))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusPublisher for MqttBus {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.into_bytes())?;
        Ok(())
    }
}

struct EventLoopSession {
    client: AsyncClient,
    online_topic: String,
    set_filter: String,
    broker_url: String,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Sender<BusMessage>,
}

impl EventLoopSession {
    async fn run(self, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = BusMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                    if self.inbound.send(message).await.is_err() {
                        debug!("mqtt < {} dropped, command path closed", publish.topic);
                    }
                },
                Ok(_) => {},
                Err(e) => {
                    if self.connected.swap(false, Ordering::SeqCst) {
                        error!("mqtt connection lost {}: {}", self.broker_url, e);
                    } else {
                        warn!("mqtt connection error {}: {}", self.broker_url, e);
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                },
            }
        }
    }

    fn on_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        info!("mqtt connected {}", self.broker_url);

        // The queue may still hold requests from the outage, so wait for room
        // outside the event loop task
        tokio::spawn(announce(
            self.client.clone(),
            self.online_topic.clone(),
            self.set_filter.clone(),
        ));
    }
}

async fn announce(client: AsyncClient, online_topic: String, set_filter: String) {
    match client.subscribe(&set_filter, QoS::AtMostOnce).await {
        Ok(()) => debug!("mqtt subscribed {}", set_filter),
        Err(e) => error!("mqtt subscribe {}: {}", set_filter, e),
    }
    if let Err(e) = client
        .publish(&online_topic, QoS::AtMostOnce, true, "true")
        .await
    {
        error!("mqtt > {}: {}", online_topic, e);
    }
}
