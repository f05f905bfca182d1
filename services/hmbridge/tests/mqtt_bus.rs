//! MQTT client behaviour across broker outages

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing_test::traced_test;

use hmbridge::context::BridgeContext;
use hmbridge::dispatcher::Dispatcher;
use hmbridge::event::EventTranslator;
use hmbridge::filter::FilterSet;
use hmbridge::mqtt::{BusPublisher, MqttBus};
use hmbridge::xmlrpc::Value;

const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

fn ctx() -> BridgeContext {
    BridgeContext::with_session_id("hmip", "http://10.0.0.2:3126", "hmbridge_test")
}

async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let header = stream.read_u8().await.unwrap();
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.unwrap();
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.unwrap();
    (header >> 4, body)
}

/// Length-prefixed string at the start of `body`, and what follows it
fn split_string(body: &[u8]) -> (&str, &[u8]) {
    let len = usize::from(u16::from_be_bytes([body[0], body[1]]));
    (std::str::from_utf8(&body[2..2 + len]).unwrap(), &body[2 + len..])
}

#[tokio::test]
#[traced_test]
async fn test_events_are_answered_while_broker_is_unreachable() {
    let ctx = Arc::new(ctx());
    let (bus, _inbound) = MqttBus::connect("mqtt://127.0.0.1:1", &ctx).unwrap();
    let events = Arc::new(EventTranslator::new(ctx, FilterSet::default(), Arc::new(bus)));
    let dispatcher = Dispatcher::new(events);

    for i in 0..150 {
        let params = [
            Value::from("hmbridge_test"),
            Value::from(format!("DEV{:04}:1", i)),
            Value::from("STATE"),
            Value::Boolean(true),
        ];
        let reply = timeout(Duration::from_secs(3), dispatcher.dispatch("event", &params))
            .await
            .unwrap_or_else(|_| panic!("event #{} got no reply", i));
        assert_eq!(reply, Ok(Value::from("")));
    }

    // Request queue holds 100, the rest are dropped and logged
    assert!(logs_contain("mqtt > DEV0149:1.STATE"));
}

#[tokio::test]
async fn test_subscription_restored_after_queue_filled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("mqtt://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let (bus, _inbound) = MqttBus::connect(&url, &ctx()).unwrap();

    let (mut socket, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let (kind, _) = read_packet(&mut socket).await;
    assert_eq!(kind, 1); // CONNECT

    // CONNACK withheld, so nothing drains the request queue yet
    let mut rejected = 0;
    for i in 0..150 {
        let topic = format!("hmip/status/DEV{:04}/1/STATE", i);
        if bus.publish(&topic, "true".to_string(), true).await.is_err() {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 50);
    assert!(!bus.is_connected());

    socket.write_all(&CONNACK).await.unwrap();

    let (subscribed, online) = timeout(Duration::from_secs(5), async {
        let mut subscribed = false;
        let mut online = false;
        while !(subscribed && online) {
            let (kind, body) = read_packet(&mut socket).await;
            match kind {
                3 => {
                    let (topic, payload) = split_string(&body);
                    online |= topic == "hmip/maintenance/_bridge/online" && payload == b"true";
                },
                8 => {
                    let (filter, _) = split_string(&body[2..]);
                    subscribed |= filter == "hmip/set/+/+/+";
                },
                _ => {},
            }
        }
        (subscribed, online)
    })
    .await
    .expect("subscribe and online announcement after reconnect");

    assert!(subscribed && online);
    assert!(bus.is_connected());
}

#[tokio::test]
async fn test_publish_fails_fast_when_queue_is_full() {
    let (bus, _inbound) = MqttBus::connect("mqtt://127.0.0.1:1", &ctx()).unwrap();

    for _ in 0..100 {
        let _ = bus.publish("hmip/status/A/1/X", "1".to_string(), true).await;
    }
    let result = timeout(
        Duration::from_millis(500),
        bus.publish("hmip/status/A/1/X", "1".to_string(), true),
    )
    .await
    .unwrap();
    assert!(result.is_err());
}
