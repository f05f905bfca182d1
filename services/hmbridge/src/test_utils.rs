//! In-memory transports for tests
//!
//! ```rust,ignore
//! use hmbridge::test_utils::{MockBus, MockRpc};
//!
//! let rpc = Arc::new(MockRpc::new());
//! let bus = Arc::new(MockBus::new());
//! // hand them to the translators, then inspect rpc.calls() / bus.published()
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{BridgeError, Result};
use crate::mqtt::BusPublisher;
use crate::xmlrpc::{RpcCaller, RpcError, Value};

type Responder = dyn Fn(&str, &[Value]) -> std::result::Result<Value, RpcError> + Send + Sync;

/// Controller stand-in
///
/// Records every call, answers through a responder closure and tracks how
/// many calls are in flight at once.
pub struct MockRpc {
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRpc {
    /// Answers every call with an empty string
    pub fn new() -> Self {
        Self::with_responder(|_, _| Ok(Value::from("")))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every call open for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// Highest number of simultaneously running calls seen so far
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait up to five seconds until at least `count` calls were made
    pub async fn wait_for_calls(&self, count: usize) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let made = self.calls.lock().len();
            if made >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl RpcCaller for MockRpc {
    async fn call(&self, method: &str, params: Vec<Value>) -> std::result::Result<Value, RpcError> {
        self.calls.lock().push((method.to_string(), params.clone()));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        let reply = (self.responder)(method, &params);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

/// Broker stand-in recording `(topic, payload, retain)`
#[derive(Default)]
pub struct MockBus {
    published: Mutex<Vec<(String, String, bool)>>,
    fail: bool,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, String, bool)> {
        self.published.lock().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|(topic, _, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl BusPublisher for MockBus {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<()> {
        if self.fail {
            return Err(BridgeError::mqtt("broker unavailable"));
        }
        self.published
            .lock()
            .push((topic.to_string(), payload, retain));
        Ok(())
    }
}
