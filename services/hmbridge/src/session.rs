//! Callback session with the controller
//!
//! `init` registers our callback URL under the session id, a periodic `ping`
//! keeps the controller's view of us alive and `init` with an empty id removes
//! the registration on shutdown. Registration is attempted once; failures are
//! logged and the bridge keeps running.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::{short_id, BridgeContext};
use crate::xmlrpc::{RpcCaller, Value};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unregistered => write!(f, "unregistered"),
            SessionState::Registered => write!(f, "registered"),
        }
    }
}

pub struct SessionManager {
    ctx: Arc<BridgeContext>,
    rpc: Arc<dyn RpcCaller>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(ctx: Arc<BridgeContext>, rpc: Arc<dyn RpcCaller>) -> Self {
        Self {
            ctx,
            rpc,
            state: Mutex::new(SessionState::Unregistered),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// `init(callbackURL, sessionId)`
    pub async fn register(&self) -> SessionState {
        let params = vec![
            Value::from(self.ctx.callback_url()),
            Value::from(self.ctx.session_id()),
        ];
        info!("rpc > init {} {}", self.ctx.callback_url(), self.ctx.session_id());

        match self.rpc.call("init", params).await {
            Ok(_) => {
                info!("rpc < init ok");
                *self.state.lock() = SessionState::Registered;
            },
            Err(e) => error!("rpc < init failed: {}", e),
        }
        self.state()
    }

    /// `ping(randomId)`; the answer arrives as a PONG event
    pub async fn ping(&self) {
        let id = short_id();
        debug!("rpc > ping {}", id);
        if let Err(e) = self.rpc.call("ping", vec![Value::from(id)]).await {
            error!("rpc < ping failed: {}", e);
        }
    }

    /// Ping every `period`, first tick one period after start
    ///
    /// Each ping runs in its own task so a hung call does not stall the
    /// schedule.
    pub fn spawn_heartbeat(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.ping().await });
            }
        })
    }

    /// `init(callbackURL, "")`, bounded by `grace`
    pub async fn deregister(&self, grace: Duration) {
        info!("rpc > init {} \"\"", self.ctx.callback_url());
        let call = self.rpc.call(
            "init",
            vec![Value::from(self.ctx.callback_url()), Value::from("")],
        );

        match tokio::time::timeout(grace, call).await {
            Ok(Ok(_)) => info!("rpc < init ok, callback removed"),
            Ok(Err(e)) => error!("rpc < init failed: {}", e),
            Err(_) => warn!("rpc < init not answered within {:?}", grace),
        }
        *self.state.lock() = SessionState::Unregistered;
    }
}
