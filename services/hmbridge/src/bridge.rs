//! Bridge orchestration
//!
//! Wires the transports to the translators and runs the startup sequence:
//! callback server first, then `init`, then heartbeat, provisioning and the
//! command loop. `shutdown` deregisters before anything is torn down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::command::CommandTranslator;
use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::dispatcher::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::event::EventTranslator;
use crate::mqtt::{BusMessage, BusPublisher, MqttBus};
use crate::provisioning::Provisioner;
use crate::session::{SessionManager, SessionState, HEARTBEAT_INTERVAL};
use crate::xmlrpc::{server, RpcCaller, RpcClient};

pub struct Bridge {
    config: BridgeConfig,
    ctx: Arc<BridgeContext>,
    rpc: Arc<dyn RpcCaller>,
    bus: Arc<dyn BusPublisher>,
    inbound: Option<mpsc::Receiver<BusMessage>>,
    session: Arc<SessionManager>,
    heartbeat_interval: Duration,
    local_addr: Option<SocketAddr>,
    server_shutdown: Option<oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Bridge {
    /// Create the RPC client and connect the bus
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let ctx = BridgeContext::new(config.name.clone(), config.callback_url());
        let rpc = RpcClient::new(config.controller_url())?;
        let (bus, inbound) = MqttBus::connect(&config.mqtt_url, &ctx)?;

        Ok(Self::with_transports(
            config,
            ctx,
            Arc::new(rpc),
            Arc::new(bus),
            inbound,
        ))
    }

    /// Assemble a bridge around already constructed transports
    pub fn with_transports(
        config: BridgeConfig,
        ctx: BridgeContext,
        rpc: Arc<dyn RpcCaller>,
        bus: Arc<dyn BusPublisher>,
        inbound: mpsc::Receiver<BusMessage>,
    ) -> Self {
        let ctx = Arc::new(ctx);
        let session = Arc::new(SessionManager::new(Arc::clone(&ctx), Arc::clone(&rpc)));

        Self {
            config,
            ctx,
            rpc,
            bus,
            inbound: Some(inbound),
            session,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            local_addr: None,
            server_shutdown: None,
            tasks: Vec::new(),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Address the callback server is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn start(&mut self) -> Result<()> {
        let inbound = self
            .inbound
            .take()
            .ok_or_else(|| BridgeError::internal("bridge already started"))?;

        let filter = self.config.filter_set()?;
        info!(
            "filter: {} whitelist, {} blacklist patterns",
            filter.whitelist_len(),
            filter.blacklist_len()
        );
        let events = Arc::new(EventTranslator::new(
            Arc::clone(&self.ctx),
            filter,
            Arc::clone(&self.bus),
        ));
        let dispatcher = Arc::new(Dispatcher::new(events));

        // Events may only arrive once the server is listening
        let listener = server::bind(self.config.listen_port).await?;
        self.local_addr = Some(listener.local_addr()?);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.server_shutdown = Some(shutdown_tx);
        self.tasks.push(tokio::spawn(async move {
            let stop = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = server::serve(listener, dispatcher, stop).await {
                error!("rpc server stopped: {}", e);
            }
        }));

        self.session.register().await;
        self.tasks
            .push(self.session.spawn_heartbeat(self.heartbeat_interval));

        let provisioner = Provisioner::new(Arc::clone(&self.rpc));
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = provisioner.run().await {
                warn!("provisioning aborted: {}", e);
            }
        }));

        let commands = CommandTranslator::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.rpc),
            self.config.command_encoding,
        );
        self.tasks.push(tokio::spawn(commands.run(inbound)));

        info!(
            "{} started, session {}",
            self.ctx.instance_name(),
            self.ctx.session_id()
        );
        Ok(())
    }

    /// Deregister, then stop the server and all background tasks
    pub async fn shutdown(&mut self) {
        self.session
            .deregister(Duration::from_secs(self.config.shutdown_grace_secs))
            .await;

        if let Some(tx) = self.server_shutdown.take() {
            let _ = tx.send(());
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("{} stopped", self.ctx.instance_name());
    }
}
