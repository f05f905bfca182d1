//! Startup provisioning
//!
//! Enumerates the controller's devices and declares interest in every
//! event-capable parameter with `reportValueUsage`. The controller cannot cope
//! with these calls at enumeration speed, so all of them go through a
//! [`WorkQueue`] that runs exactly one job at a time in submission order.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::xmlrpc::{RpcCaller, RpcError, Value};

/// OPERATIONS bit marking a parameter that generates events
pub const OPERATION_EVENT: i64 = 4;
pub const PARAMSET_VALUES: &str = "VALUES";

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO job queue with concurrency 1
///
/// Jobs may submit further jobs; those run after everything already queued.
pub struct WorkQueue {
    jobs: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl WorkQueue {
    /// Create the queue and spawn its worker
    pub fn new() -> Arc<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let worker_pending = Arc::clone(&pending);
        let worker_idle = Arc::clone(&idle);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
                if worker_pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    worker_idle.notify_waiters();
                }
            }
        });

        Arc::new(Self {
            jobs,
            pending,
            idle,
        })
    }

    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(Box::pin(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(BridgeError::internal("provisioning queue worker stopped"));
        }
        Ok(())
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once no job is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Names of the parameters whose OPERATIONS include the event bit
///
/// Parameter order follows the description.
pub fn event_parameters(description: &Value) -> Vec<String> {
    description
        .members()
        .unwrap_or_default()
        .iter()
        .filter(|(_, param)| {
            param
                .get("OPERATIONS")
                .and_then(Value::as_i64)
                .is_some_and(|ops| ops & OPERATION_EVENT != 0)
        })
        .map(|(name, _)| name.clone())
        .collect()
}

fn log_description_failure(address: &str, err: &RpcError) {
    match err {
        RpcError::Fault(fault) => error!(
            "getParamsetDescription {} {} {} {}",
            address, PARAMSET_VALUES, fault.code, fault.message
        ),
        other => error!("getParamsetDescription {} {}: {}", address, PARAMSET_VALUES, other),
    }
}

pub struct Provisioner {
    rpc: Arc<dyn RpcCaller>,
    queue: Arc<WorkQueue>,
}

impl Provisioner {
    pub fn new(rpc: Arc<dyn RpcCaller>) -> Self {
        Self {
            rpc,
            queue: WorkQueue::new(),
        }
    }

    /// Run the whole sequence; returns the number of devices enumerated
    pub async fn run(&self) -> Result<usize> {
        let devices = match self.rpc.call("listDevices", Vec::new()).await {
            Ok(devices) => devices,
            Err(e) => {
                error!("rpc > listDevices: {}", e);
                return Err(e.into());
            },
        };
        let devices = devices.as_array().unwrap_or_default();
        debug!("rpc > listDevices {}", devices.len());

        for device in devices {
            let Some(address) = device.get("ADDRESS").and_then(Value::as_str) else {
                warn!("listDevices entry without ADDRESS skipped");
                continue;
            };
            self.queue
                .submit(describe(Arc::clone(&self.rpc), Arc::clone(&self.queue), address.to_string()))?;
        }

        self.queue.wait_idle().await;
        info!("finished sending reportValueUsage requests");
        Ok(devices.len())
    }
}

async fn describe(rpc: Arc<dyn RpcCaller>, queue: Arc<WorkQueue>, address: String) {
    let params = vec![Value::from(address.as_str()), Value::from(PARAMSET_VALUES)];
    let description = match rpc.call("getParamsetDescription", params).await {
        Ok(description) => description,
        Err(e) => {
            log_description_failure(&address, &e);
            return;
        },
    };

    for param in event_parameters(&description) {
        let job = report_usage(Arc::clone(&rpc), address.clone(), param);
        if let Err(e) = queue.submit(job) {
            error!("reportValueUsage {}: {}", address, e);
            return;
        }
    }
}

async fn report_usage(rpc: Arc<dyn RpcCaller>, address: String, param: String) {
    let params = vec![
        Value::from(address.as_str()),
        Value::from(param.as_str()),
        Value::Int(1),
    ];
    match rpc.call("reportValueUsage", params).await {
        Ok(response) => debug!(
            "reportValueUsage {} {} {}",
            address,
            param,
            response.to_payload()
        ),
        Err(RpcError::Fault(fault)) => warn!(
            "reportValueUsage {} {} {} {}",
            address, param, fault.code, fault.message
        ),
        Err(e) => warn!("reportValueUsage {} {}: {}", address, param, e),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn param(ops: i64) -> Value {
        Value::Struct(vec![
            ("OPERATIONS".to_string(), Value::Int(ops)),
            ("TYPE".to_string(), Value::from("BOOL")),
        ])
    }

    #[test]
    fn test_event_parameters() {
        let description = Value::Struct(vec![
            ("PRESS_SHORT".to_string(), param(4)),
            ("LEVEL".to_string(), param(7)),
            ("INSTALL_TEST".to_string(), param(2)),
            ("ON_TIME".to_string(), param(1)),
            ("BROKEN".to_string(), Value::from("x")),
        ]);
        assert_eq!(event_parameters(&description), vec!["PRESS_SHORT", "LEVEL"]);
        assert!(event_parameters(&Value::from("")).is_empty());
    }

    #[tokio::test]
    async fn test_queue_runs_in_submission_order() {
        let queue = WorkQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u64 {
            let order = Arc::clone(&order);
            queue
                .submit(async move {
                    // Earlier jobs sleep longer; order must still hold
                    tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                    order.lock().push(i);
                })
                .unwrap();
        }

        queue.wait_idle().await;
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_nested_submissions_run_before_idle() {
        let queue = WorkQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_queue = Arc::clone(&queue);
        let inner_order = Arc::clone(&order);
        queue
            .submit(async move {
                inner_order.lock().push("outer");
                let nested_order = Arc::clone(&inner_order);
                inner_queue
                    .submit(async move { nested_order.lock().push("nested") })
                    .unwrap();
            })
            .unwrap();
        let tail_order = Arc::clone(&order);
        queue
            .submit(async move { tail_order.lock().push("tail") })
            .unwrap();

        queue.wait_idle().await;
        assert_eq!(*order.lock(), vec!["outer", "tail", "nested"]);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue() {
        let queue = WorkQueue::new();
        queue.wait_idle().await;
        assert_eq!(queue.pending(), 0);
    }
}
