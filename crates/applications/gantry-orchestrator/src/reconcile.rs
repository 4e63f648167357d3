//! Periodic reconciliation driver
//!
//! Resources parked in Error by an indeterminate failure are re-queried
//! against their backend on a fixed interval until the backend gives a
//! definitive answer. The sweep itself lives on the engine; this is
//! only the task that keeps calling it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::Orchestrator;

/// Background task driving [`Orchestrator::reconcile_once`]
pub struct Reconciler {
    engine: Arc<Orchestrator>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Reconciler {
    /// Create a driver over the engine
    pub fn new(engine: Arc<Orchestrator>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            engine,
            interval,
            cancel,
        }
    }

    /// Run the sweep loop until cancelled
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("Reconciler sweeping every {:?}", self.interval);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {
                        self.engine.reconcile_once().await;
                    }
                }
            }
            debug!("Reconciler stopped");
        })
    }
}
