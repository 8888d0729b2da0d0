// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender, so
//! tests can swap in a fake that answers requests without running scripts.
//!
//! - `RealExecutorBackend` wraps the [`spawn_executor`] worker pool.
//! - Tests can provide their own backend that, for example, records the
//!   requests and directly emits `RunCompleted` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};
use crate::exec::executor_loop::{spawn_executor, ExecutorMessage};
use crate::exec::worker::Worker;
use crate::exec::ExecutionRequest;
use crate::types::ToolId;

/// Trait abstracting how execution requests are run.
pub trait ExecutorBackend: Send {
    /// Start the given requests. Results come back as
    /// `RuntimeEvent::RunCompleted`.
    fn dispatch(
        &mut self,
        requests: Vec<ExecutionRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Forget any per-tool state (namespace, snapshots) for a removed tool.
    fn release(&mut self, tool: ToolId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorMessage>,
}

impl RealExecutorBackend {
    /// Spawns the background worker pool immediately.
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        worker: Arc<Worker>,
        max_workers: usize,
    ) -> Self {
        let tx = spawn_executor(worker, runtime_tx, max_workers);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn dispatch(
        &mut self,
        requests: Vec<ExecutionRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for request in requests {
                tx.send(ExecutorMessage::Run(request))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn release(&mut self, tool: ToolId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecutorMessage::Release(tool))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}
