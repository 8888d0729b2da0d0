// src/exec/executor_loop.rs

//! Worker pool that runs execution requests on blocking threads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::RuntimeEvent;
use crate::errors::ComputationError;
use crate::exec::namespace::Namespace;
use crate::exec::worker::Worker;
use crate::exec::{ExecutionRequest, ExecutionResult};
use crate::types::ToolId;

/// Messages accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorMessage {
    Run(ExecutionRequest),
    /// Drop the tool's namespace and snapshots once its last run is done.
    Release(ToolId),
}

/// Spawn the background executor loop.
///
/// Each request runs in its own Tokio task that hops onto a blocking thread
/// for the script itself. **Per tool there is never more than one run at a
/// time**: a new request for a tool whose previous run has not finished is
/// chained behind it. `max_workers` bounds the number of concurrent runs
/// across all tools (0 = unbounded).
pub fn spawn_executor(
    worker: Arc<Worker>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    max_workers: usize,
) -> mpsc::Sender<ExecutorMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecutorMessage>(32);
    let limit = (max_workers > 0).then(|| Arc::new(Semaphore::new(max_workers)));

    tokio::spawn(async move {
        info!(max_workers, "executor loop started");

        let mut pool = Pool {
            worker,
            runtime_tx,
            limit,
            active: HashMap::new(),
            namespaces: HashMap::new(),
        };

        while let Some(message) = rx.recv().await {
            match message {
                ExecutorMessage::Run(request) => pool.handle_request(request),
                ExecutorMessage::Release(tool) => pool.release(tool),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

struct Pool {
    worker: Arc<Worker>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    limit: Option<Arc<Semaphore>>,
    /// Latest run per tool.
    active: HashMap<ToolId, JoinHandle<()>>,
    namespaces: HashMap<ToolId, Arc<Mutex<Namespace>>>,
}

impl Pool {
    fn handle_request(&mut self, request: ExecutionRequest) {
        let tool = request.tool;
        let previous = self.take_unfinished(tool);
        let namespace = Arc::clone(self.namespaces.entry(tool).or_default());
        let worker = Arc::clone(&self.worker);
        let runtime_tx = self.runtime_tx.clone();
        let limit = self.limit.clone();

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                debug!(%tool, request = %request.id, "waiting for previous run of tool");
                let _ = previous.await;
            }

            let _permit = match limit {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };

            let id = request.id;
            let result = tokio::task::spawn_blocking(move || {
                let mut namespace = namespace.lock().unwrap_or_else(|p| p.into_inner());
                worker.run(&request, &mut namespace)
            })
            .await
            .unwrap_or_else(|err| {
                error!(%tool, request = %id, error = %err, "worker thread failed");
                ExecutionResult::Failure(ComputationError::new(format!("worker aborted: {err}")))
            });

            let event = RuntimeEvent::RunCompleted {
                tool,
                request: id,
                result,
            };
            if runtime_tx.send(event).await.is_err() {
                debug!(%tool, request = %id, "runtime gone; dropping run result");
            }
        });

        self.active.insert(tool, handle);
    }

    fn release(&mut self, tool: ToolId) {
        let previous = self.take_unfinished(tool);
        self.namespaces.remove(&tool);
        let worker = Arc::clone(&self.worker);

        tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            worker.store().clear(tool);
            info!(%tool, "released tool resources");
        });
    }

    fn take_unfinished(&mut self, tool: ToolId) -> Option<JoinHandle<()>> {
        self.active.remove(&tool).filter(|h| !h.is_finished())
    }
}
