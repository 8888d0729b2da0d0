use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use toolflow::channel::Variables;
use toolflow::engine::RuntimeEvent;
use toolflow::errors::Result;
use toolflow::exec::{ExecutionRequest, ExecutionResult, ExecutorBackend};
use toolflow::types::ToolId;

/// Decides what a fake run produces.
pub type Responder = Arc<dyn Fn(&ExecutionRequest) -> ExecutionResult + Send + Sync>;

/// A fake executor that:
/// - records every request it was handed (and every released tool)
/// - immediately reports `RunCompleted` with whatever the responder returns.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    requests: Arc<Mutex<Vec<ExecutionRequest>>>,
    released: Arc<Mutex<Vec<ToolId>>>,
    responder: Responder,
}

impl FakeExecutor {
    /// Every run succeeds with no outputs.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self::with_responder(
            runtime_tx,
            Arc::new(|_| ExecutionResult::Success(Variables::new())),
        )
    }

    pub fn with_responder(runtime_tx: mpsc::Sender<RuntimeEvent>, responder: Responder) -> Self {
        Self {
            runtime_tx,
            requests: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(Vec::new())),
            responder,
        }
    }

    /// Shared log of dispatched requests, in dispatch order.
    pub fn requests(&self) -> Arc<Mutex<Vec<ExecutionRequest>>> {
        Arc::clone(&self.requests)
    }

    pub fn released(&self) -> Arc<Mutex<Vec<ToolId>>> {
        Arc::clone(&self.released)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        requests: Vec<ExecutionRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let log = Arc::clone(&self.requests);
        let responder = Arc::clone(&self.responder);

        Box::pin(async move {
            for request in requests {
                let result = responder(&request);
                {
                    let mut guard = log.lock().unwrap();
                    guard.push(request.clone());
                }

                tx.send(RuntimeEvent::RunCompleted {
                    tool: request.tool,
                    request: request.id,
                    result,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn release(&mut self, tool: ToolId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let released = Arc::clone(&self.released);
        Box::pin(async move {
            released.lock().unwrap().push(tool);
            Ok(())
        })
    }
}
