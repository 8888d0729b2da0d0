// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::{ExecutionRequest, ExecutorBackend};
use crate::present::{render_payloads, Presenter};

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the core in response to `RuntimeEvent`s, delegating execution to
/// an `ExecutorBackend` and display to a `Presenter`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics.
pub struct Runtime<E: ExecutorBackend, P: Presenter> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    presenter: P,
}

impl<E: ExecutorBackend, P: Presenter> fmt::Debug for Runtime<E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend, P: Presenter> Runtime<E, P> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        presenter: P,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            presenter,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core (dispatch, render, release,
    ///   exit).
    ///
    /// Returns the core so callers can inspect the final session state.
    pub async fn run(mut self) -> Result<CoreRuntime> {
        info!("toolflow runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(self.core)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(requests) => {
                self.dispatch(requests).await?;
            }
            CoreCommand::Render {
                tool,
                tool_name,
                outputs,
            } => {
                let payloads = render_payloads(&outputs);
                if !payloads.is_empty() {
                    debug!(%tool, count = payloads.len(), "presenting outputs");
                    self.presenter.present(&tool_name, payloads);
                }
            }
            CoreCommand::Release(tool) => {
                self.executor.release(tool).await?;
            }
            CoreCommand::RequestExit => {
                // The core already returns keep_running=false in this case.
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, requests: Vec<ExecutionRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let tools: Vec<_> = requests.iter().map(|r| r.tool_name.as_str()).collect();
        let ids: Vec<_> = requests.iter().map(|r| r.id.0).collect();
        debug!(?tools, ?ids, "dispatching requests");

        self.executor.dispatch(requests).await
    }
}
