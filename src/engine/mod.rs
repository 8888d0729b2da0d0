// src/engine/mod.rs

//! Orchestration engine for toolflow.
//!
//! This module ties together:
//! - the per-tool run queues (single-flight with one coalesced rerun)
//! - the tool controllers that turn data events into run requests
//! - the main runtime event loop that reacts to:
//!   - manual and script-change triggers
//!   - run completions from the worker pool
//!   - configuration, binding and pause changes
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::channel::Primitive;
use crate::dag::DatasetKey;
use crate::exec::ExecutionResult;
use crate::types::{Recalculate, RequestId, ToolId};

/// Why a tool was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Manual trigger (e.g. initial roots at startup). Runs even when paused.
    Manual,
    /// An upstream dataset this tool consumes changed.
    SourceUpdated,
    /// A configuration value changed.
    ConfigChanged,
    /// The script body was replaced.
    ScriptChanged,
    /// Resuming after automatic triggers were ignored while paused.
    Resumed,
}

impl TriggerReason {
    pub fn is_automatic(self) -> bool {
        !matches!(self, TriggerReason::Manual)
    }
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once every tool is idle (used for
    /// `--once`).
    pub exit_when_idle: bool,
}

/// Events flowing into the runtime from the CLI, watchers and the worker
/// pool.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A tool should be (logically) triggered.
    ToolTriggered { tool: ToolId, reason: TriggerReason },
    /// A worker finished a run.
    RunCompleted {
        tool: ToolId,
        request: RequestId,
        result: ExecutionResult,
    },
    /// One configuration value changed.
    ConfigChanged {
        tool: ToolId,
        key: String,
        value: Primitive,
        recalc: Recalculate,
    },
    /// The tool's script body was replaced.
    ScriptChanged { tool: ToolId, body: String },
    PauseChanged { tool: ToolId, paused: bool },
    /// Explicitly bind an input to a dataset key.
    BindRequested {
        tool: ToolId,
        input: String,
        source: DatasetKey,
    },
    /// Explicitly unbind an input.
    UnbindRequested { tool: ToolId, input: String },
    /// A tool was created while the session runs.
    ToolAdded { spec: ToolSpec },
    ToolRemoved { tool: ToolId },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod queue;
pub mod runtime;
pub mod tool;

pub use core::{CoreRuntime, SessionState};
pub use event_handlers::{CoreCommand, CoreStep};
pub use queue::{CompletionDecision, RequestDecision, RunQueue, RunState};
pub use runtime::Runtime;
pub use tool::{InputSpec, SourceRef, Tool, ToolSpec, ToolStatus};
