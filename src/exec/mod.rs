// src/exec/mod.rs

//! Execution layer.
//!
//! Runs a tool's script off the control thread and reports back to the
//! runtime via `RuntimeEvent::RunCompleted`.
//!
//! - [`worker`] runs one request against a tool's private namespace.
//! - [`namespace`] holds those per-tool bindings between runs.
//! - [`script`] builds the Rhai engine and converts values in and out.
//! - [`snapshot`] persists the staged inputs and collected outputs.
//! - [`executor_loop`] owns the worker pool.
//! - [`backend`] provides the `ExecutorBackend` trait and the production
//!   `RealExecutorBackend`, which tests can replace with a fake.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::channel::{Primitive, StyleSheet, Variables};
use crate::dag::Dataset;
use crate::errors::ComputationError;
use crate::types::{RequestId, ToolId};

pub mod backend;
pub mod executor_loop;
pub mod namespace;
pub mod script;
pub mod snapshot;
pub mod worker;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{spawn_executor, ExecutorMessage};
pub use namespace::Namespace;
pub use snapshot::{build_store, FileSnapshotStore, MemorySnapshotStore, SnapshotStore, Slot};
pub use worker::Worker;

/// Immutable snapshot of everything one run needs.
///
/// Built on the control thread at dispatch time; the worker never looks at
/// live registry state.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub id: RequestId,
    pub tool: ToolId,
    pub tool_name: String,
    pub body: Arc<str>,
    pub config: BTreeMap<String, Primitive>,
    /// Input port name -> the dataset it resolved to, if any.
    pub inputs: BTreeMap<String, Option<Arc<Dataset>>>,
    pub styles: Option<StyleSheet>,
}

/// Outcome of one run. Never partial.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success(Variables),
    Failure(ComputationError),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }
}
