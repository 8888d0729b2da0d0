// src/engine/tool.rs

//! Tool instances and the definitions they are created from.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::channel::{Primitive, Variables};
use crate::dag::{ConsumerDefinition, DataManager};
use crate::engine::queue::RunQueue;
use crate::types::{RequestId, ToolId};

/// Explicit upstream reference, by tool name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub tool: String,
    pub output: String,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tool, self.output)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub definition: ConsumerDefinition,
    pub source: Option<SourceRef>,
}

/// Everything needed to create a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub body: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<String>,
    pub config: BTreeMap<String, Primitive>,
    pub auto_consume: bool,
    pub paused: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            config: BTreeMap::new(),
            auto_consume: true,
            paused: false,
        }
    }
}

/// User-visible status of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolStatus {
    #[default]
    Idle,
    Active,
    Done,
    Error(String),
    Paused,
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolStatus::Idle => f.write_str("idle"),
            ToolStatus::Active => f.write_str("active"),
            ToolStatus::Done => f.write_str("done"),
            ToolStatus::Error(text) => write!(f, "error: {text}"),
            ToolStatus::Paused => f.write_str("paused"),
        }
    }
}

/// One tool instance, owned by the core.
#[derive(Debug)]
pub struct Tool {
    pub id: ToolId,
    pub name: String,
    pub body: Arc<str>,
    pub config: BTreeMap<String, Primitive>,
    pub data: DataManager,
    pub queue: RunQueue,
    pub status: ToolStatus,
    pub paused: bool,
    pub auto_consume: bool,
    /// An automatic trigger was ignored while paused.
    pub stale: bool,
    /// Request currently in flight, if any.
    pub in_flight: Option<RequestId>,
    /// Declared outputs of the latest successful run.
    pub last_outputs: Option<Variables>,
}

impl Tool {
    pub fn new(id: ToolId, spec: &ToolSpec) -> Self {
        let mut data = DataManager::new(id);
        for input in &spec.inputs {
            data.add_input(input.name.clone(), input.definition.clone());
        }
        for output in &spec.outputs {
            data.add_output(output.clone());
        }

        Self {
            id,
            name: spec.name.clone(),
            body: Arc::from(spec.body.as_str()),
            config: spec.config.clone(),
            data,
            queue: RunQueue::new(),
            status: if spec.paused {
                ToolStatus::Paused
            } else {
                ToolStatus::Idle
            },
            paused: spec.paused,
            auto_consume: spec.auto_consume,
            stale: false,
            in_flight: None,
            last_outputs: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }
}
