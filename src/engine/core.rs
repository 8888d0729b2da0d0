// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated session state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending execution requests to the worker pool
//! - handing render payloads to the presenter
//!
//! All registry and data-manager mutation happens here, on the control
//! task. The core can be unit tested without Tokio, channels or scripts.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::channel::StyleSheet;
use crate::dag::{DatasetKey, DatasetRegistry};
use crate::engine::event_handlers::{
    handle_bind_requested, handle_config_changed, handle_pause_changed, handle_run_completed,
    handle_script_changed, handle_tool_added, handle_tool_removed, handle_tool_trigger, handle_unbind_requested,
    CoreStep,
};
use crate::engine::tool::{SourceRef, Tool, ToolSpec};
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::errors::{BindingError, Result, ToolflowError};
use crate::types::{RequestId, ToolId};

#[derive(Debug, Clone)]
struct PendingSource {
    tool: ToolId,
    input: String,
    source: SourceRef,
}

/// Explicit session context: the registry, every tool and the session-wide
/// style sheet.
#[derive(Debug, Default)]
pub struct SessionState {
    pub(crate) registry: DatasetRegistry,
    pub(crate) tools: BTreeMap<ToolId, Tool>,
    pub(crate) names: HashMap<String, ToolId>,
    pub(crate) styles: StyleSheet,
    /// Explicit sources whose producer has not been created yet.
    pending_sources: Vec<PendingSource>,
    next_tool: u64,
    next_request: u64,
}

impl SessionState {
    pub fn new(styles: StyleSheet) -> Self {
        Self {
            styles,
            next_tool: 1,
            next_request: 1,
            ..Self::default()
        }
    }

    /// Create a tool, register it as a producer and bind what can be bound.
    ///
    /// Explicit sources naming a tool that does not exist yet are bound as
    /// soon as that tool is added. Auto-consume inputs scan the existing
    /// producers, most recently created first.
    pub fn add_tool(&mut self, spec: ToolSpec) -> Result<ToolId> {
        if self.names.contains_key(&spec.name) {
            return Err(ToolflowError::ConfigError(format!(
                "duplicate tool name '{}'",
                spec.name
            )));
        }

        let id = ToolId(self.next_tool);
        self.next_tool += 1;

        let mut tool = Tool::new(id, &spec);
        for input in &spec.inputs {
            if let Some(source) = &input.source {
                tool.data.pin(&input.name);
                self.pending_sources.push(PendingSource {
                    tool: id,
                    input: input.name.clone(),
                    source: source.clone(),
                });
            }
        }

        self.registry.register_producer(id);
        self.names.insert(spec.name.clone(), id);
        self.tools.insert(id, tool);
        info!(tool = %id, name = %spec.name, "created tool");

        self.bind_pending_sources()?;

        if spec.auto_consume {
            let candidates = self.candidates();
            if let Some(tool) = self.tools.get_mut(&id) {
                tool.data.consume_any(&mut self.registry, &candidates);
            }
        }

        Ok(id)
    }

    fn bind_pending_sources(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_sources);
        let mut cycle = None;

        for entry in pending {
            let Some(producer) = self.names.get(&entry.source.tool).copied() else {
                self.pending_sources.push(entry);
                continue;
            };
            let Some(tool) = self.tools.get_mut(&entry.tool) else {
                continue;
            };

            let key = DatasetKey::new(producer, entry.source.output.clone());
            match tool.data.consume_with(&mut self.registry, &entry.input, key) {
                Ok(()) => {
                    debug!(tool = %entry.tool, input = %entry.input, source = %entry.source, "bound explicit source");
                }
                Err(err @ BindingError::Cycle { .. }) => {
                    cycle.get_or_insert_with(|| {
                        ToolflowError::BindingCycle(format!(
                            "{}.{} <- {}: {err}",
                            tool.name, entry.input, entry.source
                        ))
                    });
                }
                Err(err) => {
                    warn!(tool = %entry.tool, input = %entry.input, error = %err, "explicit source not bound");
                }
            }
        }

        match cycle {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Explicitly bind `input` of `tool` to `key` and pin it, so
    /// auto-consume leaves it alone. Events are left for the next settle.
    pub fn bind_input(
        &mut self,
        tool: ToolId,
        input: &str,
        key: DatasetKey,
    ) -> std::result::Result<(), BindingError> {
        let Some(entry) = self.tools.get_mut(&tool) else {
            return Err(BindingError::UnknownInput(input.to_string()));
        };
        entry.data.consume_with(&mut self.registry, input, key)?;
        entry.data.pin(input);
        Ok(())
    }

    pub(crate) fn forget_tool(&mut self, id: ToolId) {
        self.pending_sources.retain(|p| p.tool != id);
    }

    pub fn tool(&self, id: ToolId) -> Option<&Tool> {
        self.tools.get(&id)
    }

    pub fn tool_mut(&mut self, id: ToolId) -> Option<&mut Tool> {
        self.tools.get_mut(&id)
    }

    pub fn tool_id(&self, name: &str) -> Option<ToolId> {
        self.names.get(name).copied()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn styles(&self) -> &StyleSheet {
        &self.styles
    }

    /// Tools with no input ports; they only run when triggered directly.
    pub fn roots(&self) -> Vec<ToolId> {
        self.tools
            .values()
            .filter(|t| t.data.input_names().next().is_none())
            .map(|t| t.id)
            .collect()
    }

    pub fn all_idle(&self) -> bool {
        self.tools.values().all(Tool::is_idle)
    }

    /// Auto-consume scan order: most recently registered producer first.
    pub(crate) fn candidates(&self) -> Vec<ToolId> {
        self.registry.producers().iter().rev().copied().collect()
    }

    pub(crate) fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        id
    }
}

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    state: SessionState,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(state: SessionState, options: RuntimeOptions) -> Self {
        Self { state, options }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Whether no tool has a run in flight or queued.
    pub fn is_idle(&self) -> bool {
        self.state.all_idle()
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let state = &mut self.state;
        let options = &self.options;

        match event {
            RuntimeEvent::ToolTriggered { tool, reason } => {
                handle_tool_trigger(state, options, tool, reason)
            }
            RuntimeEvent::RunCompleted {
                tool,
                request,
                result,
            } => handle_run_completed(state, options, tool, request, result),
            RuntimeEvent::ConfigChanged {
                tool,
                key,
                value,
                recalc,
            } => handle_config_changed(state, options, tool, key, value, recalc),
            RuntimeEvent::ScriptChanged { tool, body } => {
                handle_script_changed(state, options, tool, body)
            }
            RuntimeEvent::PauseChanged { tool, paused } => {
                handle_pause_changed(state, options, tool, paused)
            }
            RuntimeEvent::BindRequested {
                tool,
                input,
                source,
            } => handle_bind_requested(state, options, tool, input, source),
            RuntimeEvent::UnbindRequested { tool, input } => {
                handle_unbind_requested(state, options, tool, input)
            }
            RuntimeEvent::ToolAdded { spec } => handle_tool_added(state, options, spec),
            RuntimeEvent::ToolRemoved { tool } => handle_tool_removed(state, options, tool),
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
