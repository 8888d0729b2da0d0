// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channel::{PortableValue, Primitive, Variables};
use crate::dag::{DataEvent, DatasetKey, RegistryNotice};
use crate::engine::core::SessionState;
use crate::engine::queue::{CompletionDecision, RequestDecision};
use crate::engine::tool::{ToolSpec, ToolStatus};
use crate::engine::{RuntimeOptions, TriggerReason};
use crate::errors::ToolflowError;
use crate::exec::namespace::STYLES;
use crate::exec::{ExecutionRequest, ExecutionResult};
use crate::types::{Recalculate, RequestId, ToolId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these requests to the worker pool.
    Dispatch(Vec<ExecutionRequest>),
    /// Hand a tool's latest outputs to the presenter.
    Render {
        tool: ToolId,
        tool_name: String,
        outputs: Variables,
    },
    /// Drop the worker-side state of a removed tool.
    Release(ToolId),
    /// Request that the process exits (used for `--once` when idle).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Handle a trigger for one tool.
pub fn handle_tool_trigger(
    state: &mut SessionState,
    options: &RuntimeOptions,
    tool: ToolId,
    reason: TriggerReason,
) -> CoreStep {
    let requests: Vec<_> = trigger(state, tool, reason).into_iter().collect();
    finish(state, options, dispatch(requests))
}

/// Handle a finished run.
///
/// - A completion for a removed tool, or one whose request id does not match
///   the run in flight, is ignored.
/// - On success the declared outputs are published, which notifies bound
///   consumers; auto-consume tools get a chance to bind any new dataset.
/// - On failure the previous outputs stay published.
/// - Finally the tool's own queue decides whether a coalesced rerun starts,
///   built from the state as it is now.
pub fn handle_run_completed(
    state: &mut SessionState,
    options: &RuntimeOptions,
    tool: ToolId,
    request: RequestId,
    result: ExecutionResult,
) -> CoreStep {
    let mut commands = Vec::new();

    let Some(entry) = state.tools.get_mut(&tool) else {
        warn!(%tool, %request, "completion for unknown or removed tool; ignoring");
        return finish(state, options, commands);
    };
    if entry.in_flight != Some(request) {
        warn!(
            %tool,
            %request,
            in_flight = ?entry.in_flight,
            "stale completion; ignoring"
        );
        return finish(state, options, commands);
    }
    entry.in_flight = None;

    match result {
        ExecutionResult::Success(outputs) => {
            entry.status = ToolStatus::Done;
            info!(%tool, name = %entry.name, %request, "run succeeded");

            let published = publish_outputs(state, tool, outputs);
            if !published.outputs.is_empty() {
                commands.push(CoreCommand::Render {
                    tool,
                    tool_name: published.tool_name,
                    outputs: published.outputs,
                });
            }
            route_notices(state, published.notices);
            if published.new_keys {
                resolve_auto_consumers(state);
            }
        }
        ExecutionResult::Failure(err) => {
            error!(%tool, name = %entry.name, %request, error = %err, "run failed");
            entry.status = ToolStatus::Error(err.description);
        }
    }

    let mut requests = Vec::new();
    let decision = state.tools.get_mut(&tool).map(|t| t.queue.complete());
    if decision == Some(CompletionDecision::Rerun) {
        requests.extend(coalesced_rerun(state, tool));
    }
    requests.extend(settle(state));

    commands.extend(dispatch(requests));
    finish(state, options, commands)
}

/// Handle a configuration change.
///
/// `Recalculate::View` re-renders the latest outputs without running the
/// script; with no outputs yet it falls back to a full recompute.
pub fn handle_config_changed(
    state: &mut SessionState,
    options: &RuntimeOptions,
    tool: ToolId,
    key: String,
    value: Primitive,
    recalc: Recalculate,
) -> CoreStep {
    let Some(entry) = state.tools.get_mut(&tool) else {
        warn!(%tool, %key, "config change for unknown tool; ignoring");
        return finish(state, options, Vec::new());
    };

    info!(%tool, %key, %value, ?recalc, "config changed");
    entry.config.insert(key, value);

    if recalc == Recalculate::View {
        match &entry.last_outputs {
            Some(outputs) => {
                let command = CoreCommand::Render {
                    tool,
                    tool_name: entry.name.clone(),
                    outputs: outputs.clone(),
                };
                return finish(state, options, vec![command]);
            }
            None => debug!(%tool, "no outputs to re-render yet; recomputing"),
        }
    }

    handle_tool_trigger(state, options, tool, TriggerReason::ConfigChanged)
}

/// Handle a replaced script body.
pub fn handle_script_changed(
    state: &mut SessionState,
    options: &RuntimeOptions,
    tool: ToolId,
    body: String,
) -> CoreStep {
    let Some(entry) = state.tools.get_mut(&tool) else {
        warn!(%tool, "script change for unknown tool; ignoring");
        return finish(state, options, Vec::new());
    };
    if *entry.body == *body {
        debug!(%tool, "script body unchanged");
        return finish(state, options, Vec::new());
    }

    info!(%tool, name = %entry.name, bytes = body.len(), "script replaced");
    entry.body = Arc::from(body);
    handle_tool_trigger(state, options, tool, TriggerReason::ScriptChanged)
}

/// Pause or resume a tool. Resuming catches up on any automatic trigger
/// that was ignored while paused.
pub fn handle_pause_changed(
    state: &mut SessionState,
    options: &RuntimeOptions,
    tool: ToolId,
    paused: bool,
) -> CoreStep {
    let Some(entry) = state.tools.get_mut(&tool) else {
        warn!(%tool, "pause change for unknown tool; ignoring");
        return finish(state, options, Vec::new());
    };

    entry.paused = paused;
    info!(%tool, name = %entry.name, paused, "pause changed");

    if paused {
        if entry.queue.is_idle() {
            entry.status = ToolStatus::Paused;
        }
        return finish(state, options, Vec::new());
    }

    if entry.status == ToolStatus::Paused {
        entry.status = ToolStatus::Idle;
    }
    if entry.stale {
        return handle_tool_trigger(state, options, tool, TriggerReason::Resumed);
    }
    finish(state, options, Vec::new())
}

/// Explicitly bind an input. The input is pinned, so auto-consume leaves it
/// alone from now on.
pub fn handle_bind_requested(
    state: &mut SessionState,
    options: &RuntimeOptions,
    tool: ToolId,
    input: String,
    source: DatasetKey,
) -> CoreStep {
    if !state.tools.contains_key(&tool) {
        warn!(%tool, %input, "bind request for unknown tool; ignoring");
        return finish(state, options, Vec::new());
    }

    if let Err(err) = state.bind_input(tool, &input, source) {
        warn!(%tool, %input, error = %err, "binding refused");
    }

    let requests = settle(state);
    finish(state, options, dispatch(requests))
}

/// Explicitly unbind an input and recompute without it.
pub fn handle_unbind_requested(
    state: &mut SessionState,
    options: &RuntimeOptions,
    tool: ToolId,
    input: String,
) -> CoreStep {
    let Some(entry) = state.tools.get_mut(&tool) else {
        warn!(%tool, %input, "unbind request for unknown tool; ignoring");
        return finish(state, options, Vec::new());
    };

    if !entry.data.unget(&mut state.registry, &input) {
        debug!(%tool, %input, "input was not bound");
        return finish(state, options, Vec::new());
    }
    entry.data.pin(&input);

    handle_tool_trigger(state, options, tool, TriggerReason::SourceUpdated)
}

/// Create a tool while the session runs. Whatever it binds to on creation
/// triggers its first run.
pub fn handle_tool_added(
    state: &mut SessionState,
    options: &RuntimeOptions,
    spec: ToolSpec,
) -> CoreStep {
    let name = spec.name.clone();
    match state.add_tool(spec) {
        Ok(id) => {
            debug!(tool = %id, %name, "tool added at runtime");
            let requests = settle(state);
            finish(state, options, dispatch(requests))
        }
        Err(err @ ToolflowError::BindingCycle(_)) => {
            error!(%name, error = %err, "tool rejected");
            match state.tool_id(&name) {
                Some(id) => handle_tool_removed(state, options, id),
                None => finish(state, options, Vec::new()),
            }
        }
        Err(err) => {
            error!(%name, error = %err, "tool rejected");
            finish(state, options, Vec::new())
        }
    }
}

/// Remove a tool: unbind its inputs, unpublish its outputs and let every
/// downstream consumer re-resolve or go idle.
pub fn handle_tool_removed(
    state: &mut SessionState,
    options: &RuntimeOptions,
    tool: ToolId,
) -> CoreStep {
    let Some(mut entry) = state.tools.remove(&tool) else {
        warn!(%tool, "removal of unknown tool; ignoring");
        return finish(state, options, Vec::new());
    };

    state.names.remove(&entry.name);
    state.forget_tool(tool);
    let notices = entry.data.reset(&mut state.registry);
    info!(%tool, name = %entry.name, affected = notices.len(), "removed tool");

    route_notices(state, notices);
    let requests = settle(state);

    let mut commands = vec![CoreCommand::Release(tool)];
    commands.extend(dispatch(requests));
    finish(state, options, commands)
}

/// Ask the tool's run queue for a run. Returns the request to dispatch, if
/// the queue was idle.
fn trigger(state: &mut SessionState, tool: ToolId, reason: TriggerReason) -> Option<ExecutionRequest> {
    let Some(entry) = state.tools.get_mut(&tool) else {
        warn!(%tool, ?reason, "trigger for unknown tool; ignoring");
        return None;
    };

    if entry.paused && reason.is_automatic() {
        debug!(%tool, ?reason, "tool paused; ignoring automatic trigger");
        entry.stale = true;
        if entry.queue.is_idle() {
            entry.status = ToolStatus::Paused;
        }
        return None;
    }

    match entry.queue.request() {
        RequestDecision::Dispatch => build_request(state, tool, reason),
        RequestDecision::Coalesced => {
            debug!(%tool, ?reason, "run coalesced into pending rerun");
            None
        }
    }
}

/// Start the rerun queued behind a finished run. A tool paused in the
/// meantime drops it and is marked stale instead.
fn coalesced_rerun(state: &mut SessionState, tool: ToolId) -> Option<ExecutionRequest> {
    let entry = state.tools.get_mut(&tool)?;
    if entry.paused {
        debug!(%tool, "paused with a queued rerun; marking stale");
        entry.queue.complete();
        entry.stale = true;
        entry.status = ToolStatus::Paused;
        return None;
    }

    debug!(%tool, "starting coalesced rerun");
    build_request(state, tool, TriggerReason::SourceUpdated)
}

/// Snapshot the tool's current state into a request and mark it in flight.
fn build_request(
    state: &mut SessionState,
    tool: ToolId,
    reason: TriggerReason,
) -> Option<ExecutionRequest> {
    let id = state.next_request_id();
    let entry = state.tools.get_mut(&tool)?;

    let request = ExecutionRequest {
        id,
        tool,
        tool_name: entry.name.clone(),
        body: Arc::clone(&entry.body),
        config: entry.config.clone(),
        inputs: entry.data.resolve_inputs(&state.registry),
        styles: Some(state.styles.clone()),
    };

    entry.in_flight = Some(id);
    entry.status = ToolStatus::Active;
    entry.stale = false;
    info!(%tool, name = %entry.name, request = %id, ?reason, "dispatching run");

    Some(request)
}

fn dispatch(requests: Vec<ExecutionRequest>) -> Vec<CoreCommand> {
    if requests.is_empty() {
        Vec::new()
    } else {
        vec![CoreCommand::Dispatch(requests)]
    }
}

/// In `--once` mode, exit as soon as every tool is idle.
fn finish(state: &SessionState, options: &RuntimeOptions, mut commands: Vec<CoreCommand>) -> CoreStep {
    let mut keep_running = true;
    if options.exit_when_idle && state.all_idle() {
        keep_running = false;
        commands.push(CoreCommand::RequestExit);
    }
    CoreStep {
        commands,
        keep_running,
    }
}

#[derive(Debug, Default)]
struct Published {
    tool_name: String,
    /// Every public binding of the run, for the presenter.
    outputs: Variables,
    notices: Vec<RegistryNotice>,
    new_keys: bool,
}

/// Publish a successful run's declared outputs.
///
/// A `styles` binding replaces the session style sheet. Public bindings that
/// are not declared outputs are not published but are still rendered.
/// Declared outputs the run did not produce keep their previous dataset.
fn publish_outputs(state: &mut SessionState, tool: ToolId, outputs: Variables) -> Published {
    let mut published = Published::default();

    if let Some(PortableValue::Styles(sheet)) = outputs.get(STYLES) {
        if *sheet != state.styles {
            info!(%tool, classes = sheet.classes.len(), "session styles replaced");
            state.styles = sheet.clone();
        }
    }

    let Some(entry) = state.tools.get_mut(&tool) else {
        return published;
    };
    published.tool_name = entry.name.clone();

    let mut produced = BTreeSet::new();
    for (name, value) in outputs {
        if name == STYLES {
            continue;
        }
        if entry.data.has_output(&name) {
            if let Some(publication) = entry.data.put(&mut state.registry, &name, value.clone()) {
                published.notices.extend(publication.notices);
                published.new_keys |= publication.is_new;
            }
            produced.insert(name.clone());
        } else {
            debug!(%tool, %name, "binding is not a declared output; render only");
        }
        published.outputs.insert(name, value);
    }

    for missing in entry
        .data
        .output_names()
        .iter()
        .filter(|n| !produced.contains(*n))
    {
        debug!(%tool, output = %missing, "declared output not produced; keeping previous dataset");
    }

    entry.last_outputs = Some(published.outputs.clone());
    published
}

fn route_notices(state: &mut SessionState, notices: Vec<RegistryNotice>) {
    for notice in notices {
        match state.tools.get_mut(&notice.port().tool) {
            Some(entry) => entry.data.notify(&notice),
            None => debug!(port = ?notice.port(), "notice for removed tool dropped"),
        }
    }
}

/// Offer newly published datasets to every auto-consume tool with unbound
/// inputs.
fn resolve_auto_consumers(state: &mut SessionState) {
    let candidates = state.candidates();
    for entry in state.tools.values_mut() {
        if !entry.auto_consume || entry.data.resolvable_inputs().is_empty() {
            continue;
        }
        if entry.data.consume_any(&mut state.registry, &candidates) {
            info!(tool = %entry.id, name = %entry.name, "auto-consumed new dataset");
        }
    }
}

/// Drain every tool's data events and turn them into run requests.
///
/// Each affected tool is triggered once, however many of its inputs
/// changed, and only while at least one updated input is still bound. An
/// input that lost its source is re-resolved on auto-consume tools;
/// otherwise the tool simply does not run.
fn settle(state: &mut SessionState) -> Vec<ExecutionRequest> {
    let candidates = state.candidates();
    let mut to_run = BTreeSet::new();

    for entry in state.tools.values_mut() {
        let mut updated = BTreeSet::new();
        loop {
            let events = entry.data.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                match event {
                    DataEvent::SourceUpdated { input } => {
                        debug!(tool = %entry.id, %input, "source updated");
                        updated.insert(input);
                    }
                    DataEvent::Unbound { input } => {
                        info!(tool = %entry.id, %input, "input lost its source");
                        if entry.auto_consume
                            && entry.data.consume_any(&mut state.registry, &candidates)
                        {
                            debug!(tool = %entry.id, "re-resolved unbound input");
                        }
                    }
                }
            }
        }

        if updated.iter().any(|input| entry.data.binding(input).is_some()) {
            to_run.insert(entry.id);
        } else if !updated.is_empty() {
            debug!(tool = %entry.id, "updated inputs were unbound again; not running");
        }
    }

    to_run
        .into_iter()
        .filter_map(|tool| trigger(state, tool, TriggerReason::SourceUpdated))
        .collect()
}
