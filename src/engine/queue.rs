// src/engine/queue.rs

use tracing::{debug, warn};

/// State of one tool's run queue.
///
/// - `Idle`: nothing running.
/// - `Running`: one run in flight, nothing pending.
/// - `RunningQueued`: one run in flight and at least one request arrived
///   meanwhile. Any number of such requests collapse into this one flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    RunningQueued,
}

/// What the caller should do after [`RunQueue::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// Build a request from the current state and dispatch it now.
    Dispatch,
    /// A run is already in flight; a rerun has been recorded.
    Coalesced,
}

/// What the caller should do after [`RunQueue::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDecision {
    Idle,
    /// Build a fresh request from the state *now* and dispatch it.
    Rerun,
}

/// Single-flight run queue for one tool.
///
/// The queue only tracks state; it never holds request snapshots. A rerun
/// is built by the caller at completion time, so it always reflects the
/// latest inputs rather than the inputs at the moment it was requested.
#[derive(Debug, Clone, Default)]
pub struct RunQueue {
    state: RunState,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == RunState::Idle
    }

    pub fn has_pending(&self) -> bool {
        self.state == RunState::RunningQueued
    }

    pub fn request(&mut self) -> RequestDecision {
        match self.state {
            RunState::Idle => {
                self.state = RunState::Running;
                RequestDecision::Dispatch
            }
            RunState::Running => {
                debug!("run in flight; queueing one rerun");
                self.state = RunState::RunningQueued;
                RequestDecision::Coalesced
            }
            RunState::RunningQueued => {
                debug!("rerun already queued; coalescing");
                RequestDecision::Coalesced
            }
        }
    }

    pub fn complete(&mut self) -> CompletionDecision {
        match self.state {
            RunState::Idle => {
                warn!("completion reported for an idle run queue; ignoring");
                CompletionDecision::Idle
            }
            RunState::Running => {
                self.state = RunState::Idle;
                CompletionDecision::Idle
            }
            RunState::RunningQueued => {
                self.state = RunState::Running;
                CompletionDecision::Rerun
            }
        }
    }
}
