// src/types.rs

use std::fmt;

use serde::Deserialize;

/// Session-unique identity of a tool instance.
///
/// Ids are handed out in creation order and never reused within a session,
/// so they double as the registry's registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolId(pub u64);

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tool#{}", self.0)
    }
}

/// Correlation id of one execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// What a configuration change asks the tool to do.
///
/// - `All`: recompute through the run queue.
/// - `View`: re-render the outputs of the latest successful run without
///   invoking the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recalculate {
    #[default]
    All,
    View,
}

/// Where execution snapshots are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStorageMode {
    /// `<cache_dir>/tool-<id>/{in,out}` on disk.
    #[default]
    File,
    /// In memory only (lost on restart).
    Memory,
}
