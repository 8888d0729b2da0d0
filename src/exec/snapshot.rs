// src/exec/snapshot.rs

//! Per-tool execution snapshots.
//!
//! Each tool has two slots: `in` holds the staged inputs of the current run
//! and `out` the outputs of the latest run. Both are stored in the channel's
//! blob format.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::channel::{self, Variables};
use crate::errors::CacheError;
use crate::types::{SnapshotStorageMode, ToolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    In,
    Out,
}

impl Slot {
    pub fn file_name(self) -> &'static str {
        match self {
            Slot::In => "in",
            Slot::Out => "out",
        }
    }
}

/// Abstract storage for execution snapshots.
pub trait SnapshotStore: Send + Sync {
    fn load(&self, tool: ToolId, slot: Slot) -> Result<Variables, CacheError>;
    fn save(&self, tool: ToolId, slot: Slot, values: &Variables) -> Result<(), CacheError>;
    /// Forget everything stored for `tool`.
    fn clear(&self, tool: ToolId);
}

/// Stores snapshots under `<root>/tool-<id>/{in,out}`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn tool_dir(&self, tool: ToolId) -> PathBuf {
        self.root.join(format!("tool-{}", tool.0))
    }

    pub fn path(&self, tool: ToolId, slot: Slot) -> PathBuf {
        self.tool_dir(tool).join(slot.file_name())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, tool: ToolId, slot: Slot) -> Result<Variables, CacheError> {
        let path = self.path(tool, slot);
        let blob = fs::read(&path).map_err(|source| CacheError::Read {
            path: path.clone(),
            source,
        })?;
        let values =
            channel::decode(&blob).map_err(|source| CacheError::Decode { path, source })?;
        debug!(%tool, slot = slot.file_name(), entries = values.len(), "loaded snapshot");
        Ok(values)
    }

    fn save(&self, tool: ToolId, slot: Slot, values: &Variables) -> Result<(), CacheError> {
        let path = self.path(tool, slot);
        let blob = channel::encode(values);
        write_atomic(&path, &blob).map_err(|source| CacheError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(%tool, slot = slot.file_name(), bytes = blob.len(), "saved snapshot");
        Ok(())
    }

    fn clear(&self, tool: ToolId) {
        let dir = self.tool_dir(tool);
        match fs::remove_dir_all(&dir) {
            Ok(()) => info!(%tool, ?dir, "removed snapshot directory"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!(%tool, ?dir, error = %err, "failed to remove snapshot directory"),
        }
    }
}

/// Write to a sibling temp file, sync it and rename it over `path`, so
/// readers see either the old or the new blob in full.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)
}

/// Stores snapshot blobs in memory only.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    blobs: Mutex<HashMap<(ToolId, Slot), Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pseudo_path(tool: ToolId, slot: Slot) -> PathBuf {
        PathBuf::from(format!("memory://tool-{}/{}", tool.0, slot.file_name()))
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, tool: ToolId, slot: Slot) -> Result<Variables, CacheError> {
        let blobs = self.blobs.lock().unwrap_or_else(|p| p.into_inner());
        let blob = blobs.get(&(tool, slot)).ok_or_else(|| CacheError::Read {
            path: Self::pseudo_path(tool, slot),
            source: io::Error::new(io::ErrorKind::NotFound, "no snapshot stored"),
        })?;
        channel::decode(blob).map_err(|source| CacheError::Decode {
            path: Self::pseudo_path(tool, slot),
            source,
        })
    }

    fn save(&self, tool: ToolId, slot: Slot, values: &Variables) -> Result<(), CacheError> {
        let blob = channel::encode(values);
        let mut blobs = self.blobs.lock().unwrap_or_else(|p| p.into_inner());
        blobs.insert((tool, slot), blob);
        Ok(())
    }

    fn clear(&self, tool: ToolId) {
        let mut blobs = self.blobs.lock().unwrap_or_else(|p| p.into_inner());
        blobs.retain(|(t, _), _| *t != tool);
    }
}

/// Build the store selected by the session config.
pub fn build_store(mode: SnapshotStorageMode, cache_dir: &Path) -> Arc<dyn SnapshotStore> {
    match mode {
        SnapshotStorageMode::File => {
            info!(?cache_dir, "using file snapshot store");
            Arc::new(FileSnapshotStore::new(cache_dir))
        }
        SnapshotStorageMode::Memory => {
            info!("using in-memory snapshot store");
            Arc::new(MemorySnapshotStore::new())
        }
    }
}
