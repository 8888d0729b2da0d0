// src/watch/watcher.rs

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::RuntimeEvent;
use crate::types::ToolId;

/// A script file backing one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedScript {
    pub tool: ToolId,
    pub path: PathBuf,
}

/// Handle for the script watcher.
///
/// This exists mainly so the underlying `RecommendedWatcher` is kept alive for
/// as long as needed. Dropping this handle will stop file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// blake3 digest of a script body.
pub fn content_hash(body: &str) -> blake3::Hash {
    blake3::hash(body.as_bytes())
}

struct Tracked {
    tool: ToolId,
    hash: Option<blake3::Hash>,
}

/// Spawn a watcher that sends `RuntimeEvent::ScriptChanged` whenever a
/// watched script's content actually changes.
///
/// The parent directory of each script is watched (non-recursively) so that
/// editors that save by replacing the file are handled too. Events that
/// leave the content unchanged (touch, metadata) are filtered out by hash.
pub fn spawn_script_watcher(
    scripts: Vec<WatchedScript>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    let mut tracked: HashMap<PathBuf, Tracked> = HashMap::new();
    let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();

    for script in scripts {
        let path = canonical(&script.path);
        let hash = fs::read_to_string(&path).ok().map(|b| content_hash(&b));
        if let Some(parent) = path.parent() {
            dirs.insert(parent.to_path_buf());
        }
        tracked.insert(
            path,
            Tracked {
                tool: script.tool,
                hash,
            },
        );
    }

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    warn!(error = %err, "failed to forward notify event");
                }
            }
            Err(err) => warn!(error = %err, "file watch error"),
        },
        Config::default(),
    )?;

    for dir in &dirs {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watching script directory {dir:?}"))?;
    }
    info!(scripts = tracked.len(), dirs = dirs.len(), "script watcher started");

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            for path in event.paths {
                let path = canonical(&path);
                let Some(entry) = tracked.get_mut(&path) else {
                    continue;
                };
                if let Some(body) = changed_body(&path, entry) {
                    let sent = runtime_tx
                        .send(RuntimeEvent::ScriptChanged {
                            tool: entry.tool,
                            body,
                        })
                        .await;
                    if sent.is_err() {
                        debug!("runtime gone; stopping script watcher");
                        return;
                    }
                }
            }
        }
        debug!("watcher event loop finished");
    });

    Ok(WatcherHandle { _inner: watcher })
}

/// New body of a tracked script, if its content hash moved.
fn changed_body(path: &Path, entry: &mut Tracked) -> Option<String> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(err) => {
            debug!(?path, error = %err, "script unreadable; ignoring event");
            return None;
        }
    };

    let hash = content_hash(&body);
    if entry.hash == Some(hash) {
        debug!(?path, "script content unchanged");
        return None;
    }

    info!(tool = %entry.tool, ?path, hash = %hash.to_hex(), "script changed on disk");
    entry.hash = Some(hash);
    Some(body)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
