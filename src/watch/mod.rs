// src/watch/mod.rs

//! Script file watching.
//!
//! Tools whose body comes from `script_path` can be reloaded when the file
//! changes. The watcher only turns content changes into
//! `RuntimeEvent::ScriptChanged`; deciding what to rerun is the core's job.

pub mod watcher;

pub use watcher::{content_hash, spawn_script_watcher, WatchedScript, WatcherHandle};
