// src/config/mod.rs

//! Session file loading and validation for toolflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a session file from disk (`loader.rs`).
//! - Validate names, bindings and the binding graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{base_dir_of, default_session_path, load_and_validate, load_from_path, parse_session};
pub use model::{
    ConfigSection, ConfigValue, InputConfig, RawSessionFile, SessionFile, ToolConfig,
};
