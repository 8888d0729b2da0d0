// src/errors.rs

//! Crate-wide error aliases and the error taxonomy of the dataflow core.

use std::path::PathBuf;

use thiserror::Error;

use crate::dag::DatasetKey;

#[derive(Error, Debug)]
pub enum ToolflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Binding cycle: {0}")]
    BindingCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A value could not cross the serialization boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("value '{name}' could not be transported: {reason}")]
    Entry { name: String, reason: String },

    #[error("corrupt blob: {0}")]
    Corrupt(String),
}

/// The persisted execution snapshot could not be read or written.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("snapshot {path:?} could not be read: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot {path:?} could not be written: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot {path:?} is unreadable: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: TransportError,
    },
}

/// The script body failed while executing. Carries the engine's diagnostic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{description}")]
pub struct ComputationError {
    pub description: String,
}

impl ComputationError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// An input port could not be bound.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("no input port named '{0}'")]
    UnknownInput(String),

    #[error("binding {key} would make the tool consume its own output")]
    Cycle { key: DatasetKey },

    #[error("dataset {key} does not satisfy the consumer definition of '{input}'")]
    Incompatible { input: String, key: DatasetKey },

    #[error("no published dataset satisfies the consumer definition of '{0}'")]
    Unresolved(String),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ToolflowError>;
