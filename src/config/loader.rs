// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawSessionFile, SessionFile};
use crate::errors::Result;

/// Load a session file from a given path and return the raw
/// `RawSessionFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawSessionFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let session: RawSessionFile = toml::from_str(&contents)?;

    Ok(session)
}

/// Load a session file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - duplicate or malformed tool and port names,
///   - unknown or self-referencing `source` bindings,
///   - binding cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<SessionFile> {
    let raw = load_from_path(&path)?;
    let session = SessionFile::try_from(raw)?;
    Ok(session)
}

/// Parse and validate a session from a TOML string.
pub fn parse_session(contents: &str) -> Result<SessionFile> {
    let raw: RawSessionFile = toml::from_str(contents)?;
    SessionFile::try_from(raw)
}

/// `Toolflow.toml` in the current working directory.
pub fn default_session_path() -> PathBuf {
    PathBuf::from("Toolflow.toml")
}

/// Directory that relative paths in a session file are resolved against.
pub fn base_dir_of(session_path: &Path) -> PathBuf {
    session_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
