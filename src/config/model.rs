// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::channel::{Primitive, StyleSheet, ValueKind};
use crate::dag::ConsumerDefinition;
use crate::engine::{InputSpec, SourceRef, ToolSpec};
use crate::errors::{Result, ToolflowError};
use crate::types::SnapshotStorageMode;

/// Session file exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// snapshot_storage = "file"
/// cache_dir = ".toolflow/cache"
/// max_workers = 4
///
/// [styles.control]
/// color = "#1f77b4"
///
/// [[tool]]
/// name = "load"
/// outputs = ["scores"]
/// script = '''
/// let scores = table([[1.0, 2.0]], ["s1"], ["m1", "m2"]);
/// '''
///
/// [[tool]]
/// name = "scale"
/// outputs = ["scaled"]
/// script_path = "scripts/scale.rhai"
///
/// [tool.inputs.data]
/// kinds = ["table"]
/// source = "load.scores"
///
/// [tool.config]
/// factor = 2.0
/// ```
///
/// All sections except `[[tool]]` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSessionFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Initial session style sheet: class -> attribute -> value.
    #[serde(default)]
    pub styles: BTreeMap<String, BTreeMap<String, String>>,

    /// Tools in creation order.
    #[serde(default, rename = "tool")]
    pub tools: Vec<ToolConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// `"file"` (default) or `"memory"`.
    #[serde(default)]
    pub snapshot_storage: SnapshotStorageMode,

    /// Root of the per-tool snapshot directories, relative to the session
    /// file.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Maximum concurrent runs across all tools (0 = unbounded).
    #[serde(default)]
    pub max_workers: usize,

    /// Script operation limit per run (0 = unlimited).
    #[serde(default)]
    pub max_operations: u64,

    /// Reload `script_path` files when they change on disk.
    #[serde(default)]
    pub watch_scripts: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".toolflow/cache")
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            snapshot_storage: SnapshotStorageMode::default(),
            cache_dir: default_cache_dir(),
            max_workers: 0,
            max_operations: 0,
            watch_scripts: false,
        }
    }
}

/// One `[[tool]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub name: String,

    /// Inline script body. Exactly one of `script` / `script_path` is set.
    #[serde(default)]
    pub script: Option<String>,

    /// Script file, relative to the session file.
    #[serde(default)]
    pub script_path: Option<PathBuf>,

    #[serde(default)]
    pub outputs: Vec<String>,

    /// `[tool.inputs.<port>]` tables.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputConfig>,

    /// `[tool.config]` values exposed to the script as `config`.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigValue>,

    /// Bind unbound inputs to any compatible dataset.
    #[serde(default = "default_auto_consume")]
    pub auto_consume: bool,

    #[serde(default)]
    pub paused: bool,
}

fn default_auto_consume() -> bool {
    true
}

/// `[tool.inputs.<port>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    /// Accepted kinds; empty accepts any.
    #[serde(default)]
    pub kinds: Vec<ValueKind>,

    /// Entity tags that must all appear on some axis.
    #[serde(default)]
    pub entities: Vec<String>,

    #[serde(default)]
    pub ndim: Option<usize>,

    /// Per-axis sizes; 0 matches any size.
    #[serde(default)]
    pub shape: Vec<usize>,

    /// Explicit upstream as `"tool.output"`.
    #[serde(default)]
    pub source: Option<String>,
}

impl InputConfig {
    pub fn definition(&self) -> ConsumerDefinition {
        ConsumerDefinition {
            kinds: self.kinds.iter().copied().collect(),
            entities: self.entities.iter().cloned().collect(),
            ndim: self.ndim,
            shape: self
                .shape
                .iter()
                .map(|n| (*n != 0).then_some(*n))
                .collect(),
        }
    }

    pub fn source_ref(&self) -> Option<SourceRef> {
        self.source.as_deref().and_then(parse_source)
    }
}

/// Split `"tool.output"`.
pub fn parse_source(source: &str) -> Option<SourceRef> {
    let (tool, output) = source.split_once('.')?;
    if tool.is_empty() || output.is_empty() {
        return None;
    }
    Some(SourceRef {
        tool: tool.to_string(),
        output: output.to_string(),
    })
}

/// A scalar configuration value as written in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<ConfigValue> for Primitive {
    fn from(value: ConfigValue) -> Self {
        match value {
            ConfigValue::Bool(b) => Primitive::Bool(b),
            ConfigValue::Int(i) => Primitive::Int(i),
            ConfigValue::Float(f) => Primitive::Float(f),
            ConfigValue::Text(s) => Primitive::Text(s),
        }
    }
}

impl ToolConfig {
    /// Script file location, resolved against `base_dir`.
    pub fn resolved_script_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.script_path.as_ref().map(|p| base_dir.join(p))
    }

    /// Build the tool definition, reading `script_path` if needed.
    pub fn to_spec(&self, base_dir: &Path) -> Result<ToolSpec> {
        let body = match (&self.script, self.resolved_script_path(base_dir)) {
            (Some(body), _) => body.clone(),
            (None, Some(path)) => std::fs::read_to_string(&path).map_err(|err| {
                ToolflowError::ConfigError(format!(
                    "tool '{}': cannot read script {:?}: {err}",
                    self.name, path
                ))
            })?,
            (None, None) => String::new(),
        };

        Ok(ToolSpec {
            name: self.name.clone(),
            body,
            inputs: self
                .inputs
                .iter()
                .map(|(name, input)| InputSpec {
                    name: name.clone(),
                    definition: input.definition(),
                    source: input.source_ref(),
                })
                .collect(),
            outputs: self.outputs.clone(),
            config: self
                .config
                .iter()
                .map(|(k, v)| (k.clone(), Primitive::from(v.clone())))
                .collect(),
            auto_consume: self.auto_consume,
            paused: self.paused,
        })
    }
}

/// Validated session file.
///
/// Only constructed through `TryFrom<RawSessionFile>`, so every instance has
/// passed validation.
#[derive(Debug, Clone)]
pub struct SessionFile {
    pub config: ConfigSection,
    pub styles: StyleSheet,
    pub tools: Vec<ToolConfig>,
}

impl SessionFile {
    pub(crate) fn new_unchecked(raw: RawSessionFile) -> Self {
        Self {
            config: raw.config,
            styles: StyleSheet {
                classes: raw.styles,
            },
            tools: raw.tools,
        }
    }

    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Tool definitions in file order.
    pub fn tool_specs(&self, base_dir: &Path) -> Result<Vec<ToolSpec>> {
        self.tools.iter().map(|t| t.to_spec(base_dir)).collect()
    }
}
