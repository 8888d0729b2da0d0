// src/dag/dataset.rs

//! Published datasets and the acceptance criteria input ports declare.

use std::collections::BTreeSet;
use std::fmt;

use crate::channel::{PortableValue, ValueKind};
use crate::types::ToolId;

/// Identity of a dataset: the producing tool and its output port name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetKey {
    pub producer: ToolId,
    pub output: String,
}

impl DatasetKey {
    pub fn new(producer: ToolId, output: impl Into<String>) -> Self {
        Self {
            producer,
            output: output.into(),
        }
    }

    /// Name under which the dataset's value is staged in a worker namespace.
    ///
    /// Always starts with `_`, so it is never collected as an output.
    pub fn internal_name(&self) -> String {
        format!("_{}_{}", self.output, self.producer.0)
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.producer, self.output)
    }
}

/// An input port on a specific tool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRef {
    pub tool: ToolId,
    pub input: String,
}

impl PortRef {
    pub fn new(tool: ToolId, input: impl Into<String>) -> Self {
        Self {
            tool,
            input: input.into(),
        }
    }
}

/// Immutable published value with its shape and per-axis entity tags.
///
/// Shape and entities are derived from the value when the dataset is built,
/// so the three can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    key: DatasetKey,
    value: PortableValue,
    shape: Vec<usize>,
    entities: Vec<Option<String>>,
    version: u64,
}

impl Dataset {
    pub fn new(key: DatasetKey, value: PortableValue, version: u64) -> Self {
        let shape = value.shape();
        let entities = value.entities();
        Self {
            key,
            value,
            shape,
            entities,
            version,
        }
    }

    pub fn key(&self) -> &DatasetKey {
        &self.key
    }

    pub fn value(&self) -> &PortableValue {
        &self.value
    }

    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn entities(&self) -> &[Option<String>] {
        &self.entities
    }

    /// Registry-wide publish counter at the time this dataset was installed.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn has_entity(&self, entity: &str) -> bool {
        self.entities
            .iter()
            .any(|e| e.as_deref() == Some(entity))
    }
}

/// What an input port accepts.
///
/// Empty criteria accept anything. `shape` entries of `None` match any axis
/// size; a non-empty `shape` also fixes the number of axes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerDefinition {
    pub kinds: BTreeSet<ValueKind>,
    pub entities: BTreeSet<String>,
    pub ndim: Option<usize>,
    pub shape: Vec<Option<usize>>,
}

impl ConsumerDefinition {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.insert(entity.into());
        self
    }

    pub fn with_ndim(mut self, ndim: usize) -> Self {
        self.ndim = Some(ndim);
        self
    }

    pub fn with_shape(mut self, shape: Vec<Option<usize>>) -> Self {
        self.shape = shape;
        self
    }

    pub fn accepts(&self, dataset: &Dataset) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&dataset.kind()) {
            return false;
        }

        if !self.entities.iter().all(|e| dataset.has_entity(e)) {
            return false;
        }

        if let Some(ndim) = self.ndim {
            if dataset.shape().len() != ndim {
                return false;
            }
        }

        if !self.shape.is_empty() {
            if dataset.shape().len() != self.shape.len() {
                return false;
            }
            let fits = self
                .shape
                .iter()
                .zip(dataset.shape())
                .all(|(want, got)| want.is_none_or(|w| w == *got));
            if !fits {
                return false;
            }
        }

        true
    }
}
