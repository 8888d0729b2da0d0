// src/exec/namespace.rs

//! A tool's private variable namespace.

use std::collections::{BTreeMap, BTreeSet};

use rhai::{Dynamic, Scope};
use tracing::debug;

use crate::channel::Variables;
use crate::exec::script::{from_dynamic, to_dynamic};

/// Name reserved for the session style sheet.
pub const STYLES: &str = "styles";
/// Name the configuration map is bound to.
pub const CONFIG: &str = "config";

/// Name -> script value bindings that survive between runs of one tool.
///
/// Names starting with `_` are private: they are never scrubbed and never
/// collected as outputs.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: BTreeMap<String, Dynamic>,
}

pub fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Dynamic> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Dynamic) {
        self.bindings.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Dynamic> {
        self.bindings.remove(name)
    }

    /// Remove every public, portable binding left by a previous run, except
    /// `styles`. Returns how many were removed.
    pub fn scrub(&mut self) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|name, value| {
            is_private(name) || name == STYLES || from_dynamic(value).is_none()
        });
        let removed = before - self.bindings.len();
        if removed > 0 {
            debug!(removed, "scrubbed stale bindings");
        }
        removed
    }

    /// Bind every entry of `values`. Returns the names bound.
    pub fn merge(&mut self, values: &Variables) -> BTreeSet<String> {
        values
            .iter()
            .map(|(name, value)| {
                self.bindings.insert(name.clone(), to_dynamic(value));
                name.clone()
            })
            .collect()
    }

    pub fn to_scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();
        for (name, value) in &self.bindings {
            scope.push_dynamic(name.clone(), value.clone());
        }
        scope
    }

    /// Replace the bindings with the final state of `scope`. When a name was
    /// declared more than once, the last declaration wins.
    pub fn absorb(&mut self, scope: &Scope<'_>) {
        self.bindings.clear();
        for (name, _, value) in scope.iter() {
            self.bindings.insert(name.to_string(), value);
        }
    }

    /// Public portable bindings not in `excluded`.
    pub fn collect(&self, excluded: &BTreeSet<String>) -> Variables {
        let mut outputs = Variables::new();
        for (name, value) in &self.bindings {
            if is_private(name) || excluded.contains(name) {
                continue;
            }
            match from_dynamic(value) {
                Some(mut portable) => {
                    portable.strip_render_cache();
                    outputs.insert(name.clone(), portable);
                }
                None => {
                    debug!(%name, type_name = value.type_name(), "skipping non-portable binding");
                }
            }
        }
        outputs
    }
}
