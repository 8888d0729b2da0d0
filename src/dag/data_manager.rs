// src/dag/data_manager.rs

//! Per-tool façade over input and output ports.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::PortableValue;
use crate::dag::dataset::{ConsumerDefinition, Dataset, DatasetKey, PortRef};
use crate::dag::registry::{DatasetRegistry, Publication, RegistryNotice};
use crate::errors::BindingError;
use crate::types::ToolId;

/// Change raised by a data manager for its owning tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEvent {
    /// The dataset feeding `input` changed (replaced or newly bound).
    SourceUpdated { input: String },
    /// The dataset feeding `input` disappeared; the port is now unbound.
    Unbound { input: String },
}

#[derive(Debug, Clone)]
struct InputPort {
    definition: ConsumerDefinition,
    binding: Option<DatasetKey>,
    /// Managed explicitly; skipped by auto-consume.
    pinned: bool,
}

/// Owns one tool's named input and output ports.
///
/// All registry mutation goes through `&mut DatasetRegistry` arguments, so
/// the data manager never holds shared state. Events are queued and drained
/// by the tool controller with [`DataManager::take_events`]; turning them
/// into run requests is not this type's job.
#[derive(Debug, Clone)]
pub struct DataManager {
    tool: ToolId,
    inputs: BTreeMap<String, InputPort>,
    /// Declared outputs, in declaration order.
    outputs: Vec<String>,
    events: Vec<DataEvent>,
}

impl DataManager {
    pub fn new(tool: ToolId) -> Self {
        Self {
            tool,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn tool(&self) -> ToolId {
        self.tool
    }

    pub fn add_input(&mut self, name: impl Into<String>, definition: ConsumerDefinition) {
        let name = name.into();
        debug!(tool = %self.tool, input = %name, "declared input port");
        self.inputs.insert(
            name,
            InputPort {
                definition,
                binding: None,
                pinned: false,
            },
        );
    }

    pub fn add_output(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.outputs.contains(&name) {
            debug!(tool = %self.tool, output = %name, "declared output port");
            self.outputs.push(name);
        }
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    pub fn definition(&self, input: &str) -> Option<&ConsumerDefinition> {
        self.inputs.get(input).map(|p| &p.definition)
    }

    pub fn binding(&self, input: &str) -> Option<&DatasetKey> {
        self.inputs.get(input).and_then(|p| p.binding.as_ref())
    }

    /// Exclude `input` from auto-consume until its source disappears.
    pub fn pin(&mut self, input: &str) {
        if let Some(port) = self.inputs.get_mut(input) {
            port.pinned = true;
        }
    }

    pub fn is_pinned(&self, input: &str) -> bool {
        self.inputs.get(input).is_some_and(|p| p.pinned)
    }

    /// Unbound inputs that auto-consume may fill.
    pub fn resolvable_inputs(&self) -> Vec<String> {
        self.inputs
            .iter()
            .filter(|(_, p)| p.binding.is_none() && !p.pinned)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn unbound_inputs(&self) -> Vec<String> {
        self.inputs
            .iter()
            .filter(|(_, p)| p.binding.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Explicitly bind `input` to `key`.
    ///
    /// The key does not need to be published yet. If it is, the dataset must
    /// satisfy the port's definition and a `SourceUpdated` event is raised.
    pub fn consume_with(
        &mut self,
        registry: &mut DatasetRegistry,
        input: &str,
        key: DatasetKey,
    ) -> Result<(), BindingError> {
        let port = self
            .inputs
            .get(input)
            .ok_or_else(|| BindingError::UnknownInput(input.to_string()))?;

        if registry.would_cycle(self.tool, key.producer) {
            warn!(tool = %self.tool, input, %key, "refusing binding to own output");
            return Err(BindingError::Cycle { key });
        }

        let published = registry.get(&key);
        if let Some(dataset) = &published {
            if !port.definition.accepts(dataset) {
                return Err(BindingError::Incompatible {
                    input: input.to_string(),
                    key,
                });
            }
        }

        let port_ref = PortRef::new(self.tool, input);
        if let Some(old) = self.inputs.get(input).and_then(|p| p.binding.clone()) {
            if old == key {
                return Ok(());
            }
            registry.unsubscribe(&old, &port_ref);
        }

        registry.subscribe(key.clone(), port_ref);
        info!(tool = %self.tool, input, %key, "bound input");

        if let Some(port) = self.inputs.get_mut(input) {
            port.binding = Some(key);
        }
        if published.is_some() {
            self.events.push(DataEvent::SourceUpdated {
                input: input.to_string(),
            });
        }
        Ok(())
    }

    /// Best-effort auto-binding of every unbound, unpinned input.
    ///
    /// Candidates are scanned in the given order; each such input is bound
    /// to the first compatible dataset found that would not create a cycle.
    /// Returns whether any binding was made.
    pub fn consume_any(&mut self, registry: &mut DatasetRegistry, candidates: &[ToolId]) -> bool {
        let mut any_bound = false;

        for input in self.resolvable_inputs() {
            let Some(definition) = self.definition(&input).cloned() else {
                continue;
            };

            let found = candidates
                .iter()
                .filter(|c| **c != self.tool)
                .flat_map(|c| registry.datasets_of(*c))
                .find(|d| definition.accepts(d) && !registry.would_cycle(self.tool, d.key().producer));

            match found {
                Some(dataset) => {
                    if self
                        .consume_with(registry, &input, dataset.key().clone())
                        .is_ok()
                    {
                        any_bound = true;
                    }
                }
                None => {
                    let err = BindingError::Unresolved(input.clone());
                    debug!(tool = %self.tool, error = %err, "auto-consume found nothing");
                }
            }
        }

        any_bound
    }

    /// Explicitly unbind `input`. Returns whether it was bound.
    pub fn unget(&mut self, registry: &mut DatasetRegistry, input: &str) -> bool {
        let Some(port) = self.inputs.get_mut(input) else {
            return false;
        };
        match port.binding.take() {
            Some(key) => {
                registry.unsubscribe(&key, &PortRef::new(self.tool, input));
                info!(tool = %self.tool, input, %key, "unbound input");
                true
            }
            None => false,
        }
    }

    /// Publish a freshly computed output. Undeclared outputs are refused.
    pub fn put(
        &mut self,
        registry: &mut DatasetRegistry,
        output: &str,
        value: PortableValue,
    ) -> Option<Publication> {
        if !self.has_output(output) {
            warn!(tool = %self.tool, output, "put to undeclared output; ignoring");
            return None;
        }
        Some(registry.publish(DatasetKey::new(self.tool, output), value))
    }

    /// Unbind all inputs and unpublish all outputs.
    pub fn reset(&mut self, registry: &mut DatasetRegistry) -> Vec<RegistryNotice> {
        let names: Vec<String> = self.inputs.keys().cloned().collect();
        for input in names {
            self.unget(registry, &input);
        }
        self.events.clear();
        registry.remove_producer(self.tool)
    }

    /// Record a registry notice addressed to one of this tool's ports.
    pub fn notify(&mut self, notice: &RegistryNotice) {
        let port = notice.port();
        if port.tool != self.tool {
            return;
        }
        let Some(input) = self.inputs.get_mut(&port.input) else {
            warn!(tool = %self.tool, input = %port.input, "notice for unknown input");
            return;
        };

        match notice {
            RegistryNotice::SourceUpdated(_) => {
                self.events.push(DataEvent::SourceUpdated {
                    input: port.input.clone(),
                });
            }
            RegistryNotice::Unbound(_) => {
                input.binding = None;
                input.pinned = false;
                self.events.push(DataEvent::Unbound {
                    input: port.input.clone(),
                });
            }
        }
    }

    pub fn take_events(&mut self) -> Vec<DataEvent> {
        std::mem::take(&mut self.events)
    }

    /// Current input snapshot: the dataset each input resolves to right now.
    pub fn resolve_inputs(&self, registry: &DatasetRegistry) -> BTreeMap<String, Option<Arc<Dataset>>> {
        self.inputs
            .iter()
            .map(|(name, port)| {
                let dataset = port.binding.as_ref().and_then(|k| registry.get(k));
                (name.clone(), dataset)
            })
            .collect()
    }
}
