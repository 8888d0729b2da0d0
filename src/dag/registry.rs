// src/dag/registry.rs

//! Session-wide catalog of published datasets.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::PortableValue;
use crate::dag::dataset::{ConsumerDefinition, Dataset, DatasetKey, PortRef};
use crate::dag::graph::BindingGraph;
use crate::types::ToolId;

/// Notification for an input port bound to a registry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryNotice {
    /// The dataset behind the port's binding was replaced.
    SourceUpdated(PortRef),
    /// The dataset behind the port's binding is gone; the binding was dropped.
    Unbound(PortRef),
}

impl RegistryNotice {
    pub fn port(&self) -> &PortRef {
        match self {
            RegistryNotice::SourceUpdated(p) | RegistryNotice::Unbound(p) => p,
        }
    }
}

/// Result of [`DatasetRegistry::publish`].
#[derive(Debug, Clone)]
pub struct Publication {
    pub dataset: Arc<Dataset>,
    pub notices: Vec<RegistryNotice>,
    /// True the first time this key is published.
    pub is_new: bool,
}

/// Catalog of all published datasets, keyed by (producer, output name).
///
/// Besides the datasets themselves it keeps:
/// - the registration order of producers, which fixes the order of
///   [`DatasetRegistry::find_compatible`] results,
/// - the reverse index from keys to bound input ports, so that publishing and
///   unpublishing can notify exactly the affected ports.
///
/// Subscriptions may exist for keys that have not been published yet (an
/// explicit binding made before the producer ever ran).
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    producers: Vec<ToolId>,
    /// Output names per producer, in first-publication order.
    outputs: HashMap<ToolId, Vec<String>>,
    datasets: HashMap<DatasetKey, Arc<Dataset>>,
    subscribers: BTreeMap<DatasetKey, BTreeSet<PortRef>>,
    publish_counter: u64,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `tool` as a producer. Later registrations rank first in
    /// [`DatasetRegistry::find_compatible`].
    pub fn register_producer(&mut self, tool: ToolId) {
        if !self.producers.contains(&tool) {
            self.producers.push(tool);
            debug!(%tool, "registered producer");
        }
    }

    pub fn producers(&self) -> &[ToolId] {
        &self.producers
    }

    /// Install `value` under `key`, replacing any previous dataset, and notify
    /// every port bound to the key.
    pub fn publish(&mut self, key: DatasetKey, value: PortableValue) -> Publication {
        if !self.producers.contains(&key.producer) {
            warn!(%key, "publish from unregistered producer; registering it now");
            self.register_producer(key.producer);
        }

        self.publish_counter += 1;
        let dataset = Arc::new(Dataset::new(key.clone(), value, self.publish_counter));

        let is_new = self
            .datasets
            .insert(key.clone(), Arc::clone(&dataset))
            .is_none();

        if is_new {
            self.outputs
                .entry(key.producer)
                .or_default()
                .push(key.output.clone());
        }

        let notices: Vec<RegistryNotice> = self
            .subscribers
            .get(&key)
            .map(|ports| {
                ports
                    .iter()
                    .cloned()
                    .map(RegistryNotice::SourceUpdated)
                    .collect()
            })
            .unwrap_or_default();

        info!(
            %key,
            version = dataset.version(),
            shape = ?dataset.shape(),
            subscribers = notices.len(),
            "published dataset"
        );

        Publication {
            dataset,
            notices,
            is_new,
        }
    }

    /// Remove the dataset under `key`. Every port bound to it is unsubscribed
    /// and receives [`RegistryNotice::Unbound`].
    pub fn unpublish(&mut self, key: &DatasetKey) -> Vec<RegistryNotice> {
        if self.datasets.remove(key).is_some() {
            if let Some(names) = self.outputs.get_mut(&key.producer) {
                names.retain(|n| n != &key.output);
            }
            info!(%key, "unpublished dataset");
        }

        self.subscribers
            .remove(key)
            .map(|ports| ports.into_iter().map(RegistryNotice::Unbound).collect())
            .unwrap_or_default()
    }

    /// Drop a producer entirely: all its datasets and every subscription to
    /// any of its keys, published or not.
    pub fn remove_producer(&mut self, tool: ToolId) -> Vec<RegistryNotice> {
        let keys: BTreeSet<DatasetKey> = self
            .datasets
            .keys()
            .chain(self.subscribers.keys())
            .filter(|k| k.producer == tool)
            .cloned()
            .collect();

        let mut notices = Vec::new();
        for key in keys {
            notices.extend(self.unpublish(&key));
        }

        self.outputs.remove(&tool);
        self.producers.retain(|p| *p != tool);
        debug!(%tool, notices = notices.len(), "removed producer");
        notices
    }

    pub fn get(&self, key: &DatasetKey) -> Option<Arc<Dataset>> {
        self.datasets.get(key).cloned()
    }

    pub fn contains(&self, key: &DatasetKey) -> bool {
        self.datasets.contains_key(key)
    }

    /// Datasets of one producer, in first-publication order.
    pub fn datasets_of(&self, producer: ToolId) -> Vec<Arc<Dataset>> {
        self.outputs
            .get(&producer)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| {
                        self.datasets
                            .get(&DatasetKey::new(producer, name.clone()))
                            .cloned()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every published dataset accepted by `definition`.
    ///
    /// Most recently registered producer first; within a producer, outputs in
    /// the order they were first published.
    pub fn find_compatible(&self, definition: &ConsumerDefinition) -> Vec<Arc<Dataset>> {
        self.producers
            .iter()
            .rev()
            .flat_map(|p| self.datasets_of(*p))
            .filter(|d| definition.accepts(d))
            .collect()
    }

    /// Every published dataset, in producer registration order.
    pub fn list_all(&self) -> Vec<Arc<Dataset>> {
        self.producers
            .iter()
            .flat_map(|p| self.datasets_of(*p))
            .collect()
    }

    pub fn subscribe(&mut self, key: DatasetKey, port: PortRef) {
        debug!(%key, tool = %port.tool, input = %port.input, "subscribed");
        self.subscribers.entry(key).or_default().insert(port);
    }

    pub fn unsubscribe(&mut self, key: &DatasetKey, port: &PortRef) {
        if let Some(ports) = self.subscribers.get_mut(key) {
            ports.remove(port);
            if ports.is_empty() {
                self.subscribers.remove(key);
            }
        }
    }

    pub fn subscribers_of(&self, key: &DatasetKey) -> Vec<PortRef> {
        self.subscribers
            .get(key)
            .map(|ports| ports.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Producer -> consumer graph of the current subscriptions.
    pub fn binding_graph(&self) -> BindingGraph {
        BindingGraph::from_edges(self.subscribers.iter().flat_map(|(key, ports)| {
            ports.iter().map(move |port| (key.producer, port.tool))
        }))
    }

    /// Whether binding `consumer` to an output of `producer` would make
    /// `consumer` depend on itself.
    pub fn would_cycle(&self, consumer: ToolId, producer: ToolId) -> bool {
        self.binding_graph().reaches(consumer, producer)
    }
}
