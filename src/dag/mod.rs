// src/dag/mod.rs

//! Data-dependency graph.
//!
//! - [`dataset`] holds datasets, their keys and consumer definitions.
//! - [`registry`] is the session-wide catalog of published datasets.
//! - [`data_manager`] owns one tool's ports and bindings.
//! - [`graph`] derives the producer -> consumer graph for cycle checks.

pub mod data_manager;
pub mod dataset;
pub mod graph;
pub mod registry;

pub use data_manager::{DataEvent, DataManager};
pub use dataset::{ConsumerDefinition, Dataset, DatasetKey, PortRef};
pub use graph::BindingGraph;
pub use registry::{DatasetRegistry, Publication, RegistryNotice};
