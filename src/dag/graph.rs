// src/dag/graph.rs

use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;

use crate::types::ToolId;

/// Producer -> consumer graph derived from the current bindings.
///
/// Edge direction follows the data: for a consumer bound to one of `P`'s
/// outputs we add `P -> consumer`. This is rebuilt on demand; bindings change
/// rarely compared to how often datasets are republished.
#[derive(Debug, Clone, Default)]
pub struct BindingGraph {
    graph: DiGraphMap<ToolId, ()>,
}

impl BindingGraph {
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (ToolId, ToolId)>,
    {
        let mut graph = DiGraphMap::new();
        for (producer, consumer) in edges {
            graph.add_edge(producer, consumer, ());
        }
        Self { graph }
    }

    /// Whether data flows, directly or transitively, from `from` to `to`.
    pub fn reaches(&self, from: ToolId, to: ToolId) -> bool {
        if from == to {
            return true;
        }
        if !self.graph.contains_node(from) || !self.graph.contains_node(to) {
            return false;
        }
        has_path_connecting(&self.graph, from, to, None)
    }

    /// Tools that consume any output of `producer`.
    pub fn consumers_of(&self, producer: ToolId) -> Vec<ToolId> {
        if !self.graph.contains_node(producer) {
            return Vec::new();
        }
        self.graph.neighbors(producer).collect()
    }

    /// Tools whose outputs `consumer` reads.
    pub fn producers_of(&self, consumer: ToolId) -> Vec<ToolId> {
        if !self.graph.contains_node(consumer) {
            return Vec::new();
        }
        self.graph
            .neighbors_directed(consumer, petgraph::Direction::Incoming)
            .collect()
    }
}
