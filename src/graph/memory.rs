//! In-memory backend built on petgraph.
//!
//! Nodes live in a directed graph whose edges point from the dependent
//! module to its dependency. A secondary index maps each specifier to the
//! node indices stored under it; the create-only write keeps that list at
//! one entry, and only [`MemoryBackend::seed_unchecked`] can grow it further.

use async_trait::async_trait;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::backend::{Backend, BackendError, PutError, StoreCounts};
use super::node::{GraphEdge, GraphNode};

/// The graph and its specifier index, without any locking.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeGraph {
    graph: DiGraph<GraphNode, ()>,
    /// Maps specifiers to their node indices for O(1) lookup
    index: HashMap<String, Vec<NodeIndex>>,
}

impl NodeGraph {
    pub(crate) fn contains(&self, specifier: &str) -> bool {
        self.index.get(specifier).is_some_and(|ids| !ids.is_empty())
    }

    fn first_index(&self, specifier: &str) -> Option<NodeIndex> {
        self.index.get(specifier).and_then(|ids| ids.first().copied())
    }

    /// Adds a node unless its specifier is already indexed.
    pub(crate) fn insert_node(&mut self, node: GraphNode) -> Result<(), PutError> {
        if self.contains(&node.specifier) {
            return Err(PutError::ConditionFailed(node.specifier));
        }
        self.seed_unchecked(node);
        Ok(())
    }

    /// Adds a node without checking the index.
    pub(crate) fn seed_unchecked(&mut self, node: GraphNode) {
        let specifier = node.specifier.clone();
        let idx = self.graph.add_node(node);
        self.index.entry(specifier).or_default().push(idx);
    }

    /// Checks that `edge` can be created: both endpoints exist and the
    /// edge itself does not.
    pub(crate) fn check_edge(&self, edge: &GraphEdge) -> Result<(NodeIndex, NodeIndex), PutError> {
        let from = self
            .first_index(&edge.from)
            .ok_or_else(|| BackendError::MissingEndpoint(edge.from.clone()))?;
        let to = self
            .first_index(&edge.to)
            .ok_or_else(|| BackendError::MissingEndpoint(edge.to.clone()))?;

        if self.graph.contains_edge(from, to) {
            return Err(PutError::ConditionFailed(edge.to_string()));
        }
        Ok((from, to))
    }

    /// Adds an edge unless it already exists. Both endpoints must exist.
    pub(crate) fn insert_edge(&mut self, edge: &GraphEdge) -> Result<(), PutError> {
        let (from, to) = self.check_edge(edge)?;
        self.graph.add_edge(from, to, ());
        Ok(())
    }

    pub(crate) fn query(&self, specifier: &str) -> Vec<GraphNode> {
        self.index
            .get(specifier)
            .map(|ids| {
                ids.iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn neighbors(&self, specifier: &str, direction: Direction) -> Vec<String> {
        let Some(idx) = self.first_index(specifier) else {
            return Vec::new();
        };

        let mut specifiers: Vec<String> = self
            .graph
            .edges_directed(idx, direction)
            .filter_map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                self.graph.node_weight(other)
            })
            .map(|node| node.specifier.clone())
            .collect();
        specifiers.sort();
        specifiers
    }

    pub(crate) fn counts(&self) -> StoreCounts {
        StoreCounts {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
        }
    }
}

/// A [`Backend`] that keeps the whole graph in memory.
///
/// # Example
///
/// ```
/// use depgraph::graph::{Backend, GraphNode, MemoryBackend, PutError};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
/// backend.put_if_absent(GraphNode::resolved("x/foo")).await.unwrap();
///
/// let again = backend.put_if_absent(GraphNode::resolved("x/foo")).await;
/// assert!(matches!(again, Err(PutError::ConditionFailed(_))));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    graph: RwLock<NodeGraph>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `node` without the uniqueness check.
    ///
    /// Lets test fixtures plant duplicate specifiers to exercise the
    /// integrity check of the lookup path.
    pub async fn seed_unchecked(&self, node: GraphNode) {
        self.graph.write().await.seed_unchecked(node);
    }

    /// Returns the specifiers `specifier` depends on, sorted.
    pub async fn dependencies(&self, specifier: &str) -> Vec<String> {
        self.graph
            .read()
            .await
            .neighbors(specifier, Direction::Outgoing)
    }

    /// Returns the specifiers that depend on `specifier`, sorted.
    pub async fn dependents(&self, specifier: &str) -> Vec<String> {
        self.graph
            .read()
            .await
            .neighbors(specifier, Direction::Incoming)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn init_schema(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn put_if_absent(&self, node: GraphNode) -> Result<(), PutError> {
        self.graph.write().await.insert_node(node)
    }

    async fn put_edge_if_absent(&self, edge: GraphEdge) -> Result<(), PutError> {
        self.graph.write().await.insert_edge(&edge)
    }

    async fn query_by_specifier(&self, specifier: &str) -> Result<Vec<GraphNode>, BackendError> {
        Ok(self.graph.read().await.query(specifier))
    }

    async fn counts(&self) -> Result<StoreCounts, BackendError> {
        Ok(self.graph.read().await.counts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_if_absent_rejects_duplicate() {
        let backend = MemoryBackend::new();
        backend
            .put_if_absent(GraphNode::resolved("x/foo"))
            .await
            .unwrap();

        let result = backend.put_if_absent(GraphNode::resolved("x/foo")).await;
        assert!(matches!(result, Err(PutError::ConditionFailed(ref s)) if s == "x/foo"));
        assert_eq!(backend.counts().await.unwrap().nodes, 1);
    }

    #[tokio::test]
    async fn test_duplicate_does_not_overwrite() {
        let backend = MemoryBackend::new();
        let first = GraphNode::resolved("x/foo");
        backend.put_if_absent(first.clone()).await.unwrap();
        let _ = backend.put_if_absent(GraphNode::resolved("x/foo")).await;

        let stored = backend.query_by_specifier("x/foo").await.unwrap();
        assert_eq!(stored, vec![first]);
    }

    #[tokio::test]
    async fn test_edges_are_create_only() {
        let backend = MemoryBackend::new();
        backend.put_if_absent(GraphNode::resolved("a")).await.unwrap();
        backend.put_if_absent(GraphNode::resolved("b")).await.unwrap();

        backend
            .put_edge_if_absent(GraphEdge::new("a", "b"))
            .await
            .unwrap();
        let again = backend.put_edge_if_absent(GraphEdge::new("a", "b")).await;

        assert!(matches!(again, Err(PutError::ConditionFailed(_))));
        assert_eq!(backend.counts().await.unwrap().edges, 1);
    }

    #[tokio::test]
    async fn test_edge_requires_endpoints() {
        let backend = MemoryBackend::new();
        backend.put_if_absent(GraphNode::resolved("a")).await.unwrap();

        let result = backend.put_edge_if_absent(GraphEdge::new("a", "ghost")).await;
        assert!(matches!(
            result,
            Err(PutError::Backend(BackendError::MissingEndpoint(ref s))) if s == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_seed_unchecked_allows_duplicates() {
        let backend = MemoryBackend::new();
        backend.seed_unchecked(GraphNode::resolved("dup")).await;
        backend.seed_unchecked(GraphNode::resolved("dup")).await;

        assert_eq!(backend.query_by_specifier("dup").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dependencies_and_dependents() {
        let backend = MemoryBackend::new();
        for spec in ["app", "lib", "util"] {
            backend.put_if_absent(GraphNode::resolved(spec)).await.unwrap();
        }
        backend.put_edge_if_absent(GraphEdge::new("app", "lib")).await.unwrap();
        backend.put_edge_if_absent(GraphEdge::new("app", "util")).await.unwrap();
        backend.put_edge_if_absent(GraphEdge::new("lib", "util")).await.unwrap();

        assert_eq!(backend.dependencies("app").await, vec!["lib", "util"]);
        assert_eq!(backend.dependents("util").await, vec!["app", "lib"]);
        assert!(backend.dependencies("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_query_missing() {
        let backend = MemoryBackend::new();
        assert!(backend.query_by_specifier("nope").await.unwrap().is_empty());
    }
}
