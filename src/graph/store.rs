//! The graph store component.
//!
//! [`GraphStore`] layers the pipeline's persistence contract on top of any
//! [`Backend`]:
//!
//! - inserts are create-only and idempotent: a failed create condition means
//!   the record already exists and is reported as
//!   [`Inserted::AlreadyExists`], never as an error;
//! - lookups go through the specifier index and must find at most one node.
//!   More than one match is a broken uniqueness invariant and surfaces as
//!   [`StoreError::Integrity`].

use std::sync::Arc;
use tracing::debug;

use super::backend::{Backend, BackendError, PutError, StoreCounts};
use super::node::{GraphEdge, GraphNode};

/// Errors surfaced by the graph store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write failed for a reason other than the record already existing.
    #[error("Failed to store {key}: {source}")]
    Write {
        /// Specifier (or edge) being written.
        key: String,
        /// Backend fault.
        #[source]
        source: BackendError,
    },

    /// A lookup failed.
    #[error("Failed to query {specifier}: {source}")]
    Query {
        /// Specifier being looked up.
        specifier: String,
        /// Backend fault.
        #[source]
        source: BackendError,
    },

    /// The index holds several nodes for one specifier.
    #[error("Expected only one result for {specifier}, got {count}")]
    Integrity {
        /// The duplicated specifier.
        specifier: String,
        /// How many nodes were found.
        count: usize,
    },
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a successful insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// The record was written by this call.
    Created,
    /// An identical key was already stored; nothing was written.
    AlreadyExists,
}

impl Inserted {
    /// Returns true if this call wrote the record.
    pub fn is_created(&self) -> bool {
        matches!(self, Inserted::Created)
    }
}

/// Handle to the persisted dependency graph.
///
/// Cheap to clone; every clone shares the same backend. Construct it once
/// at startup and hand it to each stage that writes.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use depgraph::graph::{GraphNode, GraphStore, Inserted, MemoryBackend};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = GraphStore::new(Arc::new(MemoryBackend::new()));
///
/// let first = store.insert(GraphNode::resolved("x/foo@1.0.0/mod.ts")).await.unwrap();
/// let second = store.insert(GraphNode::resolved("x/foo@1.0.0/mod.ts")).await.unwrap();
/// assert_eq!(first, Inserted::Created);
/// assert_eq!(second, Inserted::AlreadyExists);
///
/// let node = store.lookup_by_specifier("x/foo@1.0.0/mod.ts").await.unwrap();
/// assert!(node.is_some());
/// # });
/// ```
#[derive(Clone)]
pub struct GraphStore {
    backend: Arc<dyn Backend>,
}

impl GraphStore {
    /// Creates a store over `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Initialises the backend schema. Failure is fatal at startup.
    pub async fn init_schema(&self) -> Result<(), BackendError> {
        self.backend.init_schema().await
    }

    /// Creates `node` if no node with its specifier exists.
    ///
    /// Repeated and concurrent calls with the same specifier leave exactly
    /// one stored node; every call but the winning one returns
    /// [`Inserted::AlreadyExists`].
    pub async fn insert(&self, node: GraphNode) -> StoreResult<Inserted> {
        let specifier = node.specifier.clone();
        match self.backend.put_if_absent(node).await {
            Ok(()) => Ok(Inserted::Created),
            Err(PutError::ConditionFailed(_)) => {
                debug!(specifier = %specifier, "Node already exists, nothing to do");
                Ok(Inserted::AlreadyExists)
            }
            Err(PutError::Backend(source)) => Err(StoreError::Write {
                key: specifier,
                source,
            }),
        }
    }

    /// Creates the edge `from -> to` if it does not exist.
    pub async fn insert_edge(&self, from: &str, to: &str) -> StoreResult<Inserted> {
        let edge = GraphEdge::new(from, to);
        let key = edge.to_string();
        match self.backend.put_edge_if_absent(edge).await {
            Ok(()) => Ok(Inserted::Created),
            Err(PutError::ConditionFailed(_)) => {
                debug!(edge = %key, "Edge already exists, nothing to do");
                Ok(Inserted::AlreadyExists)
            }
            Err(PutError::Backend(source)) => Err(StoreError::Write { key, source }),
        }
    }

    /// Returns the node stored for `specifier`, if any.
    pub async fn lookup_by_specifier(&self, specifier: &str) -> StoreResult<Option<GraphNode>> {
        let mut nodes = self
            .backend
            .query_by_specifier(specifier)
            .await
            .map_err(|source| StoreError::Query {
                specifier: specifier.to_string(),
                source,
            })?;

        if nodes.len() > 1 {
            return Err(StoreError::Integrity {
                specifier: specifier.to_string(),
                count: nodes.len(),
            });
        }
        Ok(nodes.pop())
    }

    /// Returns node and edge totals.
    pub async fn counts(&self) -> StoreResult<StoreCounts> {
        self.backend
            .counts()
            .await
            .map_err(|source| StoreError::Query {
                specifier: "*".to_string(),
                source,
            })
    }
}
