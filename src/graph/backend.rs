//! The key-value store collaborator behind [`GraphStore`](super::GraphStore).
//!
//! A backend offers a create-only write and an exact query on the
//! `specifier` index. It reports a failed create condition distinctly from
//! every other fault so the store can treat "already exists" as success.

use async_trait::async_trait;

use super::node::{GraphEdge, GraphNode};

/// Faults raised by a backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Reading or writing the underlying storage failed.
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record could not be decoded.
    #[error("Corrupt store record at line {line}: {source}")]
    Corrupt {
        /// 1-based line number in the store log.
        line: usize,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded for storage.
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// An edge names a node that does not exist.
    #[error("Edge endpoint {0} does not exist")]
    MissingEndpoint(String),

    /// The backend cannot serve requests.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a failed create-only write.
#[derive(Debug, thiserror::Error)]
pub enum PutError {
    /// A record with the same key is already stored.
    #[error("Conditional check failed: {0} already exists")]
    ConditionFailed(String),

    /// Any other failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Node and edge totals held by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
    /// Number of stored nodes.
    pub nodes: usize,
    /// Number of stored edges.
    pub edges: usize,
}

/// Durable key-value persistence for graph records.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Prepares the storage (tables, files, indexes).
    async fn init_schema(&self) -> Result<(), BackendError>;

    /// Stores `node` only if no node with its specifier exists.
    async fn put_if_absent(&self, node: GraphNode) -> Result<(), PutError>;

    /// Stores `edge` only if the same edge does not exist.
    async fn put_edge_if_absent(&self, edge: GraphEdge) -> Result<(), PutError>;

    /// Returns every node indexed under `specifier`.
    async fn query_by_specifier(&self, specifier: &str) -> Result<Vec<GraphNode>, BackendError>;

    /// Returns node and edge totals.
    async fn counts(&self) -> Result<StoreCounts, BackendError>;
}
