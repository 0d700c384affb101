//! Graph module: durable persistence of the dependency graph.
//!
//! The [`GraphStore`] is the only shared mutable resource of the pipeline.
//! It offers an idempotent create-only insert and an exact lookup through
//! the specifier index, on top of a pluggable [`Backend`]:
//!
//! - [`MemoryBackend`] keeps the graph in a petgraph `DiGraph`;
//! - [`FileBackend`] adds a durable append-only log to it.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use depgraph::graph::{GraphNode, GraphStore, MemoryBackend};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = GraphStore::new(Arc::new(MemoryBackend::new()));
//! store.insert(GraphNode::resolved("x/foo@1.0.0/mod.ts")).await.unwrap();
//! store.insert(GraphNode::specifier_only("std@0.200.0/fs/mod.ts")).await.unwrap();
//! store.insert_edge("x/foo@1.0.0/mod.ts", "std@0.200.0/fs/mod.ts").await.unwrap();
//!
//! let counts = store.counts().await.unwrap();
//! assert_eq!((counts.nodes, counts.edges), (2, 1));
//! # });
//! ```

mod backend;
mod file;
mod memory;
mod node;
mod store;

pub use backend::{Backend, BackendError, PutError, StoreCounts};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use node::{GraphEdge, GraphNode};
pub use store::{GraphStore, Inserted, StoreError, StoreResult};
