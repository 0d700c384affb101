//! depgraph - concurrent dependency-graph ingestion for module registries
//!
//! This crate discovers packages published in a module registry, runs an
//! external analyzer over every entry file, and persists the resulting
//! dependency graph with idempotent, create-only writes.
//!
//! - [`discovery`] - package sources (manifest file, local mirror)
//! - [`pipeline`] - the staged, concurrent ingestion pipeline
//! - [`analyzer`] - the external dependency analyzer
//! - [`graph`] - the graph store and its backends
//! - [`registry`] - registry naming conventions
//! - [`metrics`] - Prometheus counters and the `/metrics` endpoint
//! - [`parser`] - shared types and analyzer output parsing

pub mod analyzer;
pub mod config;
pub mod discovery;
pub mod graph;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod registry;
