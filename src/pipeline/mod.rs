//! The concurrent ingestion pipeline.
//!
//! Each stage runs as its own task and talks to its neighbours only over
//! channels. Per-item failures travel on separate error streams that are
//! merged into a single log sink, so one bad file never stalls the rest.
//!
//! - [`queue`] - dedup queue and the enqueue stage
//! - [`persist`] - package/version node writes and dependency-record writes
//! - [`extract`] - analyzer fan-out across packages
//! - [`merge`] - error stream fan-in and the log sink
//! - [`orchestrator`] - the [`Pipeline`] that wires it all together

pub mod cancel;
pub mod error;
pub mod extract;
pub mod merge;
pub mod orchestrator;
pub mod persist;
pub mod queue;

pub use cancel::Cancellation;
pub use error::{PipelineError, Stage, StageFailure};
pub use extract::{EntryRef, FileOutcome};
pub use merge::{merge, spawn_log_sink, ErrorTally};
pub use orchestrator::{Pipeline, PipelineOptions, RunReport, StartupError};
pub use persist::{PersistSummary, UnresolvedPolicy};
