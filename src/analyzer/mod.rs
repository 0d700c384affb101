//! Analyzer adapter: the external dependency-analysis tool.
//!
//! An [`Analyzer`] takes one fully qualified locator and returns its
//! [`DependencyRecord`]. Tool absence ([`Analyzer::exists`]) is a startup
//! precondition; a failed [`Analyzer::analyze`] call only costs the one
//! file it was made for.
//!
//! - [`DenoAnalyzer`] runs `deno info --json` as a subprocess.
//! - [`MockAnalyzer`] is a scriptable test double.

pub mod deno;
pub mod mock;

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::parser::{DependencyRecord, ParseError};

pub use deno::DenoAnalyzer;
pub use mock::MockAnalyzer;

/// Errors from a single analysis run.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    /// The tool could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The tool exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        /// Program that failed.
        program: String,
        /// Exit status description.
        status: String,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// The tool did not finish in time.
    #[error("Analysis of {locator} timed out after {timeout:?}")]
    Timeout {
        /// Locator being analyzed.
        locator: String,
        /// The configured limit.
        timeout: Duration,
    },

    /// The tool's output could not be used.
    #[error("Unusable analyzer output: {0}")]
    Output(#[from] ParseError),

    /// Analysis was abandoned because the run was cancelled.
    #[error("Analysis cancelled")]
    Cancelled,
}

/// Invokes a dependency analyzer for one locator at a time.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Returns true if the tool is available.
    fn exists(&self) -> bool;

    /// Analyzes `locator` and returns its direct dependencies.
    async fn analyze(&self, locator: &Url) -> Result<DependencyRecord, AnalyzeError>;
}
