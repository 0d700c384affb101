//! Stage-tagged pipeline errors.

use serde::Serialize;
use std::fmt;

use crate::analyzer::AnalyzeError;
use crate::discovery::DiscoveryError;
use crate::graph::StoreError;
use crate::registry::LayoutError;

use super::queue::QueueError;

/// The pipeline stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Registry discovery.
    Discovery,
    /// Validation and hand-off through the dedup queue.
    Enqueue,
    /// Graph store writes.
    Persist,
    /// External analysis of entry files.
    Analysis,
}

impl Stage {
    /// Returns a short label for the stage.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Enqueue => "enqueue",
            Stage::Persist => "persist",
            Stage::Analysis => "analysis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The underlying cause of a [`PipelineError`].
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

fn item_suffix(item: &Option<String>) -> String {
    item.as_ref()
        .map(|item| format!(" for {}", item))
        .unwrap_or_default()
}

/// A per-item failure, tagged with its stage and, when known, the item.
///
/// These never abort a run; they flow into the error aggregator.
///
/// # Example
///
/// ```
/// use depgraph::pipeline::{PipelineError, Stage};
/// use depgraph::pipeline::queue::QueueError;
///
/// let err = PipelineError::new(Stage::Enqueue, QueueError::Closed).for_item("oak");
/// assert_eq!(err.to_string(), "enqueue failed for oak: Queue consumer is gone");
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed{suffix}: {source}", suffix = item_suffix(.item))]
pub struct PipelineError {
    /// Originating stage.
    pub stage: Stage,
    /// The package, locator or specifier being processed.
    pub item: Option<String>,
    /// What went wrong.
    #[source]
    pub source: StageFailure,
}

impl PipelineError {
    /// Creates an error not yet attributed to an item.
    pub fn new(stage: Stage, source: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            item: None,
            source: source.into(),
        }
    }

    /// Attributes the error to `item`.
    pub fn for_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StoreError;

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Discovery.to_string(), "discovery");
        assert_eq!(Stage::Enqueue.to_string(), "enqueue");
        assert_eq!(Stage::Persist.to_string(), "persist");
        assert_eq!(Stage::Analysis.to_string(), "analysis");
    }

    #[test]
    fn test_display_without_item() {
        let err = PipelineError::new(
            Stage::Persist,
            StoreError::Integrity {
                specifier: "x/foo".to_string(),
                count: 2,
            },
        );
        assert_eq!(
            err.to_string(),
            "persist failed: Expected only one result for x/foo, got 2"
        );
    }

    #[test]
    fn test_for_item() {
        let err = PipelineError::new(Stage::Analysis, AnalyzeError::Cancelled).for_item("x/foo@1.0.0/mod.ts");
        assert_eq!(err.item.as_deref(), Some("x/foo@1.0.0/mod.ts"));
        assert!(err.to_string().starts_with("analysis failed for x/foo@1.0.0/mod.ts"));
    }
}
