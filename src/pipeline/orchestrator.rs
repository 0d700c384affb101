//! Wires discovery, queue, extraction and persistence into one run.

use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::cancel::Cancellation;
use super::extract::spawn_extract;
use super::merge::{merge, spawn_log_sink, ErrorTally};
use super::persist::{spawn_insert_packages, spawn_insert_records, PersistSummary, UnresolvedPolicy};
use super::queue::{dedup_queue, spawn_enqueue};
use crate::analyzer::Analyzer;
use crate::discovery::{Discovered, Discovery};
use crate::graph::{BackendError, GraphStore};
use crate::metrics::Metrics;
use crate::registry::RegistryLayout;

/// Default dedup queue capacity (synchronous hand-off).
pub const DEFAULT_QUEUE_CAPACITY: usize = 0;

/// Default number of packages analysed at once.
pub const DEFAULT_MAX_CONCURRENT_PACKAGES: usize = 4;

/// Conditions that stop a run before any stage starts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Dependency analyzer not found; install it or point the analyzer program at it")]
    AnalyzerMissing,

    #[error("Failed to initialize graph store schema: {0}")]
    Schema(#[from] BackendError),
}

/// Tuning knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Dedup queue capacity; 0 is a rendezvous hand-off.
    pub queue_capacity: usize,
    /// Upper bound on packages analysed concurrently.
    pub max_concurrent_packages: usize,
    /// What to record for files whose analysis failed.
    pub unresolved: UnresolvedPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_concurrent_packages: DEFAULT_MAX_CONCURRENT_PACKAGES,
            unresolved: UnresolvedPolicy::default(),
        }
    }
}

/// Outcome of a finished or cancelled run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Persistence counters.
    pub summary: PersistSummary,
    /// Errors seen by the aggregator, per stage.
    pub errors: ErrorTally,
    /// True if the run stopped because it was cancelled.
    pub cancelled: bool,
}

impl RunReport {
    /// Returns the total number of per-item errors.
    pub fn error_count(&self) -> usize {
        self.errors.total()
    }
}

/// The ingestion pipeline.
///
/// ```text
/// discovery ─▶ dedup queue ─▶ insert packages ─▶ extract ─▶ insert records ─▶ done
///     │             │               │               │              │
///     └─────────────┴───────────────┴───── errors ──┴──────────────┴─▶ log sink
/// ```
///
/// # Example
///
/// ```
/// use depgraph::analyzer::MockAnalyzer;
/// use depgraph::discovery::StaticDiscovery;
/// use depgraph::graph::{GraphStore, MemoryBackend};
/// use depgraph::parser::Package;
/// use depgraph::pipeline::{Cancellation, Pipeline, PipelineOptions};
/// use depgraph::registry::RegistryLayout;
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let store = GraphStore::new(Arc::new(MemoryBackend::new()));
/// let pipeline = Pipeline::new(
///     store.clone(),
///     Arc::new(MockAnalyzer::new()),
///     RegistryLayout::default(),
///     PipelineOptions::default(),
/// );
///
/// let discovery = StaticDiscovery::new(vec![Package::new("oak").with_version("12.0.0", ["/mod.ts"])]);
/// let report = pipeline.run(discovery, Cancellation::new()).await.unwrap();
///
/// assert_eq!(report.summary.files_analyzed, 1);
/// assert!(store.lookup_by_specifier("x/oak@12.0.0/mod.ts").await.unwrap().is_some());
/// # });
/// ```
pub struct Pipeline {
    store: GraphStore,
    analyzer: Arc<dyn Analyzer>,
    layout: Arc<RegistryLayout>,
    options: PipelineOptions,
    metrics: Option<Metrics>,
}

impl Pipeline {
    /// Creates a pipeline over an initialised-or-not store.
    pub fn new(
        store: GraphStore,
        analyzer: Arc<dyn Analyzer>,
        layout: RegistryLayout,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            analyzer,
            layout: Arc::new(layout),
            options,
            metrics: None,
        }
    }

    /// Feeds node, edge, error and analyzer-latency counters into `metrics`
    /// while runs are in progress.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the registry layout in use.
    pub fn layout(&self) -> &RegistryLayout {
        &self.layout
    }

    /// Checks startup preconditions: the store schema initialises and the
    /// analyzer is installed.
    pub async fn preflight(&self) -> Result<(), StartupError> {
        self.store.init_schema().await?;
        if !self.analyzer.exists() {
            return Err(StartupError::AnalyzerMissing);
        }
        Ok(())
    }

    /// Runs the pipeline until every discovered item is persisted or
    /// skipped, or until `cancel` fires.
    ///
    /// Per-item failures never fail the run; they are logged by the sink
    /// and counted in [`RunReport::errors`].
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if [`Pipeline::preflight`] fails. No stage
    /// is started in that case.
    pub async fn run<D: Discovery>(
        &self,
        discovery: D,
        cancel: Cancellation,
    ) -> Result<RunReport, StartupError> {
        self.preflight().await?;
        info!(
            host = %self.layout.host,
            queue_capacity = self.options.queue_capacity,
            max_concurrent_packages = self.options.max_concurrent_packages,
            unresolved = %self.options.unresolved,
            "Starting pipeline"
        );

        let Discovered {
            packages: discovered,
            errors: discovery_errors,
        } = discovery.discover();

        let (producer, consumer) = dedup_queue(self.options.queue_capacity);
        let enqueue_errors = spawn_enqueue(discovered, producer, cancel.clone());

        let (inserted, package_errors, package_summary) = spawn_insert_packages(
            self.store.clone(),
            self.layout.clone(),
            consumer,
            self.metrics.clone(),
        );

        let analyzer = match &self.metrics {
            Some(metrics) => metrics.instrument(self.analyzer.clone()),
            None => self.analyzer.clone(),
        };
        let (outcomes, analysis_errors) = spawn_extract(
            analyzer,
            self.layout.clone(),
            inserted,
            self.options.max_concurrent_packages,
            cancel.clone(),
        );

        let (done, record_errors) = spawn_insert_records(
            self.store.clone(),
            self.layout.clone(),
            outcomes,
            self.options.unresolved,
            self.metrics.clone(),
        );

        let metrics = self.metrics.clone();
        let errors = merge([
            discovery_errors,
            enqueue_errors,
            package_errors,
            analysis_errors,
            record_errors,
        ])
        .inspect(move |err| {
            if let Some(metrics) = &metrics {
                metrics.record_error(err.stage);
            }
        });
        let sink = spawn_log_sink(errors);

        let records = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Pipeline cancelled before completion");
                return Ok(RunReport {
                    cancelled: true,
                    ..RunReport::default()
                });
            }
            records = done => records,
        };

        let mut summary = records.unwrap_or_else(|_| {
            error!("Record-insert stage ended without reporting");
            PersistSummary::default()
        });
        match package_summary.await {
            Ok(packages) => summary += packages,
            Err(err) => error!("Package-insert stage failed: {}", err),
        }
        let errors = sink.await.unwrap_or_else(|err| {
            error!("Error sink failed: {}", err);
            ErrorTally::default()
        });

        info!(
            packages = summary.packages,
            files_analyzed = summary.files_analyzed,
            files_skipped = summary.files_skipped,
            errors = errors.total(),
            "Pipeline complete"
        );

        Ok(RunReport {
            summary,
            errors,
            cancelled: false,
        })
    }
}
