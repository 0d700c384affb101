//! The two persistence stages: package/version nodes before extraction,
//! file and dependency nodes after it.

use serde::Serialize;
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::error::{PipelineError, Stage};
use super::extract::FileOutcome;
use super::queue::{QueueConsumer, ERROR_BUFFER};
use crate::graph::{GraphNode, GraphStore, Inserted};
use crate::metrics::Metrics;
use crate::parser::Package;
use crate::registry::RegistryLayout;

/// Buffer size of the persisted-package channel.
pub const PACKAGE_BUFFER: usize = 8;

/// What to record for an entry file whose analysis failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// Record nothing. The graph has no node for the file.
    #[default]
    Skip,
    /// Record the file as an `unresolved` node under its version.
    Placeholder,
}

impl fmt::Display for UnresolvedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedPolicy::Skip => f.write_str("skip"),
            UnresolvedPolicy::Placeholder => f.write_str("placeholder"),
        }
    }
}

impl FromStr for UnresolvedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(UnresolvedPolicy::Skip),
            "placeholder" => Ok(UnresolvedPolicy::Placeholder),
            other => Err(format!(
                "unknown unresolved policy '{}' (expected skip or placeholder)",
                other
            )),
        }
    }
}

/// Counters for one run's persistence work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub packages: usize,
    pub versions: usize,
    pub files_analyzed: usize,
    pub files_skipped: usize,
    pub placeholders: usize,
    pub nodes_created: usize,
    pub nodes_existing: usize,
    pub edges_created: usize,
    pub edges_existing: usize,
    pub store_failures: usize,
}

impl AddAssign for PersistSummary {
    fn add_assign(&mut self, other: Self) {
        self.packages += other.packages;
        self.versions += other.versions;
        self.files_analyzed += other.files_analyzed;
        self.files_skipped += other.files_skipped;
        self.placeholders += other.placeholders;
        self.nodes_created += other.nodes_created;
        self.nodes_existing += other.nodes_existing;
        self.edges_created += other.edges_created;
        self.edges_existing += other.edges_existing;
        self.store_failures += other.store_failures;
    }
}

/// Writes nodes and edges, counting outcomes and reporting faults.
struct Writer {
    store: GraphStore,
    errors: mpsc::Sender<PipelineError>,
    metrics: Option<Metrics>,
    summary: PersistSummary,
}

impl Writer {
    fn new(
        store: GraphStore,
        errors: mpsc::Sender<PipelineError>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            store,
            errors,
            metrics,
            summary: PersistSummary::default(),
        }
    }

    /// Inserts a node. Returns `None` if the store faulted.
    async fn node(&mut self, node: GraphNode) -> Option<Inserted> {
        let specifier = node.specifier.clone();
        match self.store.insert(node).await {
            Ok(inserted) => {
                match inserted {
                    Inserted::Created => self.summary.nodes_created += 1,
                    Inserted::AlreadyExists => self.summary.nodes_existing += 1,
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_node(inserted);
                }
                Some(inserted)
            }
            Err(err) => {
                self.fault(PipelineError::new(Stage::Persist, err).for_item(specifier))
                    .await;
                None
            }
        }
    }

    /// Inserts an edge. Returns `None` if the store faulted.
    async fn edge(&mut self, from: &str, to: &str) -> Option<Inserted> {
        match self.store.insert_edge(from, to).await {
            Ok(inserted) => {
                match inserted {
                    Inserted::Created => self.summary.edges_created += 1,
                    Inserted::AlreadyExists => self.summary.edges_existing += 1,
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_edge(inserted);
                }
                Some(inserted)
            }
            Err(err) => {
                let item = format!("{} -> {}", from, to);
                self.fault(PipelineError::new(Stage::Persist, err).for_item(item))
                    .await;
                None
            }
        }
    }

    async fn fault(&mut self, err: PipelineError) {
        self.summary.store_failures += 1;
        // A closed error stream only means nobody is listening any more.
        let _ = self.errors.send(err).await;
    }
}

/// Persists a package node, its version nodes and package→version edges.
async fn persist_package(writer: &mut Writer, layout: &RegistryLayout, package: &Package) {
    let package_spec = layout.package_specifier(&package.name);
    let package_ok = writer.node(GraphNode::resolved(&package_spec)).await.is_some();
    writer.summary.packages += 1;

    for version in package.versions.keys() {
        let version_spec = layout.version_specifier(&package.name, version);
        let version_ok = writer.node(GraphNode::resolved(&version_spec)).await.is_some();
        writer.summary.versions += 1;
        if package_ok && version_ok {
            writer.edge(&package_spec, &version_spec).await;
        }
    }
}

/// Spawns the node-insert stage.
///
/// Each package taken from the queue gets its package and version nodes
/// before it is forwarded to extraction. Store faults are reported, and
/// the package is forwarded regardless. Insert outcomes also feed
/// `metrics` when given.
///
/// # Returns
///
/// The forwarded packages, the stage's error stream, and a handle that
/// resolves to the stage's counters once it finishes.
pub fn spawn_insert_packages(
    store: GraphStore,
    layout: Arc<RegistryLayout>,
    mut queue: QueueConsumer,
    metrics: Option<Metrics>,
) -> (
    mpsc::Receiver<Package>,
    mpsc::Receiver<PipelineError>,
    JoinHandle<PersistSummary>,
) {
    let (forward, forward_rx) = mpsc::channel(PACKAGE_BUFFER);
    let (errors, error_rx) = mpsc::channel(ERROR_BUFFER);

    let handle = tokio::spawn(async move {
        let mut writer = Writer::new(store, errors, metrics);
        while let Some(package) = queue.recv().await {
            persist_package(&mut writer, &layout, &package).await;
            debug!(package = %package.name, "Persisted package nodes");
            if forward.send(package).await.is_err() {
                break;
            }
        }
        writer.summary
    });

    (forward_rx, error_rx, handle)
}

/// Persists one entry file's outcome.
async fn persist_outcome(
    writer: &mut Writer,
    layout: &RegistryLayout,
    policy: UnresolvedPolicy,
    outcome: FileOutcome,
) {
    match outcome {
        FileOutcome::Analyzed { entry, record } => {
            writer.summary.files_analyzed += 1;
            let file_ok = writer.node(GraphNode::resolved(&entry.specifier)).await.is_some();
            if file_ok {
                writer.edge(&entry.version_specifier, &entry.specifier).await;
            }

            for dependency in &record.dependencies {
                let dep_spec = layout.specifier_str(dependency);
                if dep_spec == entry.specifier {
                    continue;
                }
                let dep_ok = writer.node(GraphNode::specifier_only(&dep_spec)).await.is_some();
                if file_ok && dep_ok {
                    writer.edge(&entry.specifier, &dep_spec).await;
                }
            }
        }
        FileOutcome::Skipped { entry, reason } => {
            writer.summary.files_skipped += 1;
            match policy {
                UnresolvedPolicy::Skip => {
                    debug!(specifier = %entry.specifier, reason = %reason, "Skipped entry file");
                }
                UnresolvedPolicy::Placeholder => {
                    let inserted = writer.node(GraphNode::unresolved(&entry.specifier)).await;
                    if inserted == Some(Inserted::Created) {
                        writer.summary.placeholders += 1;
                    }
                    if inserted.is_some() {
                        writer.edge(&entry.version_specifier, &entry.specifier).await;
                    }
                }
            }
        }
    }
}

/// Spawns the record-insert stage, the last stage of the pipeline.
///
/// # Returns
///
/// A completion signal carrying the stage's counters, fired once the
/// outcome stream has drained and every write has been issued, plus the
/// stage's error stream.
pub fn spawn_insert_records(
    store: GraphStore,
    layout: Arc<RegistryLayout>,
    mut outcomes: mpsc::Receiver<FileOutcome>,
    policy: UnresolvedPolicy,
    metrics: Option<Metrics>,
) -> (oneshot::Receiver<PersistSummary>, mpsc::Receiver<PipelineError>) {
    let (done, done_rx) = oneshot::channel();
    let (errors, error_rx) = mpsc::channel(ERROR_BUFFER);

    tokio::spawn(async move {
        let mut writer = Writer::new(store, errors, metrics);
        while let Some(outcome) = outcomes.recv().await {
            persist_outcome(&mut writer, &layout, policy, outcome).await;
        }
        let Writer { summary, errors, .. } = writer;
        // Close the error stream before signalling completion.
        drop(errors);
        info!(
            analyzed = summary.files_analyzed,
            skipped = summary.files_skipped,
            "Dependency records persisted"
        );
        let _ = done.send(summary);
    });

    (done_rx, error_rx)
}
