//! Extraction fan-out: one analyzer call per (version, entry file).

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use super::cancel::Cancellation;
use super::error::{PipelineError, Stage};
use super::queue::ERROR_BUFFER;
use crate::analyzer::{AnalyzeError, Analyzer};
use crate::parser::{DependencyRecord, Package};
use crate::registry::RegistryLayout;

/// Buffer size of the outcome channel.
pub const OUTCOME_BUFFER: usize = 32;

/// One entry file of one package version, with its registry names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    /// Package name.
    pub package: String,
    /// Version identifier.
    pub version: String,
    /// Entry path within the version, e.g. `/mod.ts`.
    pub file: String,
    /// Specifier of the version node, e.g. `x/foo@1.0.0`.
    pub version_specifier: String,
    /// Specifier of the file node, e.g. `x/foo@1.0.0/mod.ts`.
    pub specifier: String,
    /// The locator handed to the analyzer.
    pub locator: Url,
}

impl EntryRef {
    /// Names an entry file under `layout`.
    pub fn new(
        layout: &RegistryLayout,
        package: &str,
        version: &str,
        file: &str,
    ) -> Result<Self, crate::registry::LayoutError> {
        let locator = layout.locator(package, version, file)?;
        Ok(Self {
            package: package.to_string(),
            version: version.to_string(),
            file: file.to_string(),
            version_specifier: layout.version_specifier(package, version),
            specifier: layout.specifier(&locator),
            locator,
        })
    }
}

/// The result of processing one entry file.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// The analyzer produced a record.
    Analyzed {
        entry: EntryRef,
        record: DependencyRecord,
    },
    /// Analysis failed; the file contributes no dependency edges.
    Skipped { entry: EntryRef, reason: String },
}

impl FileOutcome {
    /// Returns the entry file this outcome is for.
    pub fn entry(&self) -> &EntryRef {
        match self {
            FileOutcome::Analyzed { entry, .. } | FileOutcome::Skipped { entry, .. } => entry,
        }
    }
}

/// Spawns the extraction stage.
///
/// Up to `max_concurrent_packages` packages are analysed at once; the entry
/// files of one package are analysed one after another, in order. Every
/// entry file yields exactly one [`FileOutcome`] unless the run is
/// cancelled, in which case in-flight analyzer calls are dropped.
///
/// # Returns
///
/// The outcome stream and the stage's error stream. Both close once every
/// package has been processed.
pub fn spawn_extract(
    analyzer: Arc<dyn Analyzer>,
    layout: Arc<RegistryLayout>,
    mut packages: mpsc::Receiver<Package>,
    max_concurrent_packages: usize,
    cancel: Cancellation,
) -> (mpsc::Receiver<FileOutcome>, mpsc::Receiver<PipelineError>) {
    let (outcomes, outcome_rx) = mpsc::channel(OUTCOME_BUFFER);
    let (errors, error_rx) = mpsc::channel(ERROR_BUFFER);
    let permits = max_concurrent_packages.clamp(1, Semaphore::MAX_PERMITS);
    let slots = Arc::new(Semaphore::new(permits));

    tokio::spawn(async move {
        loop {
            let package = tokio::select! {
                _ = cancel.cancelled() => break,
                next = packages.recv() => match next {
                    Some(package) => package,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = PackageWorker {
                analyzer: analyzer.clone(),
                layout: layout.clone(),
                outcomes: outcomes.clone(),
                errors: errors.clone(),
                cancel: cancel.clone(),
            };
            tokio::spawn(async move {
                let _permit = permit;
                worker.run(package).await;
            });
        }
        debug!("Extraction intake finished");
    });

    (outcome_rx, error_rx)
}

struct PackageWorker {
    analyzer: Arc<dyn Analyzer>,
    layout: Arc<RegistryLayout>,
    outcomes: mpsc::Sender<FileOutcome>,
    errors: mpsc::Sender<PipelineError>,
    cancel: Cancellation,
}

impl PackageWorker {
    async fn run(self, package: Package) {
        info!(package = %package, entries = package.entry_count(), "Extracting package");

        for (version, file) in package.entries() {
            if self.cancel.is_cancelled() {
                return;
            }

            let entry = match EntryRef::new(&self.layout, &package.name, version, file) {
                Ok(entry) => entry,
                Err(err) => {
                    let item = format!("{}@{}{}", package.name, version, file);
                    let err = PipelineError::new(Stage::Analysis, err).for_item(item);
                    if self.errors.send(err).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.analyzer.analyze(&entry.locator) => result,
            };

            let outcome = match result {
                Ok(record) => {
                    debug!(specifier = %entry.specifier, dependencies = record.dependencies.len(), "Analyzed entry file");
                    FileOutcome::Analyzed { entry, record }
                }
                Err(err) => match self.skip(entry, err).await {
                    Some(outcome) => outcome,
                    None => return,
                },
            };

            if self.outcomes.send(outcome).await.is_err() {
                warn!(package = %package.name, "Outcome consumer closed, abandoning package");
                return;
            }
        }
    }

    /// Reports a failed analysis and turns it into a skip.
    async fn skip(&self, entry: EntryRef, err: AnalyzeError) -> Option<FileOutcome> {
        let reason = err.to_string();
        let err = PipelineError::new(Stage::Analysis, err).for_item(entry.locator.as_str());
        self.errors.send(err).await.ok()?;
        Some(FileOutcome::Skipped { entry, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::MockAnalyzer;
    use std::time::Duration;

    fn layout() -> Arc<RegistryLayout> {
        Arc::new(RegistryLayout::with_host("registry.example"))
    }

    async fn drain(
        mut outcomes: mpsc::Receiver<FileOutcome>,
        mut errors: mpsc::Receiver<PipelineError>,
    ) -> (Vec<FileOutcome>, Vec<PipelineError>) {
        let error_task = tokio::spawn(async move {
            let mut all = Vec::new();
            while let Some(err) = errors.recv().await {
                all.push(err);
            }
            all
        });
        let mut all = Vec::new();
        while let Some(outcome) = outcomes.recv().await {
            all.push(outcome);
        }
        (all, error_task.await.unwrap())
    }

    #[test]
    fn test_entry_ref_names() {
        let entry = EntryRef::new(&layout(), "foo", "1.0.0", "/mod.ts").unwrap();
        assert_eq!(entry.locator.as_str(), "https://registry.example/x/foo@1.0.0/mod.ts");
        assert_eq!(entry.specifier, "x/foo@1.0.0/mod.ts");
        assert_eq!(entry.version_specifier, "x/foo@1.0.0");

        let entry = EntryRef::new(&layout(), "std", "1.0.0", "/mod.ts").unwrap();
        assert_eq!(entry.locator.as_str(), "https://registry.example/std@1.0.0/mod.ts");
    }

    #[test]
    fn test_entry_ref_rejects_escaping_paths() {
        assert!(EntryRef::new(&layout(), "foo", "1.0.0", "/../../std@1.0.0/mod.ts").is_err());
        assert!(EntryRef::new(&layout(), "foo", "1.0.0", "/mod.ts#frag").is_err());
    }

    #[tokio::test]
    async fn test_files_within_package_in_order() {
        let analyzer = Arc::new(MockAnalyzer::new());
        let (tx, rx) = mpsc::channel(4);
        let (outcomes, errors) = spawn_extract(analyzer.clone(), layout(), rx, 4, Cancellation::new());

        tx.send(
            Package::new("foo")
                .with_version("1.0.0", ["/mod.ts", "/b.ts", "/a.ts"])
                .with_version("2.0.0", ["/mod.ts"]),
        )
        .await
        .unwrap();
        drop(tx);

        let (outcomes, errors) = drain(outcomes, errors).await;
        assert!(errors.is_empty());
        let specs: Vec<_> = outcomes.iter().map(|o| o.entry().specifier.as_str()).collect();
        assert_eq!(
            specs,
            vec![
                "x/foo@1.0.0/mod.ts",
                "x/foo@1.0.0/b.ts",
                "x/foo@1.0.0/a.ts",
                "x/foo@2.0.0/mod.ts"
            ]
        );
        assert_eq!(analyzer.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_failure_becomes_skip() {
        let analyzer = Arc::new(
            MockAnalyzer::new().failing("https://registry.example/x/foo@1.0.0/broken.ts"),
        );
        let (tx, rx) = mpsc::channel(4);
        let (outcomes, errors) = spawn_extract(analyzer, layout(), rx, 2, Cancellation::new());

        tx.send(Package::new("foo").with_version("1.0.0", ["/broken.ts", "/mod.ts"]))
            .await
            .unwrap();
        drop(tx);

        let (outcomes, errors) = drain(outcomes, errors).await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], FileOutcome::Skipped { .. }));
        assert!(matches!(outcomes[1], FileOutcome::Analyzed { .. }));

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, Stage::Analysis);
        assert_eq!(
            errors[0].item.as_deref(),
            Some("https://registry.example/x/foo@1.0.0/broken.ts")
        );
    }

    #[tokio::test]
    async fn test_packages_analysed_concurrently() {
        let analyzer = Arc::new(MockAnalyzer::new().with_latency(Duration::from_millis(200)));
        let (tx, rx) = mpsc::channel(8);
        let (outcomes, errors) = spawn_extract(analyzer, layout(), rx, 4, Cancellation::new());

        for name in ["a", "b", "c", "d"] {
            tx.send(Package::new(name).with_version("1.0.0", ["/mod.ts"]))
                .await
                .unwrap();
        }
        drop(tx);

        let started = tokio::time::Instant::now();
        let (outcomes, _) = drain(outcomes, errors).await;
        assert_eq!(outcomes.len(), 4);
        // Sequential would take 800ms.
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_cancel_abandons_inflight_analysis() {
        let analyzer = Arc::new(MockAnalyzer::new().with_latency(Duration::from_secs(30)));
        let (tx, rx) = mpsc::channel(4);
        let cancel = Cancellation::new();
        let (outcomes, errors) = spawn_extract(analyzer, layout(), rx, 1, cancel.clone());

        tx.send(Package::new("slow").with_version("1.0.0", ["/mod.ts"]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let (outcomes, _) = tokio::time::timeout(Duration::from_secs(2), drain(outcomes, errors))
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }
}
