//! The dedup queue between discovery and processing.
//!
//! A producer/consumer pair over a bounded channel. The producer drops
//! packages whose name it has already accepted and rejects malformed ones.
//! With capacity 0 every hand-off is a rendezvous: [`QueueProducer::enqueue`]
//! only returns once the consumer has taken the package.

use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

use super::cancel::Cancellation;
use super::error::{PipelineError, Stage};
use crate::parser::Package;

/// Buffer size of each stage's error channel.
pub(crate) const ERROR_BUFFER: usize = 64;

/// Errors raised at enqueue time.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The package cannot be processed.
    #[error("Malformed package {name:?}: {reason}")]
    Malformed {
        /// Package name as discovered.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The consumer side was dropped.
    #[error("Queue consumer is gone")]
    Closed,
}

/// What happened to an enqueued package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Handed to the consumer (or buffered for it).
    Accepted,
    /// A package with the same name was accepted earlier.
    Duplicate,
}

struct Slot {
    package: Package,
    ack: Option<oneshot::Sender<()>>,
}

/// Creates a dedup queue holding up to `capacity` packages.
///
/// # Arguments
///
/// * `capacity` - Packages buffered ahead of the consumer. `0` makes every
///   hand-off synchronous.
///
/// # Example
///
/// ```
/// use depgraph::parser::Package;
/// use depgraph::pipeline::queue::{dedup_queue, Enqueued};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let (mut producer, mut consumer) = dedup_queue(4);
/// let pkg = Package::new("oak").with_version("1.0.0", ["/mod.ts"]);
///
/// assert_eq!(producer.enqueue(pkg.clone()).await.unwrap(), Enqueued::Accepted);
/// assert_eq!(producer.enqueue(pkg).await.unwrap(), Enqueued::Duplicate);
/// drop(producer);
///
/// assert_eq!(consumer.recv().await.unwrap().name, "oak");
/// assert!(consumer.recv().await.is_none());
/// # });
/// ```
pub fn dedup_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity.clamp(1, Semaphore::MAX_PERMITS));
    (
        QueueProducer {
            tx,
            seen: HashSet::new(),
            rendezvous: capacity == 0,
        },
        QueueConsumer { rx },
    )
}

/// Returns what is wrong with an entry path, if anything.
///
/// Entry paths are absolute and stay inside their version: no `.` or `..`
/// segments (percent-encoded or not), no backslashes, no query, no fragment.
fn entry_path_problem(file: &str) -> Option<&'static str> {
    if !file.starts_with('/') {
        return Some("is not absolute");
    }
    if file.contains(&['?', '#'][..]) {
        return Some("carries a query or fragment");
    }
    if file.contains('\\') {
        return Some("contains a backslash");
    }
    let dot_segment = file.split('/').any(|segment| {
        let segment = segment.to_ascii_lowercase().replace("%2e", ".");
        segment == "." || segment == ".."
    });
    if dot_segment {
        return Some("has a relative segment");
    }
    None
}

/// Checks that a package can be expanded into entry locators.
pub fn validate(package: &Package) -> Result<(), QueueError> {
    let malformed = |reason: String| QueueError::Malformed {
        name: package.name.clone(),
        reason,
    };

    if package.name.trim().is_empty() {
        return Err(malformed("empty name".to_string()));
    }
    if package.versions.is_empty() {
        return Err(malformed("no versions".to_string()));
    }
    for (version, files) in &package.versions {
        if version.trim().is_empty() {
            return Err(malformed("empty version".to_string()));
        }
        if version.contains(&['/', '\\', '?', '#'][..]) {
            return Err(malformed(format!("version {:?} is not a path segment", version)));
        }
        if files.is_empty() {
            return Err(malformed(format!("version {} has no entry files", version)));
        }
        for file in files {
            if let Some(problem) = entry_path_problem(file) {
                return Err(malformed(format!(
                    "entry file {:?} of version {} {}",
                    file, version, problem
                )));
            }
        }
    }
    Ok(())
}

/// Sending half of the dedup queue.
pub struct QueueProducer {
    tx: mpsc::Sender<Slot>,
    seen: HashSet<String>,
    rendezvous: bool,
}

impl QueueProducer {
    /// Offers a package to the consumer.
    ///
    /// Blocks while the buffer is full. In rendezvous mode it also waits
    /// for the consumer to take the package.
    ///
    /// # Returns
    ///
    /// [`Enqueued::Duplicate`] without blocking if the name was seen before,
    /// [`QueueError::Malformed`] for packages that fail [`validate`].
    pub async fn enqueue(&mut self, package: Package) -> Result<Enqueued, QueueError> {
        validate(&package)?;

        if self.seen.contains(&package.name) {
            return Ok(Enqueued::Duplicate);
        }
        let name = package.name.clone();

        let (ack, taken) = if self.rendezvous {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.tx
            .send(Slot { package, ack })
            .await
            .map_err(|_| QueueError::Closed)?;
        self.seen.insert(name);

        if let Some(taken) = taken {
            taken.await.map_err(|_| QueueError::Closed)?;
        }
        Ok(Enqueued::Accepted)
    }

    /// Returns the number of distinct packages accepted.
    pub fn accepted(&self) -> usize {
        self.seen.len()
    }
}

/// Receiving half of the dedup queue.
pub struct QueueConsumer {
    rx: mpsc::Receiver<Slot>,
}

impl QueueConsumer {
    /// Takes the next package, releasing a producer waiting on it.
    ///
    /// Returns `None` once the producer is dropped and the buffer drained.
    pub async fn recv(&mut self) -> Option<Package> {
        let slot = self.rx.recv().await?;
        if let Some(ack) = slot.ack {
            let _ = ack.send(());
        }
        Some(slot.package)
    }
}

/// Spawns the enqueue stage: feeds discovered packages into the queue.
///
/// Stops at the end of input, when the consumer goes away, or on
/// cancellation. Dropping the producer on exit closes the queue.
///
/// # Returns
///
/// The stage's error stream.
pub fn spawn_enqueue(
    mut discovered: mpsc::Receiver<Package>,
    mut producer: QueueProducer,
    cancel: Cancellation,
) -> mpsc::Receiver<PipelineError> {
    let (errors, error_rx) = mpsc::channel(ERROR_BUFFER);

    tokio::spawn(async move {
        loop {
            let package = tokio::select! {
                _ = cancel.cancelled() => break,
                next = discovered.recv() => match next {
                    Some(package) => package,
                    None => break,
                },
            };

            let name = package.name.clone();
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = producer.enqueue(package) => result,
            };

            match result {
                Ok(Enqueued::Accepted) => debug!(package = %name, "Enqueued package"),
                Ok(Enqueued::Duplicate) => debug!(package = %name, "Duplicate package, skipping"),
                Err(QueueError::Closed) => {
                    warn!(package = %name, "Queue consumer closed, stopping intake");
                    break;
                }
                Err(err) => {
                    let err = PipelineError::new(Stage::Enqueue, err).for_item(name);
                    if errors.send(err).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(accepted = producer.accepted(), "Enqueue stage finished");
    });

    error_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn pkg(name: &str) -> Package {
        Package::new(name).with_version("1.0.0", ["/mod.ts"])
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(validate(&pkg("oak")).is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let cases = vec![
            Package::new("").with_version("1.0.0", ["/mod.ts"]),
            Package::new("bare"),
            Package::new("empty").with_version("1.0.0", Vec::<String>::new()),
            Package::new("relative").with_version("1.0.0", ["mod.ts"]),
            Package::new("parent").with_version("1.0.0", ["/../../std@1.0.0/mod.ts"]),
            Package::new("current").with_version("1.0.0", ["/./mod.ts"]),
            Package::new("encoded").with_version("1.0.0", ["/%2E%2e/mod.ts"]),
            Package::new("backslash").with_version("1.0.0", ["/..\\mod.ts"]),
            Package::new("fragment").with_version("1.0.0", ["/mod.ts#frag"]),
            Package::new("query").with_version("1.0.0", ["/mod.ts?v=2"]),
            Package::new("slashed").with_version("1.0.0/../..", ["/mod.ts"]),
        ];
        for package in cases {
            let err = validate(&package).unwrap_err();
            assert!(matches!(err, QueueError::Malformed { .. }), "{}", package.name);
        }
    }

    #[tokio::test]
    async fn test_oversized_capacity_is_clamped() {
        let (mut producer, mut consumer) = dedup_queue(usize::MAX);
        producer.enqueue(pkg("a")).await.unwrap();
        assert_eq!(consumer.recv().await.unwrap().name, "a");
    }

    #[test]
    fn test_validate_accepts_dotted_names() {
        let package = Package::new("foo")
            .with_version("1.0.0", ["/mod.ts", "/.well-known/x.ts", "/a..b/c.ts", "/lib//d.ts"]);
        assert!(validate(&package).is_ok());
    }

    #[tokio::test]
    async fn test_duplicates_delivered_once() {
        let (mut producer, mut consumer) = dedup_queue(8);
        for name in ["a", "b", "a", "c", "b"] {
            producer.enqueue(pkg(name)).await.unwrap();
        }
        drop(producer);

        let mut names = Vec::new();
        while let Some(package) = consumer.recv().await {
            names.push(package.name);
        }
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_rendezvous_blocks_until_taken() {
        let (mut producer, mut consumer) = dedup_queue(0);
        let returned = Arc::new(AtomicBool::new(false));

        let flag = returned.clone();
        let handle = tokio::spawn(async move {
            producer.enqueue(pkg("slow")).await.unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!returned.load(Ordering::SeqCst), "producer returned before the consumer took the item");

        let package = consumer.recv().await.unwrap();
        assert_eq!(package.name, "slow");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(returned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_buffered_does_not_wait_for_consumer() {
        let (mut producer, _consumer) = dedup_queue(2);
        tokio::time::timeout(Duration::from_millis(100), async {
            producer.enqueue(pkg("a")).await.unwrap();
            producer.enqueue(pkg("b")).await.unwrap();
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_closed_consumer() {
        let (mut producer, consumer) = dedup_queue(1);
        drop(consumer);
        let err = producer.enqueue(pkg("a")).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }

    #[tokio::test]
    async fn test_enqueue_stage_reports_malformed_and_keeps_going() {
        let (tx, rx) = mpsc::channel(8);
        let (producer, mut consumer) = dedup_queue(8);
        let mut errors = spawn_enqueue(rx, producer, Cancellation::new());

        tx.send(pkg("good")).await.unwrap();
        tx.send(Package::new("bad")).await.unwrap();
        tx.send(pkg("also-good")).await.unwrap();
        drop(tx);

        assert_eq!(consumer.recv().await.unwrap().name, "good");
        assert_eq!(consumer.recv().await.unwrap().name, "also-good");
        assert!(consumer.recv().await.is_none());

        let err = errors.recv().await.unwrap();
        assert_eq!(err.stage, Stage::Enqueue);
        assert_eq!(err.item.as_deref(), Some("bad"));
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_stage_stops_on_cancel() {
        let (tx, rx) = mpsc::channel(8);
        let (producer, mut consumer) = dedup_queue(0);
        let cancel = Cancellation::new();
        let mut errors = spawn_enqueue(rx, producer, cancel.clone());

        tx.send(pkg("never-taken")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), errors.recv())
            .await
            .unwrap();
        // Producer dropped: the buffered slot is still readable, then the queue closes.
        while consumer.recv().await.is_some() {}
    }
}
