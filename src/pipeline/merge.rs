//! Fan-in of independent error streams and the log sink that drains them.

use futures_util::stream::{select_all, SelectAll};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

use super::error::{PipelineError, Stage};

/// Merges any number of receivers into one stream.
///
/// Items from one source keep their relative order; interleaving across
/// sources is whatever order they become ready in. The stream ends once
/// every source has closed. Nothing is dropped or filtered.
///
/// # Example
///
/// ```
/// use depgraph::pipeline::merge;
/// use futures_util::StreamExt;
/// use tokio::sync::mpsc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let (a_tx, a_rx) = mpsc::channel(4);
/// let (b_tx, b_rx) = mpsc::channel(4);
/// a_tx.send(1).await.unwrap();
/// b_tx.send(2).await.unwrap();
/// drop((a_tx, b_tx));
///
/// let mut all: Vec<i32> = merge([a_rx, b_rx]).collect().await;
/// all.sort();
/// assert_eq!(all, vec![1, 2]);
/// # });
/// ```
pub fn merge<T, I>(sources: I) -> SelectAll<ReceiverStream<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = mpsc::Receiver<T>>,
{
    select_all(sources.into_iter().map(ReceiverStream::new))
}

/// Error counts per stage, as seen by the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorTally {
    by_stage: BTreeMap<Stage, usize>,
}

impl ErrorTally {
    /// Records one error from `stage`.
    pub fn record(&mut self, stage: Stage) {
        *self.by_stage.entry(stage).or_default() += 1;
    }

    /// Returns the number of errors from `stage`.
    pub fn count(&self, stage: Stage) -> usize {
        self.by_stage.get(&stage).copied().unwrap_or(0)
    }

    /// Returns the number of errors across all stages.
    pub fn total(&self) -> usize {
        self.by_stage.values().sum()
    }

    /// Iterates `(stage, count)` for stages that reported errors.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, usize)> + '_ {
        self.by_stage.iter().map(|(stage, count)| (*stage, *count))
    }
}

/// Logs every error as it arrives and returns the tally once the stream ends.
pub fn spawn_log_sink<S>(mut errors: S) -> JoinHandle<ErrorTally>
where
    S: Stream<Item = PipelineError> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut tally = ErrorTally::default();
        while let Some(err) = errors.next().await {
            let item = err.item.as_deref().unwrap_or("-");
            match err.stage {
                // Expected at crawl scale.
                Stage::Analysis => warn!(stage = %err.stage, item, "error: {}", err.source),
                _ => error!(stage = %err.stage, item, "error: {}", err.source),
            }
            tally.record(err.stage);
        }
        tally
    })
}
