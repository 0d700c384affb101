//! Durable backend: an append-only JSON-lines log.
//!
//! Every accepted write is appended to the log before it becomes visible,
//! and the log is replayed into an in-memory [`NodeGraph`] when the schema
//! is initialised. Nothing is ever rewritten or deleted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::backend::{Backend, BackendError, PutError, StoreCounts};
use super::memory::NodeGraph;
use super::node::{GraphEdge, GraphNode};

/// One line of the store log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum LogRecord {
    Node(GraphNode),
    Edge(GraphEdge),
}

/// How the log ended when it was replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    /// Empty, or ends with a newline.
    Clean,
    /// The last record decoded but has no newline.
    Unterminated,
    /// The last record is a torn write starting at this byte offset.
    Torn(u64),
}

struct FileState {
    graph: NodeGraph,
    log: File,
}

/// A [`Backend`] persisted to a single log file.
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<Option<FileState>>,
}

impl FileBackend {
    /// Creates a backend for `path`. Nothing is touched until
    /// [`Backend::init_schema`] runs.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    /// Returns the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replays the log into a graph.
    ///
    /// A final record with no trailing newline that fails to decode is a
    /// torn write, reported through [`Tail::Torn`] so the caller can cut it
    /// off. Any other undecodable line is [`BackendError::Corrupt`].
    async fn replay(&self) -> Result<(NodeGraph, Tail), BackendError> {
        let mut graph = NodeGraph::default();
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((graph, Tail::Clean)),
            Err(e) => return Err(e.into()),
        };

        let mut offset = 0usize;
        for (i, raw) in content.split_inclusive(|b| *b == b'\n').enumerate() {
            let start = offset;
            offset += raw.len();
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record: LogRecord = match serde_json::from_slice(raw) {
                Ok(record) => record,
                Err(source) if !raw.ends_with(b"\n") => {
                    warn!(line = i + 1, error = %source, "Discarding torn final store record");
                    return Ok((graph, Tail::Torn(start as u64)));
                }
                Err(source) => return Err(BackendError::Corrupt { line: i + 1, source }),
            };
            let result = match record {
                LogRecord::Node(node) => graph.insert_node(node),
                LogRecord::Edge(edge) => graph.insert_edge(&edge),
            };
            if let Err(e) = result {
                warn!(line = i + 1, error = %e, "Skipping inconsistent store record");
            }
        }

        let tail = match content.last() {
            Some(b'\n') | None => Tail::Clean,
            Some(_) => Tail::Unterminated,
        };
        Ok((graph, tail))
    }

    /// Appends one record. A failed write is cut back off the log so the
    /// next append starts on a fresh line.
    async fn append(log: &mut File, record: &LogRecord) -> Result<(), BackendError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let len = log.metadata().await?.len();
        if let Err(err) = Self::write_line(log, &line).await {
            if let Err(rollback) = log.set_len(len).await {
                warn!(error = %rollback, "Failed to roll back partial store write");
            }
            return Err(err.into());
        }
        Ok(())
    }

    async fn write_line(log: &mut File, line: &[u8]) -> std::io::Result<()> {
        log.write_all(line).await?;
        log.flush().await
    }
}

fn not_initialised() -> BackendError {
    BackendError::Unavailable("schema not initialised".to_string())
}

#[async_trait]
impl Backend for FileBackend {
    async fn init_schema(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let (graph, tail) = self.replay().await?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        match tail {
            Tail::Clean => {}
            Tail::Unterminated => Self::write_line(&mut log, b"\n").await?,
            Tail::Torn(len) => log.set_len(len).await?,
        }

        let counts = graph.counts();
        info!(
            path = %self.path.display(),
            nodes = counts.nodes,
            edges = counts.edges,
            "Opened graph store"
        );
        *state = Some(FileState { graph, log });
        Ok(())
    }

    async fn put_if_absent(&self, node: GraphNode) -> Result<(), PutError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(not_initialised)?;

        if state.graph.contains(&node.specifier) {
            return Err(PutError::ConditionFailed(node.specifier));
        }

        let record = LogRecord::Node(node);
        Self::append(&mut state.log, &record).await?;
        if let LogRecord::Node(node) = record {
            debug!(specifier = %node.specifier, "Appended node");
            state.graph.insert_node(node)?;
        }
        Ok(())
    }

    async fn put_edge_if_absent(&self, edge: GraphEdge) -> Result<(), PutError> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(not_initialised)?;

        state.graph.check_edge(&edge)?;
        let record = LogRecord::Edge(edge);
        Self::append(&mut state.log, &record).await?;
        if let LogRecord::Edge(edge) = record {
            state.graph.insert_edge(&edge)?;
        }
        Ok(())
    }

    async fn query_by_specifier(&self, specifier: &str) -> Result<Vec<GraphNode>, BackendError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or_else(not_initialised)?;
        Ok(state.graph.query(specifier))
    }

    async fn counts(&self) -> Result<StoreCounts, BackendError> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or_else(not_initialised)?;
        Ok(state.graph.counts())
    }
}
