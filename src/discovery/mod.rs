//! Package discovery.
//!
//! A [`Discovery`] produces the stream of packages the pipeline ingests,
//! alongside a separate error stream. Sources are finite and single-pass.
//!
//! - [`ManifestDiscovery`] reads a JSON manifest of packages.
//! - [`MirrorDiscovery`] walks a local registry mirror.
//! - [`StaticDiscovery`] replays an in-memory list.

pub mod manifest;
pub mod mirror;

use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::parser::Package;
use crate::pipeline::{PipelineError, Stage};

pub use manifest::ManifestDiscovery;
pub use mirror::MirrorDiscovery;

/// Buffer size of the discovered-package channel.
pub const DISCOVERY_BUFFER: usize = 16;

/// Errors raised while discovering packages.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid package entry #{index}: {source}")]
    Entry {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to walk mirror: {0}")]
    Walk(#[from] walkdir::Error),
}

/// The two output streams of a discovery run.
pub struct Discovered {
    /// Discovered packages, in discovery order.
    pub packages: mpsc::Receiver<Package>,
    /// Failures, tagged with [`Stage::Discovery`].
    pub errors: mpsc::Receiver<PipelineError>,
}

/// A source of packages.
pub trait Discovery {
    /// Starts discovery in the background and returns its streams.
    ///
    /// Must be called inside a Tokio runtime. Both streams close when
    /// discovery is finished.
    fn discover(self) -> Discovered;
}

pub(crate) fn discovery_error(err: DiscoveryError) -> PipelineError {
    PipelineError::new(Stage::Discovery, err)
}

/// Discovery over a fixed list of packages and errors.
///
/// # Example
///
/// ```
/// use depgraph::discovery::{Discovery, StaticDiscovery};
/// use depgraph::parser::Package;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let discovery = StaticDiscovery::new(vec![Package::new("oak").with_version("1.0.0", ["/mod.ts"])]);
/// let mut discovered = discovery.discover();
/// assert_eq!(discovered.packages.recv().await.unwrap().name, "oak");
/// assert!(discovered.packages.recv().await.is_none());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    packages: Vec<Package>,
    errors: Vec<DiscoveryError>,
}

impl StaticDiscovery {
    /// Creates a discovery that emits `packages` in order.
    pub fn new(packages: Vec<Package>) -> Self {
        Self {
            packages,
            errors: Vec::new(),
        }
    }

    /// Also emits `errors` on the error stream.
    pub fn with_errors(mut self, errors: Vec<DiscoveryError>) -> Self {
        self.errors = errors;
        self
    }
}

impl Discovery for StaticDiscovery {
    fn discover(self) -> Discovered {
        let (package_tx, packages) = mpsc::channel(DISCOVERY_BUFFER);
        let (error_tx, errors) = mpsc::channel(DISCOVERY_BUFFER);

        let StaticDiscovery {
            packages: list,
            errors: failures,
        } = self;

        // Independent tasks: a stalled package consumer must not hold back errors.
        tokio::spawn(async move {
            for package in list {
                if package_tx.send(package).await.is_err() {
                    break;
                }
            }
        });
        tokio::spawn(async move {
            for err in failures {
                if error_tx.send(discovery_error(err)).await.is_err() {
                    break;
                }
            }
        });

        Discovered { packages, errors }
    }
}
