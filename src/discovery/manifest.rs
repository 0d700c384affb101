//! Discovery from a JSON manifest file.

use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{discovery_error, Discovered, Discovery, DiscoveryError, DISCOVERY_BUFFER};
use crate::parser::Package;
use crate::pipeline::PipelineError;

/// Reads packages from a JSON array such as
/// `[{"name": "oak", "versions": {"12.0.0": ["/mod.ts"]}}]`.
///
/// An entry that does not decode as a package is reported on the error
/// stream and the remaining entries are still emitted. A file that cannot
/// be read, or is not a JSON array, yields a single error and no packages.
#[derive(Debug, Clone)]
pub struct ManifestDiscovery {
    path: PathBuf,
}

impl ManifestDiscovery {
    /// Creates a discovery over the manifest at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the manifest path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decodes a manifest, splitting good entries from bad ones.
fn decode(path: &Path, bytes: &[u8]) -> Result<Vec<Result<Package, DiscoveryError>>, DiscoveryError> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(bytes).map_err(|source| DiscoveryError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value(value).map_err(|source| DiscoveryError::Entry { index, source })
        })
        .collect())
}

async fn report(errors: &mpsc::Sender<PipelineError>, err: DiscoveryError) -> bool {
    errors.send(discovery_error(err)).await.is_ok()
}

impl Discovery for ManifestDiscovery {
    fn discover(self) -> Discovered {
        let (package_tx, packages) = mpsc::channel(DISCOVERY_BUFFER);
        let (error_tx, errors) = mpsc::channel(DISCOVERY_BUFFER);

        tokio::spawn(async move {
            let bytes = match tokio::fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(source) => {
                    let path = self.path.clone();
                    report(&error_tx, DiscoveryError::Io { path, source }).await;
                    return;
                }
            };

            let entries = match decode(&self.path, &bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    report(&error_tx, err).await;
                    return;
                }
            };
            info!(path = %self.path.display(), entries = entries.len(), "Read package manifest");

            for entry in entries {
                let delivered = match entry {
                    Ok(package) => {
                        debug!(package = %package, "Discovered package");
                        package_tx.send(package).await.is_ok()
                    }
                    Err(err) => report(&error_tx, err).await,
                };
                if !delivered {
                    break;
                }
            }
        });

        Discovered { packages, errors }
    }
}
