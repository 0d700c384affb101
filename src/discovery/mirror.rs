//! Discovery by walking a local registry mirror.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{discovery_error, Discovered, Discovery, DiscoveryError, DISCOVERY_BUFFER};
use crate::parser::Package;

/// File names treated as entry files by default.
pub const DEFAULT_ENTRY_NAMES: &[&str] = &["mod.ts", "mod.js", "main.ts", "index.ts", "index.js"];

/// Walks `<root>/<name>/<version>/...` and reports entry files.
///
/// A file is an entry file when its name is in the configured list.
/// Packages and versions are visited in name order, entry files in path
/// order. Versions without entry files are left out, as are packages left
/// with no versions.
#[derive(Debug, Clone)]
pub struct MirrorDiscovery {
    root: PathBuf,
    entry_names: Vec<String>,
}

impl MirrorDiscovery {
    /// Creates a discovery rooted at `root` with the default entry names.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entry_names: DEFAULT_ENTRY_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replaces the entry-name list.
    pub fn with_entry_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_names = names.into_iter().map(Into::into).collect();
        self
    }

    fn is_entry(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| self.entry_names.iter().any(|entry| entry == name))
            .unwrap_or(false)
    }

    /// Lists the subdirectories of `dir`, sorted by name.
    fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, DiscoveryError> {
        let io_err = |source: std::io::Error| DiscoveryError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if !entry.file_type().map_err(io_err)?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                dirs.push((name.to_string(), entry.path()));
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Collects the entry files of one version directory as `/a/b.ts` paths.
    fn entry_files(
        &self,
        version_dir: &Path,
        errors: &mut Vec<DiscoveryError>,
    ) -> Vec<String> {
        let mut files = Vec::new();
        for entry in WalkDir::new(version_dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    errors.push(err.into());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_entry(entry.path()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(version_dir) {
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(format!("/{}", parts.join("/")));
            }
        }
        files.sort();
        files
    }

    /// Scans one package directory.
    fn scan_package(
        &self,
        name: String,
        dir: &Path,
        errors: &mut Vec<DiscoveryError>,
    ) -> Result<Option<Package>, DiscoveryError> {
        let mut versions = BTreeMap::new();
        for (version, version_dir) in Self::subdirs(dir)? {
            let files = self.entry_files(&version_dir, errors);
            if files.is_empty() {
                debug!(package = %name, version = %version, "No entry files, skipping version");
                continue;
            }
            versions.insert(version, files);
        }
        if versions.is_empty() {
            debug!(package = %name, "No versions with entry files, skipping package");
            return Ok(None);
        }
        Ok(Some(Package { name, versions }))
    }

    /// Walks the mirror on the current thread, sending as it goes.
    fn walk(
        &self,
        packages: &mpsc::Sender<Package>,
        errors: &mpsc::Sender<crate::pipeline::PipelineError>,
    ) {
        let report = |err: DiscoveryError| errors.blocking_send(discovery_error(err)).is_ok();

        let names = match Self::subdirs(&self.root) {
            Ok(names) => names,
            Err(err) => {
                report(err);
                return;
            }
        };
        info!(root = %self.root.display(), packages = names.len(), "Walking registry mirror");

        for (name, dir) in names {
            let mut walk_errors = Vec::new();
            let scanned = self.scan_package(name, &dir, &mut walk_errors);
            for err in walk_errors {
                if !report(err) {
                    return;
                }
            }
            match scanned {
                Ok(Some(package)) => {
                    if packages.blocking_send(package).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    if !report(err) {
                        return;
                    }
                }
            }
        }
    }
}

impl Discovery for MirrorDiscovery {
    fn discover(self) -> Discovered {
        let (package_tx, packages) = mpsc::channel(DISCOVERY_BUFFER);
        let (error_tx, errors) = mpsc::channel(DISCOVERY_BUFFER);

        tokio::task::spawn_blocking(move || self.walk(&package_tx, &error_tx));

        Discovered { packages, errors }
    }
}
