//! Shared types for dependency extraction.
//!
//! This module defines the values that flow between discovery, analysis,
//! and persistence: the discovered [`Package`] and the per-file
//! [`DependencyRecord`] produced by the external analyzer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named unit discovered from the module registry.
///
/// Owns a mapping from version identifier to the ordered list of entry-file
/// paths for that version. Entry paths are absolute within the version
/// (`"/mod.ts"`). Versions iterate in lexical order, entry files in the order
/// they were discovered.
///
/// # Example
///
/// ```
/// use depgraph::parser::Package;
///
/// let pkg = Package::new("foo").with_version("1.0.0", ["/mod.ts", "/deps.ts"]);
/// assert_eq!(pkg.entry_count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Registry name of the package (e.g. "std", "oak").
    pub name: String,

    /// Version identifier to entry-file paths.
    #[serde(default)]
    pub versions: BTreeMap<String, Vec<String>>,
}

impl Package {
    /// Creates a package with no versions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: BTreeMap::new(),
        }
    }

    /// Adds a version and its entry files, returning the package.
    pub fn with_version<I, S>(mut self, version: impl Into<String>, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions
            .insert(version.into(), files.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the total number of entry files across all versions.
    pub fn entry_count(&self) -> usize {
        self.versions.values().map(Vec::len).sum()
    }

    /// Iterates `(version, entry_file)` pairs in processing order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.versions.iter().flat_map(|(version, files)| {
            files
                .iter()
                .map(move |file| (version.as_str(), file.as_str()))
        })
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} versions)", self.name, self.versions.len())
    }
}

/// The result of analyzing one entry file.
///
/// Holds the resolved locator that was analyzed and its direct
/// dependencies, each a fully resolved locator. Transient: the persistence
/// stage decomposes it into graph nodes and edges.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyRecord {
    /// The resolved locator of the analyzed module.
    pub locator: String,

    /// Direct dependencies, de-duplicated, in first-seen order.
    pub dependencies: Vec<String>,
}

impl DependencyRecord {
    /// Creates a new record.
    pub fn new<I, S>(locator: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            locator: locator.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the module has no dependencies.
    pub fn is_leaf(&self) -> bool {
        self.dependencies.is_empty()
    }
}
