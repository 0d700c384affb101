//! Scriptable analyzer for tests and dry runs.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use super::{AnalyzeError, Analyzer};
use crate::parser::DependencyRecord;

/// An [`Analyzer`] that answers from canned data.
///
/// Unknown locators analyze to a leaf record. Every call is recorded in
/// order so tests can assert which locators were requested.
///
/// # Example
///
/// ```
/// use depgraph::analyzer::{Analyzer, MockAnalyzer};
/// use url::Url;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let analyzer = MockAnalyzer::new()
///     .with_record("https://deno.land/x/foo@1.0.0/mod.ts", ["https://deno.land/std@0.200.0/fs/mod.ts"])
///     .failing("https://deno.land/x/foo@1.0.0/broken.ts");
///
/// let ok = analyzer.analyze(&Url::parse("https://deno.land/x/foo@1.0.0/mod.ts").unwrap()).await;
/// assert_eq!(ok.unwrap().dependencies.len(), 1);
///
/// let err = analyzer.analyze(&Url::parse("https://deno.land/x/foo@1.0.0/broken.ts").unwrap()).await;
/// assert!(err.is_err());
/// assert_eq!(analyzer.calls().len(), 2);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MockAnalyzer {
    records: HashMap<String, DependencyRecord>,
    failures: HashSet<String>,
    latency: Option<Duration>,
    missing: bool,
    calls: Mutex<Vec<String>>,
}

impl MockAnalyzer {
    /// Creates an analyzer that reports every locator as a leaf.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `locator` with the given dependencies.
    pub fn with_record<I, S>(mut self, locator: &str, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.records.insert(
            locator.to_string(),
            DependencyRecord::new(locator, dependencies),
        );
        self
    }

    /// Makes analysis of `locator` fail.
    pub fn failing(mut self, locator: &str) -> Self {
        self.failures.insert(locator.to_string());
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes [`Analyzer::exists`] report the tool as absent.
    pub fn missing(mut self) -> Self {
        self.missing = true;
        self
    }

    /// Returns every locator analyzed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    fn exists(&self) -> bool {
        !self.missing
    }

    async fn analyze(&self, locator: &Url) -> Result<DependencyRecord, AnalyzeError> {
        let key = locator.as_str();
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(key.to_string());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failures.contains(key) {
            return Err(AnalyzeError::Failed {
                program: "mock".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("error: Module not found \"{}\"", key),
            });
        }

        Ok(self
            .records
            .get(key)
            .cloned()
            .unwrap_or_else(|| DependencyRecord::new(key, Vec::<String>::new())))
    }
}
