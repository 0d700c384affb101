//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then `DEPGRAPH_*` environment
//! variables, then command-line flags (applied by the binary).
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DEPGRAPH_REGISTRY_SCHEME` | `scheme` |
//! | `DEPGRAPH_REGISTRY_HOST` | `host` |
//! | `DEPGRAPH_STD_NAME` | `std_name` |
//! | `DEPGRAPH_THIRD_PARTY_PREFIX` | `third_party_prefix` |
//! | `DEPGRAPH_QUEUE_CAPACITY` | `queue_capacity` |
//! | `DEPGRAPH_MAX_CONCURRENT_PACKAGES` | `max_concurrent_packages` |
//! | `DEPGRAPH_ANALYZER` | `analyzer_program` |
//! | `DEPGRAPH_ANALYZER_TIMEOUT` | `analyzer_timeout_secs` |
//! | `DEPGRAPH_STORE` | `store_path` |
//! | `DEPGRAPH_ENTRY_NAMES` | `entry_names` (comma separated) |
//! | `DEPGRAPH_UNRESOLVED` | `unresolved` |
//! | `DEPGRAPH_LOG_LEVEL` | `log_level` |
//! | `DEPGRAPH_LOG_JSON` | `log_json` |
//! | `DEPGRAPH_METRICS_ADDR` | `metrics_addr` |

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::analyzer::deno::{DEFAULT_PROGRAM, DEFAULT_TIMEOUT};
use crate::analyzer::DenoAnalyzer;
use crate::discovery::mirror::DEFAULT_ENTRY_NAMES;
use crate::logging::parse_level;
use crate::pipeline::orchestrator::{DEFAULT_MAX_CONCURRENT_PACKAGES, DEFAULT_QUEUE_CAPACITY};
use crate::pipeline::{PipelineOptions, UnresolvedPolicy};
use crate::registry::{
    RegistryLayout, DEFAULT_HOST, DEFAULT_SCHEME, DEFAULT_STD_NAME, DEFAULT_THIRD_PARTY_PREFIX,
};

/// Upper bound for `queue_capacity` and `max_concurrent_packages`.
pub const MAX_PARALLELISM: usize = 4096;

const DEFAULT_STORE_PATH: &str = "depgraph.jsonl";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub scheme: String,
    pub host: String,
    pub std_name: String,
    pub third_party_prefix: String,
    pub queue_capacity: usize,
    pub max_concurrent_packages: usize,
    pub analyzer_program: PathBuf,
    pub analyzer_timeout_secs: u64,
    pub store_path: PathBuf,
    pub entry_names: Vec<String>,
    pub unresolved: UnresolvedPolicy,
    pub log_level: String,
    pub log_json: bool,
    /// Address of the Prometheus endpoint; `None` disables it.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: DEFAULT_HOST.to_string(),
            std_name: DEFAULT_STD_NAME.to_string(),
            third_party_prefix: DEFAULT_THIRD_PARTY_PREFIX.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_concurrent_packages: DEFAULT_MAX_CONCURRENT_PACKAGES,
            analyzer_program: PathBuf::from(DEFAULT_PROGRAM),
            analyzer_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            entry_names: DEFAULT_ENTRY_NAMES.iter().map(|s| s.to_string()).collect(),
            unresolved: UnresolvedPolicy::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            metrics_addr: None,
        }
    }
}

fn parsed<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
        field: field.to_string(),
        error: e.to_string(),
    })
}

impl Config {
    /// Builds a configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from defaults overlaid with the variables
    /// `lookup` returns.
    ///
    /// # Example
    ///
    /// ```
    /// use depgraph::config::Config;
    ///
    /// let config = Config::from_lookup(|key| match key {
    ///     "DEPGRAPH_REGISTRY_HOST" => Some("registry.example".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    /// assert_eq!(config.host, "registry.example");
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("DEPGRAPH_REGISTRY_SCHEME") {
            config.scheme = v;
        }
        if let Some(v) = lookup("DEPGRAPH_REGISTRY_HOST") {
            config.host = v;
        }
        if let Some(v) = lookup("DEPGRAPH_STD_NAME") {
            config.std_name = v;
        }
        if let Some(v) = lookup("DEPGRAPH_THIRD_PARTY_PREFIX") {
            config.third_party_prefix = v;
        }
        if let Some(v) = lookup("DEPGRAPH_QUEUE_CAPACITY") {
            config.queue_capacity = parsed("DEPGRAPH_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("DEPGRAPH_MAX_CONCURRENT_PACKAGES") {
            config.max_concurrent_packages = parsed("DEPGRAPH_MAX_CONCURRENT_PACKAGES", &v)?;
        }
        if let Some(v) = lookup("DEPGRAPH_ANALYZER") {
            config.analyzer_program = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEPGRAPH_ANALYZER_TIMEOUT") {
            config.analyzer_timeout_secs = parsed("DEPGRAPH_ANALYZER_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("DEPGRAPH_STORE") {
            config.store_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEPGRAPH_ENTRY_NAMES") {
            config.entry_names = v
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("DEPGRAPH_UNRESOLVED") {
            config.unresolved = parsed("DEPGRAPH_UNRESOLVED", &v)?;
        }
        if let Some(v) = lookup("DEPGRAPH_LOG_LEVEL") {
            config.log_level = v.to_lowercase();
        }
        if let Some(v) = lookup("DEPGRAPH_LOG_JSON") {
            config.log_json = parsed("DEPGRAPH_LOG_JSON", &v)?;
        }
        if let Some(v) = lookup("DEPGRAPH_METRICS_ADDR") {
            config.metrics_addr = Some(parsed("DEPGRAPH_METRICS_ADDR", &v)?);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Registry host must not be empty".to_string(),
            ));
        }
        if let Err(err) = self.layout().locator(&self.std_name, "0.0.0", "/mod.ts") {
            return Err(ConfigError::ValidationFailed(format!(
                "Registry {}://{} does not form valid locators: {}",
                self.scheme, self.host, err
            )));
        }
        if self.max_concurrent_packages == 0 {
            return Err(ConfigError::ValidationFailed(
                "Max concurrent packages must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_packages > MAX_PARALLELISM {
            return Err(ConfigError::ValidationFailed(format!(
                "Max concurrent packages must be at most {}",
                MAX_PARALLELISM
            )));
        }
        if self.queue_capacity > MAX_PARALLELISM {
            return Err(ConfigError::ValidationFailed(format!(
                "Queue capacity must be at most {}",
                MAX_PARALLELISM
            )));
        }
        if self.analyzer_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Analyzer timeout must be at least 1 second".to_string(),
            ));
        }
        if self.entry_names.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "At least one entry file name is required".to_string(),
            ));
        }
        if parse_level(&self.log_level).is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    /// The registry naming convention this configuration describes.
    pub fn layout(&self) -> RegistryLayout {
        RegistryLayout {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            std_name: self.std_name.clone(),
            third_party_prefix: self.third_party_prefix.clone(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            queue_capacity: self.queue_capacity,
            max_concurrent_packages: self.max_concurrent_packages,
            unresolved: self.unresolved,
        }
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }

    pub fn analyzer(&self) -> DenoAnalyzer {
        DenoAnalyzer::new(&self.analyzer_program).with_timeout(self.analyzer_timeout())
    }
}
