//! `deno info --json` as a subprocess.

use async_trait::async_trait;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use super::{AnalyzeError, Analyzer};
use crate::parser::{parse_record, DependencyRecord};

/// Program name looked up on `PATH` by default.
pub const DEFAULT_PROGRAM: &str = "deno";

/// Default wall-clock limit for one analysis.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest stderr excerpt kept in an error.
const MAX_STDERR_CHARS: usize = 500;

/// Runs `<program> [leading args] info --json <locator>`.
///
/// The child is killed if the call times out or its future is dropped, so
/// cancelling a pipeline run never leaves analyzer processes behind.
#[derive(Debug, Clone)]
pub struct DenoAnalyzer {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl Default for DenoAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl DenoAnalyzer {
    /// Creates an analyzer for `program` with the default timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets arguments passed before `info --json`.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the configured program.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Resolves the program to an executable file, searching `PATH` for
    /// bare names.
    pub fn resolve_program(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 || self.program.is_absolute() {
            return is_executable(&self.program).then(|| self.program.clone());
        }

        let paths = env::var_os("PATH")?;
        env::split_paths(&paths)
            .flat_map(|dir| candidates(&dir, &self.program))
            .find(|candidate| is_executable(candidate))
    }
}

fn candidates(dir: &Path, program: &Path) -> Vec<PathBuf> {
    let plain = dir.join(program);
    if cfg!(windows) {
        vec![plain.with_extension("exe"), plain]
    } else {
        vec![plain]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(MAX_STDERR_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl Analyzer for DenoAnalyzer {
    fn exists(&self) -> bool {
        self.resolve_program().is_some()
    }

    async fn analyze(&self, locator: &Url) -> Result<DependencyRecord, AnalyzeError> {
        let program = self.program.display().to_string();
        debug!(program = %program, locator = %locator, "Running analyzer");

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(["info", "--json"])
            .arg(locator.as_str())
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| AnalyzeError::Spawn {
                program: program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(AnalyzeError::Timeout {
                    locator: locator.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(AnalyzeError::Failed {
                program,
                status: output.status.to_string(),
                stderr: excerpt(&output.stderr),
            });
        }

        Ok(parse_record(&output.stdout)?)
    }
}
