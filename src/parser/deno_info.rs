//! Parser for `deno info --json` output.
//!
//! This module turns the module graph printed by the analyzer into a
//! [`DependencyRecord`]: the redirect-resolved root and its direct
//! dependencies. Both the current output shape (`roots`, dependency objects
//! with `code`/`type` resolutions) and the legacy one (`root`, plain string
//! dependencies) are accepted.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use super::types::DependencyRecord;

/// Upper bound on redirect hops followed for a single specifier.
const MAX_REDIRECTS: usize = 10;

/// Errors that can occur while parsing analyzer output.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The output is not valid JSON or does not match the expected shape.
    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The output names no root module.
    #[error("Analyzer output has no root module")]
    NoRoot,

    /// The root module is absent from the module list.
    #[error("Root module {0} missing from analyzer output")]
    MissingRoot(String),

    /// The analyzer could not load the root module.
    #[error("Module {specifier} failed to load: {message}")]
    ModuleError {
        /// Specifier of the failing module.
        specifier: String,
        /// Message reported by the analyzer.
        message: String,
    },
}

/// Result type alias for parser operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// The module graph printed by `deno info --json`.
///
/// Only the fields needed to build a [`DependencyRecord`] are captured;
/// everything else in the output is ignored.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DenoInfo {
    /// Root specifiers (current output shape).
    #[serde(default)]
    pub roots: Vec<String>,

    /// Root specifier (legacy output shape).
    #[serde(default)]
    pub root: Option<String>,

    /// Every module in the graph.
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,

    /// Requested specifier to redirect target.
    #[serde(default)]
    pub redirects: HashMap<String, String>,
}

/// One module of the analyzed graph.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleEntry {
    /// Fully resolved specifier of the module.
    pub specifier: String,

    /// Direct dependencies of the module.
    #[serde(default)]
    pub dependencies: Vec<ModuleDependency>,

    /// Load error, if the module could not be fetched or parsed.
    #[serde(default)]
    pub error: Option<String>,
}

/// A dependency entry, in either output shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ModuleDependency {
    /// Legacy shape: the resolved specifier itself.
    Resolved(String),

    /// Current shape: the import as written plus its resolutions.
    Detailed {
        /// The specifier as written in the import statement.
        specifier: String,
        /// Resolution of the runtime import.
        #[serde(default)]
        code: Option<Resolution>,
        /// Resolution of the type-only import.
        #[serde(default, rename = "type")]
        types: Option<Resolution>,
    },
}

/// How one import was resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct Resolution {
    /// The resolved specifier, absent when resolution failed.
    #[serde(default)]
    pub specifier: Option<String>,
}

impl ModuleDependency {
    /// Returns every resolved locator for this dependency.
    pub fn resolved(&self) -> Vec<&str> {
        match self {
            ModuleDependency::Resolved(specifier) => vec![specifier.as_str()],
            ModuleDependency::Detailed { code, types, .. } => [code, types]
                .into_iter()
                .flatten()
                .filter_map(|r| r.specifier.as_deref())
                .collect(),
        }
    }
}

impl DenoInfo {
    /// Returns the root specifier with redirects applied.
    pub fn resolved_root(&self) -> ParseResult<String> {
        let root = self
            .roots
            .first()
            .or(self.root.as_ref())
            .ok_or(ParseError::NoRoot)?;
        Ok(self.follow_redirects(root))
    }

    /// Follows the redirect chain for `specifier`.
    pub fn follow_redirects(&self, specifier: &str) -> String {
        let mut current = specifier;
        for _ in 0..MAX_REDIRECTS {
            match self.redirects.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current.to_string()
    }

    /// Finds a module by its resolved specifier.
    pub fn module(&self, specifier: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.specifier == specifier)
    }
}

/// Parses analyzer output from a string.
///
/// # Example
///
/// ```
/// use depgraph::parser::deno_info::parse_str;
///
/// let json = r#"{"roots": ["https://deno.land/x/foo@1.0.0/mod.ts"], "modules": []}"#;
/// let info = parse_str(json).unwrap();
/// assert_eq!(info.roots.len(), 1);
/// ```
pub fn parse_str(content: &str) -> ParseResult<DenoInfo> {
    let info: DenoInfo = serde_json::from_str(content)?;
    Ok(info)
}

/// Parses analyzer output from raw process stdout.
pub fn parse_slice(content: &[u8]) -> ParseResult<DenoInfo> {
    let info: DenoInfo = serde_json::from_slice(content)?;
    Ok(info)
}

/// Builds the [`DependencyRecord`] for the root of an analyzed graph.
///
/// Dependencies are the root module's direct imports, redirect-resolved,
/// de-duplicated, in first-seen order. Imports that failed to resolve are
/// left out.
///
/// # Example
///
/// ```
/// use depgraph::parser::deno_info::{parse_str, to_record};
///
/// let json = r#"{
///     "roots": ["https://deno.land/x/foo@1.0.0/mod.ts"],
///     "modules": [{
///         "specifier": "https://deno.land/x/foo@1.0.0/mod.ts",
///         "dependencies": [
///             {"specifier": "./dep.ts", "code": {"specifier": "https://deno.land/x/foo@1.0.0/dep.ts"}}
///         ]
///     }]
/// }"#;
///
/// let record = to_record(&parse_str(json).unwrap()).unwrap();
/// assert_eq!(record.dependencies, vec!["https://deno.land/x/foo@1.0.0/dep.ts"]);
/// ```
pub fn to_record(info: &DenoInfo) -> ParseResult<DependencyRecord> {
    let root = info.resolved_root()?;
    let module = info
        .module(&root)
        .ok_or_else(|| ParseError::MissingRoot(root.clone()))?;

    if let Some(message) = &module.error {
        return Err(ParseError::ModuleError {
            specifier: root,
            message: message.clone(),
        });
    }

    let mut seen = HashSet::new();
    let mut dependencies = Vec::new();
    for dependency in &module.dependencies {
        for resolved in dependency.resolved() {
            let target = info.follow_redirects(resolved);
            if seen.insert(target.clone()) {
                dependencies.push(target);
            }
        }
    }

    Ok(DependencyRecord {
        locator: root,
        dependencies,
    })
}

/// Parses raw analyzer stdout straight into a [`DependencyRecord`].
pub fn parse_record(content: &[u8]) -> ParseResult<DependencyRecord> {
    to_record(&parse_slice(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT_OUTPUT: &str = r#"{
        "roots": ["https://deno.land/x/oak/mod.ts"],
        "modules": [
            {
                "kind": "esm",
                "specifier": "https://deno.land/x/oak@v12.0.0/mod.ts",
                "size": 4120,
                "mediaType": "TypeScript",
                "dependencies": [
                    {
                        "specifier": "./application.ts",
                        "code": {"specifier": "https://deno.land/x/oak@v12.0.0/application.ts", "span": {}}
                    },
                    {
                        "specifier": "./types.d.ts",
                        "type": {"specifier": "https://deno.land/x/oak@v12.0.0/types.d.ts", "span": {}}
                    },
                    {
                        "specifier": "./application.ts",
                        "code": {"specifier": "https://deno.land/x/oak@v12.0.0/application.ts", "span": {}}
                    },
                    {
                        "specifier": "https://deno.land/std/http/mod.ts",
                        "code": {"specifier": "https://deno.land/std/http/mod.ts", "span": {}}
                    },
                    {
                        "specifier": "./missing.ts",
                        "code": {"error": "Module not found"}
                    }
                ]
            },
            {
                "kind": "esm",
                "specifier": "https://deno.land/x/oak@v12.0.0/application.ts",
                "dependencies": []
            }
        ],
        "redirects": {
            "https://deno.land/x/oak/mod.ts": "https://deno.land/x/oak@v12.0.0/mod.ts",
            "https://deno.land/std/http/mod.ts": "https://deno.land/std@0.200.0/http/mod.ts"
        }
    }"#;

    const LEGACY_OUTPUT: &str = r#"{
        "root": "https://deno.land/std@0.80.0/fs/mod.ts",
        "modules": [
            {
                "specifier": "https://deno.land/std@0.80.0/fs/mod.ts",
                "dependencies": [
                    "https://deno.land/std@0.80.0/fs/copy.ts",
                    "https://deno.land/std@0.80.0/fs/walk.ts"
                ],
                "size": 703
            }
        ],
        "size": 703
    }"#;

    #[test]
    fn test_parse_current_shape() {
        let record = to_record(&parse_str(CURRENT_OUTPUT).unwrap()).unwrap();

        assert_eq!(record.locator, "https://deno.land/x/oak@v12.0.0/mod.ts");
        assert_eq!(
            record.dependencies,
            vec![
                "https://deno.land/x/oak@v12.0.0/application.ts",
                "https://deno.land/x/oak@v12.0.0/types.d.ts",
                "https://deno.land/std@0.200.0/http/mod.ts",
            ]
        );
    }

    #[test]
    fn test_parse_legacy_shape() {
        let record = parse_record(LEGACY_OUTPUT.as_bytes()).unwrap();

        assert_eq!(record.locator, "https://deno.land/std@0.80.0/fs/mod.ts");
        assert_eq!(record.dependencies.len(), 2);
        assert_eq!(record.dependencies[0], "https://deno.land/std@0.80.0/fs/copy.ts");
    }

    #[test]
    fn test_parse_invalid_json() {
        let result = parse_str("{ invalid json }");
        assert!(matches!(result.unwrap_err(), ParseError::JsonError(_)));
    }

    #[test]
    fn test_no_root() {
        let info = parse_str(r#"{"modules": []}"#).unwrap();
        assert!(matches!(to_record(&info).unwrap_err(), ParseError::NoRoot));
    }

    #[test]
    fn test_missing_root_module() {
        let info = parse_str(r#"{"roots": ["https://x/mod.ts"], "modules": []}"#).unwrap();
        let err = to_record(&info).unwrap_err();
        assert!(matches!(err, ParseError::MissingRoot(ref s) if s == "https://x/mod.ts"));
    }

    #[test]
    fn test_root_module_error() {
        let json = r#"{
            "roots": ["https://x/mod.ts"],
            "modules": [{"specifier": "https://x/mod.ts", "error": "Import 'https://x/mod.ts' failed: 404 Not Found"}]
        }"#;
        let err = to_record(&parse_str(json).unwrap()).unwrap_err();

        assert!(matches!(err, ParseError::ModuleError { .. }));
        assert!(err.to_string().contains("404 Not Found"));
    }

    #[test]
    fn test_redirect_cycle_terminates() {
        let mut info = DenoInfo::default();
        info.redirects.insert("a".to_string(), "b".to_string());
        info.redirects.insert("b".to_string(), "a".to_string());

        let resolved = info.follow_redirects("a");
        assert!(resolved == "a" || resolved == "b");
    }

    #[test]
    fn test_leaf_module() {
        let json = r#"{
            "roots": ["https://x/leaf.ts"],
            "modules": [{"specifier": "https://x/leaf.ts"}]
        }"#;
        let record = to_record(&parse_str(json).unwrap()).unwrap();
        assert!(record.is_leaf());
    }
}
