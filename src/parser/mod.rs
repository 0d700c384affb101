//! Parser module for depgraph.
//!
//! This module holds the values exchanged between pipeline stages and the
//! parser for the external analyzer's structured output.
//!
//! # Example
//!
//! ```
//! use depgraph::parser::deno_info;
//!
//! let json = r#"{"root": "https://deno.land/std@0.80.0/fs/mod.ts",
//!     "modules": [{"specifier": "https://deno.land/std@0.80.0/fs/mod.ts", "dependencies": []}]}"#;
//!
//! let record = deno_info::parse_record(json.as_bytes()).unwrap();
//! assert!(record.is_leaf());
//! ```

pub mod deno_info;
pub mod types;

pub use deno_info::{parse_record, ParseError, ParseResult};
pub use types::{DependencyRecord, Package};
