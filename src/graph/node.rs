//! Persisted record shapes.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn is_false(value: &bool) -> bool {
    !*value
}

/// One addressable entity of the dependency graph.
///
/// `specifier` is globally unique across the store. `uid` is assigned once
/// at creation for nodes with a resolved identity and is absent for pure
/// specifiers (dependencies that were referenced but never analyzed).
///
/// # Example
///
/// ```
/// use depgraph::graph::GraphNode;
///
/// let node = GraphNode::resolved("x/foo@1.0.0/mod.ts");
/// assert!(node.uid.is_some());
///
/// let dep = GraphNode::specifier_only("std@0.200.0/fs/mod.ts");
/// assert!(dep.uid.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Canonical locator of the entity, e.g. `x/foo@1.0.0/mod.ts`.
    pub specifier: String,

    /// Opaque identifier assigned at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Marks an entry file whose analysis failed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unresolved: bool,
}

impl GraphNode {
    /// Creates a node with a freshly generated uid.
    pub fn resolved(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            uid: Some(Uuid::new_v4().to_string()),
            unresolved: false,
        }
    }

    /// Creates a node that only names a specifier.
    pub fn specifier_only(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            uid: None,
            unresolved: false,
        }
    }

    /// Creates a placeholder for an entry file that could not be analyzed.
    pub fn unresolved(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            uid: None,
            unresolved: true,
        }
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uid {
            Some(uid) => write!(f, "{} [{}]", self.specifier, uid),
            None => write!(f, "{}", self.specifier),
        }
    }
}

/// A directed dependency edge between two specifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    /// The dependent.
    pub from: String,
    /// The dependency.
    pub to: String,
}

impl GraphEdge {
    /// Creates a new edge.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for GraphEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_nodes_get_distinct_uids() {
        let a = GraphNode::resolved("x/foo@1.0.0/mod.ts");
        let b = GraphNode::resolved("x/foo@1.0.0/mod.ts");
        assert_ne!(a.uid, b.uid);
    }

    #[test]
    fn test_serialized_shape() {
        let node = GraphNode::specifier_only("x/foo@1.0.0/mod.ts");
        assert_eq!(
            serde_json::to_string(&node).unwrap(),
            r#"{"specifier":"x/foo@1.0.0/mod.ts"}"#
        );

        let node = GraphNode::unresolved("x/foo@1.0.0/bad.ts");
        assert_eq!(
            serde_json::to_string(&node).unwrap(),
            r#"{"specifier":"x/foo@1.0.0/bad.ts","unresolved":true}"#
        );
    }

    #[test]
    fn test_display() {
        let node = GraphNode::specifier_only("std@0.200.0/fs/mod.ts");
        assert_eq!(node.to_string(), "std@0.200.0/fs/mod.ts");

        let edge = GraphEdge::new("a", "b");
        assert_eq!(edge.to_string(), "a -> b");
    }
}
