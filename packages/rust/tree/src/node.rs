//! A single node of the document tree.

use serde::{Deserialize, Serialize};

use atomdoc_shared::{
    AtomContent, AtomType, AtomizationStatus, ContentCategory, NodeId, NodeKind,
};

/// One unit of document structure, stored in the tree's arena.
///
/// `source_text` is owned exclusively by the node until a split consumes it;
/// after a split it remains on the parent for provenance, but is logically
/// partitioned among the children (their concatenation reconstructs it up to
/// whitespace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    pub kind: NodeKind,
    /// Depth in the tree; root is 0 and every child is `parent.level + 1`.
    pub level: u32,
    /// Raw text owned by this node.
    #[serde(default)]
    pub source_text: String,
    #[serde(default = "default_category")]
    pub category: ContentCategory,
    #[serde(default = "default_status")]
    pub status: AtomizationStatus,
    /// Set only once the node is atomic or filled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom_type: Option<AtomType>,
    /// Present and complete only when `status == Filled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom_content: Option<AtomContent>,
    /// Ordered child ids, document reading order.
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    /// Canonical relative path, assigned by the link resolver's first pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    /// Source page provenance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<usize>,
    /// The node was forced atomic by a depth or segmentation fallback and may
    /// be larger than a true atom; flagged for manual review.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced_atomic: bool,
}

fn default_category() -> ContentCategory {
    ContentCategory::Knowledge
}

fn default_status() -> AtomizationStatus {
    AtomizationStatus::Pending
}

impl Node {
    /// Create a node with defaults for the mutable pipeline fields.
    pub fn new(id: NodeId, title: impl Into<String>, kind: NodeKind, level: u32) -> Self {
        Self {
            id,
            title: title.into(),
            kind,
            level,
            source_text: String::new(),
            category: ContentCategory::Knowledge,
            status: AtomizationStatus::Pending,
            atom_type: None,
            atom_content: None,
            children: Vec::new(),
            parent: None,
            resolved_path: None,
            page_start: None,
            page_end: None,
            forced_atomic: false,
        }
    }

    /// Builder-style source text assignment.
    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = text.into();
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_knowledge(&self) -> bool {
        self.category == ContentCategory::Knowledge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_defaults() {
        let node = Node::new(NodeId::new("sec01-limits"), "Limits", NodeKind::Section, 2);
        assert!(node.is_leaf());
        assert!(node.is_knowledge());
        assert_eq!(node.status, AtomizationStatus::Pending);
        assert!(node.atom_type.is_none());
        assert!(!node.forced_atomic);
    }

    #[test]
    fn serde_skips_defaulted_fields() {
        let node = Node::new(NodeId::new("n"), "N", NodeKind::Content, 1);
        let json = serde_json::to_string(&node).expect("serialize");
        assert!(!json.contains("forced_atomic"));
        assert!(!json.contains("resolved_path"));

        let parsed: Node = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.status, AtomizationStatus::Pending);
    }
}
