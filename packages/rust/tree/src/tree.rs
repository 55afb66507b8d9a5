//! Arena-backed document tree with an id index and invariant checking.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use atomdoc_shared::{AtomdocError, AtomizationStatus, NodeId, Result, StatusCounts};

use crate::node::Node;

/// The shared ordered hierarchy mutated in place by every pipeline stage.
///
/// Nodes live in a single arena keyed by id, which doubles as the O(1)
/// lookup index; all structural mutation goes through [`insert_child`], so
/// the index can never go stale relative to the child lists.
///
/// [`insert_child`]: DocumentTree::insert_child
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentTree {
    root: NodeId,
    nodes: HashMap<NodeId, Node>,
}

impl DocumentTree {
    /// Create a tree from its root node. The root's level is forced to 0.
    pub fn new(mut root: Node) -> Self {
        root.level = 0;
        root.parent = None;
        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Self {
            root: root_id,
            nodes,
        }
    }

    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    pub fn root(&self) -> &Node {
        &self.nodes[&self.root]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Lookup that treats a missing id as a tree error.
    pub fn expect(&self, id: &NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| AtomdocError::tree(format!("no node with id '{id}'")))
    }

    /// Mutable lookup that treats a missing id as a tree error.
    pub fn expect_mut(&mut self, id: &NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| AtomdocError::tree(format!("no node with id '{id}'")))
    }

    /// Attach `node` as the last child of `parent`.
    ///
    /// The node's parent pointer and level are set here; the arena entry and
    /// the parent's child list are updated in the same call, so no caller can
    /// observe one without the other.
    pub fn insert_child(&mut self, parent: &NodeId, mut node: Node) -> Result<NodeId> {
        if self.nodes.contains_key(&node.id) {
            return Err(AtomdocError::tree(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
        let parent_level = self
            .nodes
            .get(parent)
            .ok_or_else(|| AtomdocError::tree(format!("no parent with id '{parent}'")))?
            .level;

        let id = node.id.clone();
        node.parent = Some(parent.clone());
        node.level = parent_level + 1;

        self.nodes.insert(id.clone(), node);
        self.nodes
            .get_mut(parent)
            .expect("parent checked above")
            .children
            .push(id.clone());

        Ok(id)
    }

    /// Pre-order traversal of the whole tree, children in reading order.
    pub fn preorder(&self) -> Vec<NodeId> {
        self.preorder_from(&self.root)
    }

    /// Pre-order traversal of the subtree rooted at `start`.
    pub fn preorder_from(&self, start: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![start.clone()];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                for child in node.children.iter().rev() {
                    stack.push(child.clone());
                }
                out.push(id);
            }
        }
        out
    }

    /// Count nodes by atomization status.
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for node in self.nodes.values() {
            match node.status {
                AtomizationStatus::Pending => counts.pending += 1,
                AtomizationStatus::NeedsSplitting => counts.needs_splitting += 1,
                AtomizationStatus::Atomic => counts.atomic += 1,
                AtomizationStatus::Filled => counts.filled += 1,
                AtomizationStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Re-verify every structural invariant.
    ///
    /// Checks: single connected root, no duplicate child references (which
    /// would make the child graph cyclic or shared), parent/level agreement,
    /// leaf-only terminal statuses, and atom fields consistent with status.
    pub fn verify(&self) -> Result<()> {
        let root = self.expect(&self.root)?;
        if root.parent.is_some() {
            return Err(AtomdocError::tree("root must not have a parent"));
        }
        if root.level != 0 {
            return Err(AtomdocError::tree("root level must be 0"));
        }

        let mut seen: HashSet<&NodeId> = HashSet::new();
        let mut stack = vec![&self.root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(AtomdocError::tree(format!(
                    "node '{id}' is reachable more than once"
                )));
            }
            let node = self.expect(id)?;

            for child_id in &node.children {
                let child = self.expect(child_id)?;
                if child.parent.as_ref() != Some(id) {
                    return Err(AtomdocError::tree(format!(
                        "child '{child_id}' does not point back at parent '{id}'"
                    )));
                }
                if child.level != node.level + 1 {
                    return Err(AtomdocError::tree(format!(
                        "child '{child_id}' has level {} under parent level {}",
                        child.level, node.level
                    )));
                }
                stack.push(child_id);
            }

            if !node.children.is_empty()
                && matches!(
                    node.status,
                    AtomizationStatus::Atomic | AtomizationStatus::Filled
                )
            {
                return Err(AtomdocError::tree(format!(
                    "non-leaf node '{id}' has terminal atom status {:?}",
                    node.status
                )));
            }

            if node.atom_type.is_some()
                && !matches!(
                    node.status,
                    AtomizationStatus::Atomic | AtomizationStatus::Filled
                )
            {
                return Err(AtomdocError::tree(format!(
                    "node '{id}' carries an atom type but has status {:?}",
                    node.status
                )));
            }

            if node.status == AtomizationStatus::Filled {
                match &node.atom_content {
                    Some(atom) if atom.is_complete() => {}
                    _ => {
                        return Err(AtomdocError::tree(format!(
                            "filled node '{id}' is missing a complete atom content"
                        )));
                    }
                }
            }
        }

        if seen.len() != self.nodes.len() {
            return Err(AtomdocError::tree(format!(
                "{} of {} nodes are unreachable from the root",
                self.nodes.len() - seen.len(),
                self.nodes.len()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomdoc_shared::{AtomContent, AtomType, NodeKind};

    fn leaf(id: &str, title: &str) -> Node {
        Node::new(NodeId::new(id), title, NodeKind::Content, 0)
    }

    fn sample_tree() -> DocumentTree {
        let root = Node::new(NodeId::new("book"), "Analysis I", NodeKind::Book, 0);
        let mut tree = DocumentTree::new(root);
        let ch = Node::new(NodeId::new("ch01"), "Limits", NodeKind::Chapter, 0);
        tree.insert_child(&NodeId::new("book"), ch).unwrap();
        tree.insert_child(&NodeId::new("ch01"), leaf("ch01-a", "Definition of a limit"))
            .unwrap();
        tree.insert_child(&NodeId::new("ch01"), leaf("ch01-b", "Limit laws"))
            .unwrap();
        tree
    }

    #[test]
    fn insert_sets_parent_and_level() {
        let tree = sample_tree();
        let child = tree.get(&NodeId::new("ch01-a")).unwrap();
        assert_eq!(child.parent, Some(NodeId::new("ch01")));
        assert_eq!(child.level, 2);
        tree.verify().expect("sample tree is consistent");
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut tree = sample_tree();
        let err = tree
            .insert_child(&NodeId::new("book"), leaf("ch01-a", "Dup"))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn missing_parent_rejected() {
        let mut tree = sample_tree();
        let err = tree
            .insert_child(&NodeId::new("nope"), leaf("x", "X"))
            .unwrap_err();
        assert!(err.to_string().contains("no parent"));
    }

    #[test]
    fn preorder_is_reading_order() {
        let tree = sample_tree();
        let order: Vec<String> = tree
            .preorder()
            .into_iter()
            .map(|id| id.0)
            .collect();
        assert_eq!(order, vec!["book", "ch01", "ch01-a", "ch01-b"]);
    }

    #[test]
    fn verify_rejects_terminal_status_on_non_leaf() {
        let mut tree = sample_tree();
        tree.get_mut(&NodeId::new("ch01")).unwrap().status = AtomizationStatus::Atomic;
        let err = tree.verify().unwrap_err();
        assert!(err.to_string().contains("non-leaf"));
    }

    #[test]
    fn verify_rejects_bad_level() {
        let mut tree = sample_tree();
        tree.get_mut(&NodeId::new("ch01-b")).unwrap().level = 7;
        assert!(tree.verify().is_err());
    }

    #[test]
    fn verify_rejects_incomplete_filled_node() {
        let mut tree = sample_tree();
        {
            let node = tree.get_mut(&NodeId::new("ch01-a")).unwrap();
            node.status = AtomizationStatus::Filled;
            node.atom_type = Some(AtomType::Definition);
            node.atom_content = Some(AtomContent {
                description: "ok".into(),
                statement: String::new(),
                ..Default::default()
            });
        }
        let err = tree.verify().unwrap_err();
        assert!(err.to_string().contains("complete atom content"));
    }

    #[test]
    fn verify_rejects_atom_type_on_pending_node() {
        let mut tree = sample_tree();
        tree.get_mut(&NodeId::new("ch01-b")).unwrap().atom_type = Some(AtomType::Lemma);
        let err = tree.verify().unwrap_err();
        assert!(err.to_string().contains("atom type"));
    }

    #[test]
    fn status_counts_cover_all_nodes() {
        let mut tree = sample_tree();
        tree.get_mut(&NodeId::new("ch01-a")).unwrap().status = AtomizationStatus::Atomic;
        let counts = tree.status_counts();
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.atomic, 1);
        assert_eq!(counts.pending, 3);
    }

    #[test]
    fn serde_roundtrip_preserves_structure() {
        let tree = sample_tree();
        let json = serde_json::to_string(&tree).expect("serialize");
        let parsed: DocumentTree = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.len(), tree.len());
        assert_eq!(parsed.preorder(), tree.preorder());
        parsed.verify().expect("roundtripped tree is consistent");
    }
}
