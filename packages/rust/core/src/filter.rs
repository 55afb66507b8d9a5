//! Content filter: tags each subtree as knowledge or meta content.
//!
//! Title keywords settle most nodes without an external call; only ambiguous
//! titles go to the classification capability. A meta verdict applies to the
//! whole subtree. Meta nodes stay in the tree for navigation but are skipped
//! by the atomizer and populator. The filter runs once, before atomization.

use tracing::{info, instrument, warn};

use atomdoc_providers::{ContentClassifier, RetryPolicy};
use atomdoc_shared::{ContentCategory, NodeId, Result};
use atomdoc_tree::DocumentTree;

/// Titles that mark navigational/front-matter content.
const META_KEYWORDS: &[&str] = &[
    "preface",
    "foreword",
    "acknowledgement",
    "acknowledgment",
    "table of contents",
    "contents",
    "index",
    "glossary",
    "bibliography",
    "references",
    "copyright",
    "about the author",
    "dedication",
    "epigraph",
    "colophon",
    "endnotes",
    "list of figures",
    "list of tables",
    "list of symbols",
    "notation",
    "credits",
];

/// Titles that strongly indicate substantive content.
const KNOWLEDGE_KEYWORDS: &[&str] = &[
    "chapter",
    "part",
    "section",
    "introduction",
    "theorem",
    "definition",
    "lemma",
    "proposition",
    "corollary",
    "proof",
    "example",
    "exercise",
    "problem",
    "theory",
    "method",
    "analysis",
];

/// Result of one filtering pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilterOutcome {
    /// Subtree roots tagged as meta.
    pub meta_subtrees: usize,
    /// Total nodes now carrying the meta tag.
    pub meta_nodes: usize,
    /// External classification calls made for ambiguous titles.
    pub classifier_calls: usize,
}

/// Quick classification from the title alone; `None` means ambiguous.
fn classify_by_title(title: &str) -> Option<ContentCategory> {
    let title_lower = title.to_lowercase();

    for keyword in META_KEYWORDS {
        if title_lower.contains(keyword) {
            return Some(ContentCategory::Meta);
        }
    }
    for keyword in KNOWLEDGE_KEYWORDS {
        if title_lower.contains(keyword) {
            return Some(ContentCategory::Knowledge);
        }
    }
    None
}

/// Tag every node in the tree. The root itself is always knowledge.
#[instrument(skip_all, fields(nodes = tree.len()))]
pub async fn apply(
    tree: &mut DocumentTree,
    classifier: &dyn ContentClassifier,
    retry: &RetryPolicy,
) -> Result<FilterOutcome> {
    let mut outcome = FilterOutcome::default();

    // Walk top-down so a meta subtree root settles all its descendants in
    // one decision; only knowledge nodes are descended into.
    let mut stack: Vec<NodeId> = tree.root().children.clone();
    stack.reverse();

    while let Some(id) = stack.pop() {
        let node = tree.expect(&id)?;
        let title = node.title.clone();
        let hinted_meta = node.category == ContentCategory::Meta;
        let children = node.children.clone();
        let preview: String = node.source_text.chars().take(500).collect();

        let category = if hinted_meta {
            // The structure proposal already tagged this subtree.
            ContentCategory::Meta
        } else {
            match classify_by_title(&title) {
                Some(category) => category,
                None if preview.trim().is_empty() => ContentCategory::Knowledge,
                None => {
                    outcome.classifier_calls += 1;
                    match retry
                        .run("content classification", || {
                            classifier.classify(&title, &preview)
                        })
                        .await
                    {
                        Ok(category) => category,
                        Err(e) => {
                            // Keep ambiguous content rather than lose it.
                            warn!(title = %title, error = %e, "content classification failed, keeping as knowledge");
                            ContentCategory::Knowledge
                        }
                    }
                }
            }
        };

        if category == ContentCategory::Meta {
            outcome.meta_subtrees += 1;
            for sub_id in tree.preorder_from(&id) {
                tree.expect_mut(&sub_id)?.category = ContentCategory::Meta;
                outcome.meta_nodes += 1;
            }
        } else {
            tree.expect_mut(&id)?.category = ContentCategory::Knowledge;
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
    }

    info!(
        meta_subtrees = outcome.meta_subtrees,
        meta_nodes = outcome.meta_nodes,
        classifier_calls = outcome.classifier_calls,
        "content filter applied"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use atomdoc_shared::{NodeKind, NodeId};
    use atomdoc_tree::Node;

    struct CountingClassifier {
        calls: AtomicUsize,
        verdict: ContentCategory,
    }

    #[async_trait]
    impl ContentClassifier for CountingClassifier {
        async fn classify(&self, _title: &str, _preview: &str) -> Result<ContentCategory> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict)
        }
    }

    fn tree_with(titles: &[(&str, &[&str])]) -> DocumentTree {
        let mut tree = DocumentTree::new(Node::new(
            NodeId::new("book"),
            "Book",
            NodeKind::Book,
            0,
        ));
        for (i, (title, children)) in titles.iter().enumerate() {
            let id = NodeId::new(format!("n{i}"));
            let node = Node::new(id.clone(), *title, NodeKind::Chapter, 0)
                .with_source_text("Some mathematical prose about the topic at hand.");
            tree.insert_child(&NodeId::new("book"), node).unwrap();
            for (j, child) in children.iter().enumerate() {
                let node =
                    Node::new(NodeId::new(format!("n{i}c{j}")), *child, NodeKind::Section, 0)
                        .with_source_text("child text");
                tree.insert_child(&id, node).unwrap();
            }
        }
        tree
    }

    #[test]
    fn title_heuristic_covers_clear_cases() {
        assert_eq!(classify_by_title("Preface"), Some(ContentCategory::Meta));
        assert_eq!(
            classify_by_title("Bibliography and References"),
            Some(ContentCategory::Meta)
        );
        assert_eq!(
            classify_by_title("Chapter 3: Integration"),
            Some(ContentCategory::Knowledge)
        );
        assert_eq!(classify_by_title("Miscellany"), None);
    }

    #[tokio::test]
    async fn meta_verdict_applies_to_whole_subtree() {
        let mut tree = tree_with(&[
            ("Preface", &["Thanks", "History of this Book"]),
            ("Chapter 1: Limits", &["1.1 Definition of a Limit"]),
        ]);
        let classifier = CountingClassifier {
            calls: AtomicUsize::new(0),
            verdict: ContentCategory::Knowledge,
        };

        let outcome = apply(&mut tree, &classifier, &RetryPolicy::new(0, 1))
            .await
            .unwrap();

        assert_eq!(outcome.meta_subtrees, 1);
        assert_eq!(outcome.meta_nodes, 3);
        // Children of the meta preface were settled transitively, and the
        // chapter titles were settled by keyword, so nothing hit the LLM.
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);

        let preface_child = tree.get(&NodeId::new("n0c0")).unwrap();
        assert_eq!(preface_child.category, ContentCategory::Meta);
        let chapter = tree.get(&NodeId::new("n1")).unwrap();
        assert_eq!(chapter.category, ContentCategory::Knowledge);
    }

    #[tokio::test]
    async fn ambiguous_titles_go_to_the_classifier() {
        let mut tree = tree_with(&[("Miscellany", &[] as &[&str])]);
        let classifier = CountingClassifier {
            calls: AtomicUsize::new(0),
            verdict: ContentCategory::Meta,
        };

        let outcome = apply(&mut tree, &classifier, &RetryPolicy::new(0, 1))
            .await
            .unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.meta_subtrees, 1);
        assert_eq!(
            tree.get(&NodeId::new("n0")).unwrap().category,
            ContentCategory::Meta
        );
    }

    #[tokio::test]
    async fn classifier_failure_keeps_node_as_knowledge() {
        struct DownClassifier;

        #[async_trait]
        impl ContentClassifier for DownClassifier {
            async fn classify(&self, _t: &str, _p: &str) -> Result<ContentCategory> {
                Err(atomdoc_shared::AtomdocError::CapabilityUnavailable(
                    "down".into(),
                ))
            }
        }

        let mut tree = tree_with(&[("Miscellany", &[] as &[&str])]);
        apply(&mut tree, &DownClassifier, &RetryPolicy::new(0, 1))
            .await
            .unwrap();

        assert_eq!(
            tree.get(&NodeId::new("n0")).unwrap().category,
            ContentCategory::Knowledge
        );
    }

    #[tokio::test]
    async fn builder_meta_hint_short_circuits() {
        let mut tree = tree_with(&[("Oddly Named Front Matter", &["Sub"])]);
        tree.get_mut(&NodeId::new("n0")).unwrap().category = ContentCategory::Meta;

        let classifier = CountingClassifier {
            calls: AtomicUsize::new(0),
            verdict: ContentCategory::Knowledge,
        };
        let outcome = apply(&mut tree, &classifier, &RetryPolicy::new(0, 1))
            .await
            .unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.meta_nodes, 2);
    }
}
