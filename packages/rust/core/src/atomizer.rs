//! The recursive atomization engine.
//!
//! Drives every knowledge leaf to a terminal status through depth-bounded
//! splitting. The recursion is an explicit worklist of `(node, depth)` pairs
//! drained in batches: external classification runs concurrently under a
//! semaphore, tree mutation happens serially between batches, so no two
//! workers ever touch the same node. Each enqueued child carries `depth + 1`
//! and nothing is enqueued at a depth beyond the bound, which is what makes
//! termination unconditional — even an oracle that always splits runs out of
//! depth after `max_recursion_depth` levels.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use atomdoc_providers::{AtomicityOracle, AtomicityVerdict, RetryPolicy, Segment};
use atomdoc_shared::{
    AtomType, AtomizationStatus, AtomizerConfig, CancelSignal, NodeId, NodeKind, Result, Warning,
    WarningKind,
};
use atomdoc_tree::{DocumentTree, Node};

use crate::pipeline::ProgressReporter;

/// Summary of one atomization run.
#[derive(Debug, Default)]
pub struct AtomizeOutcome {
    /// Leaves driven to a terminal status.
    pub processed: usize,
    /// Nodes that were split into children.
    pub splits: usize,
    /// Nodes resolved without consulting the oracle (short content or depth).
    pub short_circuits: usize,
    pub warnings: Vec<Warning>,
    /// The run stopped early on a cancellation signal; unprocessed nodes
    /// remain `Pending`.
    pub cancelled: bool,
}

/// What a classification worker decided for one node. Validation runs inside
/// the worker (it is pure), so the decision is final by the time the tree is
/// touched.
enum Decision {
    Atomic {
        atom_type: Option<AtomType>,
        forced: bool,
        warnings: Vec<(WarningKind, String)>,
    },
    Split {
        segments: Vec<Segment>,
        warnings: Vec<(WarningKind, String)>,
    },
    Cancelled,
}

/// The depth-bounded splitting engine.
pub struct Atomizer {
    oracle: Arc<dyn AtomicityOracle>,
    config: AtomizerConfig,
}

impl Atomizer {
    pub fn new(oracle: Arc<dyn AtomicityOracle>, config: AtomizerConfig) -> Self {
        Self { oracle, config }
    }

    /// Drive every pending knowledge leaf to a terminal status.
    #[instrument(skip_all, fields(nodes = tree.len()))]
    pub async fn run(
        &self,
        tree: &mut DocumentTree,
        cancel: &CancelSignal,
        progress: &dyn ProgressReporter,
    ) -> Result<AtomizeOutcome> {
        let mut outcome = AtomizeOutcome::default();
        let mut queue: VecDeque<(NodeId, u32)> = VecDeque::new();

        // Seed: pending knowledge leaves enter the worklist at depth 0;
        // knowledge containers are structural and only marked, meta subtrees
        // are left untouched entirely.
        for id in tree.preorder() {
            let node = tree.expect_mut(&id)?;
            if !node.is_knowledge() || node.status != AtomizationStatus::Pending {
                continue;
            }
            if node.is_leaf() {
                queue.push_back((id, 0));
            } else {
                node.status = AtomizationStatus::NeedsSplitting;
            }
        }

        let total_estimate = queue.len();
        info!(
            seeded = total_estimate,
            max_depth = self.config.max_recursion_depth,
            min_split_chars = self.config.min_split_chars,
            "atomization started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let retry = RetryPolicy::new(self.config.max_retries, self.config.retry_backoff_ms);

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            // Take the whole frontier; the semaphore bounds real concurrency,
            // so one slow call never gates unrelated siblings.
            let batch: Vec<(NodeId, u32)> = queue.drain(..).collect();

            let mut immediate: Vec<(NodeId, u32, Decision)> = Vec::new();
            let mut handles = Vec::new();

            for (id, depth) in batch {
                let node = tree.expect(&id)?;
                let title = node.title.clone();
                let content = node.source_text.clone();

                // Short fragments are assumed indivisible; skip the oracle.
                if content.chars().count() < self.config.min_split_chars {
                    immediate.push((
                        id,
                        depth,
                        Decision::Atomic {
                            atom_type: None,
                            forced: false,
                            warnings: Vec::new(),
                        },
                    ));
                    continue;
                }

                // A split here would birth children past the depth bound, so
                // the verdict cannot matter; force atomic without a call.
                if depth + 1 > self.config.max_recursion_depth {
                    immediate.push((
                        id,
                        depth,
                        Decision::Atomic {
                            atom_type: None,
                            forced: true,
                            warnings: vec![(
                                WarningKind::DepthExhausted,
                                format!("forced atomic at depth {depth}"),
                            )],
                        },
                    ));
                    continue;
                }

                let oracle = self.oracle.clone();
                let sem = semaphore.clone();
                let cancel = cancel.clone();
                handles.push((
                    id,
                    depth,
                    tokio::spawn(async move {
                        let _permit = sem.acquire().await.expect("semaphore closed");
                        if cancel.is_cancelled() {
                            return Decision::Cancelled;
                        }
                        classify_node(oracle.as_ref(), &retry, &title, &content).await
                    }),
                ));
            }

            for (id, depth, decision) in immediate {
                outcome.short_circuits += 1;
                self.apply(tree, &mut queue, &mut outcome, &id, depth, decision)?;
                progress.node_processed(
                    &tree.expect(&id)?.title,
                    outcome.processed,
                    total_estimate.max(outcome.processed),
                );
            }

            for (id, depth, handle) in handles {
                let decision = match handle.await {
                    Ok(decision) => decision,
                    Err(e) => Decision::Atomic {
                        atom_type: None,
                        forced: true,
                        warnings: vec![(
                            WarningKind::ClassifierUnavailable,
                            format!("classification task failed: {e}"),
                        )],
                    },
                };
                self.apply(tree, &mut queue, &mut outcome, &id, depth, decision)?;
                progress.node_processed(
                    &tree.expect(&id)?.title,
                    outcome.processed,
                    total_estimate.max(outcome.processed),
                );
            }
        }

        if outcome.cancelled {
            warn!(
                remaining = queue.len(),
                "atomization cancelled, queued nodes left pending"
            );
        }

        info!(
            processed = outcome.processed,
            splits = outcome.splits,
            short_circuits = outcome.short_circuits,
            warnings = outcome.warnings.len(),
            cancelled = outcome.cancelled,
            "atomization finished"
        );

        Ok(outcome)
    }

    /// Apply a worker decision to the tree and extend the worklist.
    fn apply(
        &self,
        tree: &mut DocumentTree,
        queue: &mut VecDeque<(NodeId, u32)>,
        outcome: &mut AtomizeOutcome,
        id: &NodeId,
        depth: u32,
        decision: Decision,
    ) -> Result<()> {
        match decision {
            Decision::Cancelled => {
                // Leave the node pending; a resumed run will pick it up.
                queue.clear();
                outcome.cancelled = true;
            }
            Decision::Atomic {
                atom_type,
                forced,
                warnings,
            } => {
                let node = tree.expect_mut(id)?;
                node.status = AtomizationStatus::Atomic;
                node.atom_type = atom_type;
                node.forced_atomic = forced;
                for (kind, message) in warnings {
                    outcome.warnings.push(Warning::new(kind, id.clone(), message));
                }
                outcome.processed += 1;
                debug!(node = %id, depth, forced, "node resolved atomic");
            }
            Decision::Split { segments, warnings } => {
                for (kind, message) in warnings {
                    outcome.warnings.push(Warning::new(kind, id.clone(), message));
                }

                for (i, segment) in segments.iter().enumerate() {
                    let child_id = id.split_child(i + 1);
                    let title = if segment.title.trim().is_empty() {
                        let parent_title = &tree.expect(id)?.title;
                        format!("{parent_title} — Part {}", i + 1)
                    } else {
                        segment.title.clone()
                    };

                    let parent = tree.expect(id)?;
                    let (page_start, page_end) = (parent.page_start, parent.page_end);

                    let child = {
                        let mut node = Node::new(child_id, title, NodeKind::Content, 0)
                            .with_source_text(segment.text.clone());
                        node.page_start = page_start;
                        node.page_end = page_end;
                        node
                    };

                    let child_id = tree.insert_child(id, child)?;
                    queue.push_back((child_id, depth + 1));
                }

                let node = tree.expect_mut(id)?;
                node.status = AtomizationStatus::NeedsSplitting;
                outcome.splits += 1;
                outcome.processed += 1;
                debug!(node = %id, depth, children = segments.len(), "node split");
            }
        }
        Ok(())
    }
}

/// Classify one node's content, validating any proposed segmentation.
///
/// The fail-safe default on every failure path is `Atomic`: the tree must
/// reach a fully terminal state no matter how the oracle misbehaves.
async fn classify_node(
    oracle: &dyn AtomicityOracle,
    retry: &RetryPolicy,
    title: &str,
    content: &str,
) -> Decision {
    let verdict = retry
        .run("atomicity classification", || {
            oracle.classify(title, content, false)
        })
        .await;

    let (segments, mut warnings) = match verdict {
        Err(e) => {
            return Decision::Atomic {
                atom_type: None,
                forced: true,
                warnings: vec![(WarningKind::ClassifierUnavailable, e.to_string())],
            };
        }
        Ok(AtomicityVerdict::Atomic { atom_type }) => {
            return Decision::Atomic {
                atom_type,
                forced: false,
                warnings: Vec::new(),
            };
        }
        Ok(AtomicityVerdict::Split { segments }) => {
            let (segments, dropped) = drop_blank_segments(segments);
            let warnings = if dropped > 0 {
                vec![(
                    WarningKind::EmptySegmentDropped,
                    format!("{dropped} all-whitespace segment(s) dropped"),
                )]
            } else {
                Vec::new()
            };
            (segments, warnings)
        }
    };

    if segments.len() < 2 {
        // A one-part "split" carries no information; treat as atomic.
        return Decision::Atomic {
            atom_type: None,
            forced: false,
            warnings,
        };
    }

    match validate_segmentation(content, &segments) {
        Ok(()) => return Decision::Split { segments, warnings },
        Err(reason) => {
            debug!(title, %reason, "segmentation rejected, retrying strict");
        }
    }

    // One stricter attempt, then give up and fall back to atomic.
    match oracle.classify(title, content, true).await {
        Ok(AtomicityVerdict::Split { segments }) => {
            let (segments, _) = drop_blank_segments(segments);
            if segments.len() >= 2 {
                if let Err(reason) = validate_segmentation(content, &segments) {
                    warnings.push((
                        WarningKind::SegmentationRejected,
                        format!("segmentation failed validation twice: {reason}"),
                    ));
                    return Decision::Atomic {
                        atom_type: None,
                        forced: true,
                        warnings,
                    };
                }
                return Decision::Split { segments, warnings };
            }
            Decision::Atomic {
                atom_type: None,
                forced: false,
                warnings,
            }
        }
        Ok(AtomicityVerdict::Atomic { atom_type }) => Decision::Atomic {
            atom_type,
            forced: false,
            warnings,
        },
        Err(e) => {
            warnings.push((WarningKind::SegmentationRejected, e.to_string()));
            Decision::Atomic {
                atom_type: None,
                forced: true,
                warnings,
            }
        }
    }
}

/// Remove all-whitespace segments, returning how many were dropped.
fn drop_blank_segments(segments: Vec<Segment>) -> (Vec<Segment>, usize) {
    let before = segments.len();
    let kept: Vec<Segment> = segments
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// A segmentation is valid when the segments reconstruct the original
/// content (up to whitespace) with no gap or overlap, and no segment cuts
/// inside a LaTeX math delimiter.
fn validate_segmentation(content: &str, segments: &[Segment]) -> std::result::Result<(), String> {
    let joined: String = segments.iter().map(|s| s.text.as_str()).collect();
    if normalize_whitespace(&joined) != normalize_whitespace(content) {
        return Err("segments do not reconstruct the original content".into());
    }

    for (i, segment) in segments.iter().enumerate() {
        if !math_delimiters_balanced(&segment.text) {
            return Err(format!("segment {} cuts inside a math delimiter", i + 1));
        }
    }

    Ok(())
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Balance check for `$…$`, `\(..\)` and `\[..\]` delimiters.
fn math_delimiters_balanced(s: &str) -> bool {
    let mut dollars = 0usize;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '$' => dollars += 1,
            _ => {}
        }
    }
    if dollars % 2 != 0 {
        return false;
    }

    s.matches("\\(").count() == s.matches("\\)").count()
        && s.matches("\\[").count() == s.matches("\\]").count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use atomdoc_shared::{AtomdocError, ContentCategory};

    use crate::pipeline::SilentProgress;

    /// Scripted verdicts keyed by exact content; each key holds a call
    /// sequence. Unscripted content resolves atomic.
    struct ScriptedOracle {
        calls: AtomicUsize,
        script: Mutex<HashMap<String, Vec<Step>>>,
    }

    enum Step {
        Atomic(Option<AtomType>),
        Split(Vec<(&'static str, String)>),
        Fail,
    }

    impl ScriptedOracle {
        fn new(script: Vec<(String, Vec<Step>)>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into_iter().collect()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AtomicityOracle for ScriptedOracle {
        async fn classify(
            &self,
            _title: &str,
            content: &str,
            _strict: bool,
        ) -> Result<AtomicityVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let step = script.get_mut(content).and_then(|steps| {
                if steps.is_empty() {
                    None
                } else {
                    Some(steps.remove(0))
                }
            });
            match step {
                None | Some(Step::Atomic(None)) => {
                    Ok(AtomicityVerdict::Atomic { atom_type: None })
                }
                Some(Step::Atomic(atom_type)) => Ok(AtomicityVerdict::Atomic { atom_type }),
                Some(Step::Split(parts)) => Ok(AtomicityVerdict::Split {
                    segments: parts
                        .into_iter()
                        .map(|(title, text)| Segment {
                            title: title.to_string(),
                            atom_type: None,
                            text,
                        })
                        .collect(),
                }),
                Some(Step::Fail) => Err(AtomdocError::CapabilityUnavailable("down".into())),
            }
        }
    }

    /// Splits any content in half forever, to exercise the depth bound.
    struct DividingOracle;

    #[async_trait]
    impl AtomicityOracle for DividingOracle {
        async fn classify(
            &self,
            _title: &str,
            content: &str,
            _strict: bool,
        ) -> Result<AtomicityVerdict> {
            let mid = content.len() / 2;
            let mut split = mid;
            while !content.is_char_boundary(split) {
                split += 1;
            }
            Ok(AtomicityVerdict::Split {
                segments: vec![
                    Segment {
                        title: "Left".into(),
                        atom_type: None,
                        text: content[..split].to_string(),
                    },
                    Segment {
                        title: "Right".into(),
                        atom_type: None,
                        text: content[split..].to_string(),
                    },
                ],
            })
        }
    }

    fn config(min_split_chars: usize, max_depth: u32) -> AtomizerConfig {
        AtomizerConfig {
            max_recursion_depth: max_depth,
            min_split_chars,
            concurrency: 2,
            max_retries: 1,
            retry_backoff_ms: 1,
        }
    }

    fn single_leaf_tree(content: &str) -> (DocumentTree, NodeId) {
        let mut tree = DocumentTree::new(Node::new(
            NodeId::new("book"),
            "Book",
            NodeKind::Book,
            0,
        ));
        let leaf_id = NodeId::new("sec");
        let node = Node::new(leaf_id.clone(), "Section 1", NodeKind::Section, 0)
            .with_source_text(content);
        tree.insert_child(&NodeId::new("book"), node).unwrap();
        (tree, leaf_id)
    }

    #[tokio::test]
    async fn oracle_split_produces_atomic_children() {
        let left = "x".repeat(600);
        let right = "y".repeat(600);
        let content = format!("{left}{right}");

        let oracle = Arc::new(ScriptedOracle::new(vec![
            (
                content.clone(),
                vec![Step::Split(vec![("Left", left.clone()), ("Right", right.clone())])],
            ),
            (left.clone(), vec![Step::Atomic(Some(AtomType::Theorem))]),
            (right.clone(), vec![Step::Atomic(Some(AtomType::Definition))]),
        ]));

        let (mut tree, leaf_id) = single_leaf_tree(&content);
        let atomizer = Atomizer::new(oracle.clone(), config(500, 10));
        let outcome = atomizer
            .run(&mut tree, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.splits, 1);
        tree.verify().expect("tree stays consistent");

        let parent = tree.get(&leaf_id).unwrap();
        assert_eq!(parent.status, AtomizationStatus::NeedsSplitting);
        assert_eq!(parent.children.len(), 2);

        let first = tree.get(&parent.children[0]).unwrap();
        let second = tree.get(&parent.children[1]).unwrap();
        assert_eq!(first.status, AtomizationStatus::Atomic);
        assert_eq!(first.atom_type, Some(AtomType::Theorem));
        assert_eq!(second.atom_type, Some(AtomType::Definition));
        assert_eq!(first.level, parent.level + 1);

        // Content conservation across the split.
        let reassembled: String = parent
            .children
            .iter()
            .map(|id| tree.get(id).unwrap().source_text.as_str())
            .collect();
        assert_eq!(
            normalize_whitespace(&reassembled),
            normalize_whitespace(&content)
        );
    }

    #[tokio::test]
    async fn short_content_never_reaches_the_oracle() {
        let content = "a".repeat(200);
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let (mut tree, leaf_id) = single_leaf_tree(&content);

        let atomizer = Atomizer::new(oracle.clone(), config(500, 10));
        let outcome = atomizer
            .run(&mut tree, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(oracle.call_count(), 0);
        assert_eq!(outcome.short_circuits, 1);
        assert_eq!(
            tree.get(&leaf_id).unwrap().status,
            AtomizationStatus::Atomic
        );
        assert!(!tree.get(&leaf_id).unwrap().forced_atomic);
    }

    #[tokio::test]
    async fn gap_in_segmentation_forces_atomic_after_strict_retry() {
        // Segments cover only part of the original: validation must fail,
        // the strict retry returns the same bad split, and the node falls
        // back to atomic with a recorded warning.
        let content = "z".repeat(1000);
        let bad = vec![
            ("A", "z".repeat(450)),
            ("B", "z".repeat(450)), // 100 chars of the parent are missing
        ];

        let oracle = Arc::new(ScriptedOracle::new(vec![(
            content.clone(),
            vec![Step::Split(bad.clone()), Step::Split(bad)],
        )]));

        let (mut tree, leaf_id) = single_leaf_tree(&content);
        let atomizer = Atomizer::new(oracle.clone(), config(500, 10));
        let outcome = atomizer
            .run(&mut tree, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(oracle.call_count(), 2);
        let node = tree.get(&leaf_id).unwrap();
        assert_eq!(node.status, AtomizationStatus::Atomic);
        assert!(node.is_leaf());
        assert!(node.forced_atomic);
        assert!(
            outcome
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::SegmentationRejected)
        );
    }

    #[tokio::test]
    async fn always_splitting_oracle_terminates_at_depth_bound() {
        let content = "w".repeat(4096);
        let (mut tree, _) = single_leaf_tree(&content);

        let atomizer = Atomizer::new(Arc::new(DividingOracle), config(1, 3));
        let outcome = atomizer
            .run(&mut tree, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        tree.verify().unwrap();
        assert!(outcome.warnings.iter().any(|w| w.kind == WarningKind::DepthExhausted));

        // Every knowledge leaf ended terminal, and no leaf sits more than
        // max_depth levels below the seeded node (level 1).
        for id in tree.preorder() {
            let node = tree.get(&id).unwrap();
            if node.is_leaf() {
                assert_eq!(node.status, AtomizationStatus::Atomic);
                assert!(node.level <= 1 + 3);
            }
        }
        // Depth 0..=2 split, depth 3 forced atomic: 1 + 2 + 4 + 8 leaves.
        assert_eq!(tree.len(), 2 + 2 + 4 + 8);
    }

    #[tokio::test]
    async fn whitespace_segments_are_dropped_with_warning() {
        let left = "p".repeat(500);
        let right = "q".repeat(500);
        let content = format!("{left}{right}");

        let oracle = Arc::new(ScriptedOracle::new(vec![(
            content.clone(),
            vec![Step::Split(vec![
                ("Blank", "   ".to_string()),
                ("Left", left.clone()),
                ("Right", right.clone()),
            ])],
        )]));

        let (mut tree, leaf_id) = single_leaf_tree(&content);
        let atomizer = Atomizer::new(oracle, config(400, 10));
        let outcome = atomizer
            .run(&mut tree, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        assert!(
            outcome
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::EmptySegmentDropped)
        );
        assert_eq!(tree.get(&leaf_id).unwrap().children.len(), 2);
    }

    #[tokio::test]
    async fn split_inside_math_delimiter_is_rejected() {
        let content = format!("Let $x + y$ denote the sum. {}", "t".repeat(500));
        let bad = vec![
            ("A", "Let $x".to_string()),
            ("B", format!(" + y$ denote the sum. {}", "t".repeat(500))),
        ];

        let oracle = Arc::new(ScriptedOracle::new(vec![(
            content.clone(),
            vec![Step::Split(bad.clone()), Step::Split(bad)],
        )]));

        let (mut tree, leaf_id) = single_leaf_tree(&content);
        let atomizer = Atomizer::new(oracle, config(400, 10));
        let outcome = atomizer
            .run(&mut tree, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(
            tree.get(&leaf_id).unwrap().status,
            AtomizationStatus::Atomic
        );
        assert!(
            outcome
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::SegmentationRejected)
        );
    }

    #[tokio::test]
    async fn unreachable_classifier_falls_back_to_atomic() {
        let content = "f".repeat(800);
        let oracle = Arc::new(ScriptedOracle::new(vec![(
            content.clone(),
            vec![Step::Fail, Step::Fail, Step::Fail],
        )]));

        let (mut tree, leaf_id) = single_leaf_tree(&content);
        let atomizer = Atomizer::new(oracle.clone(), config(500, 10));
        let outcome = atomizer
            .run(&mut tree, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        // 1 attempt + 1 retry from the policy.
        assert_eq!(oracle.call_count(), 2);
        let node = tree.get(&leaf_id).unwrap();
        assert_eq!(node.status, AtomizationStatus::Atomic);
        assert!(node.forced_atomic);
        assert!(
            outcome
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::ClassifierUnavailable)
        );
    }

    #[tokio::test]
    async fn meta_subtrees_are_never_atomized() {
        let content = "m".repeat(2000);
        let (mut tree, leaf_id) = single_leaf_tree(&content);
        tree.get_mut(&leaf_id).unwrap().category = ContentCategory::Meta;

        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let atomizer = Atomizer::new(oracle.clone(), config(500, 10));
        let outcome = atomizer
            .run(&mut tree, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(oracle.call_count(), 0);
        assert_eq!(outcome.processed, 0);
        assert_eq!(
            tree.get(&leaf_id).unwrap().status,
            AtomizationStatus::Pending
        );
    }

    #[tokio::test]
    async fn cancellation_leaves_pending_nodes_untouched() {
        let content = "c".repeat(1000);
        let (mut tree, leaf_id) = single_leaf_tree(&content);

        let cancel = CancelSignal::new();
        cancel.cancel();

        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let atomizer = Atomizer::new(oracle.clone(), config(500, 10));
        let outcome = atomizer
            .run(&mut tree, &cancel, &SilentProgress)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(oracle.call_count(), 0);
        assert_eq!(
            tree.get(&leaf_id).unwrap().status,
            AtomizationStatus::Pending
        );
    }

    #[test]
    fn whitespace_normalization() {
        assert_eq!(
            normalize_whitespace("a  b\n\nc\t d"),
            normalize_whitespace("a b c d")
        );
        assert_ne!(normalize_whitespace("ab"), normalize_whitespace("a b"));
    }

    #[test]
    fn delimiter_balance() {
        assert!(math_delimiters_balanced("the sum $x + y$ is bounded"));
        assert!(math_delimiters_balanced("display \\[ x \\] and inline \\( y \\)"));
        assert!(!math_delimiters_balanced("broken $x + y"));
        assert!(!math_delimiters_balanced("broken \\[ x"));
        // An escaped dollar sign is not a delimiter.
        assert!(math_delimiters_balanced("price \\$5"));
    }
}
