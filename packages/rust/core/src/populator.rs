//! Summary populator: fills atomic nodes with structured content.
//!
//! Every knowledge leaf that ended `Atomic` gets one summarization call.
//! A summary missing its required fields marks the node `Failed` — that is a
//! semantic failure the consumer has to resolve by hand, so it is surfaced
//! instead of retried. Transport failures use the normal retry budget first.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use atomdoc_providers::{RetryPolicy, Summarizer};
use atomdoc_shared::{
    AtomContent, AtomType, AtomizationStatus, AtomizerConfig, CancelSignal, NodeId, Result,
};
use atomdoc_tree::DocumentTree;

use crate::pipeline::ProgressReporter;

/// Summary of one population run.
#[derive(Debug, Default)]
pub struct PopulateOutcome {
    pub filled: usize,
    /// Nodes that ended `Failed` (incomplete summary or capability dead).
    pub failed: Vec<NodeId>,
    /// Already-filled nodes left untouched.
    pub skipped: usize,
    pub cancelled: bool,
}

/// Fills atomic nodes via the summarization capability.
pub struct SummaryPopulator {
    summarizer: Arc<dyn Summarizer>,
    config: AtomizerConfig,
}

impl SummaryPopulator {
    pub fn new(summarizer: Arc<dyn Summarizer>, config: AtomizerConfig) -> Self {
        Self { summarizer, config }
    }

    /// Fill every atomic knowledge leaf. Re-running is a no-op for nodes
    /// already `Filled` unless `force` is set.
    #[instrument(skip_all, fields(nodes = tree.len(), force))]
    pub async fn run(
        &self,
        tree: &mut DocumentTree,
        cancel: &CancelSignal,
        progress: &dyn ProgressReporter,
        force: bool,
    ) -> Result<PopulateOutcome> {
        let mut outcome = PopulateOutcome::default();

        let mut targets: Vec<NodeId> = Vec::new();
        for id in tree.preorder() {
            let node = tree.expect(&id)?;
            if !node.is_knowledge() || !node.is_leaf() {
                continue;
            }
            match node.status {
                AtomizationStatus::Atomic => targets.push(id),
                AtomizationStatus::Filled if force => targets.push(id),
                AtomizationStatus::Filled => outcome.skipped += 1,
                _ => {}
            }
        }

        let total = targets.len();
        info!(targets = total, skipped = outcome.skipped, "summary population started");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let retry = RetryPolicy::new(self.config.max_retries, self.config.retry_backoff_ms);
        let mut queue: std::collections::VecDeque<NodeId> = targets.into();
        let mut processed = 0usize;

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let batch: Vec<NodeId> = queue.drain(..).collect();

            let mut handles = Vec::new();
            for id in batch {
                let node = tree.expect(&id)?;
                let title = node.title.clone();
                let content = node.source_text.clone();
                let hint = node.atom_type;

                let summarizer = self.summarizer.clone();
                let sem = semaphore.clone();
                let cancel = cancel.clone();
                handles.push((
                    id,
                    tokio::spawn(async move {
                        let _permit = sem.acquire().await.expect("semaphore closed");
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some(
                            retry
                                .run("summarization", || {
                                    summarizer.summarize(&title, hint, &content)
                                })
                                .await,
                        )
                    }),
                ));
            }

            for (id, handle) in handles {
                processed += 1;
                let result = match handle.await {
                    Ok(Some(result)) => result,
                    Ok(None) => {
                        outcome.cancelled = true;
                        continue;
                    }
                    Err(e) => Err(atomdoc_shared::AtomdocError::CapabilityUnavailable(
                        format!("summarization task failed: {e}"),
                    )),
                };

                self.apply(tree, &mut outcome, &id, result)?;
                progress.node_processed(&tree.expect(&id)?.title, processed, total);
            }
        }

        info!(
            filled = outcome.filled,
            failed = outcome.failed.len(),
            skipped = outcome.skipped,
            cancelled = outcome.cancelled,
            "summary population finished"
        );

        Ok(outcome)
    }

    fn apply(
        &self,
        tree: &mut DocumentTree,
        outcome: &mut PopulateOutcome,
        id: &NodeId,
        result: Result<AtomContent>,
    ) -> Result<()> {
        let node = tree.expect_mut(id)?;

        let atom = match result {
            Ok(atom) if atom.is_complete() => atom,
            Ok(_) => {
                warn!(node = %id, "summary missing description or statement, marking failed");
                node.status = AtomizationStatus::Failed;
                node.atom_type = None;
                node.atom_content = None;
                outcome.failed.push(id.clone());
                return Ok(());
            }
            Err(e) => {
                warn!(node = %id, error = %e, "summarization failed, marking failed");
                node.status = AtomizationStatus::Failed;
                node.atom_type = None;
                node.atom_content = None;
                outcome.failed.push(id.clone());
                return Ok(());
            }
        };

        let atom = separate_trailing_proof(atom);
        node.atom_type = infer_atom_type(&node.source_text).or(node.atom_type);
        node.atom_content = Some(atom);
        node.status = AtomizationStatus::Filled;
        outcome.filled += 1;
        debug!(node = %id, atom_type = ?node.atom_type, "node filled");
        Ok(())
    }
}

/// Safety net for summaries that folded the proof into the statement: split
/// at the first "Proof." marker when no proof field came back.
fn separate_trailing_proof(mut atom: AtomContent) -> AtomContent {
    if atom.proof.is_some() {
        return atom;
    }
    if let Some(idx) = atom.statement.find("Proof.") {
        if idx > 0 {
            let proof = atom.statement[idx..].trim().to_string();
            let statement = atom.statement[..idx].trim_end().to_string();
            if !statement.is_empty() {
                atom.statement = statement;
                atom.proof = Some(proof);
            }
        }
    }
    atom
}

/// Deterministic keyword heuristic over the source text, overriding the
/// classifier's hint when the text opens with an explicit marker.
fn infer_atom_type(source_text: &str) -> Option<AtomType> {
    let head: String = source_text
        .trim_start()
        .chars()
        .take(24)
        .collect::<String>()
        .to_lowercase();

    for (keyword, atom_type) in [
        ("theorem", AtomType::Theorem),
        ("definition", AtomType::Definition),
        ("lemma", AtomType::Lemma),
        ("corollary", AtomType::Corollary),
        ("proposition", AtomType::Proposition),
        ("example", AtomType::Example),
        ("remark", AtomType::Remark),
    ] {
        if head.starts_with(keyword) {
            return Some(atom_type);
        }
    }
    None
}
