//! End-to-end pipeline: pages → structure → filter → atomize → fill →
//! link → emit.
//!
//! Each stage is awaited in order over the shared tree; the tree is
//! re-verified after every mutating stage. Capability failures degrade inside
//! the stages (fail-safe atomics, failed nodes, placeholder links) — the only
//! hard failures out of this module are I/O, validation, and internal tree
//! errors. Cancellation ends the run between batches with a resumable
//! snapshot on disk.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use atomdoc_providers::{Capabilities, RetryPolicy};
use atomdoc_shared::{
    AtomdocError, AtomizerConfig, CURRENT_SCHEMA_VERSION, CancelSignal, Job, JobSnapshot,
    JobStage, NodeId, PageText, Result, StatusCounts, Warning,
};
use atomdoc_tree::DocumentTree;

use crate::atomizer::Atomizer;
use crate::builder::{build_structure, slugify};
use crate::emitter;
use crate::filter;
use crate::linker;
use crate::populator::SummaryPopulator;

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Caller-provided document title hint.
    pub title_hint: Option<String>,
    /// Root directory vaults are written under.
    pub output_root: PathBuf,
    /// Atomization tuning (depth, thresholds, concurrency, retries).
    pub atomizer: AtomizerConfig,
}

/// Everything a consumer needs to review after a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub warnings: Vec<Warning>,
    /// Nodes that ended `Failed` and need manual intervention.
    pub failed_nodes: Vec<NodeId>,
    pub counts: StatusCounts,
    pub cancelled: bool,
}

/// Result of the `process` pipeline.
#[derive(Debug)]
pub struct ProcessResult {
    pub job: Job,
    /// Written vault directory; `None` when the run was cancelled before
    /// emission.
    pub vault_path: Option<PathBuf>,
    pub unit_count: usize,
    pub report: RunReport,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a node finishes a stage's processing.
    fn node_processed(&self, detail: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &ProcessResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn node_processed(&self, _detail: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &ProcessResult) {}
}

/// Run the full pipeline.
///
/// 1. Build the structure tree from page text
/// 2. Tag knowledge vs meta subtrees
/// 3. Atomize every knowledge leaf (bounded recursive splitting)
/// 4. Fill atomic nodes with structured summaries
/// 5. Resolve cross-references (register, then rewrite)
/// 6. Emit the vault
#[instrument(skip_all, fields(pages = pages.len()))]
pub async fn process(
    pages: &[PageText],
    capabilities: &Capabilities,
    config: &ProcessConfig,
    cancel: &CancelSignal,
    progress: &dyn ProgressReporter,
) -> Result<ProcessResult> {
    let start = Instant::now();

    if pages.is_empty() {
        return Err(AtomdocError::validation("no pages to process"));
    }

    let mut job = Job::new(
        config
            .title_hint
            .clone()
            .unwrap_or_else(|| "Untitled Document".to_string()),
    );

    info!(job = %job.id, "starting pipeline");

    match run_stages(pages, capabilities, config, cancel, progress, &mut job).await {
        Ok((tree, result)) => {
            // Snapshot at the boundary for the surrounding workflow layer.
            if let Some(vault_path) = &result.vault_path {
                write_snapshot(vault_path, &job, &tree)?;
            } else {
                let dir = config.output_root.join(slugify(&job.title));
                std::fs::create_dir_all(&dir).map_err(|e| AtomdocError::io(&dir, e))?;
                write_snapshot(&dir, &job, &tree)?;
            }

            let result = ProcessResult {
                job: job.clone(),
                elapsed: start.elapsed(),
                ..result
            };
            progress.done(&result);
            info!(
                job = %result.job.id,
                units = result.unit_count,
                warnings = result.report.warnings.len(),
                failed = result.report.failed_nodes.len(),
                cancelled = result.report.cancelled,
                elapsed_ms = result.elapsed.as_millis(),
                "pipeline finished"
            );
            Ok(result)
        }
        Err(e) => {
            job.error = Some(e.to_string());
            job.advance(JobStage::Failed);
            warn!(job = %job.id, error = %e, "pipeline failed");
            Err(e)
        }
    }
}

async fn run_stages(
    pages: &[PageText],
    capabilities: &Capabilities,
    config: &ProcessConfig,
    cancel: &CancelSignal,
    progress: &dyn ProgressReporter,
    job: &mut Job,
) -> Result<(DocumentTree, ProcessResult)> {
    let retry = RetryPolicy::new(config.atomizer.max_retries, config.atomizer.retry_backoff_ms);

    // --- Stage 1: structure ---
    progress.phase("Analyzing document structure");
    job.advance(JobStage::BuildingStructure);
    let mut tree = build_structure(
        pages,
        capabilities.structure.as_ref(),
        config.title_hint.as_deref(),
        &retry,
    )
    .await?;
    tree.verify()?;
    job.title = tree.root().title.clone();

    if cancel.is_cancelled() {
        return finish_cancelled(job, tree);
    }

    // --- Stage 2: content filter ---
    progress.phase("Filtering front matter");
    job.advance(JobStage::FilteringContent);
    filter::apply(&mut tree, capabilities.content.as_ref(), &retry).await?;
    tree.verify()?;

    if cancel.is_cancelled() {
        return finish_cancelled(job, tree);
    }

    // --- Stage 3: atomize ---
    progress.phase("Atomizing content");
    job.advance(JobStage::Atomizing);
    let atomizer = Atomizer::new(capabilities.atomicity.clone(), config.atomizer.clone());
    let atomize_outcome = atomizer.run(&mut tree, cancel, progress).await?;
    job.warnings.extend(atomize_outcome.warnings.iter().cloned());
    tree.verify()?;

    if atomize_outcome.cancelled {
        return finish_cancelled(job, tree);
    }

    // --- Stage 4: fill summaries ---
    progress.phase("Summarizing atoms");
    job.advance(JobStage::FillingContent);
    let populator = SummaryPopulator::new(capabilities.summary.clone(), config.atomizer.clone());
    let populate_outcome = populator.run(&mut tree, cancel, progress, false).await?;
    tree.verify()?;

    if populate_outcome.cancelled {
        return finish_cancelled(job, tree);
    }

    // --- Stage 5: resolve links (two strictly sequential passes) ---
    progress.phase("Resolving cross-references");
    job.advance(JobStage::ResolvingLinks);
    let index = linker::register_paths(&mut tree)?;
    let link_outcome = linker::resolve_links(&mut tree, &index)?;
    job.warnings.extend(link_outcome.warnings.iter().cloned());
    tree.verify()?;

    // --- Stage 6: emit ---
    progress.phase("Emitting vault");
    job.advance(JobStage::Emitting);
    let units = emitter::emit(&tree)?;
    job.counts = tree.status_counts();

    let manifest = emitter::build_manifest(job, &tree, &units);
    let links_json = emitter::render_links_json(&link_outcome.edges);
    let vault_dir = config.output_root.join(slugify(&job.title));
    emitter::write_vault(&vault_dir, &units, &manifest, &links_json)?;

    job.advance(JobStage::Completed);

    let report = RunReport {
        warnings: job.warnings.clone(),
        failed_nodes: populate_outcome.failed,
        counts: job.counts,
        cancelled: false,
    };

    let unit_count = units.len();
    Ok((
        tree,
        ProcessResult {
            job: job.clone(),
            vault_path: Some(vault_dir),
            unit_count,
            report,
            elapsed: Duration::ZERO,
        },
    ))
}

/// Wrap up a cancelled run: the tree keeps whatever terminal states it
/// reached, nothing half-done is made to look terminal, and the snapshot
/// written by `process` carries enough state to resume.
fn finish_cancelled(job: &mut Job, tree: DocumentTree) -> Result<(DocumentTree, ProcessResult)> {
    job.counts = tree.status_counts();
    job.advance(JobStage::Cancelled);
    warn!(job = %job.id, "pipeline cancelled");

    let report = RunReport {
        warnings: job.warnings.clone(),
        failed_nodes: Vec::new(),
        counts: job.counts,
        cancelled: true,
    };

    Ok((
        tree,
        ProcessResult {
            job: job.clone(),
            vault_path: None,
            unit_count: 0,
            report,
            elapsed: Duration::ZERO,
        },
    ))
}

/// Versioned job snapshot for the out-of-scope workflow layer.
fn write_snapshot(dir: &std::path::Path, job: &Job, tree: &DocumentTree) -> Result<()> {
    let snapshot = JobSnapshot {
        snapshot_version: CURRENT_SCHEMA_VERSION,
        job: job.clone(),
        tree: serde_json::to_value(tree)
            .map_err(|e| AtomdocError::validation(format!("tree serialization: {e}")))?,
    };
    let body = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| AtomdocError::validation(format!("snapshot serialization: {e}")))?;

    let path = dir.join("job.json");
    std::fs::write(&path, body).map_err(|e| AtomdocError::io(&path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use atomdoc_providers::{
        AtomicityOracle, AtomicityVerdict, ContentClassifier, OutlineEntry, Segment,
        StructureClassifier, StructureProposal, Summarizer,
    };
    use atomdoc_shared::{
        AtomContent, AtomType, AtomizationStatus, ContentCategory, NodeKind, WarningKind,
    };

    struct ScriptedStructure;

    #[async_trait]
    impl StructureClassifier for ScriptedStructure {
        async fn propose(&self, text: &str, _hint: Option<&str>) -> Result<StructureProposal> {
            // One knowledge chapter spanning everything, plus a preface.
            let preface_end = text.find("Theorem").unwrap_or(0);
            Ok(StructureProposal {
                title: "Sequences and Series".into(),
                author: Some("A. Mathematician".into()),
                outline: vec![
                    OutlineEntry {
                        title: "Preface".into(),
                        kind: NodeKind::Chapter,
                        level: 1,
                        category: Some(ContentCategory::Meta),
                        start: 0,
                        end: preface_end,
                    },
                    OutlineEntry {
                        title: "Chapter 1: Convergence".into(),
                        kind: NodeKind::Chapter,
                        level: 1,
                        category: None,
                        start: preface_end,
                        end: text.len(),
                    },
                ],
            })
        }
    }

    struct NeverCalledClassifier;

    #[async_trait]
    impl ContentClassifier for NeverCalledClassifier {
        async fn classify(&self, _t: &str, _p: &str) -> Result<ContentCategory> {
            Ok(ContentCategory::Knowledge)
        }
    }

    /// Splits the chapter once at the theorem/definition boundary, then
    /// reports both parts atomic.
    struct BoundaryOracle;

    #[async_trait]
    impl AtomicityOracle for BoundaryOracle {
        async fn classify(
            &self,
            _title: &str,
            content: &str,
            _strict: bool,
        ) -> Result<AtomicityVerdict> {
            if let Some(idx) = content.find("Definition") {
                if idx > 0 {
                    return Ok(AtomicityVerdict::Split {
                        segments: vec![
                            Segment {
                                title: "Monotone Convergence Theorem".into(),
                                atom_type: Some(AtomType::Theorem),
                                text: content[..idx].to_string(),
                            },
                            Segment {
                                title: "Definition of a Cauchy Sequence".into(),
                                atom_type: Some(AtomType::Definition),
                                text: content[idx..].to_string(),
                            },
                        ],
                    });
                }
            }
            Ok(AtomicityVerdict::Atomic {
                atom_type: content.trim_start().starts_with("Theorem").then_some(AtomType::Theorem),
            })
        }
    }

    struct ScriptedSummarizer {
        break_title: Option<&'static str>,
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(
            &self,
            title: &str,
            _hint: Option<AtomType>,
            content: &str,
        ) -> Result<AtomContent> {
            if self.break_title == Some(title) {
                return Ok(AtomContent::default()); // missing required fields
            }
            Ok(AtomContent {
                description: format!("Summary of {title}."),
                statement: content.chars().take(80).collect(),
                proof: None,
                lemmas: vec![],
                related_content: Some(
                    "Relates to [[Definition of a Cauchy Sequence]] and [[Lemma 2.3]].".into(),
                ),
            })
        }
    }

    fn capabilities(break_title: Option<&'static str>) -> Capabilities {
        Capabilities {
            structure: Arc::new(ScriptedStructure),
            content: Arc::new(NeverCalledClassifier),
            atomicity: Arc::new(BoundaryOracle),
            summary: Arc::new(ScriptedSummarizer { break_title }),
        }
    }

    fn pages() -> Vec<PageText> {
        vec![
            PageText {
                number: 1,
                text: "Thanks to my students for their patience. ".into(),
            },
            PageText {
                number: 2,
                text: format!(
                    "Theorem 1.1 (Monotone Convergence). Every bounded monotone \
                     sequence converges. {} Definition 1.2. A sequence is Cauchy \
                     when terms eventually stay close. {}",
                    "x".repeat(80),
                    "y".repeat(80)
                ),
            },
        ]
    }

    fn config(root: &std::path::Path) -> ProcessConfig {
        ProcessConfig {
            title_hint: None,
            output_root: root.to_path_buf(),
            atomizer: AtomizerConfig {
                min_split_chars: 40,
                retry_backoff_ms: 1,
                ..Default::default()
            },
        }
    }

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("atomdoc-pipeline-{tag}-{}", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn full_pipeline_produces_a_linked_vault() {
        let root = temp_root("full");
        let result = process(
            &pages(),
            &capabilities(None),
            &config(&root),
            &CancelSignal::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(result.job.stage, JobStage::Completed);
        assert_eq!(result.job.title, "Sequences and Series");
        let vault = result.vault_path.clone().unwrap();
        assert!(vault.ends_with("sequences-and-series"));
        assert!(vault.join("manifest.json").exists());
        assert!(vault.join("links.json").exists());
        assert!(vault.join("job.json").exists());

        // Both split atoms were filled and linked; the unknown "Lemma 2.3"
        // reference stayed a placeholder with a warning, and the export
        // still succeeded.
        assert!(result.report.counts.filled >= 2);
        assert!(
            result
                .report
                .warnings
                .iter()
                .any(|w| w.kind == WarningKind::LinkUnresolved && w.message.contains("Lemma 2.3"))
        );
        assert!(result.report.failed_nodes.is_empty());
        assert!(result.unit_count >= 4);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn incomplete_summary_degrades_to_failed_node() {
        let root = temp_root("failed");
        let result = process(
            &pages(),
            &capabilities(Some("Monotone Convergence Theorem")),
            &config(&root),
            &CancelSignal::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(result.job.stage, JobStage::Completed);
        assert_eq!(result.report.failed_nodes.len(), 1);
        assert_eq!(result.report.counts.failed, 1);
        // The failed node is still part of the emitted vault.
        assert!(result.vault_path.is_some());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn cancellation_is_resumable_not_fatal() {
        let root = temp_root("cancel");
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result = process(
            &pages(),
            &capabilities(None),
            &config(&root),
            &cancel,
            &SilentProgress,
        )
        .await
        .unwrap();

        assert!(result.report.cancelled);
        assert_eq!(result.job.stage, JobStage::Cancelled);
        assert!(result.vault_path.is_none());

        // The snapshot is on disk with a resumable tree.
        let snapshot_path = root.join("sequences-and-series").join("job.json");
        let snapshot: JobSnapshot =
            serde_json::from_str(&std::fs::read_to_string(&snapshot_path).unwrap()).unwrap();
        assert_eq!(snapshot.snapshot_version, CURRENT_SCHEMA_VERSION);
        let tree: DocumentTree = serde_json::from_value(snapshot.tree).unwrap();
        tree.verify().unwrap();
        // Nothing was forced into a fake terminal state.
        for id in tree.preorder() {
            let node = tree.get(&id).unwrap();
            assert_ne!(node.status, AtomizationStatus::Filled);
        }

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let err = process(
            &[],
            &capabilities(None),
            &config(&temp_root("empty")),
            &CancelSignal::new(),
            &SilentProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AtomdocError::Validation { .. }));
    }
}
