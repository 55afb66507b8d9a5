//! Core domain types for atomdoc vaults.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for job snapshots and vault manifests.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for processing-job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Stable node identifier, assigned at creation and never reused.
///
/// The structure builder derives ids from slugified titles (with a positional
/// suffix on duplicates); the atomizer derives child ids as
/// `<parent>.<ordinal>`, so replays of the same input produce the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id of the `ordinal`-th child born from a split (1-based).
    pub fn split_child(&self, ordinal: usize) -> Self {
        Self(format!("{}.{ordinal}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Node enums
// ---------------------------------------------------------------------------

/// Structural kind of a document node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Book,
    Chapter,
    Section,
    Subsection,
    Content,
}

impl NodeKind {
    /// Short prefix used when deriving canonical paths.
    pub fn path_prefix(&self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Chapter => "ch",
            Self::Section => "sec",
            Self::Subsection => "sub",
            Self::Content => "atom",
        }
    }
}

/// Knowledge vs meta classification produced by the content filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Knowledge,
    Meta,
}

/// Atomization state machine position for a node.
///
/// `NeedsSplitting` doubles as the structural marker on a parent whose
/// content has been partitioned among children; leaves always end in one of
/// `Atomic`, `Filled`, or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomizationStatus {
    Pending,
    NeedsSplitting,
    Atomic,
    Filled,
    Failed,
}

impl AtomizationStatus {
    /// Whether this status is terminal for a leaf node.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Atomic | Self::Filled | Self::Failed)
    }
}

/// Kind of atomic content unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomType {
    Theorem,
    Definition,
    Lemma,
    Corollary,
    Proposition,
    Example,
    Remark,
}

impl AtomType {
    /// Parse a loosely-cased hint string ("Theorem", "lemma", ...).
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_lowercase().as_str() {
            "theorem" => Some(Self::Theorem),
            "definition" => Some(Self::Definition),
            "lemma" => Some(Self::Lemma),
            "corollary" => Some(Self::Corollary),
            "proposition" => Some(Self::Proposition),
            "example" => Some(Self::Example),
            "remark" => Some(Self::Remark),
            _ => None,
        }
    }

    /// Title-case display label ("Theorem", "Definition", ...).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Theorem => "Theorem",
            Self::Definition => "Definition",
            Self::Lemma => "Lemma",
            Self::Corollary => "Corollary",
            Self::Proposition => "Proposition",
            Self::Example => "Example",
            Self::Remark => "Remark",
        }
    }
}

// ---------------------------------------------------------------------------
// AtomContent
// ---------------------------------------------------------------------------

/// Structured summary of one atomic unit.
///
/// `description` and `statement` are required; a node only reaches `Filled`
/// once both are non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomContent {
    /// Short prose summary of what the unit says and why it matters.
    pub description: String,
    /// The exact statement, LaTeX preserved.
    pub statement: String,
    /// The proof, when one is present in the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    /// Supporting lemmas referenced by the statement or proof, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lemmas: Vec<String>,
    /// Prose pointing at related concepts elsewhere in the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_content: Option<String>,
}

impl AtomContent {
    /// Both required fields are present and non-empty.
    pub fn is_complete(&self) -> bool {
        !self.description.trim().is_empty() && !self.statement.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// One page of extracted source text, in reading order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number.
    pub number: usize,
    /// Raw extracted text for the page.
    pub text: String,
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Non-fatal findings attached to nodes and surfaced in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A node was forced atomic because another split would exceed the depth bound.
    DepthExhausted,
    /// A proposed segmentation failed validation twice and was discarded.
    SegmentationRejected,
    /// An all-whitespace segment was dropped from a proposal.
    EmptySegmentDropped,
    /// The atomicity classifier stayed unreachable through the retry budget.
    ClassifierUnavailable,
    /// A reference names a title with no matching node anywhere in the tree.
    LinkUnresolved,
}

/// A warning recorded against a specific node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub node: NodeId,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, node: NodeId, message: impl Into<String>) -> Self {
        Self {
            kind,
            node,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

/// Pipeline stage a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    BuildingStructure,
    FilteringContent,
    Atomizing,
    FillingContent,
    ResolvingLinks,
    Emitting,
    Completed,
    Cancelled,
    Failed,
}

/// Per-status node counts for progress reporting and the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub needs_splitting: usize,
    pub atomic: usize,
    pub filled: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.needs_splitting + self.atomic + self.filled + self.failed
    }
}

/// Process-wide state for one document's pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Document title (from the structure proposal or a caller hint).
    pub title: String,
    pub stage: JobStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub counts: StatusCounts,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    /// Populated when `stage == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            title: title.into(),
            stage: JobStage::Pending,
            created_at: now,
            updated_at: now,
            counts: StatusCounts::default(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Advance to a new stage, stamping the update time.
    pub fn advance(&mut self, stage: JobStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }
}

/// Versioned boundary artifact handed to the surrounding workflow layer:
/// the job record plus a serialized tree, enough to resume or inspect a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub snapshot_version: u32,
    pub job: Job,
    /// Serialized `DocumentTree` (kept opaque here to avoid a crate cycle).
    pub tree: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Job-level cancellation flag, cloned into every worker.
///
/// Checked at batch boundaries and before each external call; mechanical
/// tree operations never observe it.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
