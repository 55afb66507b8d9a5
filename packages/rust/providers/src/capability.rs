//! The three external capabilities, as vendor-agnostic interfaces.
//!
//! Each capability wraps a [`Provider`], owns its prompt, and parses the
//! model's JSON reply into typed values. The pipeline stages depend only on
//! the traits here, never on a concrete vendor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use atomdoc_shared::{
    AppConfig, AtomContent, AtomType, AtomdocError, ContentCategory, NodeKind, Result, Task,
};

use crate::registry::provider_for_task;
use crate::traits::{CompletionRequest, Provider};

// Prompt clip budgets, in characters.
const STRUCTURE_CLIP: usize = 60_000;
const ATOMICITY_CLIP: usize = 15_000;
const SUMMARY_CLIP: usize = 12_000;

// ---------------------------------------------------------------------------
// Capability result types
// ---------------------------------------------------------------------------

/// One entry of a proposed document outline, in reading order.
#[derive(Debug, Clone)]
pub struct OutlineEntry {
    pub title: String,
    pub kind: NodeKind,
    /// Proposed nesting level (1 = top-level under the document root).
    pub level: u32,
    /// Knowledge/meta hint, when the proposer offers one.
    pub category: Option<ContentCategory>,
    /// Character span into the concatenated page text.
    pub start: usize,
    pub end: usize,
}

/// A candidate hierarchy for the whole document.
#[derive(Debug, Clone)]
pub struct StructureProposal {
    pub title: String,
    pub author: Option<String>,
    pub outline: Vec<OutlineEntry>,
}

/// One proposed sub-division of a node's content.
#[derive(Debug, Clone)]
pub struct Segment {
    pub title: String,
    pub atom_type: Option<AtomType>,
    pub text: String,
}

/// Verdict of the atomicity oracle for one node.
#[derive(Debug, Clone)]
pub enum AtomicityVerdict {
    /// The content is one indivisible unit.
    Atomic { atom_type: Option<AtomType> },
    /// The content divides into the given segments, in order.
    Split { segments: Vec<Segment> },
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Proposes a document hierarchy from page-annotated text.
#[async_trait]
pub trait StructureClassifier: Send + Sync {
    async fn propose(&self, text: &str, title_hint: Option<&str>) -> Result<StructureProposal>;
}

/// Classifies a section as knowledge or meta content.
#[async_trait]
pub trait ContentClassifier: Send + Sync {
    async fn classify(&self, title: &str, preview: &str) -> Result<ContentCategory>;
}

/// Decides whether content is atomic, and proposes segments when it is not.
#[async_trait]
pub trait AtomicityOracle: Send + Sync {
    /// `strict` requests a segmentation whose parts reproduce the input
    /// verbatim; used on the retry after a failed validation.
    async fn classify(&self, title: &str, content: &str, strict: bool) -> Result<AtomicityVerdict>;
}

/// Produces the structured summary for one atomic unit.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        title: &str,
        atom_type: Option<AtomType>,
        content: &str,
    ) -> Result<AtomContent>;
}

/// The full capability set used by one pipeline run.
#[derive(Clone)]
pub struct Capabilities {
    pub structure: Arc<dyn StructureClassifier>,
    pub content: Arc<dyn ContentClassifier>,
    pub atomicity: Arc<dyn AtomicityOracle>,
    pub summary: Arc<dyn Summarizer>,
}

impl Capabilities {
    /// Build the LLM-backed capability set from configuration, one provider
    /// per task (tasks may share a vendor or override it).
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let structure_provider = provider_for_task(Task::Structure, config)?;
        let atomicity_provider = provider_for_task(Task::Atomicity, config)?;
        let summary_provider = provider_for_task(Task::Summary, config)?;

        Ok(Self {
            structure: Arc::new(LlmStructureClassifier {
                provider: structure_provider.clone(),
            }),
            content: Arc::new(LlmContentClassifier {
                provider: structure_provider,
            }),
            atomicity: Arc::new(LlmAtomicityOracle {
                provider: atomicity_provider,
            }),
            summary: Arc::new(LlmSummarizer {
                provider: summary_provider,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// JSON response handling
// ---------------------------------------------------------------------------

/// Extract the JSON payload from a model reply, tolerating markdown fences
/// and prose around the object.
pub fn extract_json(response: &str) -> Result<serde_json::Value> {
    let text = response.trim();

    let fence =
        regex::Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?```").expect("static regex compiles");
    let candidate = if let Some(caps) = fence.captures(text) {
        caps[1].trim().to_string()
    } else {
        match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
            _ => text.to_string(),
        }
    };

    serde_json::from_str(&candidate)
        .map_err(|e| AtomdocError::parse(format!("model reply is not valid JSON: {e}")))
}

/// Clip content to a character budget, marking the cut.
fn clip(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        return content.to_string();
    }
    let mut end = max_chars;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n\n[... content truncated ...]", &content[..end])
}

fn parse_kind(raw: &str) -> NodeKind {
    match raw.trim().to_lowercase().as_str() {
        "book" => NodeKind::Book,
        "chapter" => NodeKind::Chapter,
        "section" => NodeKind::Section,
        "subsection" => NodeKind::Subsection,
        _ => NodeKind::Content,
    }
}

fn parse_category(raw: &str) -> Option<ContentCategory> {
    match raw.trim().to_lowercase().as_str() {
        "knowledge" => Some(ContentCategory::Knowledge),
        "meta" => Some(ContentCategory::Meta),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Structure classification
// ---------------------------------------------------------------------------

const STRUCTURE_SYSTEM: &str =
    "You are a mathematical document analyzer. Respond only with valid JSON.";

struct LlmStructureClassifier {
    provider: Arc<dyn Provider>,
}

#[derive(Deserialize)]
struct RawProposal {
    title: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    outline: Vec<RawOutlineEntry>,
}

#[derive(Deserialize)]
struct RawOutlineEntry {
    title: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    level: Option<u32>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    end: Option<usize>,
}

fn parse_proposal(reply: &str, text_len: usize) -> Result<StructureProposal> {
    let value = extract_json(reply)?;
    let raw: RawProposal = serde_json::from_value(value)
        .map_err(|e| AtomdocError::parse(format!("structure proposal shape: {e}")))?;

    let outline = raw
        .outline
        .into_iter()
        .map(|entry| OutlineEntry {
            title: entry.title,
            kind: entry.kind.as_deref().map(parse_kind).unwrap_or(NodeKind::Section),
            level: entry.level.unwrap_or(1).max(1),
            category: entry.category.as_deref().and_then(parse_category),
            start: entry.start.unwrap_or(0).min(text_len),
            end: entry.end.unwrap_or(text_len).min(text_len),
        })
        .collect();

    Ok(StructureProposal {
        title: raw.title,
        author: raw.author,
        outline,
    })
}

#[async_trait]
impl StructureClassifier for LlmStructureClassifier {
    async fn propose(&self, text: &str, title_hint: Option<&str>) -> Result<StructureProposal> {
        let clipped = clip(text, STRUCTURE_CLIP);
        let hint_line = match title_hint {
            Some(hint) => format!("The document title might be: {hint}"),
            None => "Detect the document title from the content.".to_string(),
        };

        let prompt = format!(
            r#"Analyze this mathematical document and extract its hierarchical outline.

{hint_line}

The text contains `--- page N ---` boundary markers. For each outline entry
report the character span [start, end) into the text EXCLUDING nothing — spans
of sibling entries must not overlap.

Return JSON in this exact format:
{{
  "title": "Document Title",
  "author": "Author Name or null",
  "outline": [
    {{"title": "Chapter 1: Limits", "kind": "chapter", "level": 1, "category": "knowledge", "start": 0, "end": 5400}},
    {{"title": "1.1 Definition of a Limit", "kind": "section", "level": 2, "category": "knowledge", "start": 120, "end": 2600}},
    {{"title": "Preface", "kind": "chapter", "level": 1, "category": "meta", "start": 5400, "end": 6000}}
  ]
}}

Valid kinds: book, chapter, section, subsection, content.
Valid categories: "knowledge" (substantive material) or "meta" (preface,
table of contents, index, bibliography, acknowledgements).

DOCUMENT TEXT:
{clipped}"#
        );

        let reply = self
            .provider
            .complete(
                &CompletionRequest::new(prompt)
                    .with_system(STRUCTURE_SYSTEM)
                    .with_temperature(0.1)
                    .with_max_tokens(16_000),
            )
            .await?;

        debug!(provider = self.provider.name(), "structure proposal received");
        parse_proposal(&reply, text.len())
    }
}

// ---------------------------------------------------------------------------
// Content classification
// ---------------------------------------------------------------------------

struct LlmContentClassifier {
    provider: Arc<dyn Provider>,
}

#[async_trait]
impl ContentClassifier for LlmContentClassifier {
    async fn classify(&self, title: &str, preview: &str) -> Result<ContentCategory> {
        let prompt = format!(
            r#"Classify this document section as either "knowledge" or "meta".

- "knowledge": substantive educational or mathematical content readers study
- "meta": administrative content such as a preface, acknowledgements, table of
  contents, index, bibliography, or copyright notice

Section Title: {title}
Content Preview: {}

Respond with just one word: "knowledge" or "meta""#,
            clip(preview, 500)
        );

        let reply = self
            .provider
            .complete(
                &CompletionRequest::new(prompt)
                    .with_temperature(0.0)
                    .with_max_tokens(16),
            )
            .await?;

        if reply.to_lowercase().contains("meta") {
            Ok(ContentCategory::Meta)
        } else {
            Ok(ContentCategory::Knowledge)
        }
    }
}

// ---------------------------------------------------------------------------
// Atomicity classification
// ---------------------------------------------------------------------------

const ATOMICITY_SYSTEM: &str =
    "You are a mathematical document analyzer. Respond only with valid JSON.";

struct LlmAtomicityOracle {
    provider: Arc<dyn Provider>,
}

#[derive(Deserialize)]
struct RawVerdict {
    is_atomic: bool,
    #[serde(default)]
    atom_type: Option<String>,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Deserialize)]
struct RawSegment {
    #[serde(default)]
    title: String,
    #[serde(default)]
    atom_type: Option<String>,
    #[serde(default)]
    text: String,
}

fn parse_verdict(reply: &str) -> Result<AtomicityVerdict> {
    let value = extract_json(reply)?;
    let raw: RawVerdict = serde_json::from_value(value)
        .map_err(|e| AtomdocError::parse(format!("atomicity verdict shape: {e}")))?;

    if raw.is_atomic {
        return Ok(AtomicityVerdict::Atomic {
            atom_type: raw.atom_type.as_deref().and_then(AtomType::from_hint),
        });
    }

    let segments = raw
        .segments
        .into_iter()
        .map(|seg| Segment {
            title: seg.title,
            atom_type: seg.atom_type.as_deref().and_then(AtomType::from_hint),
            text: seg.text,
        })
        .collect();

    Ok(AtomicityVerdict::Split { segments })
}

#[async_trait]
impl AtomicityOracle for LlmAtomicityOracle {
    async fn classify(&self, title: &str, content: &str, strict: bool) -> Result<AtomicityVerdict> {
        let strict_clause = if strict {
            "\nSTRICT MODE: your previous segmentation did not reconstruct the \
             original text. Copy the text of each segment VERBATIM from the \
             input, in order, with no text missing, repeated, or reworded, and \
             never cut inside a LaTeX math expression.\n"
        } else {
            ""
        };

        let prompt = format!(
            r#"Analyze this mathematical content and decide whether it is a single
atomic concept (exactly one theorem, definition, lemma, corollary,
proposition, example, or remark) or a container of several concepts.
{strict_clause}
If it is NOT atomic, divide it into at least 2 segments. Segment text must be
copied verbatim from the input, in order, covering all of it with no overlap.
Look for theorem/definition/example headings, numbered items, and proofs as
natural boundaries.

Section title: {title}

Content:
---
{}
---

Respond ONLY with valid JSON (no markdown code blocks), one of:
{{"is_atomic": true, "atom_type": "theorem|definition|lemma|corollary|proposition|example|remark"}}
{{"is_atomic": false, "segments": [{{"title": "...", "atom_type": "...", "text": "..."}}]}}"#,
            clip(content, ATOMICITY_CLIP)
        );

        let reply = self
            .provider
            .complete(
                &CompletionRequest::new(prompt)
                    .with_system(ATOMICITY_SYSTEM)
                    .with_temperature(0.1)
                    .with_max_tokens(32_000),
            )
            .await?;

        parse_verdict(&reply)
    }
}

// ---------------------------------------------------------------------------
// Summarization
// ---------------------------------------------------------------------------

const SUMMARY_SYSTEM: &str = "You are a mathematical content summarizer. \
    Preserve all LaTeX notation. Respond only with valid JSON.";

struct LlmSummarizer {
    provider: Arc<dyn Provider>,
}

#[derive(Deserialize)]
struct RawSummary {
    #[serde(default)]
    description: String,
    #[serde(default)]
    statement: String,
    #[serde(default)]
    proof: Option<String>,
    #[serde(default)]
    lemmas: Vec<String>,
    #[serde(default)]
    related_content: Option<String>,
}

fn parse_summary(reply: &str) -> Result<AtomContent> {
    let value = extract_json(reply)?;
    let raw: RawSummary = serde_json::from_value(value)
        .map_err(|e| AtomdocError::parse(format!("summary shape: {e}")))?;

    Ok(AtomContent {
        description: raw.description,
        statement: raw.statement,
        proof: raw.proof.filter(|p| !p.trim().is_empty()),
        lemmas: raw.lemmas,
        related_content: raw.related_content.filter(|r| !r.trim().is_empty()),
    })
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(
        &self,
        title: &str,
        atom_type: Option<AtomType>,
        content: &str,
    ) -> Result<AtomContent> {
        let type_label = atom_type
            .map(|t| t.label().to_lowercase())
            .unwrap_or_else(|| "mathematical concept".to_string());

        let prompt = format!(
            r#"Summarize this mathematical content into a structured record.

Atom Type: {type_label}
Title: {title}

Content:
---
{}
---

IMPORTANT:
- Preserve ALL LaTeX notation exactly as written
- "description" and "statement" are REQUIRED and must be non-empty
- "proof" only if a proof is present in the content
- "lemmas" only if supporting lemmas are mentioned; each entry is the exact
  title of the lemma, nothing else
- "related_content" only if related concepts are discussed; wrap each concept
  title in [[double brackets]]

Return ONLY valid JSON (no markdown code blocks):
{{
  "description": "1-2 sentences on what this {type_label} says and why it matters",
  "statement": "The exact statement with all LaTeX preserved",
  "proof": "The complete proof, or null",
  "lemmas": ["Lemma 2.3"] ,
  "related_content": "Builds on [[Definition of a Limit]], or null"
}}"#,
            clip(content, SUMMARY_CLIP)
        );

        let reply = self
            .provider
            .complete(
                &CompletionRequest::new(prompt)
                    .with_system(SUMMARY_SYSTEM)
                    .with_temperature(0.2)
                    .with_max_tokens(8_000),
            )
            .await?;

        parse_summary(&reply)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
