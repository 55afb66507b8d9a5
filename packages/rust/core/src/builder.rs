//! Structure builder: raw page text → initial document tree.
//!
//! The hierarchy itself comes from the external structure-classification
//! capability; this module's job is to make the result tree-invariant-sound
//! no matter how imperfect the proposal is (conflicting levels, overlapping
//! or out-of-range spans, duplicate titles).

use tracing::{info, instrument, warn};

use atomdoc_providers::{RetryPolicy, StructureClassifier, StructureProposal};
use atomdoc_shared::{ContentCategory, NodeId, NodeKind, PageText, Result};
use atomdoc_tree::{DocumentTree, Node};

/// Join pages into one text with boundary markers the proposer can cite.
pub fn page_annotated_text(pages: &[PageText]) -> String {
    let mut out = String::new();
    for page in pages {
        out.push_str(&format!("\n--- page {} ---\n", page.number));
        out.push_str(&page.text);
    }
    out
}

/// Kebab-case slug for ids and paths.
pub fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '_' { '-' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect();

    // Collapse runs of dashes left by punctuation.
    let mut collapsed = String::with_capacity(slug.len());
    let mut prev_dash = true;
    for c in slug.chars() {
        if c == '-' {
            if !prev_dash {
                collapsed.push('-');
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }
    let collapsed = collapsed.trim_end_matches('-').to_string();

    if collapsed.is_empty() {
        "untitled".to_string()
    } else {
        collapsed
    }
}

/// Build the initial tree from pages and an external structure proposal.
///
/// Transport failures are retried per `retry`; if the capability stays
/// unavailable the builder degrades to a single-child tree holding the whole
/// text, so the pipeline can still atomize something.
#[instrument(skip_all, fields(pages = pages.len()))]
pub async fn build_structure(
    pages: &[PageText],
    classifier: &dyn StructureClassifier,
    title_hint: Option<&str>,
    retry: &RetryPolicy,
) -> Result<DocumentTree> {
    let text = page_annotated_text(pages);

    let proposal = match retry
        .run("structure proposal", || {
            classifier.propose(&text, title_hint)
        })
        .await
    {
        Ok(proposal) => proposal,
        Err(e) => {
            warn!(error = %e, "structure capability unavailable, using flat fallback");
            fallback_proposal(title_hint, text.len())
        }
    };

    let tree = assemble_tree(&proposal, &text, pages);

    info!(
        title = %proposal.title,
        nodes = tree.len(),
        "structure built"
    );

    Ok(tree)
}

/// One chapter holding the whole text, used when no proposal is available.
fn fallback_proposal(title_hint: Option<&str>, text_len: usize) -> StructureProposal {
    StructureProposal {
        title: title_hint.unwrap_or("Untitled Document").to_string(),
        author: None,
        outline: vec![atomdoc_providers::OutlineEntry {
            title: "Full Text".into(),
            kind: NodeKind::Content,
            level: 1,
            category: None,
            start: 0,
            end: text_len,
        }],
    }
}

/// Turn a flat outline into a tree, coercing levels so that every child sits
/// exactly one level below its parent while relative order is preserved.
fn assemble_tree(proposal: &StructureProposal, text: &str, pages: &[PageText]) -> DocumentTree {
    let mut used_ids = std::collections::HashSet::new();
    let root_id = NodeId::new(unique_id(&slugify(&proposal.title), &mut used_ids));

    let root = Node::new(root_id.clone(), proposal.title.clone(), NodeKind::Book, 0);
    let mut tree = DocumentTree::new(root);

    let page_offsets = page_marker_offsets(pages);

    // Stack of (proposed level, node id); the parent of an entry is the
    // deepest stack node whose proposed level is strictly smaller.
    let mut stack: Vec<(u32, NodeId)> = vec![(0, root_id)];

    for entry in &proposal.outline {
        while stack.last().map(|(lvl, _)| *lvl >= entry.level).unwrap_or(false) && stack.len() > 1 {
            stack.pop();
        }
        let parent_id = stack.last().expect("root always on stack").1.clone();

        let id = NodeId::new(unique_id(&slugify(&entry.title), &mut used_ids));
        let mut node = Node::new(id.clone(), entry.title.clone(), entry.kind, 0)
            .with_source_text(slice_span(text, entry.start, entry.end));
        if entry.category == Some(ContentCategory::Meta) {
            node.category = ContentCategory::Meta;
        }
        node.page_start = page_for_offset(&page_offsets, entry.start);
        node.page_end = page_for_offset(&page_offsets, entry.end.saturating_sub(1));

        tree.insert_child(&parent_id, node)
            .expect("parent from stack exists and id is unique");
        stack.push((entry.level, id));
    }

    tree
}

/// Reserve `slug` in `used`, appending a positional suffix on collision.
/// Only the id changes; the title is left as proposed.
fn unique_id(slug: &str, used: &mut std::collections::HashSet<String>) -> String {
    if used.insert(slug.to_string()) {
        return slug.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{slug}-{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Slice a proposed span out of the text, clamped to bounds and char boundaries.
fn slice_span(text: &str, start: usize, end: usize) -> String {
    let mut start = start.min(text.len());
    let mut end = end.min(text.len());
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[start..end].to_string()
}

/// Offsets at which each page's text begins in the annotated concatenation.
fn page_marker_offsets(pages: &[PageText]) -> Vec<(usize, usize)> {
    let mut offsets = Vec::with_capacity(pages.len());
    let mut cursor = 0;
    for page in pages {
        let marker = format!("\n--- page {} ---\n", page.number);
        cursor += marker.len();
        offsets.push((page.number, cursor));
        cursor += page.text.len();
    }
    offsets
}

/// Page number whose text contains the given character offset.
fn page_for_offset(offsets: &[(usize, usize)], offset: usize) -> Option<usize> {
    offsets
        .iter()
        .take_while(|(_, start)| *start <= offset)
        .last()
        .map(|(number, _)| *number)
        .or_else(|| offsets.first().map(|(number, _)| *number))
}
