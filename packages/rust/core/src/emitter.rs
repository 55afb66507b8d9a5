//! Deterministic serialization of the finished tree into a vault of
//! cross-linked markdown units.
//!
//! One markdown unit per node: filled atoms render their structured content,
//! structural nodes render a navigation index, meta and failed nodes render
//! their raw source (failed ones with a review notice). Alongside the units
//! the vault carries `manifest.json` (checksummed unit listing) and
//! `links.json` (the cross-reference graph). The same tree always produces
//! byte-identical units; only the manifest carries a generation timestamp.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use atomdoc_shared::{
    AtomizationStatus, AtomdocError, CURRENT_SCHEMA_VERSION, ContentCategory, Job, Result,
    StatusCounts,
};
use atomdoc_tree::{DocumentTree, Node};

use crate::linker::relative_link;

/// One output file of the vault.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedUnit {
    /// Vault-relative path, extension included.
    pub path: String,
    pub content: String,
}

/// Checksummed entry of the manifest's unit listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitMeta {
    pub path: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// The `manifest.json` structure at the vault root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultManifest {
    pub schema_version: u32,
    pub job_id: String,
    pub title: String,
    pub generated_at: String,
    pub counts: StatusCounts,
    pub warning_count: usize,
    pub units: Vec<UnitMeta>,
}

/// One edge of the link graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkEdge {
    pub from: String,
    pub to: String,
}

/// Serialize the tree in pre-order into markdown units.
///
/// Requires the link resolver's registration pass to have assigned every
/// node a path.
#[instrument(skip_all, fields(nodes = tree.len()))]
pub fn emit(tree: &DocumentTree) -> Result<Vec<EmittedUnit>> {
    let mut units = Vec::with_capacity(tree.len());

    for id in tree.preorder() {
        let node = tree.expect(&id)?;
        let path = node.resolved_path.as_deref().ok_or_else(|| {
            AtomdocError::validation(format!("node '{id}' has no resolved path; run the link resolver first"))
        })?;

        units.push(EmittedUnit {
            path: format!("{path}.md"),
            content: render_node(tree, node, path),
        });
    }

    info!(units = units.len(), "tree emitted");
    Ok(units)
}

/// Render the link graph as a deterministic `links.json` body.
pub fn render_links_json(edges: &[(String, String)]) -> String {
    let mut edges: Vec<LinkEdge> = edges
        .iter()
        .map(|(from, to)| LinkEdge {
            from: from.clone(),
            to: to.clone(),
        })
        .collect();
    edges.sort();
    edges.dedup();

    serde_json::to_string_pretty(&edges).expect("edge list always serializes")
}

/// Build the vault manifest for a finished emission.
pub fn build_manifest(job: &Job, tree: &DocumentTree, units: &[EmittedUnit]) -> VaultManifest {
    let unit_metas = units
        .iter()
        .map(|unit| {
            let mut hasher = Sha256::new();
            hasher.update(unit.content.as_bytes());
            UnitMeta {
                path: unit.path.clone(),
                sha256: format!("{:x}", hasher.finalize()),
                size_bytes: unit.content.len(),
            }
        })
        .collect();

    VaultManifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        job_id: job.id.to_string(),
        title: job.title.clone(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        counts: tree.status_counts(),
        warning_count: job.warnings.len(),
        units: unit_metas,
    }
}

/// Write units and metadata files under `vault_dir` (temp file + rename).
#[instrument(skip_all, fields(vault = %vault_dir.display(), units = units.len()))]
pub fn write_vault(
    vault_dir: &Path,
    units: &[EmittedUnit],
    manifest: &VaultManifest,
    links_json: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(vault_dir).map_err(|e| AtomdocError::io(vault_dir, e))?;

    for unit in units {
        write_file(&vault_dir.join(&unit.path), &unit.content)?;
    }

    let manifest_body = serde_json::to_string_pretty(manifest)
        .map_err(|e| AtomdocError::validation(format!("manifest serialization: {e}")))?;
    write_file(&vault_dir.join("manifest.json"), &manifest_body)?;
    write_file(&vault_dir.join("links.json"), links_json)?;

    info!(path = %vault_dir.display(), "vault written");
    Ok(vault_dir.to_path_buf())
}

fn write_file(target: &Path, content: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AtomdocError::io(parent, e))?;
    }

    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AtomdocError::validation(format!("bad unit path {target:?}")))?;
    let temp = target.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| AtomdocError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| AtomdocError::io(target, e))?;

    debug!(file = %target.display(), size = content.len(), "wrote unit");
    Ok(())
}

// ---------------------------------------------------------------------------
// Markdown rendering
// ---------------------------------------------------------------------------

fn render_node(tree: &DocumentTree, node: &Node, own_path: &str) -> String {
    let mut lines: Vec<String> = vec![format!("# {}", node.title), String::new()];

    if let Some(parent_id) = &node.parent {
        if let Some(parent) = tree.get(parent_id) {
            if let Some(parent_path) = parent.resolved_path.as_deref() {
                lines.push(format!(
                    "> Parent: [{}]({})",
                    parent.title,
                    relative_link(own_path, parent_path)
                ));
            }
        }
    }

    if !node.children.is_empty() {
        let child_links: Vec<String> = node
            .children
            .iter()
            .filter_map(|child_id| tree.get(child_id))
            .filter_map(|child| {
                child.resolved_path.as_deref().map(|child_path| {
                    format!("[{}]({})", child.title, relative_link(own_path, child_path))
                })
            })
            .collect();
        lines.push(format!("> Children: {}", child_links.join(", ")));
    }

    lines.push(String::new());

    match (&node.atom_content, node.status) {
        (Some(atom), AtomizationStatus::Filled) => {
            lines.push("## Description".into());
            lines.push(String::new());
            lines.push(atom.description.clone());
            lines.push(String::new());

            let heading = node
                .atom_type
                .map(|t| t.label().to_string())
                .unwrap_or_else(|| "Statement".to_string());
            lines.push(format!("## {heading}"));
            lines.push(String::new());
            lines.push(atom.statement.clone());
            lines.push(String::new());

            if let Some(proof) = &atom.proof {
                lines.push("## Proof".into());
                lines.push(String::new());
                lines.push(proof.clone());
                lines.push(String::new());
            }

            if !atom.lemmas.is_empty() {
                lines.push("## Supporting Lemmas".into());
                lines.push(String::new());
                for lemma in &atom.lemmas {
                    lines.push(format!("- {lemma}"));
                }
                lines.push(String::new());
            }

            if let Some(related) = &atom.related_content {
                lines.push("## Related Content".into());
                lines.push(String::new());
                lines.push(related.clone());
                lines.push(String::new());
            }
        }
        (_, AtomizationStatus::Failed) => {
            lines.push("> Needs review: no summary could be generated for this unit.".into());
            lines.push(String::new());
            if !node.source_text.is_empty() {
                lines.push(node.source_text.clone());
                lines.push(String::new());
            }
        }
        _ => {
            // Structural index units stay lightweight; meta leaves keep their
            // raw text for navigational completeness.
            if node.is_leaf() && !node.source_text.is_empty() {
                lines.push(node.source_text.clone());
                lines.push(String::new());
            }
        }
    }

    if node.category == ContentCategory::Meta {
        lines.push("---".into());
        lines.push("*Front matter / navigation content.*".into());
        lines.push(String::new());
    }

    let mut out = lines.join("\n");
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}
