//! Two-pass cross-reference resolution over the finished tree.
//!
//! Pass 1 walks the tree depth-first and assigns every node a canonical
//! relative path, building title indexes as it goes. Pass 2 rewrites the
//! references inside `lemmas` and `related_content` into relative markdown
//! links against those indexes. The passes are strictly sequential and pass 2
//! never mutates the indexes, so resolution is order-independent and
//! re-runnable.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use atomdoc_shared::{AtomType, AtomizationStatus, NodeId, Result, Warning, WarningKind};
use atomdoc_tree::DocumentTree;

use crate::builder::slugify;

/// Title indexes built during registration.
#[derive(Debug, Default)]
pub struct LinkIndex {
    /// Case-normalized exact title → path; first node in traversal order wins.
    exact: HashMap<String, String>,
    /// (atom type, normalized title, path) in traversal order, for
    /// type-qualified partial matches.
    typed: Vec<(AtomType, String, String)>,
}

impl LinkIndex {
    /// Resolve a reference title: exact match first, then a partial match
    /// among atoms of the type named by the reference itself.
    fn resolve(&self, reference: &str) -> Option<&str> {
        let normalized = normalize_title(reference);
        if let Some(path) = self.exact.get(&normalized) {
            return Some(path);
        }

        let ref_type = reference
            .split_whitespace()
            .next()
            .and_then(AtomType::from_hint)?;

        self.typed
            .iter()
            .find(|(atom_type, title, _)| {
                *atom_type == ref_type
                    && (title.contains(&normalized) || normalized.contains(title.as_str()))
            })
            .map(|(_, _, path)| path.as_str())
    }
}

/// Summary of a link-resolution run.
#[derive(Debug, Default)]
pub struct LinkOutcome {
    pub resolved: usize,
    pub unresolved: usize,
    pub warnings: Vec<Warning>,
    /// Cross-reference edges (from path, to path) for the link graph.
    pub edges: Vec<(String, String)>,
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Pass 1: registration
// ---------------------------------------------------------------------------

/// Assign every node its canonical path and build the title indexes.
///
/// Paths are `<kind-prefix><ordinal>-<title-slug>` segments nested under the
/// parent's directory; nodes with children own a directory and an `index`
/// file. Slug collisions get a `-2`, `-3`… suffix in traversal order, so the
/// outcome is deterministic for a given tree.
#[instrument(skip_all, fields(nodes = tree.len()))]
pub fn register_paths(tree: &mut DocumentTree) -> Result<LinkIndex> {
    let mut index = LinkIndex::default();
    let mut used_paths: HashSet<String> = HashSet::new();

    for id in tree.preorder() {
        let path = if &id == tree.root_id() {
            "index".to_string()
        } else {
            let node = tree.expect(&id)?;
            let parent_id = node
                .parent
                .clone()
                .expect("non-root node always has a parent");
            let parent = tree.expect(&parent_id)?;

            let position = parent
                .children
                .iter()
                .position(|child| *child == id)
                .expect("child listed under its parent")
                + 1;

            let parent_dir = if &parent_id == tree.root_id() {
                String::new()
            } else {
                let parent_path = parent
                    .resolved_path
                    .as_deref()
                    .expect("parents are registered before children in pre-order");
                format!("{}/", parent_path.trim_end_matches("index").trim_end_matches('/'))
            };

            let segment = format!(
                "{}{:02}-{}",
                node.kind.path_prefix(),
                position,
                slugify(&node.title)
            );
            let segment = disambiguate(&parent_dir, &segment, node.is_leaf(), &mut used_paths);

            if tree.expect(&id)?.is_leaf() {
                format!("{parent_dir}{segment}")
            } else {
                format!("{parent_dir}{segment}/index")
            }
        };

        let node = tree.expect_mut(&id)?;
        node.resolved_path = Some(path.clone());

        let normalized = normalize_title(&node.title);
        index.exact.entry(normalized.clone()).or_insert(path.clone());
        if let Some(atom_type) = node.atom_type {
            index.typed.push((atom_type, normalized, path));
        }
    }

    info!(
        titles = index.exact.len(),
        typed = index.typed.len(),
        "paths registered"
    );

    Ok(index)
}

/// Reserve a path segment under `dir`, suffixing on collision.
fn disambiguate(
    dir: &str,
    segment: &str,
    is_leaf: bool,
    used: &mut HashSet<String>,
) -> String {
    let full = |seg: &str| {
        if is_leaf {
            format!("{dir}{seg}")
        } else {
            format!("{dir}{seg}/index")
        }
    };

    if used.insert(full(segment)) {
        return segment.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{segment}-{n}");
        if used.insert(full(&candidate)) {
            return candidate;
        }
        n += 1;
    }
}

// ---------------------------------------------------------------------------
// Pass 2: rewrite
// ---------------------------------------------------------------------------

/// Rewrite placeholder references in every filled node into relative links.
///
/// Resolution order: exact title match, then same-atom-type partial match,
/// else the reference keeps the explicit `[Title](#)` placeholder and a
/// warning is recorded — never silently dropped.
#[instrument(skip_all)]
pub fn resolve_links(tree: &mut DocumentTree, index: &LinkIndex) -> Result<LinkOutcome> {
    let markdown_link =
        regex::Regex::new(r"^\[([^\]]+)\]\(([^)]*)\)$").expect("static regex compiles");
    let wiki_marker = regex::Regex::new(r"\[\[([^\[\]]+)\]\]").expect("static regex compiles");
    let placeholder = regex::Regex::new(r"\[([^\]]+)\]\(#\)").expect("static regex compiles");

    let mut outcome = LinkOutcome::default();

    for id in tree.preorder() {
        let node = tree.expect(&id)?;
        if node.status != AtomizationStatus::Filled {
            continue;
        }
        let own_path = node
            .resolved_path
            .clone()
            .expect("registration pass ran first");
        let Some(mut atom) = node.atom_content.clone() else {
            continue;
        };

        // Lemma entries are bare titles (or previously rewritten links).
        for entry in atom.lemmas.iter_mut() {
            let label = match markdown_link.captures(entry.as_str()) {
                Some(caps) if &caps[2] != "#" => continue, // already resolved
                Some(caps) => caps[1].to_string(),
                None => entry.clone(),
            };
            *entry = rewrite_reference(&label, &own_path, index, &id, &mut outcome);
        }

        // Related content carries inline [[Title]] markers; unresolved
        // placeholders from an earlier run are retried as well.
        if let Some(related) = atom.related_content.take() {
            let related = wiki_marker
                .replace_all(&related, |caps: &regex::Captures<'_>| {
                    rewrite_reference(&caps[1], &own_path, index, &id, &mut outcome)
                })
                .to_string();
            let related = placeholder
                .replace_all(&related, |caps: &regex::Captures<'_>| {
                    rewrite_reference(&caps[1], &own_path, index, &id, &mut outcome)
                })
                .to_string();
            atom.related_content = Some(related);
        }

        tree.expect_mut(&id)?.atom_content = Some(atom);
    }

    info!(
        resolved = outcome.resolved,
        unresolved = outcome.unresolved,
        "links resolved"
    );

    Ok(outcome)
}

/// Resolve one reference to a markdown link, recording the outcome.
fn rewrite_reference(
    label: &str,
    own_path: &str,
    index: &LinkIndex,
    node: &NodeId,
    outcome: &mut LinkOutcome,
) -> String {
    match index.resolve(label) {
        Some(target) => {
            outcome.resolved += 1;
            outcome
                .edges
                .push((own_path.to_string(), target.to_string()));
            format!("[{label}]({})", relative_link(own_path, target))
        }
        None => {
            debug!(%node, label, "reference left unresolved");
            outcome.unresolved += 1;
            outcome.warnings.push(Warning::new(
                WarningKind::LinkUnresolved,
                node.clone(),
                format!("no node matches reference '{label}'"),
            ));
            format!("[{label}](#)")
        }
    }
}

/// Relative markdown link from one logical path to another (`.md` appended).
pub fn relative_link(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = {
        let mut segs: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
        segs.pop(); // drop the file segment
        segs
    };
    let to_segs: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from_dir
        .iter()
        .zip(to_segs.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = from_dir.len() - common;
    let down = to_segs[common..].join("/");

    if ups == 0 {
        format!("./{down}.md")
    } else {
        format!("{}{down}.md", "../".repeat(ups))
    }
}
