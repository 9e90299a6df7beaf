//! Shallow projections rebuilt after every successful resolution.
//!
//! These are pure consumers of the composed view: they never fail on their
//! own, they just log and skip malformed input.

use crate::tree::ConfigTree;
use crate::view::ActiveView;
use std::collections::BTreeMap;
use tracing::warn;

/// Lightweight theme record for the theme selection UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeDescriptor {
    pub id: String,
    pub name: String,
}

/// Everything derived from one resolved view.
#[derive(Debug, Clone, Default)]
pub struct DerivedData {
    /// Unit type nodes from all `units` fragments, keyed by unit id.
    pub unit_types: BTreeMap<String, ConfigTree>,
    /// Terrain rule nodes, taken from the base tree only.
    pub terrain_rules: Vec<ConfigTree>,
    /// Content hash per multiplayer scenario / era id, for network
    /// compatibility checks.
    pub multiplayer_hashes: BTreeMap<String, String>,
    pub themes: Vec<ThemeDescriptor>,
}

/// Rebuild all derived data from scratch for the given view.
pub fn build(view: &ActiveView) -> DerivedData {
    DerivedData {
        unit_types: unit_types(view),
        terrain_rules: view.base().children("terrain").cloned().collect(),
        multiplayer_hashes: multiplayer_hashes_of(view),
        themes: themes(view),
    }
}

fn unit_types(view: &ActiveView) -> BTreeMap<String, ConfigTree> {
    let merged = view.merged_children("units");
    let mut out = BTreeMap::new();
    for unit_type in merged.children("unit_type") {
        match unit_type.attr("id") {
            Some(id) if !id.is_empty() => {
                out.insert(id.to_string(), unit_type.clone());
            }
            _ => warn!("dropping unit_type without id"),
        }
    }
    out
}

/// Hash every multiplayer scenario and era by id. Later duplicates win,
/// matching attribute overwrite semantics elsewhere.
pub fn multiplayer_hashes_of(view: &ActiveView) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for tree in view.trees() {
        out.extend(tree_multiplayer_hashes(tree));
    }
    out
}

/// Same hash table, for a single tree.
pub fn tree_multiplayer_hashes(tree: &ConfigTree) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for tag in ["multiplayer", "era"] {
        for node in tree.children(tag) {
            let Some(id) = node.attr("id") else {
                warn!(tag, "dropping entry without id from hash table");
                continue;
            };
            out.insert(id.to_string(), node.content_hash());
        }
    }
    out
}

fn themes(view: &ActiveView) -> Vec<ThemeDescriptor> {
    view.children("theme")
        .filter_map(|theme| {
            let id = theme.attr_or("id", "");
            if id.is_empty() {
                warn!("dropping theme without id");
                return None;
            }
            Some(ThemeDescriptor {
                id: id.to_string(),
                name: theme.attr_or("name", id).to_string(),
            })
        })
        .collect()
}
