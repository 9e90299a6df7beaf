//! The externally consumed view of the resolved configuration.
//!
//! An [`ActiveView`] is an ordered list of frozen trees: the resolved base
//! tree first, then each enabled overlay. It is rebuilt, never mutated in
//! place, whenever the enabled overlay set changes.

use crate::tree::ConfigTree;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered sequence of tree references: base first, overlays after.
#[derive(Debug, Clone, Default)]
pub struct ActiveView {
    trees: Vec<Arc<ConfigTree>>,
}

impl ActiveView {
    /// Compose a view from the base tree and the enabled registry entries.
    ///
    /// With `enabled = None` every registry entry is included, in registry
    /// iteration order (ascending overlay id, stable across runs). With an
    /// explicit list, entries appear in the caller's order; ids absent from
    /// the registry are silently ignored, since the overlay may simply have
    /// failed to load upstream.
    pub fn compose(
        base: Arc<ConfigTree>,
        registry: &BTreeMap<String, Arc<ConfigTree>>,
        enabled: Option<&[String]>,
    ) -> Self {
        let mut trees = Vec::with_capacity(1 + registry.len());
        trees.push(base);
        match enabled {
            None => trees.extend(registry.values().cloned()),
            Some(ids) => {
                for id in ids {
                    if let Some(tree) = registry.get(id) {
                        trees.push(Arc::clone(tree));
                    }
                }
            }
        }
        Self { trees }
    }

    /// The base tree. A composed view always has one.
    pub fn base(&self) -> &ConfigTree {
        &self.trees[0]
    }

    pub fn trees(&self) -> &[Arc<ConfigTree>] {
        &self.trees
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// All children named `name` across every tree, base first.
    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigTree> {
        self.trees.iter().flat_map(move |t| t.children(name))
    }

    /// First child named `name` with `attr == value`, searching base first.
    pub fn find_child(&self, name: &str, attr: &str, value: &str) -> Option<&ConfigTree> {
        self.trees.iter().find_map(|t| t.find_child(name, attr, value))
    }

    /// Flatten all children named `name` across every tree into one node.
    pub fn merged_children(&self, name: &str) -> ConfigTree {
        let mut merged = ConfigTree::new();
        for tree in &self.trees {
            merged.append(tree.merged_children(name));
        }
        merged
    }
}
