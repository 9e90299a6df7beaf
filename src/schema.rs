//! Opt-in schema validation for loaded documents.
//!
//! Validation is always advisory: mismatches are collected and logged as
//! warnings, never aborting a load. The schema document lists known tag
//! names with an optional comma-separated attribute allowlist:
//!
//! ```yaml
//! tag:
//!   - name: scenario
//!     attributes: id,name,addon_id,addon_title,addon_version
//!   - name: side
//! ```
//!
//! A tag entry without `attributes` accepts any attribute.

use crate::tree::ConfigTree;
use std::collections::{BTreeMap, BTreeSet};

/// Parsed schema: tag name -> allowed attributes (empty set = any).
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tags: BTreeMap<String, BTreeSet<String>>,
}

impl Schema {
    pub fn from_tree(tree: &ConfigTree) -> Self {
        let mut tags = BTreeMap::new();
        for entry in tree.children("tag") {
            let Some(name) = entry.attr("name") else {
                continue;
            };
            let attrs: BTreeSet<String> = entry
                .attr_or("attributes", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            tags.insert(name.to_string(), attrs);
        }
        Self { tags }
    }

    fn check_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    fn check_attr(&self, tag: &str, attr: &str) -> bool {
        match self.tags.get(tag) {
            Some(allowed) => allowed.is_empty() || allowed.contains(attr),
            None => false,
        }
    }
}

/// Walks a document against a [`Schema`], collecting mismatch messages.
#[derive(Debug)]
pub struct SchemaValidator {
    schema: Schema,
    errors: Vec<String>,
}

impl SchemaValidator {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            errors: Vec::new(),
        }
    }

    /// Validate every node of `tree`. Root attributes are not checked; the
    /// root is a document envelope, not a tagged node.
    pub fn validate(&mut self, tree: &ConfigTree) {
        for (name, child) in tree.all_children() {
            self.walk(name, name, child);
        }
    }

    fn walk(&mut self, path: &str, tag: &str, node: &ConfigTree) {
        if !self.schema.check_tag(tag) {
            self.errors.push(format!("unknown tag [{path}]"));
            return;
        }
        for (attr, _) in node.attrs() {
            if !self.schema.check_attr(tag, attr) {
                self.errors
                    .push(format!("unknown attribute \"{attr}\" in [{path}]"));
            }
        }
        for (name, child) in node.all_children() {
            let child_path = format!("{path}/{name}");
            self.walk(&child_path, name, child);
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }
}
