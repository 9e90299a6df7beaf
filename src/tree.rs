//! Generic ordered content tree.
//!
//! A [`ConfigTree`] node holds string-keyed scalar attributes (lookup order
//! irrelevant, last write wins) and an ordered sequence of named children.
//! Several children may share a name, and child order is semantically
//! meaningful: overlay merging appends later overlays after earlier ones.
//!
//! Trees are produced by parsing YAML documents. A mapping value becomes one
//! named child, a sequence of mappings becomes several children sharing that
//! name, and everything else becomes an attribute. The reserved attributes
//! `ifdef`/`ifndef` make a child conditional on the active define set and
//! are stripped from the parsed node.

use crate::defines::DefineMap;
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const IFDEF_KEY: &str = "ifdef";
const IFNDEF_KEY: &str = "ifndef";

/// One node of an ordered, hierarchical content document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    attrs: BTreeMap<String, String>,
    children: Vec<(String, ConfigTree)>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the node has neither attributes nor children.
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty() && self.children.is_empty()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Attribute value, or `default` when absent or empty.
    pub fn attr_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        match self.attr(name) {
            Some(v) if !v.is_empty() => v,
            _ => default,
        }
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Append a child and return a reference to it.
    pub fn add_child(&mut self, name: impl Into<String>, child: ConfigTree) -> &mut ConfigTree {
        self.children.push((name.into(), child));
        &mut self.children.last_mut().expect("just pushed").1
    }

    /// All children with the given name, in document order.
    pub fn children<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a ConfigTree> + use<'a, 'b> {
        self.children
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, c)| c)
    }

    pub fn children_mut<'a, 'b>(
        &'a mut self,
        name: &'b str,
    ) -> impl Iterator<Item = &'a mut ConfigTree> + use<'a, 'b> {
        self.children
            .iter_mut()
            .filter(move |(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&ConfigTree> {
        self.children(name).next()
    }

    /// First child with the given name whose `attr` equals `value`.
    pub fn find_child(&self, name: &str, attr: &str, value: &str) -> Option<&ConfigTree> {
        self.children(name).find(|c| c.attr(attr) == Some(value))
    }

    /// Every child with its name, in document order.
    pub fn all_children(&self) -> impl Iterator<Item = (&str, &ConfigTree)> {
        self.children.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn all_children_mut(&mut self) -> impl Iterator<Item = (&str, &mut ConfigTree)> {
        self.children.iter_mut().map(|(n, c)| (n.as_str(), c))
    }

    /// Merge `other` into this node: attributes last-write-wins, children
    /// appended after the existing ones.
    pub fn append(&mut self, other: ConfigTree) {
        self.attrs.extend(other.attrs);
        self.children.extend(other.children);
    }

    /// Move every child of `other` named `name` to the end of this node's
    /// children, preserving their relative order. This is the cross-tree
    /// merge step: the moved nodes keep whatever identity annotations they
    /// carry, so they stay traceable to their origin.
    pub fn append_children_by_move(&mut self, other: &mut ConfigTree, name: &str) {
        let mut kept = Vec::with_capacity(other.children.len());
        for (n, c) in other.children.drain(..) {
            if n == name {
                self.children.push((n, c));
            } else {
                kept.push((n, c));
            }
        }
        other.children = kept;
    }

    /// Remove children named `name` for which `pred` returns true.
    pub fn remove_children(&mut self, name: &str, mut pred: impl FnMut(&ConfigTree) -> bool) {
        self.children.retain(|(n, c)| n != name || !pred(c));
    }

    /// Flatten all children named `name` into a single node: attributes
    /// merged last-write-wins, grandchildren concatenated in order.
    pub fn merged_children(&self, name: &str) -> ConfigTree {
        let mut merged = ConfigTree::new();
        for child in self.children(name) {
            merged.append(child.clone());
        }
        merged
    }

    /// Parse a YAML document into a tree under the given define set.
    ///
    /// Returns an error message without path context; callers wrap it into
    /// a `StoreError` with the offending path.
    pub fn from_yaml_str(text: &str, defines: &DefineMap) -> Result<ConfigTree, String> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
        match value {
            Value::Null => Ok(ConfigTree::new()),
            Value::Mapping(map) => {
                // The root is never conditional; ifdef/ifndef only gate children.
                let mut root = ConfigTree::new();
                fill_node(&mut root, &map, defines)?;
                Ok(root)
            }
            _ => Err("document root must be a mapping".to_string()),
        }
    }

    /// Canonical JSON rendering, deterministic for identical content.
    fn canonical_value(&self) -> serde_json::Value {
        let attrs: serde_json::Map<String, serde_json::Value> = self
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let children: Vec<serde_json::Value> = self
            .children
            .iter()
            .map(|(n, c)| {
                serde_json::Value::Array(vec![
                    serde_json::Value::String(n.clone()),
                    c.canonical_value(),
                ])
            })
            .collect();
        serde_json::json!({ "attrs": attrs, "children": children })
    }

    /// Content hash of this node (hex SHA-256 of the canonical rendering).
    ///
    /// Used for the multiplayer hash table: two nodes hash equal iff their
    /// attributes and ordered child structure are identical.
    pub fn content_hash(&self) -> String {
        let bytes =
            serde_json::to_vec(&self.canonical_value()).expect("canonical value serializes");
        let digest = Sha256::digest(&bytes);
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }
}

/// Convert a YAML scalar to its attribute string form.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Whether a child mapping passes the define filter.
fn passes_filter(map: &serde_yaml::Mapping, defines: &DefineMap) -> bool {
    if let Some(Value::String(name)) = map.get(IFDEF_KEY) {
        if defines.get(name.as_str()) != Some(&true) {
            return false;
        }
    }
    if let Some(Value::String(name)) = map.get(IFNDEF_KEY) {
        if defines.get(name.as_str()) == Some(&true) {
            return false;
        }
    }
    true
}

fn fill_node(
    node: &mut ConfigTree,
    map: &serde_yaml::Mapping,
    defines: &DefineMap,
) -> Result<(), String> {
    for (key, value) in map {
        let key = match key {
            Value::String(s) => s.clone(),
            other => scalar_to_string(other)
                .ok_or_else(|| "mapping keys must be scalars".to_string())?,
        };
        if key == IFDEF_KEY || key == IFNDEF_KEY {
            continue;
        }
        match value {
            Value::Mapping(child_map) => {
                if passes_filter(child_map, defines) {
                    let mut child = ConfigTree::new();
                    fill_node(&mut child, child_map, defines)?;
                    node.children.push((key, child));
                }
            }
            Value::Sequence(seq) => {
                for item in seq {
                    let Value::Mapping(child_map) = item else {
                        return Err(format!(
                            "sequence under key \"{key}\" must contain mappings"
                        ));
                    };
                    if passes_filter(child_map, defines) {
                        let mut child = ConfigTree::new();
                        fill_node(&mut child, child_map, defines)?;
                        node.children.push((key.clone(), child));
                    }
                }
            }
            scalar => {
                let text = scalar_to_string(scalar)
                    .ok_or_else(|| format!("unsupported value under key \"{key}\""))?;
                node.attrs.insert(key, text);
            }
        }
    }
    Ok(())
}
