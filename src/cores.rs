//! Core discovery, validation, and selection.
//!
//! Cores are the base rulesets a session builds on. Candidates come from the
//! mainline cores manifest plus any `cores.yaml` an installed overlay ships;
//! each candidate is validated independently and malformed ones are skipped
//! with a focused dialog, never failing the pass. Exactly one core ends up
//! active; if the preferred one is invalid the preference falls back to
//! "default", and a missing "default" is fatal.

use crate::cache::ContentCache;
use crate::error::ResolveError;
use crate::prefs::{PreferenceStore, DEFAULT_CORE_ID};
use crate::schema::SchemaValidator;
use crate::store::{ContentPaths, NameMode};
use crate::tree::ConfigTree;
use crate::dispatch::UserNotifier;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Validated record of one selectable core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreDescriptor {
    pub id: String,
    pub path: String,
}

/// Descriptor records from a tree's `core` metadata children.
pub fn core_descriptors(tree: &ConfigTree) -> Vec<CoreDescriptor> {
    tree.children("core")
        .map(|core| CoreDescriptor {
            id: core.attr_or("id", "").to_string(),
            path: core.attr_or("path", "").to_string(),
        })
        .collect()
}

/// Select and load the active core's base tree.
///
/// On success the returned tree is the parsed core root with every validated
/// candidate appended as a `core` metadata child for downstream core-switch
/// UI. The preference store may have been rewritten to "default" on the way.
pub fn select_core(
    cache: &ContentCache,
    paths: &ContentPaths,
    prefs: &mut dyn PreferenceStore,
    notifier: &dyn UserNotifier,
    validator: Option<&mut SchemaValidator>,
) -> Result<ConfigTree, ResolveError> {
    // Mainline manifest first, then each installed overlay's own manifest.
    // Candidates are concatenated, never merged: duplicates are evaluated
    // independently and first-occurrence wins below.
    let mut cores_cfg = cache.get_tree(&paths.cores_manifest(), None)?;
    let (_, overlay_dirs) = cache
        .store()
        .list_dir(&paths.addons_dir, NameMode::NameOnly);
    for id in overlay_dirs {
        let manifest = paths.overlay_cores_manifest(&id);
        if cache.store().file_exists(&manifest) {
            let extra = cache.get_tree(&manifest, None)?;
            cores_cfg.append(extra);
        }
    }

    let preferred = prefs.core_id();
    let mut valid = ConfigTree::new();
    let mut preferred_valid = false;
    let mut root_path = String::new();

    for core in cores_cfg.children("core") {
        let id = core.attr_or("id", "");
        if id.is_empty() {
            warn!("skipping core candidate without id");
            notifier.error_dialog(
                "Error validating data core.",
                "Found a core without id attribute.\nSkipping the core.",
            );
            continue;
        }
        if valid.find_child("core", "id", id).is_some() {
            warn!(core = id, "skipping core candidate with duplicate id");
            notifier.error_dialog(
                "Error validating data core.",
                &format!("Core ID: {id}\nThe ID is already in use.\nSkipping the core."),
            );
            continue;
        }
        let path = core.attr_or("path", "");
        if !cache.store().file_exists(&paths.resolve(path)) {
            warn!(core = id, path, "skipping core candidate with missing path");
            notifier.error_dialog(
                "Error validating data core.",
                &format!(
                    "Core ID: {id}\nCore Path: {path}\nFile not found.\nSkipping the core."
                ),
            );
            continue;
        }

        if id == DEFAULT_CORE_ID && !preferred_valid {
            root_path = path.to_string();
        }
        if id == preferred {
            preferred_valid = true;
            root_path = path.to_string();
        }
        valid.add_child("core", core.clone());
    }

    if !preferred_valid {
        warn!(core = %preferred, "preferred core not found, falling back to default");
        notifier.error_dialog(
            "Error loading core data.",
            &format!(
                "Core ID: {preferred}\nError loading the core with named id.\n\
                 Falling back to the default core."
            ),
        );
        prefs.set_core_id(DEFAULT_CORE_ID);
    }

    // A valid default core must always exist; its absence is unrecoverable.
    if root_path.is_empty() {
        notifier.error_dialog(
            "Error loading core data.",
            "Can't locate the default core.\nThe process will now exit.",
        );
        return Err(ResolveError::NoDefaultCore);
    }

    info!(core = %prefs.core_id(), root = %root_path, "loading core root");
    let mut base = cache.get_tree(&paths.resolve(&root_path), validator)?;
    base.append(valid);
    Ok(base)
}
