//! Overlay (add-on) discovery, validation, migration, and loading.
//!
//! Each overlay is processed in isolation: any parse, format, or i/o failure
//! drops that overlay and appends one entry to the error log, and the pass
//! always completes with a best-effort registry. The aggregated log is
//! reported once, batched, after the whole pass.

use crate::cache::ContentCache;
use crate::dispatch::UserNotifier;
use crate::error::{LoadErrorEntry, ResolveError};
use crate::prefs::DEFAULT_CORE_ID;
use crate::schema::{Schema, SchemaValidator};
use crate::store::{ContentPaths, NameMode, OVERLAY_MAIN};
use crate::tree::ConfigTree;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Top-level tags an overlay may contribute to the merged base tree. Nodes
/// of these kinds are annotated with their overlay's identity and then moved
/// into the base tree's equivalent collections.
pub const ENTRY_TAGS: [&str; 6] = [
    "era",
    "modification",
    "resource",
    "multiplayer",
    "scenario",
    "campaign",
];

/// Retired compatibility macros. Campaigns that still request one via
/// `extra_defines` get a deprecation notice; the macro itself is gone.
const RETIRED_MACROS: [&str; 5] = [
    "ENABLE_EXTRA_ADVANCEMENTS",
    "ENABLE_VETERAN_UNITS",
    "ENABLE_HERO_VARIANTS",
    "ENABLE_LEGACY_AMLA",
    "ENABLE_BONUS_UNITS",
];

/// Identity and compatibility metadata for one loaded overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayDescriptor {
    pub id: String,
    pub title: String,
    pub version: String,
    pub required_core: String,
    /// The overlay's declared kind; overlays tagged "core" are exempt from
    /// core-match filtering so cores stay selectable at all times.
    pub tag: String,
}

/// Fully loaded overlay trees keyed by overlay id. Entries are only ever
/// inserted complete; a failed overlay never appears here.
pub type OverlayRegistry = BTreeMap<String, ConfigTree>;

/// Result of one overlay pass.
#[derive(Debug)]
pub struct OverlayOutcome {
    pub registry: OverlayRegistry,
    pub descriptors: BTreeMap<String, OverlayDescriptor>,
    pub errors: Vec<LoadErrorEntry>,
    /// Deprecation notices, one per migrated construct or retired-macro
    /// use. Unlike `errors` these never drop the overlay.
    pub notices: Vec<LoadErrorEntry>,
}

/// Discover, validate, and load every compatible overlay, merging their
/// entry-tag children into `base` by move.
///
/// Never fails for per-overlay reasons; the only error is a missing
/// explicitly-requested validation target, which is a fatal configuration
/// error rather than an overlay failure.
pub fn load_overlays(
    cache: &ContentCache,
    paths: &ContentPaths,
    base: &mut ConfigTree,
    active_core: &str,
    validate_target: Option<&str>,
    schema: Option<&Schema>,
    notifier: &dyn UserNotifier,
) -> Result<OverlayOutcome, ResolveError> {
    let mut registry = OverlayRegistry::new();
    let mut descriptors = BTreeMap::new();
    let mut errors: Vec<LoadErrorEntry> = Vec::new();
    let mut notices: Vec<LoadErrorEntry> = Vec::new();

    let (files, dirs) = cache
        .store()
        .list_dir(&paths.addons_dir, NameMode::NameOnly);

    // The single-document layout was retired long ago. Warn with a concrete
    // migration hint; the file is not loaded.
    for file in &files {
        if let Some(stem) = file.strip_suffix(".yaml") {
            let origin = paths.addons_dir.join(file).display().to_string();
            warn!(file = %origin, "rejecting single-document overlay layout");
            errors.push(LoadErrorEntry::new(
                origin,
                format!(
                    "The single-document layout '{file}' is not supported anymore, \
                     use '{stem}/{OVERLAY_MAIN}' instead."
                ),
            ));
        }
    }

    for id in dirs {
        let main = paths.overlay_main(&id);
        if !cache.store().file_exists(&main) {
            // Absent, not malformed.
            debug!(overlay = %id, "no entry document, skipping");
            continue;
        }

        // Metadata priority: author publishing info beats server-generated
        // cached info beats defaults (manual installs have neither).
        let mut metadata = ConfigTree::new();
        let publish = paths.overlay_publish_info(&id);
        let cached = paths.overlay_cached_info(&id);
        if cache.store().file_exists(&publish) {
            match cache.get_tree(&publish, None) {
                Ok(tree) => metadata = tree,
                Err(err) => {
                    warn!(overlay = %id, "invalid publishing info: {err}");
                    errors.push(LoadErrorEntry::new(
                        id.as_str(),
                        format!("The overlay has an invalid publishing info file: {err}"),
                    ));
                    continue;
                }
            }
        } else if cache.store().file_exists(&cached) {
            match cache.get_tree(&cached, None) {
                Ok(tree) => metadata = tree.child("info").cloned().unwrap_or_default(),
                Err(err) => {
                    warn!(overlay = %id, "invalid cached info: {err}");
                    errors.push(LoadErrorEntry::new(id.as_str(), err.to_string()));
                    continue;
                }
            }
        }

        let required_core = metadata.attr_or("core", DEFAULT_CORE_ID).to_string();
        let tag = metadata.attr_or("type", "").to_string();

        // Overlays declaring themselves cores stay selectable regardless of
        // the active core; everything else must match it.
        if !metadata.is_empty() && tag != "core" && required_core != active_core {
            debug!(overlay = %id, required = %required_core, "core mismatch, skipping");
            continue;
        }

        let title = metadata.attr_or("title", &id).to_string();
        let version = Version::parse(metadata.attr_or("version", ""));

        let mut validator = match (validate_target, schema) {
            (Some(target), Some(schema)) if target == id => {
                Some(SchemaValidator::new(schema.clone()))
            }
            _ => None,
        };

        let mut tree = match cache.get_tree(&main, validator.as_mut()) {
            Ok(tree) => tree,
            Err(err) => {
                warn!(overlay = %id, "error reading overlay entry document: {err}");
                errors.push(LoadErrorEntry::new(main.display().to_string(), err.to_string()));
                continue;
            }
        };

        annotate_entries(&mut tree, &id, &title, &version);
        migrate_advancements(&mut tree, &id, &mut notices);
        flag_retired_macros(&tree, &id, &mut notices);

        for tag in ENTRY_TAGS {
            base.append_children_by_move(&mut tree, tag);
        }

        info!(overlay = %id, title = %title, version = %version, "loaded overlay");
        descriptors.insert(
            id.clone(),
            OverlayDescriptor {
                id: id.clone(),
                title,
                version: version.to_string(),
                required_core,
                tag,
            },
        );
        registry.insert(id, tree);
    }

    if let Some(target) = validate_target {
        if !registry.contains_key(target) {
            errors.push(LoadErrorEntry::new(
                target,
                "Did not find an add-on for the validation target - check whether the id \
                 has a typo",
            ));
            return Err(ResolveError::ValidationTargetMissing(target.to_string()));
        }
        warn!(
            "Note: for validation to find errors, the content using the add-on has to \
             actually be resolved."
        );
    }

    if !errors.is_empty() {
        let plural = errors.len() != 1;
        let summary = if plural {
            "The following add-ons had errors and could not be loaded:"
        } else {
            "The following add-on had errors and could not be loaded:"
        };
        let note = if plural {
            "Please report this to the respective authors or maintainers of these add-ons."
        } else {
            "Please report this to the author or maintainer of this add-on."
        };
        let origins: Vec<String> = errors.iter().map(|e| e.origin.clone()).collect();
        let details: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        notifier.error_report(summary, note, &origins, &details.join("\n\n"));
    }

    Ok(OverlayOutcome {
        registry,
        descriptors,
        errors,
        notices,
    })
}

/// Stamp overlay identity onto every top-level entry node, so merged nodes
/// stay traceable to their origin. The version is written in canonical form.
fn annotate_entries(tree: &mut ConfigTree, id: &str, title: &str, version: &Version) {
    let version = version.to_string();
    for (name, child) in tree.all_children_mut() {
        if ENTRY_TAGS.contains(&name) {
            child.set_attr("addon_id", id);
            child.set_attr("addon_title", title);
            child.set_attr("addon_version", version.as_str());
        }
    }
}

/// Rewrite legacy `advancefrom` constructs into `modify_unit_type`
/// directives, injected into every sibling campaign entry. The legacy nodes
/// are removed afterwards; each migration appends a deprecation notice.
fn migrate_advancements(
    tree: &mut ConfigTree,
    overlay_id: &str,
    notices: &mut Vec<LoadErrorEntry>,
) {
    let mut directives = ConfigTree::new();
    for units in tree.children_mut("units") {
        for unit_type in units.children_mut("unit_type") {
            let type_id = unit_type.attr_or("id", "").to_string();
            for advancefrom in unit_type.children("advancefrom") {
                let mut directive = ConfigTree::new();
                directive.set_attr("type", type_id.as_str());
                directive.set_attr("add_advancement", advancefrom.attr_or("unit", ""));
                directive.set_attr("set_experience", advancefrom.attr_or("experience", ""));
                warn!(
                    overlay = %overlay_id,
                    unit_type = %type_id,
                    "deprecated [advancefrom]; use [modify_unit_type] in [campaign] instead"
                );
                notices.push(LoadErrorEntry::new(
                    overlay_id,
                    format!(
                        "[advancefrom] on unit type \"{type_id}\" is deprecated, use \
                         [modify_unit_type] in [campaign] instead"
                    ),
                ));
                directives.add_child("modify_unit_type", directive);
            }
            unit_type.remove_children("advancefrom", |_| true);
        }
    }
    if directives.is_empty() {
        return;
    }
    for campaign in tree.children_mut("campaign") {
        campaign.append(directives.clone());
    }
}

/// Deprecation notices for campaigns still requesting retired macros, one
/// per use.
fn flag_retired_macros(tree: &ConfigTree, overlay_id: &str, notices: &mut Vec<LoadErrorEntry>) {
    for campaign in tree.children("campaign") {
        for token in campaign
            .attr_or("extra_defines", "")
            .split(',')
            .map(str::trim)
        {
            if RETIRED_MACROS.contains(&token) {
                warn!(
                    overlay = %overlay_id,
                    define = token,
                    "retired macro in extra_defines; use the campaign-scoped macro of the \
                     same name instead"
                );
                notices.push(LoadErrorEntry::new(
                    overlay_id,
                    format!(
                        "the \"{token}\" macro in extra_defines is retired, use the \
                         campaign-scoped macro of the same name instead"
                    ),
                ));
            }
        }
    }
}
