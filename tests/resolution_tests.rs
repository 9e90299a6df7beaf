//! End-to-end tests for the resolution engine.
//!
//! Each test builds a real content tree on disk, resolves it through a full
//! [`ConfigManager`], and asserts on the published view, the derived data,
//! and the dialogs the engine raised along the way.

use rulestack::defines::DefineScope;
use rulestack::dispatch::{NullProgress, UserNotifier};
use rulestack::manager::{ConfigManager, ManagerOptions, ReloadStrength};
use rulestack::prefs::MemoryPrefs;
use rulestack::store::{ContentPaths, FsStore};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
struct CaptureNotifier(Mutex<Vec<String>>);

impl CaptureNotifier {
    fn dialogs(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl UserNotifier for CaptureNotifier {
    fn error_dialog(&self, summary: &str, message: &str) {
        self.0.lock().unwrap().push(format!("{summary}\n{message}"));
    }
}

struct Harness {
    temp: TempDir,
    notifier: Arc<CaptureNotifier>,
    manager: ConfigManager,
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn harness(files: &[(&str, &str)], core: &str, options: ManagerOptions) -> Harness {
    let temp = TempDir::new().unwrap();
    for (rel, text) in files {
        write(temp.path(), rel, text);
    }
    let paths = ContentPaths::new(temp.path().join("data"), temp.path().join("add-ons"));
    let store = Arc::new(FsStore::for_paths(&paths));
    let notifier = Arc::new(CaptureNotifier::default());
    let manager = ConfigManager::new(
        paths,
        store,
        Box::new(MemoryPrefs::new(core)),
        Arc::clone(&notifier) as Arc<dyn UserNotifier>,
        Arc::new(NullProgress),
        options,
    );
    Harness {
        temp,
        notifier,
        manager,
    }
}

const MAINLINE: &[(&str, &str)] = &[
    (
        "data/cores.yaml",
        "core:\n  - id: default\n    path: default.yaml\n",
    ),
    (
        "data/default.yaml",
        concat!(
            "name: mainline\n",
            "era:\n",
            "  id: core_era\n",
            "units:\n",
            "  unit_type:\n",
            "    - id: militia\n",
            "    - ifdef: CAMPAIGN\n",
            "      id: hero\n",
        ),
    ),
];

#[test]
fn resolves_core_with_overlays_and_builds_derived_data() {
    let mut files = MAINLINE.to_vec();
    files.push((
        "add-ons/eastern/_main.yaml",
        "scenario:\n  id: ew_01\nunits:\n  unit_type:\n    id: raider\n",
    ));
    files.push(("add-ons/eastern/_server.pbl", "title: Eastern\nversion: 1.2\n"));
    let mut h = harness(&files, "default", ManagerOptions::default());

    let view = h.manager.resolve(ReloadStrength::Force, None).unwrap();
    assert_eq!(view.base().attr("name"), Some("mainline"));

    // entry tags merged into the base, annotated with overlay identity
    let scenario = view.find_child("scenario", "id", "ew_01").unwrap();
    assert_eq!(scenario.attr("addon_id"), Some("eastern"));
    assert_eq!(scenario.attr("addon_version"), Some("1.2.0"));

    // unit types come from core and overlay alike
    let derived = h.manager.derived();
    assert!(derived.unit_types.contains_key("militia"));
    assert!(derived.unit_types.contains_key("raider"));
    // the ifdef-gated unit is absent without the define
    assert!(!derived.unit_types.contains_key("hero"));

    // hash table covers core and merged overlay entries
    assert!(derived.multiplayer_hashes.contains_key("core_era"));
    assert!(h.notifier.dialogs().is_empty());
}

#[test]
fn defines_gate_conditional_content() {
    let mut h = harness(MAINLINE, "default", ManagerOptions::default());
    {
        let defines = h.manager.defines().clone();
        let _campaign = DefineScope::new(&defines, "CAMPAIGN", true);
        h.manager.resolve(ReloadStrength::Force, None).unwrap();
    }
    assert!(h.manager.derived().unit_types.contains_key("hero"));

    // the define is gone; a forced resolve drops the gated content again
    h.manager.resolve(ReloadStrength::Force, None).unwrap();
    assert!(!h.manager.derived().unit_types.contains_key("hero"));
}

#[test]
fn superset_skip_reuses_wider_build_but_not_narrower() {
    let mut h = harness(MAINLINE, "default", ManagerOptions::default());
    {
        let defines = h.manager.defines().clone();
        let _campaign = DefineScope::new(&defines, "CAMPAIGN", true);
        h.manager.resolve(ReloadStrength::Force, None).unwrap();
    }
    assert!(h.manager.derived().unit_types.contains_key("hero"));

    // narrowing: the old set includes the new one, so the wider build is
    // reused and still contains the gated unit
    h.manager
        .resolve(ReloadStrength::SkipIfSuperset, None)
        .unwrap();
    assert!(h.manager.derived().unit_types.contains_key("hero"));

    // widening: a define the old build never saw forces a rebuild
    let defines = h.manager.defines().clone();
    let _other = DefineScope::new(&defines, "MULTIPLAYER", true);
    h.manager
        .resolve(ReloadStrength::SkipIfSuperset, None)
        .unwrap();
    assert!(!h.manager.derived().unit_types.contains_key("hero"));
}

#[test]
fn skip_if_equal_rebuilds_on_any_define_change() {
    let mut h = harness(MAINLINE, "default", ManagerOptions::default());
    {
        let defines = h.manager.defines().clone();
        let _campaign = DefineScope::new(&defines, "CAMPAIGN", true);
        h.manager.resolve(ReloadStrength::Force, None).unwrap();
    }
    // same narrowing that SkipIfSuperset would ignore triggers a rebuild
    h.manager.resolve(ReloadStrength::SkipIfEqual, None).unwrap();
    assert!(!h.manager.derived().unit_types.contains_key("hero"));
}

#[test]
fn malformed_overlay_is_contained_and_reported_once() {
    let mut files = MAINLINE.to_vec();
    files.push(("add-ons/broken/_main.yaml", "scenario: [not: {valid"));
    files.push(("add-ons/healthy/_main.yaml", "era:\n  id: good_era\n"));
    let mut h = harness(&files, "default", ManagerOptions::default());

    let view = h.manager.resolve(ReloadStrength::Force, None).unwrap();
    assert!(view.find_child("era", "id", "good_era").is_some());

    assert_eq!(h.manager.error_log().len(), 1);
    assert!(h.manager.error_log()[0].origin.contains("broken"));
    assert!(h.manager.overlay_info("healthy").is_some());
    assert!(h.manager.overlay_info("broken").is_none());

    // exactly one batched report dialog
    let dialogs = h.notifier.dialogs();
    assert_eq!(dialogs.len(), 1);
    assert!(dialogs[0].contains("could not be loaded"));
}

#[test]
fn recovery_disables_overlays_before_abandoning_core_choice() {
    let mut files = MAINLINE.to_vec();
    files.push((
        "data/cores.yaml",
        concat!(
            "core:\n",
            "  - id: default\n    path: default.yaml\n",
            "  - id: broken\n    path: broken.yaml\n",
        ),
    ));
    files.push(("data/broken.yaml", ": : not yaml : :\n"));
    files.push(("add-ons/extra/_main.yaml", "era:\n  id: extra_era\n"));
    let mut h = harness(&files, "broken", ManagerOptions::default());

    let view = h.manager.resolve(ReloadStrength::Force, None).unwrap();
    assert_eq!(view.base().attr("name"), Some("mainline"));

    // one dialog per remedy, strictly in escalation order
    let dialogs = h.notifier.dialogs();
    assert_eq!(dialogs.len(), 2);
    assert!(dialogs[0].contains("Retrying without add-ons"));
    assert!(dialogs[1].contains("Falling back to the default core"));

    // the fallback lifted the overlay ban again
    assert!(view.find_child("era", "id", "extra_era").is_some());
}

#[test]
fn default_core_failure_is_terminal() {
    let mut files = MAINLINE.to_vec();
    files.push(("data/default.yaml", ": : not yaml : :\n"));
    let mut h = harness(&files, "default", ManagerOptions::default());

    h.manager.resolve(ReloadStrength::Force, None).unwrap_err();
    let dialogs = h.notifier.dialogs();
    assert!(dialogs
        .last()
        .unwrap()
        .contains("The process will now exit"));
}

#[test]
fn enabled_subset_controls_view_composition() {
    let mut files = MAINLINE.to_vec();
    files.push(("add-ons/alpha/_main.yaml", "balance: alpha\n"));
    files.push(("add-ons/beta/_main.yaml", "balance: beta\n"));
    let mut h = harness(&files, "default", ManagerOptions::default());

    h.manager.resolve(ReloadStrength::Force, None).unwrap();
    assert_eq!(h.manager.view().len(), 3);

    let only_beta = vec!["beta".to_string()];
    let view = h
        .manager
        .resolve(ReloadStrength::SkipIfEqual, Some(&only_beta))
        .unwrap();
    assert_eq!(view.len(), 2);
    let balances: Vec<_> = view
        .trees()
        .iter()
        .filter_map(|t| t.attr("balance"))
        .collect();
    assert_eq!(balances, vec!["beta"]);

    // unknown ids are tolerated
    let with_ghost = vec!["alpha".to_string(), "ghost".to_string()];
    let view = h
        .manager
        .resolve(ReloadStrength::SkipIfEqual, Some(&with_ghost))
        .unwrap();
    assert_eq!(view.len(), 2);
}

#[test]
fn no_addons_option_resolves_core_alone() {
    let mut files = MAINLINE.to_vec();
    files.push(("add-ons/extra/_main.yaml", "era:\n  id: extra_era\n"));
    let mut h = harness(
        &files,
        "default",
        ManagerOptions {
            no_addons: true,
            ..ManagerOptions::default()
        },
    );
    let view = h.manager.resolve(ReloadStrength::Force, None).unwrap();
    assert_eq!(view.len(), 1);
    assert!(view.find_child("era", "id", "extra_era").is_none());
}

#[test]
fn force_reload_observes_disk_changes() {
    let mut h = harness(MAINLINE, "default", ManagerOptions::default());
    h.manager.resolve(ReloadStrength::Force, None).unwrap();

    write(h.temp.path(), "data/default.yaml", "name: edited\n");
    let view = h.manager.force_reload().unwrap();
    assert_eq!(view.base().attr("name"), Some("edited"));
}

#[test]
fn deprecated_single_document_overlay_is_rejected_with_hint() {
    let mut files = MAINLINE.to_vec();
    files.push(("add-ons/oldstyle.yaml", "era:\n  id: old_era\n"));
    let mut h = harness(&files, "default", ManagerOptions::default());

    let view = h.manager.resolve(ReloadStrength::Force, None).unwrap();
    assert!(view.find_child("era", "id", "old_era").is_none());
    assert_eq!(h.manager.error_log().len(), 1);
    assert!(h.manager.error_log()[0]
        .message
        .contains("oldstyle/_main.yaml"));
}

#[test]
fn retired_macro_uses_surface_as_notices() {
    let mut files = MAINLINE.to_vec();
    files.push((
        "add-ons/nostalgia/_main.yaml",
        concat!(
            "campaign:\n",
            "  id: camp\n",
            "  extra_defines: ENABLE_VETERAN_UNITS,NORMAL,ENABLE_LEGACY_AMLA\n",
        ),
    ));
    let mut h = harness(&files, "default", ManagerOptions::default());
    h.manager.resolve(ReloadStrength::Force, None).unwrap();

    // one notice per retired macro use, nothing for the live define
    let notices = h.manager.notices();
    assert_eq!(notices.len(), 2);
    assert!(notices.iter().all(|n| n.origin == "nostalgia"));
    assert!(notices[0].message.contains("ENABLE_VETERAN_UNITS"));
    assert!(notices[1].message.contains("ENABLE_LEGACY_AMLA"));

    // advisory only: the overlay loaded and raised no error dialog
    assert!(h.manager.overlay_info("nostalgia").is_some());
    assert!(h.manager.error_log().is_empty());
    assert!(h.notifier.dialogs().is_empty());
}

#[test]
fn editor_resolve_is_scoped_to_the_load() {
    let mut files = MAINLINE.to_vec();
    files.push((
        "add-ons/editor_pack/_main.yaml",
        "brush:\n  ifdef: EDITOR\n  id: editor_brush\n",
    ));
    let mut h = harness(&files, "default", ManagerOptions::default());

    h.manager.resolve_for_editor().unwrap();
    // the gated node was compiled in while EDITOR was active
    let stored = h.manager.view().find_child("brush", "id", "editor_brush");
    assert!(stored.is_some());
    // but the define itself did not leak past the call
    assert!(!h.manager.defines().snapshot().contains_key("EDITOR"));
}
