//! The resolution engine's service object.
//!
//! [`ConfigManager`] owns the cache, the preference store, and the frozen
//! results of the last successful rebuild. `resolve` is the single entry
//! point: it decides whether a rebuild is needed at all, runs one rebuild
//! attempt per recovery state, and only publishes a new view on success.

use crate::cache::ContentCache;
use crate::cores::{self, CoreDescriptor};
use crate::defines::{fingerprint_of, includes, DefineMap, DefineScope, DefineStack};
use crate::derived::{self, DerivedData};
use crate::dispatch::{LoadStage, ProgressReporter, UserNotifier};
use crate::error::{LoadErrorEntry, ResolveError};
use crate::overlays::{self, OverlayDescriptor};
use crate::prefs::{PreferenceStore, DEFAULT_CORE_ID};
use crate::schema::{Schema, SchemaValidator};
use crate::store::{ContentPaths, ContentStore};
use crate::tree::ConfigTree;
use crate::view::ActiveView;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How aggressively `resolve` may reuse the previous rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStrength {
    /// Always rebuild, even if nothing observable changed.
    Force,
    /// Skip the rebuild when the previous define set includes the current
    /// one. Conditional content compiled under the wider set is already
    /// present; consumers filter at read time.
    SkipIfSuperset,
    /// Skip the rebuild only when the define set is exactly unchanged.
    SkipIfEqual,
}

/// Startup options, fixed for the manager's lifetime.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Validate the core's root document against the schema.
    pub validate_core: bool,
    /// Validate one overlay (by id) against the schema. The target must be
    /// installed; resolving without it is a fatal configuration error.
    pub validate_addon: Option<String>,
    /// Never load overlays, as if none were installed.
    pub no_addons: bool,
    /// Keep parsed documents across rebuilds.
    pub use_cache: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            validate_core: false,
            validate_addon: None,
            no_addons: false,
            use_cache: true,
        }
    }
}

/// Recovery states, tried strictly in order. Disabling overlays is the
/// cheaper remedy, so it comes before abandoning the user's core choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryState {
    Normal,
    NoAddons,
    DefaultCore,
}

pub struct ConfigManager {
    paths: ContentPaths,
    cache: ContentCache,
    prefs: Box<dyn PreferenceStore>,
    notifier: Arc<dyn UserNotifier>,
    progress: Arc<dyn ProgressReporter>,
    options: ManagerOptions,

    base: Option<Arc<ConfigTree>>,
    registry: BTreeMap<String, Arc<ConfigTree>>,
    descriptors: BTreeMap<String, OverlayDescriptor>,
    view: ActiveView,
    derived: DerivedData,
    error_log: Vec<LoadErrorEntry>,
    notice_log: Vec<LoadErrorEntry>,

    /// Define snapshot the published view was built under.
    old_defines: DefineMap,
    /// Enabled overlay ids of the published view; `None` means all.
    active_overlays: Option<Vec<String>>,
    /// Set by recovery; survives until the next successful default-core
    /// fallback or a fresh manager.
    addons_disabled: bool,
}

impl ConfigManager {
    pub fn new(
        paths: ContentPaths,
        store: Arc<dyn ContentStore>,
        prefs: Box<dyn PreferenceStore>,
        notifier: Arc<dyn UserNotifier>,
        progress: Arc<dyn ProgressReporter>,
        options: ManagerOptions,
    ) -> Self {
        // Validation runs want every document freshly parsed so the
        // validator actually sees them.
        let use_cache =
            options.use_cache && !options.validate_core && options.validate_addon.is_none();
        Self {
            paths,
            cache: ContentCache::new(store, use_cache),
            prefs,
            notifier,
            progress,
            options,
            base: None,
            registry: BTreeMap::new(),
            descriptors: BTreeMap::new(),
            view: ActiveView::default(),
            derived: DerivedData::default(),
            error_log: Vec::new(),
            notice_log: Vec::new(),
            old_defines: DefineMap::new(),
            active_overlays: None,
            addons_disabled: false,
        }
    }

    /// The process-wide define stack; push scopes against this handle.
    pub fn defines(&self) -> &DefineStack {
        self.cache.defines()
    }

    pub fn view(&self) -> &ActiveView {
        &self.view
    }

    pub fn derived(&self) -> &DerivedData {
        &self.derived
    }

    /// Per-overlay failures collected by the last rebuild.
    pub fn error_log(&self) -> &[LoadErrorEntry] {
        &self.error_log
    }

    /// Deprecation notices collected by the last rebuild. Advisory only;
    /// the overlays involved still loaded.
    pub fn notices(&self) -> &[LoadErrorEntry] {
        &self.notice_log
    }

    pub fn overlay_info(&self, id: &str) -> Option<&OverlayDescriptor> {
        self.descriptors.get(id)
    }

    pub fn overlay_descriptors(&self) -> impl Iterator<Item = &OverlayDescriptor> {
        self.descriptors.values()
    }

    /// Every selectable core known to the published base tree.
    pub fn core_descriptors(&self) -> Vec<CoreDescriptor> {
        match &self.base {
            Some(base) => cores::core_descriptors(base),
            None => Vec::new(),
        }
    }

    /// Resolve the configuration for the current define set and the given
    /// enabled overlay ids (`None` enables everything loadable).
    ///
    /// Returns the published view, which is only replaced on success; after
    /// an error the previous view, if any, is still intact.
    pub fn resolve(
        &mut self,
        strength: ReloadStrength,
        enabled: Option<&[String]>,
    ) -> Result<&ActiveView, ResolveError> {
        let current = self.cache.defines().snapshot();
        info!(
            defines = %fingerprint_of(&current),
            strength = ?strength,
            "configuration resolve requested"
        );

        let mut reload_everything = true;
        if self.base.is_some() {
            reload_everything = match strength {
                ReloadStrength::Force => true,
                ReloadStrength::SkipIfEqual => self.old_defines != current,
                // The old set must include the new one, not the reverse.
                ReloadStrength::SkipIfSuperset => !includes(&self.old_defines, &current),
            };
            if !reload_everything && same_enabled(self.active_overlays.as_deref(), enabled) {
                debug!("define and overlay sets unchanged, reusing published view");
                return Ok(&self.view);
            }
        }
        self.active_overlays = enabled.map(<[String]>::to_vec);

        let mut state = RecoveryState::Normal;
        loop {
            match self.rebuild(reload_everything) {
                Ok(()) => break,
                Err(err) if err.is_fatal() => {
                    self.notifier.error_dialog(
                        "Error loading core configuration files.",
                        &format!("{err}\nThe process will now exit."),
                    );
                    return Err(err);
                }
                Err(err) => {
                    error!(state = ?state, "error loading configuration files: {err}");
                    state = match state {
                        RecoveryState::Normal if self.overlays_active() => {
                            self.addons_disabled = true;
                            self.notifier.error_dialog(
                                "Error loading custom configuration files.",
                                &format!("{err}\nRetrying without add-ons."),
                            );
                            RecoveryState::NoAddons
                        }
                        RecoveryState::Normal | RecoveryState::NoAddons
                            if self.prefs.core_id() != DEFAULT_CORE_ID =>
                        {
                            self.notifier.error_dialog(
                                "Error loading custom configuration files.",
                                &format!("{err}\nFalling back to the default core."),
                            );
                            self.prefs.set_core_id(DEFAULT_CORE_ID);
                            self.addons_disabled = false;
                            RecoveryState::DefaultCore
                        }
                        _ => {
                            self.notifier.error_dialog(
                                "Error loading default core configuration files.",
                                &format!("{err}\nThe process will now exit."),
                            );
                            return Err(err);
                        }
                    };
                    reload_everything = true;
                }
            }
        }

        self.old_defines = self.cache.defines().snapshot();
        Ok(&self.view)
    }

    /// Drop stale parse caches and resolve again unconditionally, keeping
    /// the current enabled overlay set.
    pub fn force_reload(&mut self) -> Result<&ActiveView, ResolveError> {
        info!("forced configuration reload");
        self.cache.recheck_tree_checksum();
        self.old_defines.clear();
        let enabled = self.active_overlays.clone();
        self.resolve(ReloadStrength::Force, enabled.as_deref())
    }

    /// Resolve with the EDITOR define active for the duration of the load.
    pub fn resolve_for_editor(&mut self) -> Result<&ActiveView, ResolveError> {
        let defines = self.cache.defines().clone();
        let _editor = DefineScope::new(&defines, "EDITOR", true);
        self.resolve(ReloadStrength::SkipIfEqual, None)
    }

    fn overlays_active(&self) -> bool {
        !self.options.no_addons && !self.addons_disabled
    }

    /// One rebuild attempt. On `reload_everything == false` only the view
    /// composition and derived data are redone from the frozen trees.
    fn rebuild(&mut self, reload_everything: bool) -> Result<(), ResolveError> {
        if reload_everything || self.base.is_none() {
            self.progress.stage(LoadStage::VerifyCache);
            self.cache.verify_checksum();

            self.progress.stage(LoadStage::CreateCache);
            let txn = self.cache.begin_transaction();

            self.progress.stage(LoadStage::LoadCores);
            let mut core_validator = if self.options.validate_core {
                self.load_schema().map(SchemaValidator::new)
            } else {
                None
            };
            let mut base = cores::select_core(
                &self.cache,
                &self.paths,
                self.prefs.as_mut(),
                self.notifier.as_ref(),
                core_validator.as_mut(),
            )?;

            // Core-contributed defines are final from here on; overlay
            // documents all parse under this snapshot.
            txn.lock();

            self.registry.clear();
            self.descriptors.clear();
            self.error_log.clear();
            self.notice_log.clear();
            if self.overlays_active() {
                self.progress.stage(LoadStage::LoadAddons);
                let schema = if self.options.validate_addon.is_some() {
                    self.load_schema()
                } else {
                    None
                };
                let outcome = overlays::load_overlays(
                    &self.cache,
                    &self.paths,
                    &mut base,
                    &self.prefs.core_id(),
                    self.options.validate_addon.as_deref(),
                    schema.as_ref(),
                    self.notifier.as_ref(),
                )?;
                self.registry = outcome
                    .registry
                    .into_iter()
                    .map(|(id, tree)| (id, Arc::new(tree)))
                    .collect();
                self.descriptors = outcome.descriptors;
                self.error_log = outcome.errors;
                self.notice_log = outcome.notices;
            }
            drop(txn);

            // Published as a metadata child so networked consumers can
            // compare scenario content without walking the whole tree.
            let hashes = derived::tree_multiplayer_hashes(&base);
            let mut hash_node = ConfigTree::new();
            for (id, hash) in &hashes {
                hash_node.set_attr(id.as_str(), hash.as_str());
            }
            base.add_child("multiplayer_hashes", hash_node);

            self.base = Some(Arc::new(base));
        }

        let base = Arc::clone(
            self.base
                .as_ref()
                .expect("base tree present after full rebuild"),
        );
        self.view = ActiveView::compose(base, &self.registry, self.active_overlays.as_deref());

        self.progress.stage(LoadStage::LoadUnitTypes);
        self.derived = derived::build(&self.view);
        info!(
            trees = self.view.len(),
            unit_types = self.derived.unit_types.len(),
            overlay_errors = self.error_log.len(),
            "configuration resolved"
        );
        Ok(())
    }

    /// Load the schema document, if the installation ships one. Validation
    /// is best effort; a missing or broken schema disables it with a
    /// warning instead of failing the rebuild.
    fn load_schema(&self) -> Option<Schema> {
        let path = self.paths.schema_doc();
        if !self.cache.store().file_exists(&path) {
            warn!(path = %path.display(), "schema document missing, validation disabled");
            return None;
        }
        match self.cache.get_tree(&path, None) {
            Ok(tree) => Some(Schema::from_tree(&tree)),
            Err(err) => {
                warn!("failed to load schema document: {err}");
                None
            }
        }
    }
}

/// Enabled overlay lists compare as sets; order only matters for view
/// composition, not for deciding whether a rebuild is needed.
fn same_enabled(previous: Option<&[String]>, requested: Option<&[String]>) -> bool {
    match (previous, requested) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
            let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
            a == b
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NullProgress;
    use crate::prefs::MemoryPrefs;
    use crate::store::FsStore;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CaptureNotifier(Mutex<Vec<String>>);

    impl UserNotifier for CaptureNotifier {
        fn error_dialog(&self, summary: &str, message: &str) {
            self.0.lock().unwrap().push(format!("{summary} {message}"));
        }
    }

    struct Fixture {
        temp: TempDir,
        notifier: Arc<CaptureNotifier>,
        manager: ConfigManager,
    }

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn fixture(files: &[(&str, &str)], prefs: MemoryPrefs, options: ManagerOptions) -> Fixture {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "data/cores.yaml",
            "core:\n  - id: default\n    path: default.yaml\n",
        );
        write(temp.path(), "data/default.yaml", "name: default-root\n");
        for (rel, text) in files {
            write(temp.path(), rel, text);
        }
        let paths = ContentPaths::new(temp.path().join("data"), temp.path().join("add-ons"));
        let store = Arc::new(FsStore::for_paths(&paths));
        let notifier = Arc::new(CaptureNotifier::default());
        let manager = ConfigManager::new(
            paths,
            store,
            Box::new(prefs),
            Arc::clone(&notifier) as Arc<dyn UserNotifier>,
            Arc::new(NullProgress),
            options,
        );
        Fixture {
            temp,
            notifier,
            manager,
        }
    }

    #[test]
    fn test_initial_resolve_publishes_view() {
        let mut fx = fixture(&[], MemoryPrefs::default(), ManagerOptions::default());
        let view = fx.manager.resolve(ReloadStrength::Force, None).unwrap();
        assert_eq!(view.base().attr("name"), Some("default-root"));
        assert!(view.base().child("multiplayer_hashes").is_some());
    }

    #[test]
    fn test_skip_if_equal_reuses_view() {
        let mut fx = fixture(&[], MemoryPrefs::default(), ManagerOptions::default());
        fx.manager.resolve(ReloadStrength::Force, None).unwrap();

        // Change the content on disk. A skipped resolve must not see it.
        write(fx.temp.path(), "data/default.yaml", "name: edited\n");
        let view = fx.manager.resolve(ReloadStrength::SkipIfEqual, None).unwrap();
        assert_eq!(view.base().attr("name"), Some("default-root"));

        // A forced reload drops the parse cache and does.
        let view = fx.manager.force_reload().unwrap();
        assert_eq!(view.base().attr("name"), Some("edited"));
    }

    #[test]
    fn test_skip_if_superset_skips_when_defines_narrow() {
        let mut fx = fixture(&[], MemoryPrefs::default(), ManagerOptions::default());
        {
            let defines = fx.manager.defines().clone();
            let _wide = DefineScope::new(&defines, "CAMPAIGN", true);
            fx.manager.resolve(ReloadStrength::Force, None).unwrap();
        }
        // CAMPAIGN was dropped: the old set is a superset of the new one,
        // so the stale view is reused even though the disk changed.
        write(fx.temp.path(), "data/default.yaml", "name: changed-root\n");
        let view = fx
            .manager
            .resolve(ReloadStrength::SkipIfSuperset, None)
            .unwrap();
        assert_eq!(view.base().attr("name"), Some("default-root"));
    }

    #[test]
    fn test_skip_if_superset_rebuilds_when_defines_widen() {
        let mut fx = fixture(&[], MemoryPrefs::default(), ManagerOptions::default());
        fx.manager.resolve(ReloadStrength::Force, None).unwrap();

        write(fx.temp.path(), "data/default.yaml", "name: changed-root\n");
        let defines = fx.manager.defines().clone();
        let _wide = DefineScope::new(&defines, "CAMPAIGN", true);
        // A new define appeared: the old set no longer includes the new
        // one, so this must rebuild and observe the new content. The wider
        // define set also misses the parse memo.
        let view = fx
            .manager
            .resolve(ReloadStrength::SkipIfSuperset, None)
            .unwrap();
        assert_eq!(view.base().attr("name"), Some("changed-root"));
    }

    #[test]
    fn test_enabled_set_change_recomposes_without_reload() {
        let mut fx = fixture(
            &[(
                "add-ons/extra/_main.yaml",
                "era:\n  id: extra_era\n",
            )],
            MemoryPrefs::default(),
            ManagerOptions::default(),
        );
        fx.manager.resolve(ReloadStrength::Force, None).unwrap();
        assert_eq!(fx.manager.view().len(), 2);

        let view = fx
            .manager
            .resolve(ReloadStrength::SkipIfEqual, Some(&[]))
            .unwrap();
        assert_eq!(view.len(), 1);

        let enabled = vec!["extra".to_string()];
        fx.manager
            .resolve(ReloadStrength::SkipIfEqual, Some(&enabled))
            .unwrap();
        assert_eq!(fx.manager.view().len(), 2);

        // Same set again is a pure no-op.
        fx.manager
            .resolve(ReloadStrength::SkipIfEqual, Some(&enabled))
            .unwrap();
        assert_eq!(fx.manager.view().len(), 2);
    }

    #[test]
    fn test_recovery_disables_addons_then_falls_back_to_default_core() {
        let mut fx = fixture(
            &[
                (
                    "data/cores.yaml",
                    concat!(
                        "core:\n",
                        "  - id: default\n    path: default.yaml\n",
                        "  - id: broken\n    path: broken.yaml\n",
                    ),
                ),
                ("data/broken.yaml", ": : not yaml : :\n"),
                ("add-ons/extra/_main.yaml", "era:\n  id: extra_era\n"),
            ],
            MemoryPrefs::new("broken"),
            ManagerOptions::default(),
        );
        let view = fx.manager.resolve(ReloadStrength::Force, None).unwrap();

        // First remedy (no add-ons) cannot fix a broken core root, so the
        // manager must then fall back to the default core, with one dialog
        // per attempted remedy, in order.
        let dialogs = fx.notifier.0.lock().unwrap();
        assert_eq!(dialogs.len(), 2);
        assert!(dialogs[0].contains("Retrying without add-ons"));
        assert!(dialogs[1].contains("Falling back to the default core"));
        drop(dialogs);

        assert_eq!(view.base().attr("name"), Some("default-root"));
        // The add-on ban is lifted once the core fallback succeeds.
        assert!(view.find_child("era", "id", "extra_era").is_some());
    }

    #[test]
    fn test_unrecoverable_failure_is_reported_and_returned() {
        let mut fx = fixture(&[], MemoryPrefs::default(), ManagerOptions::default());
        write(fx.temp.path(), "data/default.yaml", ": : not yaml : :\n");
        let err = fx.manager.resolve(ReloadStrength::Force, None).unwrap_err();
        assert!(matches!(err, ResolveError::Load(_)));

        // no-addons retry, then the final give-up dialog
        let dialogs = fx.notifier.0.lock().unwrap();
        assert_eq!(dialogs.len(), 2);
        assert!(dialogs[1].contains("The process will now exit"));
    }

    #[test]
    fn test_missing_validation_target_is_fatal() {
        let mut fx = fixture(
            &[],
            MemoryPrefs::default(),
            ManagerOptions {
                validate_addon: Some("ghost".to_string()),
                ..ManagerOptions::default()
            },
        );
        let err = fx.manager.resolve(ReloadStrength::Force, None).unwrap_err();
        assert!(matches!(err, ResolveError::ValidationTargetMissing(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_editor_resolve_pops_define_afterwards() {
        let mut fx = fixture(&[], MemoryPrefs::default(), ManagerOptions::default());
        fx.manager.resolve_for_editor().unwrap();
        assert!(!fx.manager.defines().snapshot().contains_key("EDITOR"));
    }
}
