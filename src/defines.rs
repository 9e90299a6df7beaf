//! Scoped preprocessing defines.
//!
//! Defines are named symbols with an active/inactive state that change which
//! conditional fragments the parser includes. The process-wide active set is
//! owned by the content cache and mutated only through [`DefineScope`]
//! guards, so every push is paired with a restore on all exit paths.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

/// Snapshot of active defines: name -> active state.
///
/// Presence-only defines are stored as `true`. Comparisons require matching
/// state, not mere presence.
pub type DefineMap = BTreeMap<String, bool>;

/// Stable textual key for a define set.
pub fn fingerprint_of(map: &DefineMap) -> String {
    let mut out = String::new();
    for (name, state) in map {
        let _ = write!(out, "{}={};", name, if *state { 1 } else { 0 });
    }
    out
}

/// Returns true if every (name, state) pair in `special` is present with the
/// same state in `general`.
///
/// Used by the reuse decision for the superset reload strength. The
/// direction is deliberate and load-bearing: the *old* set must include the
/// *new* one for a rebuild to be skipped, never the reverse.
pub fn includes(general: &DefineMap, special: &DefineMap) -> bool {
    special
        .iter()
        .all(|(name, state)| general.get(name) == Some(state))
}

/// Shared handle to the active define set.
///
/// Cloning is cheap and shares the underlying map; the clone is what lets a
/// [`DefineScope`] outlive a borrow of the cache that owns the stack.
#[derive(Clone, Default)]
pub struct DefineStack {
    inner: Arc<Mutex<DefineMap>>,
}

impl DefineStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the currently active set.
    pub fn snapshot(&self) -> DefineMap {
        self.inner.lock().expect("define stack poisoned").clone()
    }

    /// Stable textual key for the active set, used to key parse caches.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.inner.lock().expect("define stack poisoned"))
    }

    fn set(&self, name: &str, state: bool) -> Option<bool> {
        self.inner
            .lock()
            .expect("define stack poisoned")
            .insert(name.to_string(), state)
    }

    fn restore(&self, name: &str, prior: Option<bool>) {
        let mut map = self.inner.lock().expect("define stack poisoned");
        match prior {
            Some(state) => {
                map.insert(name.to_string(), state);
            }
            None => {
                map.remove(name);
            }
        }
    }
}

/// RAII guard over one or more pushed defines.
///
/// On drop the prior state of every pushed name is restored, in reverse push
/// order, regardless of how the enclosing scope exits. Nested scopes compose:
/// an inner scope may add names or override an outer scope's state.
pub struct DefineScope {
    stack: DefineStack,
    saved: Vec<(String, Option<bool>)>,
}

impl DefineScope {
    /// Push a single define with the given state.
    pub fn new(stack: &DefineStack, name: &str, active: bool) -> Self {
        let mut scope = Self {
            stack: stack.clone(),
            saved: Vec::with_capacity(1),
        };
        scope.push(name, active);
        scope
    }

    /// Push every entry of `defines` as one scope.
    pub fn push_all(stack: &DefineStack, defines: &DefineMap) -> Self {
        let mut scope = Self {
            stack: stack.clone(),
            saved: Vec::with_capacity(defines.len()),
        };
        for (name, state) in defines {
            scope.push(name, *state);
        }
        scope
    }

    fn push(&mut self, name: &str, state: bool) {
        let prior = self.stack.set(name, state);
        self.saved.push((name.to_string(), prior));
    }
}

impl Drop for DefineScope {
    fn drop(&mut self) {
        while let Some((name, prior)) = self.saved.pop() {
            self.stack.restore(&name, prior);
        }
    }
}
