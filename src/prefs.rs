//! Preference store collaborator.
//!
//! The engine only needs one durable preference: the id of the core the user
//! last selected. The fallback logic may rewrite it to "default".

/// Fallback core id, guaranteed to exist in any valid installation.
pub const DEFAULT_CORE_ID: &str = "default";

pub trait PreferenceStore: Send {
    /// The preferred core id; "default" when unset.
    fn core_id(&self) -> String;

    fn set_core_id(&mut self, id: &str);
}

/// In-memory preference store.
#[derive(Debug, Clone)]
pub struct MemoryPrefs {
    core_id: String,
}

impl MemoryPrefs {
    pub fn new(core_id: impl Into<String>) -> Self {
        let core_id = core_id.into();
        Self {
            core_id: if core_id.is_empty() {
                DEFAULT_CORE_ID.to_string()
            } else {
                core_id
            },
        }
    }
}

impl Default for MemoryPrefs {
    fn default() -> Self {
        Self::new(DEFAULT_CORE_ID)
    }
}

impl PreferenceStore for MemoryPrefs {
    fn core_id(&self) -> String {
        self.core_id.clone()
    }

    fn set_core_id(&mut self, id: &str) {
        self.core_id = id.to_string();
    }
}
