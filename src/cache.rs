//! Parse cache over the content store.
//!
//! [`ContentCache`] owns the active define set and memoizes parsed trees
//! keyed by (path, define fingerprint). One rebuild attempt runs inside a
//! [`CacheTransaction`] so every document loaded during the attempt shares
//! one transaction-scoped memo: repeated inclusions are parsed once per
//! rebuild, not once per document. The transaction is locked after core
//! selection, freezing the define snapshot that overlay loads will see.

use crate::defines::{fingerprint_of, DefineMap, DefineStack};
use crate::error::StoreError;
use crate::schema::SchemaValidator;
use crate::store::ContentStore;
use crate::tree::ConfigTree;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

type MemoKey = (PathBuf, String);

#[derive(Default)]
struct TxnState {
    memo: HashMap<MemoKey, ConfigTree>,
    /// Define snapshot frozen at lock time; `None` until locked.
    frozen: Option<DefineMap>,
}

/// Caching, define-aware document loader.
pub struct ContentCache {
    store: Arc<dyn ContentStore>,
    defines: DefineStack,
    use_cache: bool,
    memo: Mutex<HashMap<MemoKey, ConfigTree>>,
    txn: Mutex<Option<TxnState>>,
    last_checksum: Mutex<Option<String>>,
}

impl ContentCache {
    pub fn new(store: Arc<dyn ContentStore>, use_cache: bool) -> Self {
        Self {
            store,
            defines: DefineStack::new(),
            use_cache,
            memo: Mutex::new(HashMap::new()),
            txn: Mutex::new(None),
            last_checksum: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    /// The process-wide define stack. Scope guards clone this handle.
    pub fn defines(&self) -> &DefineStack {
        &self.defines
    }

    /// Load and parse one document under the current (or frozen) defines.
    ///
    /// An optional validator is run over freshly parsed trees; its findings
    /// are logged as warnings and never fail the load.
    pub fn get_tree(
        &self,
        path: &Path,
        validator: Option<&mut SchemaValidator>,
    ) -> Result<ConfigTree, StoreError> {
        let snapshot = {
            let txn = self.txn.lock().expect("cache txn poisoned");
            match txn.as_ref().and_then(|t| t.frozen.clone()) {
                Some(frozen) => frozen,
                None => self.defines.snapshot(),
            }
        };
        let key = (path.to_path_buf(), fingerprint_of(&snapshot));

        {
            let txn = self.txn.lock().expect("cache txn poisoned");
            if let Some(tree) = txn.as_ref().and_then(|t| t.memo.get(&key)) {
                debug!(path = %path.display(), "transaction memo hit");
                return Ok(tree.clone());
            }
        }
        if self.use_cache {
            let memo = self.memo.lock().expect("cache memo poisoned");
            if let Some(tree) = memo.get(&key) {
                debug!(path = %path.display(), "parse cache hit");
                return Ok(tree.clone());
            }
        }

        let text = self.store.read_document(path)?;
        let tree = ConfigTree::from_yaml_str(&text, &snapshot)
            .map_err(|message| StoreError::parse(path, message))?;

        if let Some(validator) = validator {
            validator.validate(&tree);
            for finding in validator.take_errors() {
                warn!(path = %path.display(), "schema: {finding}");
            }
        }

        {
            let mut txn = self.txn.lock().expect("cache txn poisoned");
            if let Some(t) = txn.as_mut() {
                t.memo.insert(key.clone(), tree.clone());
            }
        }
        if self.use_cache {
            self.memo
                .lock()
                .expect("cache memo poisoned")
                .insert(key, tree.clone());
        }
        Ok(tree)
    }

    /// Start the shared transaction for one rebuild attempt.
    pub fn begin_transaction(&self) -> CacheTransaction<'_> {
        let mut txn = self.txn.lock().expect("cache txn poisoned");
        debug_assert!(txn.is_none(), "rebuild transactions do not nest");
        *txn = Some(TxnState::default());
        CacheTransaction { cache: self }
    }

    /// Compute the on-disk checksum token, remembering it for later
    /// comparisons. Does not invalidate anything by itself.
    pub fn verify_checksum(&self) -> String {
        let token = self.store.tree_checksum();
        let mut last = self.last_checksum.lock().expect("checksum poisoned");
        if last.is_none() {
            *last = Some(token.clone());
        }
        token
    }

    /// Re-read the checksum token; if the content tree changed since the
    /// last check, drop every memoized parse.
    pub fn recheck_tree_checksum(&self) {
        let token = self.store.tree_checksum();
        let mut last = self.last_checksum.lock().expect("checksum poisoned");
        if last.as_deref() != Some(token.as_str()) {
            info!("content tree changed, dropping parse cache");
            self.memo.lock().expect("cache memo poisoned").clear();
        }
        *last = Some(token);
    }
}

/// Guard for one rebuild's shared parsing transaction.
pub struct CacheTransaction<'a> {
    cache: &'a ContentCache,
}

impl CacheTransaction<'_> {
    /// Freeze the define snapshot for the rest of the transaction. Called
    /// once core selection is done, so defines contributed by the core stay
    /// visible to overlays while overlay-side pushes cannot retroactively
    /// change what the core's documents resolved to.
    pub fn lock(&self) {
        let mut txn = self.cache.txn.lock().expect("cache txn poisoned");
        if let Some(t) = txn.as_mut() {
            t.frozen = Some(self.cache.defines.snapshot());
        }
    }
}

impl Drop for CacheTransaction<'_> {
    fn drop(&mut self) {
        *self.cache.txn.lock().expect("cache txn poisoned") = None;
    }
}
