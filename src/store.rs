//! Content store collaborator: raw document access.
//!
//! The resolution engine never touches the filesystem directly; everything
//! goes through [`ContentStore`], so tests and embedders can substitute
//! their own backing. [`FsStore`] is the stock filesystem implementation.

use crate::error::StoreError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Base cores manifest, relative to the data directory.
pub const CORES_MANIFEST: &str = "cores.yaml";
/// Per-overlay extra cores manifest, relative to the overlay directory.
pub const OVERLAY_CORES_MANIFEST: &str = "cores.yaml";
/// Overlay entry document, relative to the overlay directory.
pub const OVERLAY_MAIN: &str = "_main.yaml";
/// Author-supplied publishing metadata, relative to the overlay directory.
pub const OVERLAY_PUBLISH_INFO: &str = "_server.pbl";
/// Server-generated cached metadata, relative to the overlay directory.
pub const OVERLAY_CACHED_INFO: &str = "_info.yaml";
/// Optional schema document, relative to the data directory.
pub const SCHEMA_DOC: &str = "schema.yaml";

/// How directory listings report entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMode {
    /// Entries as full paths.
    FullPath,
    /// Entries as bare file names.
    NameOnly,
}

/// Raw access to the content tree on disk (or wherever it lives).
pub trait ContentStore: Send + Sync {
    /// Read one document's text.
    fn read_document(&self, path: &Path) -> Result<String, StoreError>;

    fn file_exists(&self, path: &Path) -> bool;

    /// List a directory's entries as `(files, dirs)`, each sorted by name.
    /// A missing directory lists as empty rather than failing.
    fn list_dir(&self, dir: &Path, mode: NameMode) -> (Vec<String>, Vec<String>);

    /// Token identifying the current on-disk content. Any change to the
    /// stored tree must change the token; equality means parse caches keyed
    /// on it are still valid.
    fn tree_checksum(&self) -> String;
}

/// Well-known locations inside a content installation.
#[derive(Debug, Clone)]
pub struct ContentPaths {
    pub data_dir: PathBuf,
    pub addons_dir: PathBuf,
}

impl ContentPaths {
    pub fn new(data_dir: impl Into<PathBuf>, addons_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            addons_dir: addons_dir.into(),
        }
    }

    /// Resolve a core `path` attribute against the data directory.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.data_dir.join(relative)
    }

    pub fn cores_manifest(&self) -> PathBuf {
        self.data_dir.join(CORES_MANIFEST)
    }

    pub fn schema_doc(&self) -> PathBuf {
        self.data_dir.join(SCHEMA_DOC)
    }

    pub fn overlay_dir(&self, id: &str) -> PathBuf {
        self.addons_dir.join(id)
    }

    pub fn overlay_main(&self, id: &str) -> PathBuf {
        self.overlay_dir(id).join(OVERLAY_MAIN)
    }

    pub fn overlay_publish_info(&self, id: &str) -> PathBuf {
        self.overlay_dir(id).join(OVERLAY_PUBLISH_INFO)
    }

    pub fn overlay_cached_info(&self, id: &str) -> PathBuf {
        self.overlay_dir(id).join(OVERLAY_CACHED_INFO)
    }

    pub fn overlay_cores_manifest(&self, id: &str) -> PathBuf {
        self.overlay_dir(id).join(OVERLAY_CORES_MANIFEST)
    }
}

/// Filesystem-backed content store.
#[derive(Debug, Clone)]
pub struct FsStore {
    roots: Vec<PathBuf>,
}

impl FsStore {
    /// A store whose checksum covers the given root directories.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn for_paths(paths: &ContentPaths) -> Self {
        Self::new(vec![paths.data_dir.clone(), paths.addons_dir.clone()])
    }

    fn hash_dir(&self, hasher: &mut Sha256, root: &Path, dir: &Path) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            let rel = path.strip_prefix(root).unwrap_or(&path);
            hasher.update(rel.to_string_lossy().as_bytes());
            if path.is_dir() {
                self.hash_dir(hasher, root, &path);
            } else if let Ok(meta) = entry.metadata() {
                hasher.update(meta.len().to_le_bytes());
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                hasher.update(mtime.to_le_bytes());
            }
        }
    }
}

impl ContentStore for FsStore {
    fn read_document(&self, path: &Path) -> Result<String, StoreError> {
        std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list_dir(&self, dir: &Path, mode: NameMode) -> (Vec<String>, Vec<String>) {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return (files, dirs);
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = match mode {
                NameMode::FullPath => path.to_string_lossy().into_owned(),
                NameMode::NameOnly => entry.file_name().to_string_lossy().into_owned(),
            };
            if path.is_dir() {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }
        files.sort();
        dirs.sort();
        (files, dirs)
    }

    fn tree_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for root in &self.roots {
            self.hash_dir(&mut hasher, root, root);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }
}
