//! Layered Configuration Resolution Engine
//!
//! Resolves a base ruleset (a "core") plus any number of installed overlay
//! packages into one composed, immutable configuration view, under a set of
//! named preprocessor-style defines. Rebuilds are cached, recoverable, and
//! always all-or-nothing: consumers only ever see the last good view.

pub mod cache;
pub mod cores;
pub mod defines;
pub mod derived;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod overlays;
pub mod prefs;
pub mod schema;
pub mod store;
pub mod tree;
pub mod version;
pub mod view;

pub use error::{LoadErrorEntry, ResolveError, StoreError};
pub use manager::{ConfigManager, ManagerOptions, ReloadStrength};
pub use tree::ConfigTree;
pub use view::ActiveView;
