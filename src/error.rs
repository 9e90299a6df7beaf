//! Error taxonomy for content loading and resolution.
//!
//! Three tiers, matching how failures propagate:
//! - [`StoreError`]: a single document could not be read or parsed. Depending
//!   on where it happens this is either contained (one overlay dropped) or
//!   escalated into a [`ResolveError`].
//! - [`ResolveError`]: a whole rebuild attempt failed. Recoverable variants
//!   feed the retry state machine; fatal variants are propagated to the
//!   caller after one final dialog.
//! - [`LoadErrorEntry`]: a contained per-entry failure, aggregated into the
//!   error log that is reported once, batched, after the overlay pass.

use std::path::PathBuf;
use thiserror::Error;

/// Failure reading or parsing a single content document.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl StoreError {
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Failure of a full resolution attempt.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No core with id "default" validated. Unrecoverable: the caller is
    /// expected to terminate.
    #[error("cannot locate the default core")]
    NoDefaultCore,

    /// An explicitly requested validation target never made it into the
    /// overlay registry. Distinct from a per-overlay skip: this is a
    /// configuration error on the caller's side.
    #[error("no add-on named \"{0}\" was loaded for validation; check the id for typos")]
    ValidationTargetMissing(String),

    /// A load failure at the core/base level. Triggers the recovery state
    /// machine before it is ever surfaced to the caller.
    #[error(transparent)]
    Load(#[from] StoreError),
}

impl ResolveError {
    /// Fatal errors skip the retry cascade entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResolveError::NoDefaultCore | ResolveError::ValidationTargetMissing(_)
        )
    }
}

/// One contained failure in the aggregated error log.
///
/// `origin` identifies the offending overlay or file (id or path); `message`
/// is the underlying error text shown in the batched report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadErrorEntry {
    pub origin: String,
    pub message: String,
}

impl LoadErrorEntry {
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }
}
