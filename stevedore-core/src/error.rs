//! Error types for Stevedore.
//!
//! Errors carry stable codes grouped by component: `E0xx` for the manifest
//! store and manifest validation, `E1xx` for the observed-state cache, `E2xx`
//! for runtime and network collaborator failures, and `E9xx` for I/O and
//! configuration loading. The classification helpers (`is_transient`,
//! `is_fatal`) drive the executor's retry policy and the controller's
//! shutdown behavior.

use crate::runtime::RuntimeError;
use crate::types::{ManifestId, UnitId};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Stevedore operations.
#[derive(Debug, Error)]
pub enum StevedoreError {
    /// A manifest failed validation and was rejected at apply time.
    #[error("E001: Invalid manifest '{name}': {cause}")]
    ManifestInvalid {
        /// The manifest name.
        name: String,
        /// Reason the manifest was rejected.
        cause: String,
    },

    /// No manifest is stored under the requested identity.
    #[error("E002: Manifest {id} not found")]
    ManifestNotFound {
        /// The identity that was looked up.
        id: ManifestId,
    },

    /// The manifest store failed an integrity check. Fatal: the controller
    /// loop shuts down cleanly and the process exits non-zero.
    #[error("E003: Manifest store corruption: {cause}")]
    StoreCorruption {
        /// Description of the detected corruption.
        cause: String,
    },

    /// A lifecycle event arrived with a sequence number at or below the one
    /// already stored for its unit. Dropped by the cache, surfaced only for
    /// observability.
    #[error("E101: Stale event for {unit_id}: sequence {received} <= stored {stored}")]
    StaleEvent {
        /// The unit the event referred to.
        unit_id: UnitId,
        /// The sequence number currently stored.
        stored: u64,
        /// The sequence number carried by the dropped event.
        received: u64,
    },

    /// A runtime or network collaborator call failed.
    #[error("E201: {0}")]
    Runtime(#[from] RuntimeError),

    /// A transient failure persisted past the bounded retry count. Reported
    /// as permanent; the owning identity is requeued for a later cycle.
    #[error("E202: Action '{action}' failed permanently after {attempts} attempts: {cause}")]
    RetriesExhausted {
        /// The action kind that was being executed.
        action: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// The last transient failure observed.
        cause: String,
    },

    /// A manifest document could not be parsed.
    #[error("E901: Failed to parse manifest at {path}: {cause}")]
    ManifestParse {
        /// The file the document came from.
        path: PathBuf,
        /// Reason for the parse failure.
        cause: String,
    },

    /// File I/O error while loading manifests.
    #[error("E902: I/O error at {path}: {cause}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// Description of the I/O error.
        cause: String,
    },
}

impl StevedoreError {
    /// Get the stable error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ManifestInvalid { .. } => "E001",
            Self::ManifestNotFound { .. } => "E002",
            Self::StoreCorruption { .. } => "E003",
            Self::StaleEvent { .. } => "E101",
            Self::Runtime(_) => "E201",
            Self::RetriesExhausted { .. } => "E202",
            Self::ManifestParse { .. } => "E901",
            Self::Io { .. } => "E902",
        }
    }

    /// Check if this error is transient and eligible for retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Runtime(e) if e.is_transient())
    }

    /// Check if this error is fatal to the controller loop.
    ///
    /// Fatal errors cause a clean shutdown with a non-zero exit code; all
    /// other errors are scoped to a single identity's reconcile cycle.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreCorruption { .. })
    }
}

/// Result type alias using [`StevedoreError`].
pub type Result<T> = std::result::Result<T, StevedoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn error_is_send_sync() {
        _assert_send_sync::<StevedoreError>();
    }

    #[test]
    fn error_codes_are_correct() {
        let err = StevedoreError::ManifestInvalid {
            name: "web-a".to_string(),
            cause: "empty image".to_string(),
        };
        assert_eq!(err.code(), "E001");

        let err = StevedoreError::StoreCorruption {
            cause: "key mismatch".to_string(),
        };
        assert_eq!(err.code(), "E003");
        assert!(err.is_fatal());
    }

    #[test]
    fn transient_classification_follows_runtime_error() {
        let err = StevedoreError::Runtime(RuntimeError::Unavailable("connection reset".into()));
        assert!(err.is_transient());

        let err = StevedoreError::Runtime(RuntimeError::ImageRejected {
            image: "img:@@".into(),
            cause: "malformed reference".into(),
        });
        assert!(!err.is_transient());

        let err = StevedoreError::RetriesExhausted {
            action: "create-unit",
            attempts: 4,
            cause: "timed out".into(),
        };
        assert!(!err.is_transient());
    }
}
