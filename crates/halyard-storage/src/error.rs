use std::path::PathBuf;

use thiserror::Error;

/// Failures of the durable consensus stores. Every variant is fatal to the
/// consensus instance that hit it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot {path:?} is corrupt: {reason}")]
    CorruptSnapshot { path: PathBuf, reason: String },

    #[error("Failed to encode snapshot: {0}")]
    Encode(String),

    #[error("Stored record is unreadable: {0}")]
    Record(#[from] halyard_core::CoreError),
}
