//! Error types for the inventory store.

use std::path::PathBuf;

use inodb_core::{PathId, ScanError};
use thiserror::Error;

/// Errors raised by the inventory, reconciler and scan pipeline.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The producer failed; the scan was abandoned without a sweep.
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scan was cancelled between chunks; no sweep was run.
    #[error("Scan cancelled")]
    Cancelled,

    #[error("Unknown path id {id}")]
    UnknownPath { id: PathId },

    /// The producer finished without yielding the scan root.
    #[error("Scan of {locator} produced no records")]
    EmptyScan { locator: String },

    #[error("Schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },
}
