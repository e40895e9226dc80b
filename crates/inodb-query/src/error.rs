//! Error types for inventory queries.

use inodb_core::{OwnerKind, PathId};
use inodb_store::StoreError;
use thiserror::Error;

/// Errors raised while running a query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A root id passed to a query is not in the inventory.
    #[error("Path id {id} is not indexed")]
    RootNotIndexed { id: PathId },

    #[error("Unknown {kind} '{name}'")]
    UnknownOwner { kind: OwnerKind, name: String },

    #[error("Failed to serialize export: {0}")]
    Export(#[from] serde_json::Error),
}
