//! # Sonicstore - local upload & track metadata store
//!
//! A single-file SQLite store exposing two collections through one
//! URI-addressed CRUD surface:
//! - `uploads` / `uploads/<id>`: files queued for upload and their lifecycle
//! - `tracks` / `tracks/<id>`: cached metadata for remote tracks
//!
//! Sonicstore provides:
//! - A versioned schema with deterministic upgrade paths
//! - Routing of resource identifiers to typed targets
//! - Insert/query/update/delete with parameterized filters
//! - Change notification after every successful mutation

pub mod uri;
pub mod value;
pub mod record;
pub mod filter;
pub mod storage;
pub mod store;
pub mod notify;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use uri::{Cardinality, ResourceUri, Target};
pub use value::{ContentValues, Value};
pub use record::{Collection, TrackRecord, UploadRecord};
pub use filter::{Filter, SortOrder};
pub use storage::{Database, StoreOptions};
pub use store::{Cursor, RecordStore, Row};
pub use notify::{ChangeBus, ChangeNotifier, NoopNotifier};

/// Result type alias for Sonicstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// The four record operations, used for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Query,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Query => "query",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for Sonicstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unrecognized identifier: {0}")]
    UnrecognizedIdentifier(String),

    #[error("Cannot {operation} {uri}")]
    InvalidOperationForTarget { operation: Operation, uri: String },

    #[error("Failed to insert row into {uri}: {reason}")]
    InsertFailed {
        uri: String,
        reason: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Unknown column '{column}' for {collection}")]
    UnknownColumn { collection: Collection, column: String },

    #[error("Column '{column}' of {collection} is assigned by the store")]
    ReadOnlyColumn { collection: Collection, column: String },

    #[error("No values to update")]
    EmptyValues,

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid sort order: {0}")]
    InvalidSortOrder(String),

    #[error("Schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: i32, supported: i32 },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
