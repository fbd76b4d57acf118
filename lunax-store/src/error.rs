//! Error types for the Lunax store
//!
//! All errors use thiserror for structured error handling.
//! Per-record problems found during an import are `ValidationError`s; they
//! are reported and skipped, never raised out of an import.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Interchange format error: {0}")]
    Format(String),

    #[error("Unsupported interchange version {found} (this build reads version {expected})")]
    Version { found: String, expected: u32 },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database schema version {found} is newer than this build supports ({supported})")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Unknown index '{index}' on collection '{collection}'")]
    UnknownIndex { collection: String, index: String },

    #[error("Record in '{collection}' has no usable key: {reason}")]
    MissingKey { collection: String, reason: String },

    #[error("Unique index '{index}' on '{collection}' already holds this key")]
    ConstraintViolation { collection: String, index: String },

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Attachment not found: {0}")]
    AttachmentNotFound(String),

    #[error("Attachment {attachment} is still referenced by entry {entry}")]
    AttachmentInUse { attachment: String, entry: String },

    #[error("Entry {entry} references missing attachment {attachment}")]
    DanglingAttachment { entry: String, attachment: String },

    #[error("{0}")]
    Generic(String),
}

/// Why a single incoming record was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{record} is not an object")]
    NotAnObject { record: &'static str },

    #[error("{record} is missing required field '{field}'")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    #[error("{record} {id} has an ill-typed field: {reason}")]
    InvalidField {
        record: &'static str,
        id: String,
        reason: String,
    },

    #[error("blob {id} has an unreadable payload: {reason}")]
    InvalidPayload { id: String, reason: String },

    #[error("entry {entry} references attachment {attachment} which is neither imported nor stored")]
    DanglingAttachment { entry: String, attachment: String },
}

pub type Result<T> = std::result::Result<T, AppError>;
