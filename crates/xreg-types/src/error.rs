use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid property path {path:?}: {reason}")]
    InvalidPropPath { path: String, reason: String },

    #[error("{0:?} isn't an xid")]
    InvalidXid(String),

    #[error("Malformed timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
