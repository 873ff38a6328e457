//! Error types for the editor core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EditError>;

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Invalid dsid: {0}")]
    InvalidDsid(String),

    #[error("Not readable: {0}")]
    NotReadable(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Broken backing store: {0}")]
    BrokenBacking(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Session has been closed")]
    SessionClosed,
}

impl EditError {
    /// True when the error came from a user interrupt rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EditError::Cancelled)
    }
}
