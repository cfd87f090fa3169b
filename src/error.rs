use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A bounded wait (cache catch-up or patch retries) ran out of time.
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    /// Two edits of one batch overlap. This is a logic error and is never retried.
    #[error("Overlapping edits in {path}: {first_end} > {second_start}")]
    OverlappingEdits {
        path: String,
        first_end: usize,
        second_start: usize,
    },
    #[error("Invalid edit in {path}: range {start}..{end}")]
    InvalidEdit {
        path: String,
        start: usize,
        end: usize,
    },
    /// The store rejected a write because the file changed since it was read.
    #[error("File changed on disk while writing: {0}")]
    WriteConflict(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("File already exists: {0}")]
    AlreadyExists(String),
    #[error("File store error: {0}")]
    Store(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Malformed canvas {path}: {source}")]
    Canvas {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("File System error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Errors the patcher recovers from by re-reading the file.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::WriteConflict(_))
    }
}
