use std::path::PathBuf;

/// Errors that can occur while generating or checking hash manifests.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unknown manifest format: {0}")]
    UnknownFormat(String),

    #[error("Not a file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("File changed while hashing: expected {expected} bytes, read {actual}")]
    ChangedDuringRead { expected: u64, actual: u64 },
}

impl HashError {
    pub fn unsupported(name: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(name.into())
    }

    pub fn unknown_format(tag: impl Into<String>) -> Self {
        Self::UnknownFormat(tag.into())
    }
}
