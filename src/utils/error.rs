use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArcflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported archive format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to read archive {path}: {reason}")]
    ArchiveReadFailed { path: PathBuf, reason: String },

    #[error("Failed to write archive {path}: {reason}")]
    ArchiveWriteFailed { path: PathBuf, reason: String },

    #[error("Failed to extract {path}: {reason}")]
    ArchiveExtractFailed { path: PathBuf, reason: String },

    #[error("Failed to scan directory {path}: {reason}")]
    ArchiveWalkFailed { path: PathBuf, reason: String },

    #[error("Background worker panicked")]
    WorkerPanicked,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ArcflowError>;
