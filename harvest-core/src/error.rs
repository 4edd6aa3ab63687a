//! Error taxonomy for the harvest pipeline
//!
//! Per-item failures during batch stages (archive fetch, audit) are isolated
//! and reported; only a missing store schema terminates a run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur across the harvest pipeline
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("store schema missing; re-run with --create-schema to initialize the database")]
    SchemaMissing,

    #[error("catalog request failed for page {page}: status {status}: {message}")]
    CatalogRequest {
        page: u32,
        status: u16,
        message: String,
    },

    #[error("malformed catalog page {page}: {reason}")]
    MalformedPage { page: u32, reason: String },

    #[error("download failed for {slug}: {reason}")]
    Download { slug: String, reason: String },

    #[error("corrupt archive for {slug}: {reason}")]
    CorruptArchive { slug: String, reason: String },

    #[error("analyzer failed for {slug}: {reason}")]
    Analyzer { slug: String, reason: String },

    #[error("analyzer output missing: {0}")]
    OutputMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl HarvestError {
    /// Whether this error must terminate the whole run rather than one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarvestError::SchemaMissing)
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
