use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LandsatError {
    #[error("invalid area of interest: {0}")]
    InvalidGeometry(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("catalog request failed: {0}")]
    CatalogQuery(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("metadata probe failed: {0}")]
    MetadataProbe(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("download service returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("failed to read tile grid: {0}")]
    GridRead(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
