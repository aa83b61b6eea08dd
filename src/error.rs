use std::path::PathBuf;

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors returned by the image-to-markdown pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// The file extension is not on the supported allow-list.
    #[error("Unsupported image format '{extension}' for {path} (supported: {supported})")]
    UnsupportedFormat {
        path: PathBuf,
        extension: String,
        supported: String,
    },

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The provider answered, but declined to describe the image.
    #[error("The model declined to describe {filename}: {message}")]
    Refusal { filename: String, message: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Failed to write cache entry {key}: {source}")]
    CacheWrite {
        key: String,
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Join(String),
}

impl Error {
    /// True for errors raised before any cache or network access.
    pub fn is_preflight(&self) -> bool {
        matches!(self, Error::UnsupportedFormat { .. } | Error::NotFound(_))
    }

    pub fn is_refusal(&self) -> bool {
        matches!(self, Error::Refusal { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
