use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("catalog malformed at {}: {reason}", .record.as_deref().unwrap_or("document"))]
    Malformed {
        record: Option<String>,
        reason: String,
    },

    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
