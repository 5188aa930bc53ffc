//! Typed failures for the local tier.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// An update, delete-dependent read or reference targeted an
    /// identifier that does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    /// Underlying file I/O failed (quota, permissions, disk).
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A collection could not be encoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}
