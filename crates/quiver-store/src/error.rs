use quiver_types::TypeError;

use crate::traits::Region;

/// Errors from bucket and backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object or query was rejected before any index was touched.
    #[error("validation failed: {0}")]
    Validation(#[from] TypeError),

    /// Another object already uses this name for this owner.
    #[error("object with the name {name} for the owner {owner} exists")]
    NameConflict { name: String, owner: String },

    /// A conditional insert found the key already present.
    #[error("key {key} already exists in the {region} region")]
    KeyExists { region: Region, key: String },

    /// No object with this identity.
    #[error("object not found: {0}")]
    NotFound(String),

    /// No object with this name for this owner.
    #[error("no object named {name} for the owner {owner}")]
    NameNotFound { name: String, owner: String },

    /// Failure reported by the storage engine.
    #[error("storage engine error: {0}")]
    Backend(String),

    /// A stored record could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the filesystem or an output sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Returns `true` for both identity and name lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NameNotFound { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
