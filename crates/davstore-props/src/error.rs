//! Error types for property operations.

use std::path::PathBuf;

use davstore_types::PropertyName;
use thiserror::Error;

/// Errors that can occur during property operations.
#[derive(Debug, Error)]
pub enum PropertyError {
    /// The property is not set on this entry.
    #[error("property not found: {0}")]
    NotFound(PropertyName),

    /// The side file exists but cannot be decoded.
    #[error("corrupt property file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A previous holder of the in-memory state panicked.
    #[error("property store lock poisoned")]
    Poisoned,

    /// Serialization failure while writing the side file.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading or replacing the side file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for property operations.
pub type PropertyResult<T> = std::result::Result<T, PropertyError>;
