use std::io;

use davstore_props::PropertyError;
use davstore_txn::{TxnError, TxnState};
use davstore_types::{ComponentError, TypeError};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named entry does not exist (or is hidden, or pending removal).
    #[error("not found: {0}")]
    NotFound(String),

    /// The name can never be used for a client-visible entry.
    #[error("name not allowed: {name:?}: {reason}")]
    NameNotAllowed { name: String, reason: String },

    /// A visible entry with this name already exists.
    #[error("name already exists: {0}")]
    NameAlreadyExists(String),

    /// New content carries a different UID than the resource it replaces.
    #[error("identity mismatch for {name}: stored uid {existing:?}, new uid {proposed:?}")]
    IdentityMismatch {
        name: String,
        existing: String,
        proposed: String,
    },

    /// On-disk state contradicts what the store expects (failed finalize,
    /// corrupt content, exhausted trash names).
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// The transaction already committed or aborted.
    #[error("transaction already {0}")]
    TransactionFinished(TxnState),

    /// The component cannot be stored in this collection.
    #[error("invalid component: {0}")]
    InvalidComponent(String),

    #[error("property error: {0}")]
    Property(#[from] PropertyError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Wrap an I/O failure that leaves the store in an unexpected state.
    pub fn inconsistency(context: impl std::fmt::Display, err: io::Error) -> Self {
        Self::InternalInconsistency(format!("{context}: {err}"))
    }
}

impl From<TxnError<StoreError>> for StoreError {
    fn from(err: TxnError<StoreError>) -> Self {
        match err {
            TxnError::Finished(state) => Self::TransactionFinished(state),
            TxnError::StepFailed {
                label,
                source: Self::Io(e),
            } => Self::inconsistency(label, e),
            TxnError::StepFailed {
                label,
                source: Self::Property(PropertyError::Io(e)),
            } => Self::inconsistency(label, e),
            TxnError::StepFailed { source, .. } => source,
        }
    }
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidName { name, reason } => Self::NameNotAllowed { name, reason },
            other => Self::InternalInconsistency(other.to_string()),
        }
    }
}

impl From<ComponentError> for StoreError {
    fn from(err: ComponentError) -> Self {
        Self::InvalidComponent(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
