use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid property name {0:?}: expected \"{{namespace}}name\"")]
    InvalidPropertyName(String),

    #[error("invalid change token {token:?}: {reason}")]
    InvalidToken { token: String, reason: String },
}

/// Errors produced while parsing stored or submitted component text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComponentError {
    #[error("component text is empty")]
    Empty,

    #[error("expected BEGIN:VCALENDAR or BEGIN:VCARD, found {0:?}")]
    UnknownKind(String),

    #[error("malformed component: {0}")]
    Malformed(String),

    #[error("component has no UID")]
    MissingUid,
}
