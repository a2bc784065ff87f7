//! Error types for package identifiers

use thiserror::Error;

/// Identifier errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Cannot order {left} against {right}: different category/package")]
    IncomparableKeys { left: String, right: String },
}

/// Result type alias for identifier operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(value: &str, reason: &str) -> Self {
        Error::MalformedIdentifier(format!("{:?}: {}", value, reason))
    }
}
