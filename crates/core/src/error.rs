//! Error types for Cohome Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Raised when a session is requested before every member has set intentions.
    #[error("Intentions incomplete: {0}")]
    IntentionsIncomplete(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code surfaced to API callers
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::IntentionsIncomplete(_) => "intentions_incomplete",
            Error::Validation(_) => "validation",
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) => "internal",
        }
    }

    /// True for business-rule and auth failures the caller can act on
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::Database(_) | Error::Io(_) | Error::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::Forbidden("x".into()).code(), "forbidden");
        assert_eq!(Error::IntentionsIncomplete("x".into()).code(), "intentions_incomplete");
        assert_eq!(
            Error::Database(rusqlite::Error::QueryReturnedNoRows).code(),
            "internal"
        );
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::Validation("bad".into()).is_client_error());
        assert!(!Error::Io(std::io::Error::other("disk")).is_client_error());
    }
}
