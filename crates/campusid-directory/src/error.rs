//! Directory error types with transient/permanent classification.

use thiserror::Error;

/// Error raised by directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Failed to establish a connection to the directory server.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A directory operation timed out.
    #[error("operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The supplied bind credentials were rejected (LDAP rc 49).
    #[error("bind rejected: invalid credentials")]
    InvalidCredentials,

    /// The bound identity is not allowed to perform the operation
    /// (LDAP rc 50).
    #[error("insufficient access rights for {operation}")]
    InsufficientAccess { operation: String },

    /// The target entry does not exist (LDAP rc 32).
    #[error("no such entry: {dn}")]
    NoSuchEntry { dn: String },

    /// An entry with that DN already exists (LDAP rc 68).
    #[error("entry already exists: {dn}")]
    AlreadyExists { dn: String },

    /// The client is misconfigured or the operation is not supported by
    /// this client.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Any other failed directory operation.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DirectoryError {
    /// Whether the failure is transient and a bounded retry could succeed.
    ///
    /// Credential and access failures are permanent for the current
    /// request; only connectivity-class failures qualify.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DirectoryError::ConnectionFailed { .. } | DirectoryError::Timeout { .. }
        )
    }

    /// Create a connection failure without an underlying source.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failure wrapping an underlying error.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failure without an underlying source.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        DirectoryError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failure wrapping an underlying error.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DirectoryError::connection_failed("down").is_transient());
        assert!(DirectoryError::Timeout { timeout_secs: 5 }.is_transient());
        assert!(!DirectoryError::InvalidCredentials.is_transient());
        assert!(!DirectoryError::NoSuchEntry {
            dn: "uid=x".into()
        }
        .is_transient());
    }

    #[test]
    fn test_display() {
        let err = DirectoryError::InsufficientAccess {
            operation: "modify userPassword".into(),
        };
        assert_eq!(
            err.to_string(),
            "insufficient access rights for modify userPassword"
        );
    }
}
