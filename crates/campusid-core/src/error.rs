//! Platform-wide error type.
//!
//! Request-terminal failures that every subsystem can raise. More specific
//! error enums live in the crates that produce them and convert into this
//! type at the boundary where a request is answered.

use serde::Serialize;
use thiserror::Error;

use crate::ids::OrgId;

/// Standardized error type for campusid.
///
/// # Variants
///
/// - `Unauthorized` - the caller could not be authenticated (HTTP 401)
/// - `Forbidden` - authenticated but not allowed (HTTP 403)
/// - `NotFound` - a referenced record does not exist (HTTP 404)
/// - `OrgMismatch` - tenant isolation violation (HTTP 403)
/// - `Validation` - malformed input (HTTP 400)
/// - `Configuration` - unusable deployment settings, never retryable
/// - `Unavailable` - a collaborating system could not be reached
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampusError {
    /// Authentication failure. The message is already redacted.
    #[error("Unauthorized{}", message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    Unauthorized {
        /// Optional redacted context.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Authenticated caller lacks permission for the operation.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// What was denied.
        message: String,
    },

    /// Requested record was not found.
    #[error("{resource} not found{}", id.as_ref().map(|i| format!(": {i}")).unwrap_or_default())]
    NotFound {
        /// The type of record (e.g. "User", "Group").
        resource: String,
        /// Optional identifier.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Organization isolation violation.
    #[error("Organization mismatch: expected {expected}, got {actual}")]
    OrgMismatch {
        /// The organization the session is bound to.
        expected: OrgId,
        /// The organization that was requested.
        actual: OrgId,
    },

    /// Input validation failure.
    #[error("Validation error on field '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Description of the failure.
        message: String,
    },

    /// Missing or malformed deployment settings. Terminal, never retried.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is misconfigured.
        message: String,
    },

    /// A collaborating system could not be reached. Distinct from
    /// credential failures so callers never lock out a user because a
    /// remote system was briefly down.
    #[error("Unavailable: {message}")]
    Unavailable {
        /// Which system and why.
        message: String,
    },
}

impl CampusError {
    /// Create an `Unauthorized` error with a redacted message.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        CampusError::Unauthorized {
            message: Some(message.into()),
        }
    }

    /// Create a `Forbidden` error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        CampusError::Forbidden {
            message: message.into(),
        }
    }

    /// Create a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        CampusError::Configuration {
            message: message.into(),
        }
    }

    /// Create an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        CampusError::Unavailable {
            message: message.into(),
        }
    }

    /// Whether retrying the same request could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, CampusError::Unavailable { .. })
    }
}

/// Result alias using [`CampusError`].
pub type Result<T> = std::result::Result<T, CampusError>;
