//! Token validation error types.

use thiserror::Error;

/// Error raised during bearer-token validation.
///
/// Every variant is terminal for the current request; the audit status
/// code of each outcome is exposed via [`AuthError::status_code`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token has expired.
    #[error("token expired")]
    TokenExpired,

    /// Signature verification failed.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Token uses an algorithm other than the accepted one.
    #[error("invalid token algorithm")]
    InvalidAlgorithm,

    /// Token is structurally broken.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// A required claim is absent.
    #[error("missing required claim: {0}")]
    MissingClaim(String),

    /// The type header does not carry the required sentinel.
    #[error("wrong token type: expected {expected}, found {found}")]
    WrongTokenType { expected: String, found: String },

    /// The token was issued for a different audience.
    #[error("token audience '{found}' does not match '{expected}'")]
    AudienceMismatch { expected: String, found: String },

    /// The token's scopes do not cover the endpoint's required set.
    #[error("insufficient scope: missing {}", missing.join(" "))]
    InsufficientScope { missing: Vec<String> },

    /// The token carries an endpoint allow-list that excludes the
    /// requested endpoint.
    #[error("endpoint '{endpoint}' not allowed by token")]
    EndpointNotAllowed { endpoint: String },

    /// The token carries an organization allow-list that excludes the
    /// bound organization.
    #[error("organization '{organization}' not allowed by token")]
    OrganizationNotAllowed { organization: String },

    /// The verification key cannot be used.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl AuthError {
    /// Stable status code carried in audit records.
    #[must_use]
    pub fn status_code(&self) -> &'static str {
        match self {
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidAlgorithm => "invalid_algorithm",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::MissingClaim(_) => "missing_claim",
            AuthError::WrongTokenType { .. } => "wrong_token_type",
            AuthError::AudienceMismatch { .. } => "audience_mismatch",
            AuthError::InsufficientScope { .. } => "insufficient_scope",
            AuthError::EndpointNotAllowed { .. } => "endpoint_not_allowed",
            AuthError::OrganizationNotAllowed { .. } => "organization_not_allowed",
            AuthError::InvalidKey(_) => "invalid_key",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::TokenExpired.status_code(), "token_expired");
        assert_eq!(
            AuthError::InsufficientScope {
                missing: vec!["users:read".into()]
            }
            .status_code(),
            "insufficient_scope"
        );
    }

    #[test]
    fn test_insufficient_scope_display_lists_missing() {
        let err = AuthError::InsufficientScope {
            missing: vec!["users:read".into(), "users:write".into()],
        };
        assert_eq!(
            err.to_string(),
            "insufficient scope: missing users:read users:write"
        );
    }
}
