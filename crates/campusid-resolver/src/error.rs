//! Resolver error types.

use campusid_auth::AuthError;
use campusid_core::CampusError;
use thiserror::Error;

/// Error raised while resolving a request's credentials.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The caller could not be authenticated. The message is redacted and
    /// safe to surface.
    #[error("Unauthorized{}", message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    Unauthorized {
        /// Optional redacted context.
        message: Option<String>,
    },

    /// Authenticated, but the token does not allow this context.
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// The endpoint's strategy chain or the resolver is misconfigured.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The directory could not be reached while resolving.
    #[error("directory unavailable: {message}")]
    Unavailable { message: String },

    /// Bearer-token validation failure.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ResolverError {
    /// Create an `Unauthorized` error with a redacted message.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ResolverError::Unauthorized {
            message: Some(message.into()),
        }
    }

    /// Create a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        ResolverError::Configuration {
            message: message.into(),
        }
    }
}

impl From<ResolverError> for CampusError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::Unauthorized { message } => CampusError::Unauthorized { message },
            ResolverError::Forbidden { message } => CampusError::Forbidden { message },
            ResolverError::Configuration { message } => CampusError::Configuration { message },
            ResolverError::Unavailable { message } => CampusError::Unavailable { message },
            ResolverError::Auth(err) => CampusError::Unauthorized {
                message: Some(err.status_code().to_string()),
            },
        }
    }
}
