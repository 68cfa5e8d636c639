//! Credential and identity types.

use campusid_auth::TokenClaims;

/// How a request ended up authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Transport-level basic credentials.
    Basic,
    /// Username/password from a form body.
    Form,
    /// Fixed service identity of the password-management feature.
    PasswordService,
    /// Fixed service identity of the email-management feature.
    EmailService,
    /// Fixed service identity of the MFA-management feature.
    MfaService,
    /// Fixed service identity of the boot server.
    BootService,
    /// Fixed service identity of the legacy boot server.
    LegacyBootService,
    /// Verified bearer token.
    Bearer,
    /// Network-negotiated ticket, decoded by the session bootstrap.
    Ticket,
}

impl AuthMethod {
    /// Name used in log lines and audit records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Basic => "basic",
            AuthMethod::Form => "form",
            AuthMethod::PasswordService => "password-service",
            AuthMethod::EmailService => "email-service",
            AuthMethod::MfaService => "mfa-service",
            AuthMethod::BootService => "boot-service",
            AuthMethod::LegacyBootService => "legacy-boot-service",
            AuthMethod::Bearer => "bearer",
            AuthMethod::Ticket => "ticket",
        }
    }
}

/// Credentials produced by one strategy, before the directory bind.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Which strategy produced them.
    pub method: AuthMethod,
    /// Distinguished name, when the strategy already knows it.
    pub dn: Option<String>,
    /// Login name, resolved to a DN after the chain when no DN is known.
    pub username: Option<String>,
    /// The secret to bind with.
    pub secret: Option<String>,
    /// Opaque negotiation blob for the ticket strategy.
    pub ticket: Option<Vec<u8>>,
    /// Verified token claims for the bearer strategy.
    pub claims: Option<TokenClaims>,
}

impl Credentials {
    /// Credentials known by DN.
    pub fn for_dn(method: AuthMethod, dn: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            method,
            dn: Some(dn.into()),
            username: None,
            secret: Some(secret.into()),
            ticket: None,
            claims: None,
        }
    }

    /// Credentials known by login name.
    pub fn for_username(
        method: AuthMethod,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            method,
            dn: None,
            username: Some(username.into()),
            secret: Some(secret.into()),
            ticket: None,
            claims: None,
        }
    }
}

/// The resolved caller of one request. Never persisted.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Distinguished name the session is bound to.
    pub dn: String,
    /// The strategy that won.
    pub method: AuthMethod,
    /// Verified token claims, on the bearer path.
    pub claims: Option<TokenClaims>,
    /// Raw delegated credential material, on the ticket path.
    pub delegated: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        assert_eq!(AuthMethod::Basic.as_str(), "basic");
        assert_eq!(AuthMethod::LegacyBootService.as_str(), "legacy-boot-service");
        assert_eq!(AuthMethod::Ticket.as_str(), "ticket");
    }

    #[test]
    fn test_credential_constructors() {
        let c = Credentials::for_dn(AuthMethod::Basic, "uid=x,dc=example,dc=org", "pw");
        assert!(c.dn.is_some() && c.username.is_none());

        let c = Credentials::for_username(AuthMethod::Form, "luke", "pw");
        assert!(c.dn.is_none() && c.username.as_deref() == Some("luke"));
    }
}
