//! Resolver configuration.

/// A fixed service identity read from configuration.
#[derive(Debug, Clone)]
pub struct ServiceAccount {
    /// Distinguished name of the service account.
    pub dn: String,
    /// Its secret.
    pub secret: String,
}

impl ServiceAccount {
    /// Create a service account.
    pub fn new(dn: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            secret: secret.into(),
        }
    }
}

/// Deployment configuration of the credential resolver.
///
/// Service-secret strategies whose account is `None` are not configured in
/// the current deployment mode and fail closed (skipped with a logged
/// reason) when a chain reaches them.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// The server's own privileged identity, used for username lookups and
    /// as the bound identity of bearer resolutions.
    pub server_identity: ServiceAccount,
    /// Password-management feature identity.
    pub password_service: Option<ServiceAccount>,
    /// Email-management feature identity.
    pub email_service: Option<ServiceAccount>,
    /// MFA-management feature identity.
    pub mfa_service: Option<ServiceAccount>,
    /// Boot-server identity.
    pub boot_service: Option<ServiceAccount>,
    /// Legacy boot-server identity.
    pub legacy_boot_service: Option<ServiceAccount>,
    /// Subtree searched when mapping login names to DNs; the client's
    /// default base when `None`.
    pub user_search_base: Option<String>,
    /// Attribute holding the login name.
    pub username_attribute: String,
}

impl ResolverConfig {
    /// Minimal configuration with only the server identity set.
    pub fn new(server_identity: ServiceAccount) -> Self {
        Self {
            server_identity,
            password_service: None,
            email_service: None,
            mfa_service: None,
            boot_service: None,
            legacy_boot_service: None,
            user_search_base: None,
            username_attribute: "uid".to_string(),
        }
    }
}
