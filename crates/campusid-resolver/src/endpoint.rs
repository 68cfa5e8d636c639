//! Endpoint authentication descriptors.
//!
//! Each endpoint declares which strategies it accepts and in which order.
//! The combination is validated at construction; a chain that cannot be
//! evaluated safely never reaches a request.

use crate::error::ResolverError;

/// One strategy an endpoint may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Transport-level basic credentials.
    Basic,
    /// Username/password from the request body.
    FormPost,
    /// Password-management service secret.
    PasswordService,
    /// Email-management service secret.
    EmailService,
    /// MFA-management service secret.
    MfaService,
    /// Boot-server service secret.
    BootService,
    /// Legacy boot-server service secret.
    LegacyBootService,
    /// Bearer token.
    Bearer,
    /// Network-negotiated ticket. Only valid as the last strategy.
    Ticket,
}

/// Validated authentication declaration of one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointAuth {
    /// Endpoint name, used in audit records and token allow-lists.
    pub name: String,
    /// Ordered strategy chain.
    pub strategies: Vec<StrategyKind>,
    /// Scopes a bearer token must cover. Required when `Bearer` is
    /// declared.
    pub required_scopes: Vec<String>,
    /// Audience a bearer token must carry. Required when `Bearer` is
    /// declared.
    pub audience: Option<String>,
}

impl EndpointAuth {
    /// Declare an endpoint without a bearer strategy.
    pub fn new(
        name: impl Into<String>,
        strategies: Vec<StrategyKind>,
    ) -> Result<Self, ResolverError> {
        Self::build(name.into(), strategies, Vec::new(), None)
    }

    /// Declare an endpoint whose chain includes the bearer strategy.
    pub fn with_bearer(
        name: impl Into<String>,
        strategies: Vec<StrategyKind>,
        required_scopes: Vec<impl Into<String>>,
        audience: impl Into<String>,
    ) -> Result<Self, ResolverError> {
        Self::build(
            name.into(),
            strategies,
            required_scopes.into_iter().map(Into::into).collect(),
            Some(audience.into()),
        )
    }

    fn build(
        name: String,
        strategies: Vec<StrategyKind>,
        required_scopes: Vec<String>,
        audience: Option<String>,
    ) -> Result<Self, ResolverError> {
        if strategies.is_empty() {
            return Err(ResolverError::configuration(format!(
                "endpoint '{name}' declares no authentication strategies"
            )));
        }

        if let Some(pos) = strategies.iter().position(|s| *s == StrategyKind::Ticket) {
            if pos != strategies.len() - 1 {
                return Err(ResolverError::configuration(format!(
                    "endpoint '{name}': the ticket strategy must be the last in the chain"
                )));
            }
            if strategies.contains(&StrategyKind::LegacyBootService) {
                return Err(ResolverError::configuration(format!(
                    "endpoint '{name}': ticket and legacy boot-server \
                     strategies are mutually exclusive"
                )));
            }
        }

        if strategies.contains(&StrategyKind::Bearer) {
            if required_scopes.is_empty() {
                return Err(ResolverError::configuration(format!(
                    "endpoint '{name}': bearer strategy requires declared scopes"
                )));
            }
            if audience.is_none() {
                return Err(ResolverError::configuration(format!(
                    "endpoint '{name}': bearer strategy requires a declared audience"
                )));
            }
        }

        Ok(Self {
            name,
            strategies,
            required_scopes,
            audience,
        })
    }
}
