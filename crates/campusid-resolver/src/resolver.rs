//! The credential resolver.
//!
//! Evaluates an endpoint's strategy chain with first-match-wins semantics:
//! a strategy that is not applicable to the request continues the chain, a
//! strategy that is applicable but invalid terminates the request. After
//! the chain, the winning credentials are bound onto the directory session.

use std::sync::Arc;

use base64::Engine;
use tracing::{debug, info, warn};

use campusid_auth::{AuditSink, TokenAuditRecord, TokenValidator};
use campusid_core::CorrelationId;
use campusid_directory::{filter::looks_like_dn, DirectoryClient, Filter};

use crate::config::{ResolverConfig, ServiceAccount};
use crate::credentials::{AuthMethod, Credentials, Identity};
use crate::endpoint::{EndpointAuth, StrategyKind};
use crate::error::ResolverError;
use crate::request::AuthRequest;

/// Resolves one verified identity per request.
pub struct CredentialResolver {
    config: ResolverConfig,
    directory: Arc<dyn DirectoryClient>,
    validator: Option<TokenValidator>,
    audit: Arc<dyn AuditSink>,
}

impl CredentialResolver {
    /// Create a resolver.
    ///
    /// `validator` is `None` when no token verification key is configured;
    /// the bearer strategy then fails closed.
    pub fn new(
        config: ResolverConfig,
        directory: Arc<dyn DirectoryClient>,
        validator: Option<TokenValidator>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            directory,
            validator,
            audit,
        }
    }

    /// Resolve the request against the endpoint's strategy chain and bind
    /// the directory session to the result.
    ///
    /// `organisation` is the organization the request was routed to; bearer
    /// tokens carrying an organization allow-list are re-checked against it
    /// after the bind.
    pub async fn resolve(
        &self,
        request: &AuthRequest,
        endpoint: &EndpointAuth,
        organisation: &str,
        correlation_id: CorrelationId,
    ) -> Result<Identity, ResolverError> {
        let mut winner: Option<Credentials> = None;
        for kind in &endpoint.strategies {
            if let Some(credentials) =
                self.evaluate(*kind, request, endpoint, organisation, correlation_id)?
            {
                winner = Some(credentials);
                break;
            }
        }

        let credentials = winner.ok_or(ResolverError::Unauthorized {
            message: Some("no credentials presented".to_string()),
        })?;
        let method = credentials.method;

        // Ticket credentials are opaque here; the session bootstrap of the
        // directory layer owns the negotiation protocol.
        if let Some(blob) = credentials.ticket {
            let dn = self
                .directory
                .bind_negotiate(&blob)
                .await
                .map_err(|e| self.map_bind_error(e))?;
            info!(method = method.as_str(), dn = %dn, correlation_id = %correlation_id, "authenticated");
            return Ok(Identity {
                dn,
                method,
                claims: None,
                delegated: Some(blob),
            });
        }

        let dn = match credentials.dn {
            Some(dn) => dn,
            None => {
                let username = credentials.username.as_deref().ok_or_else(|| {
                    ResolverError::unauthorized("credentials carry neither DN nor username")
                })?;
                self.lookup_dn(username).await?.ok_or_else(|| {
                    // Redacted: the login name must not appear in responses.
                    ResolverError::unauthorized(
                        "credentials could not be mapped to a directory identity",
                    )
                })?
            }
        };

        let secret = credentials
            .secret
            .as_deref()
            .ok_or_else(|| ResolverError::unauthorized("no secret presented"))?;
        self.directory
            .bind(&dn, secret)
            .await
            .map_err(|e| self.map_bind_error(e))?;

        if let Some(claims) = &credentials.claims {
            let mut record = self.token_record(endpoint, organisation, correlation_id);
            record.client_id = Some(claims.sub.clone());
            record.token_id = Some(claims.jti.clone());

            if !claims.allows_organisation(organisation) {
                record.status = "organisation_not_allowed".to_string();
                self.audit.record(record);
                return Err(ResolverError::Forbidden {
                    message: format!(
                        "token does not allow organization '{organisation}'"
                    ),
                });
            }
            self.audit.record(record);
        }

        info!(method = method.as_str(), dn = %dn, correlation_id = %correlation_id, "authenticated");
        Ok(Identity {
            dn,
            method,
            claims: credentials.claims,
            delegated: None,
        })
    }

    /// Evaluate one strategy. `Ok(None)` continues the chain; `Err` is
    /// terminal.
    fn evaluate(
        &self,
        kind: StrategyKind,
        request: &AuthRequest,
        endpoint: &EndpointAuth,
        organisation: &str,
        correlation_id: CorrelationId,
    ) -> Result<Option<Credentials>, ResolverError> {
        match kind {
            StrategyKind::Basic => Self::evaluate_basic(request),
            StrategyKind::FormPost => Ok(Self::evaluate_form(request)),
            StrategyKind::PasswordService => Ok(self.service_credentials(
                AuthMethod::PasswordService,
                self.config.password_service.as_ref(),
            )),
            StrategyKind::EmailService => Ok(self.service_credentials(
                AuthMethod::EmailService,
                self.config.email_service.as_ref(),
            )),
            StrategyKind::MfaService => Ok(self.service_credentials(
                AuthMethod::MfaService,
                self.config.mfa_service.as_ref(),
            )),
            StrategyKind::BootService => Ok(self.service_credentials(
                AuthMethod::BootService,
                self.config.boot_service.as_ref(),
            )),
            StrategyKind::LegacyBootService => Ok(self.service_credentials(
                AuthMethod::LegacyBootService,
                self.config.legacy_boot_service.as_ref(),
            )),
            StrategyKind::Bearer => {
                self.evaluate_bearer(request, endpoint, organisation, correlation_id)
            }
            StrategyKind::Ticket => Self::evaluate_ticket(request),
        }
    }

    fn evaluate_basic(request: &AuthRequest) -> Result<Option<Credentials>, ResolverError> {
        let Some(encoded) = request.authorization("Basic") else {
            return Ok(None);
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| ResolverError::unauthorized("malformed basic credentials"))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| ResolverError::unauthorized("malformed basic credentials"))?;
        let (name, secret) = decoded
            .split_once(':')
            .ok_or_else(|| ResolverError::unauthorized("malformed basic credentials"))?;

        if looks_like_dn(name) {
            Ok(Some(Credentials::for_dn(AuthMethod::Basic, name, secret)))
        } else {
            Ok(Some(Credentials::for_username(
                AuthMethod::Basic,
                name,
                secret,
            )))
        }
    }

    fn evaluate_form(request: &AuthRequest) -> Option<Credentials> {
        let username = request.form_field("username")?;
        let password = request.form_field("password")?;
        Some(Credentials::for_username(
            AuthMethod::Form,
            username,
            password,
        ))
    }

    fn service_credentials(
        &self,
        method: AuthMethod,
        account: Option<&ServiceAccount>,
    ) -> Option<Credentials> {
        match account {
            Some(account) => Some(Credentials::for_dn(
                method,
                account.dn.clone(),
                account.secret.clone(),
            )),
            None => {
                debug!(
                    method = method.as_str(),
                    "service feature not configured in this deployment; strategy skipped"
                );
                None
            }
        }
    }

    fn evaluate_bearer(
        &self,
        request: &AuthRequest,
        endpoint: &EndpointAuth,
        organisation: &str,
        correlation_id: CorrelationId,
    ) -> Result<Option<Credentials>, ResolverError> {
        // Chain validation guarantees scopes and audience are declared.
        let Some(audience) = endpoint.audience.as_deref() else {
            return Ok(None);
        };
        let Some(validator) = &self.validator else {
            warn!("bearer strategy skipped: no token verification key configured");
            return Ok(None);
        };
        let Some(token) = request.authorization("Bearer") else {
            return Ok(None);
        };

        match validator.validate(token, audience, &endpoint.required_scopes, &endpoint.name) {
            Ok(claims) => {
                let mut credentials = Credentials::for_dn(
                    AuthMethod::Bearer,
                    self.config.server_identity.dn.clone(),
                    self.config.server_identity.secret.clone(),
                );
                credentials.claims = Some(claims);
                Ok(Some(credentials))
            }
            Err(err) => {
                let mut record = self.token_record(endpoint, organisation, correlation_id);
                record.status = err.status_code().to_string();
                record.raw_token = Some(token.to_string());
                self.audit.record(record);
                Err(ResolverError::Auth(err))
            }
        }
    }

    fn evaluate_ticket(request: &AuthRequest) -> Result<Option<Credentials>, ResolverError> {
        let Some(encoded) = request.authorization("Negotiate") else {
            return Ok(None);
        };
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| ResolverError::unauthorized("malformed negotiation token"))?;
        Ok(Some(Credentials {
            method: AuthMethod::Ticket,
            dn: None,
            username: None,
            secret: None,
            ticket: Some(blob),
            claims: None,
        }))
    }

    /// Privileged username-to-DN lookup bound with the server identity.
    async fn lookup_dn(&self, username: &str) -> Result<Option<String>, ResolverError> {
        let server = &self.config.server_identity;
        self.directory
            .bind(&server.dn, &server.secret)
            .await
            .map_err(|e| self.map_bind_error(e))?;

        let filter = Filter::eq(&self.config.username_attribute, username);
        let entries = self
            .directory
            .search(self.config.user_search_base.as_deref(), &filter, &["dn"])
            .await
            .map_err(|e| self.map_bind_error(e))?;

        Ok(entries.into_iter().next().map(|e| e.dn))
    }

    fn token_record(
        &self,
        endpoint: &EndpointAuth,
        organisation: &str,
        correlation_id: CorrelationId,
    ) -> TokenAuditRecord {
        let mut record = TokenAuditRecord::new(
            endpoint.name.clone(),
            endpoint.audience.clone().unwrap_or_default(),
            correlation_id,
        );
        record.organisation = Some(organisation.to_string());
        record.required_scopes = endpoint.required_scopes.clone();
        record
    }

    fn map_bind_error(&self, err: campusid_directory::DirectoryError) -> ResolverError {
        if err.is_transient() {
            ResolverError::Unavailable {
                message: err.to_string(),
            }
        } else {
            debug!(error = %err, "directory bind rejected");
            ResolverError::Unauthorized {
                message: Some("invalid credentials".to_string()),
            }
        }
    }
}
