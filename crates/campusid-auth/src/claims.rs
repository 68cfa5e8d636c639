//! Access-token claims.
//!
//! The payload shape consumed at the validation boundary: RFC 7519
//! standard claims plus the platform's scope string and optional
//! endpoint/organization allow-lists.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Claims of one access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// Subject - the client the token was issued to.
    pub sub: String,

    /// Issuer.
    pub iss: String,

    /// Audience - the endpoint group this token may call.
    pub aud: String,

    /// Expiration time as Unix timestamp.
    pub exp: i64,

    /// Issued at as Unix timestamp.
    pub iat: i64,

    /// Token id.
    pub jti: String,

    /// Granted scopes, space-delimited.
    #[serde(default)]
    pub scopes: String,

    /// Endpoints this token may be presented to; unrestricted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_endpoints: Option<Vec<String>>,

    /// Organizations this token may act in; unrestricted when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_organisations: Option<Vec<String>>,
}

impl TokenClaims {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> TokenClaimsBuilder {
        TokenClaimsBuilder::default()
    }

    /// The granted scopes as a set.
    #[must_use]
    pub fn scope_set(&self) -> BTreeSet<&str> {
        self.scopes.split_whitespace().collect()
    }

    /// Required scopes not covered by this token. Empty means fully
    /// covered; excess scopes on the token are ignored.
    #[must_use]
    pub fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        let granted = self.scope_set();
        required
            .iter()
            .filter(|s| !granted.contains(s.as_str()))
            .cloned()
            .collect()
    }

    /// Whether the token may be presented to `endpoint`.
    #[must_use]
    pub fn allows_endpoint(&self, endpoint: &str) -> bool {
        match &self.allowed_endpoints {
            Some(list) => list.iter().any(|e| e == endpoint),
            None => true,
        }
    }

    /// Whether the token may act in `organisation`.
    #[must_use]
    pub fn allows_organisation(&self, organisation: &str) -> bool {
        match &self.allowed_organisations {
            Some(list) => list.iter().any(|o| o == organisation),
            None => true,
        }
    }
}

/// Builder for [`TokenClaims`].
#[derive(Debug, Default)]
pub struct TokenClaimsBuilder {
    sub: Option<String>,
    iss: Option<String>,
    aud: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    jti: Option<String>,
    scopes: Option<String>,
    allowed_endpoints: Option<Vec<String>>,
    allowed_organisations: Option<Vec<String>>,
}

impl TokenClaimsBuilder {
    /// Set the subject (client id).
    #[must_use]
    pub fn subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    /// Set the issuer.
    #[must_use]
    pub fn issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    /// Set the audience.
    #[must_use]
    pub fn audience(mut self, aud: impl Into<String>) -> Self {
        self.aud = Some(aud.into());
        self
    }

    /// Set expiration as a Unix timestamp.
    #[must_use]
    pub fn expiration(mut self, exp: i64) -> Self {
        self.exp = Some(exp);
        self
    }

    /// Set expiration as seconds from now.
    #[must_use]
    pub fn expires_in_secs(mut self, secs: i64) -> Self {
        self.exp = Some(Utc::now().timestamp() + secs);
        self
    }

    /// Set the issued-at time.
    #[must_use]
    pub fn issued_at(mut self, iat: i64) -> Self {
        self.iat = Some(iat);
        self
    }

    /// Set the token id.
    #[must_use]
    pub fn token_id(mut self, jti: impl Into<String>) -> Self {
        self.jti = Some(jti.into());
        self
    }

    /// Set the space-delimited scope string.
    #[must_use]
    pub fn scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = Some(scopes.into());
        self
    }

    /// Restrict the token to the given endpoints.
    #[must_use]
    pub fn allowed_endpoints(mut self, endpoints: Vec<impl Into<String>>) -> Self {
        self.allowed_endpoints = Some(endpoints.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict the token to the given organizations.
    #[must_use]
    pub fn allowed_organisations(mut self, orgs: Vec<impl Into<String>>) -> Self {
        self.allowed_organisations = Some(orgs.into_iter().map(Into::into).collect());
        self
    }

    /// Build the claims.
    ///
    /// Defaults: issuer "campusid", expiry one hour from now, issued-at
    /// now, random token id.
    #[must_use]
    pub fn build(self) -> TokenClaims {
        let now = Utc::now().timestamp();
        TokenClaims {
            sub: self.sub.unwrap_or_default(),
            iss: self.iss.unwrap_or_else(|| "campusid".to_string()),
            aud: self.aud.unwrap_or_default(),
            exp: self.exp.unwrap_or(now + 3600),
            iat: self.iat.unwrap_or(now),
            jti: self.jti.unwrap_or_else(|| Uuid::new_v4().to_string()),
            scopes: self.scopes.unwrap_or_default(),
            allowed_endpoints: self.allowed_endpoints,
            allowed_organisations: self.allowed_organisations,
        }
    }
}
