//! Audit records for the bearer-token path.
//!
//! Every validation outcome, success or failure, produces exactly one
//! record. The sink is a collaborator; this crate ships a `tracing`-backed
//! sink and an in-memory sink for tests.

use std::sync::Mutex;

use campusid_core::CorrelationId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// One bearer-token validation outcome.
#[derive(Debug, Clone, Serialize)]
pub struct TokenAuditRecord {
    /// Outcome status code ("ok" or an [`crate::AuthError`] status code).
    pub status: String,
    /// Organization the request was resolved in, when known.
    pub organisation: Option<String>,
    /// Client the token was issued to (`sub`), when the token was
    /// readable.
    pub client_id: Option<String>,
    /// Token id (`jti`), when the token was readable.
    pub token_id: Option<String>,
    /// Endpoint the token was presented to.
    pub endpoint: String,
    /// Scopes the endpoint required.
    pub required_scopes: Vec<String>,
    /// Audience the endpoint declared.
    pub audience: String,
    /// The raw token, kept for forensic correlation of failures.
    pub raw_token: Option<String>,
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
}

impl TokenAuditRecord {
    /// Start a record for one validation attempt.
    pub fn new(
        endpoint: impl Into<String>,
        audience: impl Into<String>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            status: "ok".to_string(),
            organisation: None,
            client_id: None,
            token_id: None,
            endpoint: endpoint.into(),
            required_scopes: Vec::new(),
            audience: audience.into(),
            raw_token: None,
            correlation_id,
            timestamp: Utc::now(),
        }
    }
}

/// Where token audit records are delivered.
pub trait AuditSink: Send + Sync {
    /// Deliver one record. Must not fail the request path.
    fn record(&self, record: TokenAuditRecord);
}

/// Sink that emits records as structured log lines.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: TokenAuditRecord) {
        info!(
            status = %record.status,
            organisation = record.organisation.as_deref().unwrap_or("-"),
            client_id = record.client_id.as_deref().unwrap_or("-"),
            token_id = record.token_id.as_deref().unwrap_or("-"),
            endpoint = %record.endpoint,
            audience = %record.audience,
            correlation_id = %record.correlation_id,
            "token audit"
        );
    }
}

/// Sink that collects records in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<TokenAuditRecord>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records delivered so far.
    pub fn records(&self) -> Vec<TokenAuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: TokenAuditRecord) {
        self.records.lock().unwrap().push(record);
    }
}
