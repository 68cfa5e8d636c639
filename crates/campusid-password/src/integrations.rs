//! Downstream integrations dispatch.
//!
//! Password changes are propagated to configured downstream systems via
//! synchronous actions. The per-organization action rules are a read-mostly
//! snapshot behind an atomic swap: a refresh replaces the whole snapshot,
//! concurrent readers never observe a partial update.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use campusid_core::CorrelationId;

/// Action name dispatched when a password changes.
pub const ACTION_CHANGE_PASSWORD: &str = "change_password";

/// Connect timeout towards downstream systems.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Read timeout; longer than connect so slow hooks are not mistaken for
/// dead ones.
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Attempts per dispatch for transient failures.
const MAX_ATTEMPTS: u32 = 3;
/// Fixed delay between attempts.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// One configured downstream action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAction {
    /// Downstream system identifier.
    pub system: String,
    /// Only dispatch when the target holds one of these roles; no filter
    /// means everyone.
    #[serde(default)]
    pub role_filter: Option<BTreeSet<String>>,
}

impl SyncAction {
    /// Action without a role filter.
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            role_filter: None,
        }
    }

    /// Restrict the action to targets holding one of `roles`.
    #[must_use]
    pub fn with_role_filter(mut self, roles: Vec<impl Into<String>>) -> Self {
        self.role_filter = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the action applies to a target with the given roles.
    #[must_use]
    pub fn applies_to(&self, roles: &BTreeSet<String>) -> bool {
        match &self.role_filter {
            None => true,
            Some(filter) => filter.iter().any(|role| roles.contains(role)),
        }
    }
}

/// Immutable snapshot of the per-school synchronous action rules.
#[derive(Debug, Clone, Default)]
pub struct IntegrationRules {
    /// school -> action name -> configured systems.
    actions: HashMap<String, HashMap<String, Vec<SyncAction>>>,
    /// Schools exempt from downstream synchronization.
    exempt_schools: BTreeSet<String>,
}

impl IntegrationRules {
    /// Empty rules: nothing is dispatched anywhere.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: register an action for a school.
    #[must_use]
    pub fn with_action(
        mut self,
        school: impl Into<String>,
        action: impl Into<String>,
        sync_action: SyncAction,
    ) -> Self {
        self.actions
            .entry(school.into())
            .or_default()
            .entry(action.into())
            .or_default()
            .push(sync_action);
        self
    }

    /// Builder-style: exempt a school from downstream synchronization
    /// (the reserved administrative school).
    #[must_use]
    pub fn with_exempt_school(mut self, school: impl Into<String>) -> Self {
        self.exempt_schools.insert(school.into());
        self
    }

    /// Configured systems for one school and action.
    #[must_use]
    pub fn actions_for(&self, school: &str, action: &str) -> &[SyncAction] {
        self.actions
            .get(school)
            .and_then(|by_action| by_action.get(action))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the school skips downstream synchronization entirely.
    #[must_use]
    pub fn is_exempt(&self, school: &str) -> bool {
        self.exempt_schools.contains(school)
    }
}

/// Atomically swapped holder of the current [`IntegrationRules`].
#[derive(Debug, Default)]
pub struct IntegrationRegistry {
    snapshot: ArcSwap<IntegrationRules>,
}

impl IntegrationRegistry {
    /// Registry starting with the given rules.
    #[must_use]
    pub fn new(rules: IntegrationRules) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(rules),
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<IntegrationRules> {
        self.snapshot.load_full()
    }

    /// Replace the whole snapshot; readers in flight keep the old one.
    pub fn refresh(&self, rules: IntegrationRules) {
        self.snapshot.store(Arc::new(rules));
        debug!("integration rules refreshed");
    }
}

/// Dispatch of synchronous actions to downstream systems.
///
/// Returns `(success, code)`; the caller never interprets the code beyond
/// the boolean.
#[async_trait]
pub trait Integrations: Send + Sync {
    /// Dispatch one synchronous action.
    async fn do_synchronous_action(
        &self,
        action: &str,
        system: &str,
        correlation_id: CorrelationId,
        params: &Value,
    ) -> (bool, String);
}

#[derive(Debug, Serialize)]
struct DispatchRequest<'a> {
    action: &'a str,
    system: &'a str,
    correlation_id: String,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct DispatchResponse {
    success: bool,
    code: String,
}

/// HTTP dispatcher.
///
/// Transient failures (connect errors, timeouts, 5xx) retry a fixed number
/// of times with a fixed delay; semantic rejections never retry.
pub struct HttpIntegrations {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIntegrations {
    /// Create a dispatcher against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, system: &str, action: &str) -> String {
        format!(
            "{}/hooks/{}/{}",
            self.base_url.trim_end_matches('/'),
            system,
            action
        )
    }
}

#[async_trait]
impl Integrations for HttpIntegrations {
    async fn do_synchronous_action(
        &self,
        action: &str,
        system: &str,
        correlation_id: CorrelationId,
        params: &Value,
    ) -> (bool, String) {
        let url = self.url(system, action);
        let body = DispatchRequest {
            action,
            system,
            correlation_id: correlation_id.to_string(),
            params,
        };

        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.post(&url).json(&body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return match response.json::<DispatchResponse>().await {
                            Ok(parsed) => (parsed.success, parsed.code),
                            Err(err) => {
                                warn!(system = %system, error = %err, "unparseable dispatcher response");
                                (false, "invalid_response".to_string())
                            }
                        };
                    }
                    if status.is_server_error() && attempt < MAX_ATTEMPTS {
                        warn!(system = %system, status = %status, attempt, "transient dispatch failure; retrying");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                    // 4xx is a semantic rejection, never retried.
                    return (false, format!("http_{}", status.as_u16()));
                }
                Err(err) if attempt < MAX_ATTEMPTS => {
                    warn!(system = %system, error = %err, attempt, "dispatch request failed; retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => {
                    warn!(system = %system, error = %err, "dispatch request failed; giving up");
                    return (false, "unavailable".to_string());
                }
            }
        }
        (false, "unavailable".to_string())
    }
}
