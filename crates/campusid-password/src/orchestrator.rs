//! The password change orchestrator.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use campusid_core::{CorrelationId, ExtLoginStatus};
use campusid_directory::DirModify;
use campusid_sync::{ExternalDirectory, LocalUsers, SyncError};
use campusid_sync::users::ATTR_PASSWORD;

use crate::integrations::{IntegrationRegistry, Integrations, ACTION_CHANGE_PASSWORD};
use crate::result::{ExitStatus, PasswordChangeResult};

/// The identity performing a password change, with its current secret
/// (needed for the upstream change and for rollback).
#[derive(Debug, Clone)]
pub struct Actor {
    /// Distinguished name in the local directory.
    pub dn: String,
    /// Login name, used towards the external source.
    pub username: String,
    /// The actor's current password.
    pub password: String,
}

/// Sequences a password change through upstream, local and downstream
/// systems.
pub struct PasswordOrchestrator {
    vendor: Option<Arc<dyn ExternalDirectory>>,
    users: LocalUsers,
    integrations: Arc<dyn Integrations>,
    registry: Arc<IntegrationRegistry>,
}

impl PasswordOrchestrator {
    /// Create an orchestrator.
    ///
    /// `vendor` is `None` when external login is not configured for the
    /// organization; the upstream stage is then skipped as a success.
    pub fn new(
        vendor: Option<Arc<dyn ExternalDirectory>>,
        users: LocalUsers,
        integrations: Arc<dyn Integrations>,
        registry: Arc<IntegrationRegistry>,
    ) -> Self {
        Self {
            vendor,
            users,
            integrations,
            registry,
        }
    }

    /// Verify only that the actor may change the target's password,
    /// without committing anything. Used before destructive flows.
    pub async fn check_permission(
        &self,
        actor_dn: &str,
        target_username: &str,
    ) -> Result<bool, SyncError> {
        let Some(target) = self.users.find_by_username(target_username).await? else {
            return Ok(false);
        };
        Ok(self
            .users
            .client()
            .can_modify(actor_dn, &target.dn, ATTR_PASSWORD)
            .await?)
    }

    /// Run the full change.
    ///
    /// Stages are strictly ordered; each failure short-circuits the rest.
    /// A downstream failure rolls the local change back when the actor
    /// changed their own password; rollback failures are logged and do not
    /// change the reported outcome.
    #[instrument(skip(self, actor, new_password), fields(actor = %actor.username, target = %target_username, correlation_id = %correlation_id))]
    pub async fn change_password(
        &self,
        actor: &Actor,
        target_username: &str,
        new_password: &str,
        correlation_id: CorrelationId,
    ) -> PasswordChangeResult {
        let started = Instant::now();

        // Stage 1: upstream change.
        let extlogin_status = match &self.vendor {
            None => {
                debug!("external login not configured; upstream stage skipped");
                ExtLoginStatus::NotConfigured
            }
            Some(vendor) => {
                match vendor
                    .change_password(
                        &actor.username,
                        &actor.password,
                        target_username,
                        new_password,
                    )
                    .await
                {
                    Ok(()) => ExtLoginStatus::Updated,
                    // A target missing upstream is permission to continue:
                    // local-only accounts must still be changeable. The
                    // skip is recorded, not hidden.
                    Err(SyncError::UserMissing) => {
                        info!("target missing upstream; continuing with local change");
                        ExtLoginStatus::UserMissing
                    }
                    Err(err) => {
                        let status = upstream_failure_status(&err);
                        return self.failed(
                            started,
                            status,
                            None,
                            format!("upstream password change failed: {err}"),
                        );
                    }
                }
            }
        };

        // Stage 2: local change, permission-checked before committing.
        let target = match self.users.find_by_username(target_username).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                return self.failed(
                    started,
                    extlogin_status,
                    None,
                    format!("target user '{target_username}' not found locally"),
                );
            }
            Err(err) => {
                return self.failed(
                    started,
                    extlogin_status,
                    None,
                    format!("local lookup failed: {err}"),
                );
            }
        };

        match self
            .users
            .client()
            .can_modify(&actor.dn, &target.dn, ATTR_PASSWORD)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return self.failed(
                    started,
                    extlogin_status,
                    None,
                    "actor lacks the rights to change this password".to_string(),
                );
            }
            Err(err) => {
                return self.failed(
                    started,
                    extlogin_status,
                    None,
                    format!("permission check failed: {err}"),
                );
            }
        }

        if let Err(err) = self.users.set_password(&target.dn, new_password).await {
            return self.failed(
                started,
                extlogin_status,
                None,
                format!("local password change failed: {err}"),
            );
        }

        // Stage 3: downstream synchronization.
        let rules = self.registry.current();
        let school = target.schools.first().cloned();
        let mut sync_status = None;

        if let Some(school) = school {
            if rules.is_exempt(&school) {
                debug!(school = %school, "school exempt from downstream synchronization");
            } else {
                for action in rules.actions_for(&school, ACTION_CHANGE_PASSWORD) {
                    if !action.applies_to(&target.roles) {
                        debug!(
                            system = %action.system,
                            "role filter does not match target; system skipped"
                        );
                        continue;
                    }

                    let params = json!({
                        "username": target.username,
                        "password": new_password,
                    });
                    let (ok, code) = self
                        .integrations
                        .do_synchronous_action(
                            ACTION_CHANGE_PASSWORD,
                            &action.system,
                            correlation_id,
                            &params,
                        )
                        .await;
                    sync_status = Some(code.clone());

                    if !ok {
                        warn!(system = %action.system, code = %code, "downstream synchronization failed; aborting remaining systems");
                        self.rollback(actor, &target.dn, new_password).await;
                        return self.failed(
                            started,
                            extlogin_status,
                            sync_status,
                            format!("downstream system '{}' rejected the change", action.system),
                        );
                    }
                }
            }
        }

        info!(
            extlogin_status = extlogin_status.as_code(),
            "password change completed"
        );
        PasswordChangeResult {
            exit_status: ExitStatus::Success,
            extlogin_status,
            sync_status,
            message: "password changed".to_string(),
            duration: started.elapsed(),
        }
    }

    /// Best-effort compensation: revert the local password to its prior
    /// value, using the just-set new password as the rebind credential.
    /// Only possible when the actor changed their own password (the prior
    /// value is the actor's current secret).
    async fn rollback(&self, actor: &Actor, target_dn: &str, new_password: &str) {
        if actor.dn != target_dn {
            debug!("actor and target differ; no rollback credential available");
            return;
        }
        let client = self.users.client();
        let result = async {
            client.bind(target_dn, new_password).await?;
            client
                .modify(
                    target_dn,
                    vec![DirModify::replace(
                        ATTR_PASSWORD,
                        vec![actor.password.clone().into()],
                    )],
                )
                .await
        }
        .await;

        match result {
            Ok(()) => info!(user = %target_dn, "local password rolled back after downstream failure"),
            Err(err) => {
                // Logged only: the reported outcome stays the downstream
                // failure.
                warn!(user = %target_dn, error = %err, "password rollback failed");
            }
        }
    }

    fn failed(
        &self,
        started: Instant,
        extlogin_status: ExtLoginStatus,
        sync_status: Option<String>,
        message: String,
    ) -> PasswordChangeResult {
        warn!(message = %message, "password change failed");
        PasswordChangeResult {
            exit_status: ExitStatus::Failure,
            extlogin_status,
            sync_status,
            message,
            duration: started.elapsed(),
        }
    }
}

/// Map an upstream-stage error to the closed status callers branch on.
fn upstream_failure_status(err: &SyncError) -> ExtLoginStatus {
    match err {
        SyncError::BadActorCreds => ExtLoginStatus::BadUserCreds,
        SyncError::Unavailable(_) => ExtLoginStatus::Unavailable,
        SyncError::Config(_) => ExtLoginStatus::ConfigError,
        SyncError::UserMissing => ExtLoginStatus::UserMissing,
        SyncError::Directory(_) | SyncError::Internal(_) => ExtLoginStatus::UpdateError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_failure_mapping() {
        assert_eq!(
            upstream_failure_status(&SyncError::BadActorCreds),
            ExtLoginStatus::BadUserCreds
        );
        assert_eq!(
            upstream_failure_status(&SyncError::Unavailable("down".into())),
            ExtLoginStatus::Unavailable
        );
        assert_eq!(
            upstream_failure_status(&SyncError::Config("bad".into())),
            ExtLoginStatus::ConfigError
        );
        assert_eq!(
            upstream_failure_status(&SyncError::Internal("boom".into())),
            ExtLoginStatus::UpdateError
        );
    }
}
