//! The login-triggered synchronization engine.
//!
//! One pass per login attempt: validate the credentials upstream, fetch the
//! external record, evaluate the mapping rules, upsert the local user, sync
//! the password, reconcile group memberships, aggregate one closed status.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use campusid_core::{CorrelationId, ExtLoginStatus, OrgId};
use campusid_directory::DirModify;

use crate::config::ExternalSourceConfig;
use crate::groups::{GroupKind, GroupSpec, LocalGroups};
use crate::record::ExternalUserRecord;
use crate::rules::{MappedAssignments, RuleEngine};
use crate::users::{
    LocalUser, LocalUsers, ATTR_GIVEN_NAME, ATTR_LEARNER_ID, ATTR_ROLE, ATTR_SCHOOL,
    ATTR_SURNAME, ATTR_USERNAME,
};
use crate::vendor::{BindOutcome, ExternalDirectory};
use crate::SyncError;

/// Result of one synchronization pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Aggregated outcome.
    pub status: ExtLoginStatus,
    /// DN of the local user the pass worked on, when one was reached.
    pub user_dn: Option<String>,
}

impl SyncReport {
    fn status(status: ExtLoginStatus) -> Self {
        Self {
            status,
            user_dn: None,
        }
    }
}

/// Synchronizes one organization's users against its external source.
pub struct SyncEngine {
    org: OrgId,
    external: Option<ExternalHalf>,
    users: LocalUsers,
    groups: LocalGroups,
}

struct ExternalHalf {
    config: ExternalSourceConfig,
    vendor: Arc<dyn ExternalDirectory>,
    rules: RuleEngine,
}

enum ApplyOutcome {
    Done { dn: String, changed: bool },
    ConfigError,
}

impl SyncEngine {
    /// Create an engine.
    ///
    /// `external` is `None` when the organization has no external source
    /// configured; every pass then reports
    /// [`ExtLoginStatus::NotConfigured`].
    pub fn new(
        org: OrgId,
        external: Option<(ExternalSourceConfig, Arc<dyn ExternalDirectory>)>,
        users: LocalUsers,
        groups: LocalGroups,
    ) -> Self {
        let external = external.map(|(config, vendor)| ExternalHalf {
            rules: RuleEngine::new(config.mapping.clone()),
            config,
            vendor,
        });
        Self {
            org,
            external,
            users,
            groups,
        }
    }

    /// Run one synchronization pass for a login attempt.
    ///
    /// Directory sessions are released on every exit path.
    #[instrument(skip(self, password), fields(org = %self.org, correlation_id = %correlation_id))]
    pub async fn login_sync(
        &self,
        username: &str,
        password: &str,
        correlation_id: CorrelationId,
    ) -> SyncReport {
        let report = self.run(username, password).await;
        self.release().await;
        info!(
            username = %username,
            status = report.status.as_code(),
            "synchronization pass finished"
        );
        report
    }

    async fn run(&self, username: &str, password: &str) -> SyncReport {
        // Step 1: configuration resolution.
        let Some(external) = &self.external else {
            debug!("no external source configured for organization");
            return SyncReport::status(ExtLoginStatus::NotConfigured);
        };

        // Step 2: manageability check. Accounts without an external-id
        // linkage are managed locally and must never be overwritten.
        match self.users.find_by_username(username).await {
            Ok(Some(local)) if local.external_id.is_none() => {
                debug!(username = %username, "locally managed account; sync refused");
                return SyncReport::status(ExtLoginStatus::NotConfigured);
            }
            Ok(_) => {}
            Err(err) => return self.infra_report(err, "manageability check"),
        }

        // Step 3: external bind. An unreachable or misconfigured source is
        // never reported as a credential failure.
        match external.vendor.authenticate(username, password).await {
            Ok(BindOutcome::Success) => {}
            Ok(BindOutcome::InvalidCredentials) => {
                return self.handle_failed_bind(external, username).await;
            }
            Err(SyncError::Config(message)) => {
                warn!(message = %message, "external source misconfigured");
                return SyncReport::status(ExtLoginStatus::ConfigError);
            }
            Err(err) => {
                warn!(error = %err, "external bind could not be performed");
                return SyncReport::status(ExtLoginStatus::Unavailable);
            }
        }

        // Steps 4-7. The external bind already succeeded, so any failure
        // from here on is a local persistence problem.
        match self.apply(external, username, password).await {
            Ok(ApplyOutcome::Done { dn, changed }) => SyncReport {
                status: if changed {
                    ExtLoginStatus::Updated
                } else {
                    ExtLoginStatus::NoChange
                },
                user_dn: Some(dn),
            },
            Ok(ApplyOutcome::ConfigError) => SyncReport::status(ExtLoginStatus::ConfigError),
            Err(err) => {
                warn!(username = %username, error = %err, "synchronization failed after successful external bind");
                SyncReport::status(ExtLoginStatus::UpdateError)
            }
        }
    }

    /// The external source rejected the credentials: decide between plain
    /// `BadUserCreds`, soft removal (user gone upstream) and password
    /// invalidation (same username now maps to a different external
    /// identity).
    async fn handle_failed_bind(&self, external: &ExternalHalf, username: &str) -> SyncReport {
        let external_id = match external.vendor.lookup_external_id(username).await {
            Ok(id) => id,
            Err(SyncError::Unavailable(message)) => {
                warn!(username = %username, message = %message, "external source unavailable during reverse lookup");
                return SyncReport::status(ExtLoginStatus::Unavailable);
            }
            Err(err) => {
                warn!(username = %username, error = %err, "reverse lookup failed; reporting credential failure");
                return SyncReport::status(ExtLoginStatus::BadUserCreds);
            }
        };

        let local = self.users.find_by_username(username).await.ok().flatten();

        match external_id {
            // The user disappeared upstream: schedule soft removal, keep
            // the entry for a possible restore.
            None => {
                if let Some(local) = local.filter(|l| l.external_id.is_some()) {
                    if local.removal_requested_at.is_none() {
                        if let Err(err) = self.users.soft_remove(&local.dn).await {
                            warn!(user = %local.dn, error = %err, "soft removal failed");
                        }
                    }
                }
                SyncReport::status(ExtLoginStatus::BadUserCreds)
            }
            // The username now belongs to a different external identity:
            // the stale local credential must stop working immediately.
            Some(external_id) => match local {
                Some(local)
                    if local.external_id.as_deref() != Some(external_id.as_str()) =>
                {
                    match self.users.invalidate_password(&local.dn).await {
                        Ok(()) => SyncReport {
                            status: ExtLoginStatus::UpdatedButFail,
                            user_dn: Some(local.dn),
                        },
                        Err(err) => {
                            warn!(user = %local.dn, error = %err, "password invalidation failed");
                            SyncReport::status(ExtLoginStatus::BadUserCreds)
                        }
                    }
                }
                _ => SyncReport::status(ExtLoginStatus::BadUserCreds),
            },
        }
    }

    /// Steps 4-7: fetch, evaluate, upsert, password sync, group
    /// reconciliation.
    async fn apply(
        &self,
        external: &ExternalHalf,
        username: &str,
        password: &str,
    ) -> Result<ApplyOutcome, SyncError> {
        let record = external
            .vendor
            .fetch_user_info(username)
            .await?
            .ok_or_else(|| {
                SyncError::Internal("external record vanished after successful bind".to_string())
            })?;

        let assignments = self.assignments_for(external, &record);
        if assignments.roles.is_empty() && assignments.schools.is_empty() {
            warn!(
                username = %username,
                "mapping produced neither role nor school and no defaults are configured"
            );
            return Ok(ApplyOutcome::ConfigError);
        }

        let mut changed = false;

        // Step 5: user upsert.
        let dn = match self.users.find_by_external_id(&record.external_id).await? {
            None => {
                if let Some(other) = self.users.find_by_username(&record.username).await? {
                    if other.external_id.as_deref() != Some(record.external_id.as_str()) {
                        return Err(SyncError::Internal(format!(
                            "username '{}' is already held by another identity",
                            record.username
                        )));
                    }
                }
                let dn = self
                    .users
                    .create(&LocalUser {
                        dn: String::new(),
                        username: record.username.clone(),
                        external_id: Some(record.external_id.clone()),
                        given_name: record.given_name.clone(),
                        surname: record.surname.clone(),
                        learner_id: record.learner_id.clone(),
                        roles: assignments.roles.clone(),
                        schools: assignments.schools.clone(),
                        locked: false,
                        removal_requested_at: None,
                    })
                    .await?;
                changed = true;
                dn
            }
            Some(local) => {
                changed |= self.update_user(&local, &record, &assignments).await?;
                local.dn
            }
        };

        // Step 6: password sync, skipped when the supplied value already
        // binds.
        if !self.users.verify_password(&dn, password).await? {
            self.users.set_password(&dn, password).await?;
            changed = true;
        }

        // Step 7: group reconciliation.
        let school = assignments.schools.first().cloned();
        let mut desired: Vec<(GroupKind, GroupSpec)> = assignments
            .admin_groups
            .into_iter()
            .map(|g| (GroupKind::Administrative, g))
            .collect();
        if let Some(g) = assignments.teaching_group {
            desired.push((GroupKind::Teaching, g));
        }
        if let Some(g) = assignments.year_class {
            desired.push((GroupKind::YearClass, g));
        }
        changed |= self
            .groups
            .reconcile(&dn, &desired, school.as_deref())
            .await?;

        Ok(ApplyOutcome::Done { dn, changed })
    }

    /// Rule evaluation plus the configured defaults.
    fn assignments_for(
        &self,
        external: &ExternalHalf,
        record: &ExternalUserRecord,
    ) -> MappedAssignments {
        let mut assignments = external.rules.evaluate(record, Utc::now().date_naive());
        let mapping = &external.config.mapping;
        if assignments.roles.is_empty() {
            if let Some(role) = &mapping.default_role {
                assignments.roles.insert(role.clone());
            }
        }
        if assignments.schools.is_empty() {
            if let Some(school) = &mapping.default_school {
                assignments.schools.push(school.clone());
            }
        }
        assignments
    }

    /// Apply differences between the local record and the mapped external
    /// state. Returns whether anything was written.
    async fn update_user(
        &self,
        local: &LocalUser,
        record: &ExternalUserRecord,
        assignments: &MappedAssignments,
    ) -> Result<bool, SyncError> {
        let mut changed = false;
        let mut mods: Vec<DirModify> = Vec::new();

        // A username mismatch for the same external id means the upstream
        // login changed; the local name follows it and the old local
        // credential is revoked in the same pass.
        if local.username != record.username {
            mods.push(DirModify::replace(
                ATTR_USERNAME,
                vec![record.username.clone().into()],
            ));
            self.users.invalidate_password(&local.dn).await?;
            changed = true;
        }

        attr_change(ATTR_GIVEN_NAME, local.given_name.as_deref(), record.given_name.as_deref(), &mut mods);
        attr_change(ATTR_SURNAME, local.surname.as_deref(), record.surname.as_deref(), &mut mods);
        attr_change(ATTR_LEARNER_ID, local.learner_id.as_deref(), record.learner_id.as_deref(), &mut mods);

        if local.roles != assignments.roles {
            mods.push(DirModify::replace(
                ATTR_ROLE,
                assignments.roles.iter().map(|r| r.clone().into()).collect(),
            ));
        }
        if local.schools != assignments.schools {
            mods.push(DirModify::replace(
                ATTR_SCHOOL,
                assignments.schools.iter().map(|s| s.clone().into()).collect(),
            ));
        }

        if !mods.is_empty() {
            self.users.modify(&local.dn, mods).await?;
            changed = true;
        }

        if self.users.clear_removal_state(local).await? {
            changed = true;
        }

        Ok(changed)
    }

    fn infra_report(&self, err: SyncError, stage: &str) -> SyncReport {
        match err {
            SyncError::Unavailable(message) => {
                warn!(stage = %stage, message = %message, "external source unavailable");
                SyncReport::status(ExtLoginStatus::Unavailable)
            }
            err => {
                warn!(stage = %stage, error = %err, "synchronization infrastructure failure");
                SyncReport::status(ExtLoginStatus::UpdateError)
            }
        }
    }

    /// Release local and external sessions; failures only logged.
    async fn release(&self) {
        if let Some(external) = &self.external {
            if let Err(err) = external.vendor.close().await {
                debug!(error = %err, "external session release failed");
            }
        }
        if let Err(err) = self.users.client().unbind().await {
            debug!(error = %err, "local session release failed");
        }
    }
}

fn attr_change(
    attribute: &str,
    current: Option<&str>,
    desired: Option<&str>,
    mods: &mut Vec<DirModify>,
) {
    if current != desired {
        match desired {
            Some(value) => mods.push(DirModify::replace(attribute, vec![value.into()])),
            None => mods.push(DirModify::delete(attribute, vec![])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_change_covers_set_update_delete() {
        let mut mods = Vec::new();
        attr_change("givenName", None, Some("Luke"), &mut mods);
        attr_change("sn", Some("Skywalker"), Some("Skywalker"), &mut mods);
        attr_change("campusLearnerId", Some("L-1"), None, &mut mods);
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].attribute, "givenName");
        assert_eq!(mods[1].attribute, "campusLearnerId");
    }
}
