//! Local user records and their repository.
//!
//! Sync-managed users live under the configured user subtree with a
//! DN derived from the stable external id, so upstream username changes
//! never move the entry.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::{debug, info, warn};

use campusid_directory::{
    escape_dn_value, AttrValue, DirEntry, DirModify, DirectoryClient, DirectoryError, Filter,
};

use crate::config::LocalDirectoryConfig;
use crate::error::SyncError;

/// Attribute holding the login name.
pub const ATTR_USERNAME: &str = "uid";
/// Attribute holding the given name.
pub const ATTR_GIVEN_NAME: &str = "givenName";
/// Attribute holding the family name.
pub const ATTR_SURNAME: &str = "sn";
/// Attribute linking a local user to its external identity.
pub const ATTR_EXTERNAL_ID: &str = "campusExternalId";
/// Attribute holding the learner id.
pub const ATTR_LEARNER_ID: &str = "campusLearnerId";
/// Attribute holding granted roles.
pub const ATTR_ROLE: &str = "campusRole";
/// Attribute holding assigned schools; the first value is primary.
pub const ATTR_SCHOOL: &str = "campusSchool";
/// Attribute marking a locked account.
pub const ATTR_LOCKED: &str = "campusLocked";
/// Attribute holding the soft-removal request timestamp.
pub const ATTR_REMOVAL_REQUESTED: &str = "campusRemovalRequested";
/// Attribute holding the password.
pub const ATTR_PASSWORD: &str = "userPassword";

/// Length of random passwords set when invalidating a credential.
const RANDOM_PASSWORD_LEN: usize = 32;

const GENERALIZED_TIME: &str = "%Y%m%d%H%M%SZ";

/// One local user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    /// Distinguished name.
    pub dn: String,
    /// Login name, unique.
    pub username: String,
    /// External id linkage; manually managed accounts have none.
    pub external_id: Option<String>,
    /// Given name.
    pub given_name: Option<String>,
    /// Family name.
    pub surname: Option<String>,
    /// Learner id.
    pub learner_id: Option<String>,
    /// Granted roles.
    pub roles: BTreeSet<String>,
    /// Assigned schools; the first is primary.
    pub schools: Vec<String>,
    /// Whether the account is locked.
    pub locked: bool,
    /// Soft-removal marker; set when the user disappeared upstream.
    pub removal_requested_at: Option<DateTime<Utc>>,
}

impl LocalUser {
    /// Build from a directory entry.
    #[must_use]
    pub fn from_entry(entry: &DirEntry) -> Self {
        Self {
            dn: entry.dn.clone(),
            username: entry.get_first(ATTR_USERNAME).unwrap_or_default().to_string(),
            external_id: entry.get_first(ATTR_EXTERNAL_ID).map(str::to_string),
            given_name: entry.get_first(ATTR_GIVEN_NAME).map(str::to_string),
            surname: entry.get_first(ATTR_SURNAME).map(str::to_string),
            learner_id: entry.get_first(ATTR_LEARNER_ID).map(str::to_string),
            roles: entry.get_all(ATTR_ROLE).iter().cloned().collect(),
            schools: entry.get_all(ATTR_SCHOOL).to_vec(),
            locked: entry.get_first(ATTR_LOCKED) == Some("TRUE"),
            removal_requested_at: entry
                .get_first(ATTR_REMOVAL_REQUESTED)
                .and_then(parse_generalized_time),
        }
    }
}

fn parse_generalized_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, GENERALIZED_TIME)
        .ok()
        .map(|naive| naive.and_utc())
}

fn format_generalized_time(when: DateTime<Utc>) -> String {
    when.format(GENERALIZED_TIME).to_string()
}

/// Repository over the local user subtree, bound with the privileged
/// local identity for every write.
pub struct LocalUsers {
    client: Arc<dyn DirectoryClient>,
    config: LocalDirectoryConfig,
}

impl LocalUsers {
    /// Create a repository.
    pub fn new(client: Arc<dyn DirectoryClient>, config: LocalDirectoryConfig) -> Self {
        Self { client, config }
    }

    /// The directory client this repository writes through.
    #[must_use]
    pub fn client(&self) -> Arc<dyn DirectoryClient> {
        self.client.clone()
    }

    /// DN of a sync-managed user, derived from the external id.
    #[must_use]
    pub fn user_dn(&self, external_id: &str) -> String {
        format!(
            "{}={},{}",
            ATTR_EXTERNAL_ID,
            escape_dn_value(external_id),
            self.config.user_base
        )
    }

    async fn ensure_admin(&self) -> Result<(), SyncError> {
        self.client
            .bind(&self.config.admin_dn, &self.config.admin_secret)
            .await?;
        Ok(())
    }

    /// Find a user by login name.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<LocalUser>, SyncError> {
        self.ensure_admin().await?;
        let entries = self
            .client
            .search(
                Some(&self.config.user_base),
                &Filter::eq(ATTR_USERNAME, username),
                &[],
            )
            .await?;
        Ok(entries.first().map(LocalUser::from_entry))
    }

    /// Find a user by external id.
    ///
    /// At most one local user may hold a given non-empty external id; if
    /// the store ever violates that, the first match wins and the
    /// violation is logged.
    pub async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<LocalUser>, SyncError> {
        if external_id.is_empty() {
            return Ok(None);
        }
        self.ensure_admin().await?;
        let entries = self
            .client
            .search(
                Some(&self.config.user_base),
                &Filter::eq(ATTR_EXTERNAL_ID, external_id),
                &[],
            )
            .await?;
        if entries.len() > 1 {
            warn!(
                external_id = %external_id,
                matches = entries.len(),
                "external id held by more than one local user"
            );
        }
        Ok(entries.first().map(LocalUser::from_entry))
    }

    /// Create a sync-managed user.
    pub async fn create(&self, user: &LocalUser) -> Result<String, SyncError> {
        let external_id = user.external_id.as_deref().ok_or_else(|| {
            SyncError::Internal("sync-managed users require an external id".to_string())
        })?;
        self.ensure_admin().await?;
        let dn = self.user_dn(external_id);

        let mut attributes: Vec<(String, Vec<AttrValue>)> = vec![
            (
                "objectClass".to_string(),
                vec!["top".into(), "inetOrgPerson".into(), "campusPerson".into()],
            ),
            ("cn".to_string(), vec![user.username.clone().into()]),
            (ATTR_USERNAME.to_string(), vec![user.username.clone().into()]),
            (
                ATTR_SURNAME.to_string(),
                vec![user
                    .surname
                    .clone()
                    .unwrap_or_else(|| user.username.clone())
                    .into()],
            ),
            (ATTR_EXTERNAL_ID.to_string(), vec![external_id.into()]),
        ];
        if let Some(given) = &user.given_name {
            attributes.push((ATTR_GIVEN_NAME.to_string(), vec![given.clone().into()]));
        }
        if let Some(learner) = &user.learner_id {
            attributes.push((ATTR_LEARNER_ID.to_string(), vec![learner.clone().into()]));
        }
        if !user.roles.is_empty() {
            attributes.push((
                ATTR_ROLE.to_string(),
                user.roles.iter().map(|r| r.clone().into()).collect(),
            ));
        }
        if !user.schools.is_empty() {
            attributes.push((
                ATTR_SCHOOL.to_string(),
                user.schools.iter().map(|s| s.clone().into()).collect(),
            ));
        }

        self.client.add(&dn, attributes).await?;
        info!(user = %dn, username = %user.username, "created local user");
        Ok(dn)
    }

    /// Apply attribute modifications.
    pub async fn modify(&self, dn: &str, changes: Vec<DirModify>) -> Result<(), SyncError> {
        self.ensure_admin().await?;
        self.client.modify(dn, changes).await?;
        Ok(())
    }

    /// Set the user's password.
    pub async fn set_password(&self, dn: &str, password: &str) -> Result<(), SyncError> {
        self.ensure_admin().await?;
        self.client
            .modify(
                dn,
                vec![DirModify::replace(ATTR_PASSWORD, vec![password.into()])],
            )
            .await?;
        debug!(user = %dn, "local password set");
        Ok(())
    }

    /// Whether `password` already binds for `dn`.
    ///
    /// Used to skip redundant password writes; a transient directory
    /// failure propagates, a rejected bind is simply `false`.
    pub async fn verify_password(&self, dn: &str, password: &str) -> Result<bool, SyncError> {
        match self.client.bind(dn, password).await {
            Ok(()) => Ok(true),
            Err(DirectoryError::InvalidCredentials) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// A cryptographically random password used to invalidate stale
    /// credentials.
    #[must_use]
    pub fn random_password() -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(RANDOM_PASSWORD_LEN)
            .map(char::from)
            .collect()
    }

    /// Soft-remove a user: random password plus removal-request timestamp.
    /// The entry itself survives so a restored upstream account can
    /// reclaim it.
    pub async fn soft_remove(&self, dn: &str) -> Result<(), SyncError> {
        self.ensure_admin().await?;
        self.client
            .modify(
                dn,
                vec![
                    DirModify::replace(ATTR_PASSWORD, vec![Self::random_password().into()]),
                    DirModify::replace(
                        ATTR_REMOVAL_REQUESTED,
                        vec![format_generalized_time(Utc::now()).into()],
                    ),
                ],
            )
            .await?;
        info!(user = %dn, "scheduled user for removal");
        Ok(())
    }

    /// Invalidate a user's password with a random value.
    pub async fn invalidate_password(&self, dn: &str) -> Result<(), SyncError> {
        self.set_password(dn, &Self::random_password()).await?;
        info!(user = %dn, "local password invalidated");
        Ok(())
    }

    /// Clear locked and removal-request state if set. Returns whether
    /// anything was cleared.
    pub async fn clear_removal_state(&self, user: &LocalUser) -> Result<bool, SyncError> {
        if !user.locked && user.removal_requested_at.is_none() {
            return Ok(false);
        }
        let mut changes = Vec::new();
        if user.locked {
            changes.push(DirModify::delete(ATTR_LOCKED, vec![]));
        }
        if user.removal_requested_at.is_some() {
            changes.push(DirModify::delete(ATTR_REMOVAL_REQUESTED, vec![]));
        }
        self.modify(&user.dn, changes).await?;
        info!(user = %user.dn, "cleared locked/removal state");
        Ok(true)
    }
}
