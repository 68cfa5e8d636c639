//! External directory vendor adapters.
//!
//! One [`ExternalDirectory`] implementation per vendor, selected by the
//! configuration discriminator at construction time. The engine and the
//! password orchestrator only ever see the capability trait.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use campusid_directory::{DirEntry, DirModify, DirectoryClient, DirectoryError, Filter};

use crate::config::{ExternalSourceConfig, VendorKind};
use crate::error::SyncError;
use crate::record::ExternalUserRecord;

/// Outcome of an external bind attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The credentials were accepted.
    Success,
    /// The credentials were rejected. Whether the user exists at all is a
    /// separate lookup.
    InvalidCredentials,
}

/// Capabilities every external directory vendor provides.
#[async_trait]
pub trait ExternalDirectory: Send + Sync {
    /// Try to authenticate the supplied credentials.
    ///
    /// Unreachable servers surface as [`SyncError::Unavailable`], never as
    /// a credential failure.
    async fn authenticate(&self, username: &str, password: &str)
        -> Result<BindOutcome, SyncError>;

    /// Fetch the external record for `username`, or `None` when the user
    /// does not exist upstream.
    async fn fetch_user_info(
        &self,
        username: &str,
    ) -> Result<Option<ExternalUserRecord>, SyncError>;

    /// Resolve only the external unique id for `username`.
    async fn lookup_external_id(&self, username: &str) -> Result<Option<String>, SyncError>;

    /// Change `target_username`'s password through the vendor's native
    /// mechanism, authenticated as the actor.
    ///
    /// # Errors
    ///
    /// - [`SyncError::BadActorCreds`] - the actor failed to authenticate
    /// - [`SyncError::UserMissing`] - the target does not exist upstream
    /// - [`SyncError::Unavailable`] - the source is unreachable
    async fn change_password(
        &self,
        actor_username: &str,
        actor_password: &str,
        target_username: &str,
        new_password: &str,
    ) -> Result<(), SyncError>;

    /// Release the external session.
    async fn close(&self) -> Result<(), SyncError>;
}

/// Build the vendor adapter selected by the configuration.
pub fn build_vendor(
    config: ExternalSourceConfig,
    client: Arc<dyn DirectoryClient>,
) -> Result<Arc<dyn ExternalDirectory>, SyncError> {
    config.validate()?;
    let core = VendorCore { client, config };
    Ok(match core.config.vendor {
        VendorKind::ActiveDirectory => Arc::new(ActiveDirectoryVendor { core }),
        VendorKind::GenericLdap => Arc::new(GenericLdapVendor { core }),
    })
}

/// Shared plumbing of both vendor adapters.
struct VendorCore {
    client: Arc<dyn DirectoryClient>,
    config: ExternalSourceConfig,
}

impl VendorCore {
    async fn admin_bind(&self) -> Result<(), SyncError> {
        self.client
            .bind(&self.config.admin_dn, &self.config.admin_secret)
            .await
            .map_err(SyncError::from_external)
    }

    /// Find the user entry across the configured subtrees, in order.
    async fn find_user(&self, username: &str) -> Result<Option<DirEntry>, SyncError> {
        let filter = Filter::eq(&self.config.username_attribute, username);
        for base in &self.config.subtrees {
            let entries = self
                .client
                .search(Some(base), &filter, &[])
                .await
                .map_err(SyncError::from_external)?;
            if let Some(entry) = entries.into_iter().next() {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn external_id_of(&self, entry: &DirEntry) -> Option<String> {
        let attr = &self.config.external_id_attribute;
        if let Some(value) = entry.get_first(attr) {
            return Some(value.to_string());
        }
        // Binary ids (objectGUID) are carried as base64.
        entry
            .bin_attrs
            .get(attr)
            .and_then(|values| values.first())
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    fn record_from_entry(
        &self,
        entry: &DirEntry,
        parse_password_changed: fn(&str) -> Option<DateTime<Utc>>,
    ) -> Option<ExternalUserRecord> {
        let external_id = self.external_id_of(entry)?;
        let username = entry
            .get_first(&self.config.username_attribute)?
            .to_string();

        let learner_id = self
            .config
            .learner_id_attribute
            .as_deref()
            .and_then(|attr| entry.get_first(attr))
            .map(str::to_string);
        let password_changed_at = self
            .config
            .password_changed_attribute
            .as_deref()
            .and_then(|attr| entry.get_first(attr))
            .and_then(parse_password_changed);

        Some(ExternalUserRecord {
            external_id,
            username,
            dn: entry.dn.clone(),
            given_name: entry.get_first("givenName").map(str::to_string),
            surname: entry.get_first("sn").map(str::to_string),
            learner_id,
            password_changed_at,
            group_refs: entry.get_all("memberOf").to_vec(),
        })
    }

    /// Bind as `dn`; a rejected bind is an outcome, not an error.
    async fn try_bind(&self, dn: &str, password: &str) -> Result<BindOutcome, SyncError> {
        // An empty secret would be an unauthenticated bind and must never
        // count as a successful login.
        if password.is_empty() {
            return Ok(BindOutcome::InvalidCredentials);
        }
        match self.client.bind(dn, password).await {
            Ok(()) => Ok(BindOutcome::Success),
            Err(DirectoryError::InvalidCredentials) => Ok(BindOutcome::InvalidCredentials),
            Err(err) => Err(SyncError::from_external(err)),
        }
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<BindOutcome, SyncError> {
        self.admin_bind().await?;
        let Some(entry) = self.find_user(username).await? else {
            debug!(username = %username, "user not found in external source");
            return Ok(BindOutcome::InvalidCredentials);
        };
        self.try_bind(&entry.dn, password).await
    }

    async fn lookup_external_id(&self, username: &str) -> Result<Option<String>, SyncError> {
        self.admin_bind().await?;
        Ok(self
            .find_user(username)
            .await?
            .as_ref()
            .and_then(|entry| self.external_id_of(entry)))
    }

    async fn close(&self) -> Result<(), SyncError> {
        self.client.unbind().await.map_err(SyncError::from_external)
    }
}

/// Active Directory adapter.
///
/// Passwords live in `unicodePwd` (quoted UTF-16LE); a self-service change
/// is a two-pass delete/add of old and new value, an administrative reset
/// is a single replace.
pub struct ActiveDirectoryVendor {
    core: VendorCore,
}

#[async_trait]
impl ExternalDirectory for ActiveDirectoryVendor {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<BindOutcome, SyncError> {
        self.core.authenticate(username, password).await
    }

    async fn fetch_user_info(
        &self,
        username: &str,
    ) -> Result<Option<ExternalUserRecord>, SyncError> {
        self.core.admin_bind().await?;
        Ok(self
            .core
            .find_user(username)
            .await?
            .and_then(|entry| self.core.record_from_entry(&entry, parse_filetime)))
    }

    async fn lookup_external_id(&self, username: &str) -> Result<Option<String>, SyncError> {
        self.core.lookup_external_id(username).await
    }

    #[instrument(skip(self, actor_password, new_password))]
    async fn change_password(
        &self,
        actor_username: &str,
        actor_password: &str,
        target_username: &str,
        new_password: &str,
    ) -> Result<(), SyncError> {
        match self.core.authenticate(actor_username, actor_password).await? {
            BindOutcome::Success => {}
            BindOutcome::InvalidCredentials => return Err(SyncError::BadActorCreds),
        }

        self.core.admin_bind().await?;
        let target = self
            .core
            .find_user(target_username)
            .await?
            .ok_or(SyncError::UserMissing)?;

        if actor_username == target_username {
            // Self-service change: the two-pass delete/add proves knowledge
            // of the old password to the server.
            let old_encoded = encode_ad_password(actor_password)?;
            let new_encoded = encode_ad_password(new_password)?;
            // The actor performs its own change.
            self.core
                .client
                .bind(&target.dn, actor_password)
                .await
                .map_err(SyncError::from_external)?;
            self.core
                .client
                .modify(
                    &target.dn,
                    vec![
                        DirModify::delete("unicodePwd", vec![old_encoded.into()]),
                        DirModify::add("unicodePwd", vec![new_encoded.into()]),
                    ],
                )
                .await
                .map_err(SyncError::from_external)?;
        } else {
            // Administrative reset with the privileged connection.
            let new_encoded = encode_ad_password(new_password)?;
            self.core
                .client
                .modify(
                    &target.dn,
                    vec![DirModify::replace("unicodePwd", vec![new_encoded.into()])],
                )
                .await
                .map_err(SyncError::from_external)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SyncError> {
        self.core.close().await
    }
}

/// Standards-following directory adapter.
///
/// Password changes rebind with the privileged identity and replace
/// `userPassword`.
pub struct GenericLdapVendor {
    core: VendorCore,
}

#[async_trait]
impl ExternalDirectory for GenericLdapVendor {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<BindOutcome, SyncError> {
        self.core.authenticate(username, password).await
    }

    async fn fetch_user_info(
        &self,
        username: &str,
    ) -> Result<Option<ExternalUserRecord>, SyncError> {
        self.core.admin_bind().await?;
        Ok(self
            .core
            .find_user(username)
            .await?
            .and_then(|entry| self.core.record_from_entry(&entry, parse_generalized_time)))
    }

    async fn lookup_external_id(&self, username: &str) -> Result<Option<String>, SyncError> {
        self.core.lookup_external_id(username).await
    }

    #[instrument(skip(self, actor_password, new_password))]
    async fn change_password(
        &self,
        actor_username: &str,
        actor_password: &str,
        target_username: &str,
        new_password: &str,
    ) -> Result<(), SyncError> {
        match self.core.authenticate(actor_username, actor_password).await? {
            BindOutcome::Success => {}
            BindOutcome::InvalidCredentials => return Err(SyncError::BadActorCreds),
        }

        // Privileged rebind, then a plain attribute replace.
        self.core.admin_bind().await?;
        let target = self
            .core
            .find_user(target_username)
            .await?
            .ok_or(SyncError::UserMissing)?;

        self.core
            .client
            .modify(
                &target.dn,
                vec![DirModify::replace(
                    "userPassword",
                    vec![new_password.into()],
                )],
            )
            .await
            .map_err(SyncError::from_external)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SyncError> {
        self.core.close().await
    }
}

/// Encode a plaintext password for the `unicodePwd` attribute: surround
/// with double quotes, then UTF-16LE.
pub fn encode_ad_password(password: &str) -> Result<Vec<u8>, SyncError> {
    if password.is_empty() {
        return Err(SyncError::Config(
            "password must not be empty".to_string(),
        ));
    }
    let quoted = format!("\"{password}\"");
    Ok(quoted.encode_utf16().flat_map(u16::to_le_bytes).collect())
}

/// Seconds between the Windows epoch (1601-01-01) and the Unix epoch.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

/// Parse a Windows FILETIME value (100ns ticks since 1601) as carried by
/// `pwdLastSet`.
fn parse_filetime(value: &str) -> Option<DateTime<Utc>> {
    let ticks: i64 = value.parse().ok()?;
    if ticks <= 0 {
        return None;
    }
    let secs = ticks / 10_000_000 - FILETIME_UNIX_OFFSET_SECS;
    DateTime::from_timestamp(secs, 0)
}

/// Parse an RFC 4517 generalized time value (`YYYYMMDDHHMMSSZ`).
fn parse_generalized_time(value: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}
