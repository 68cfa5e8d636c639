//! LDAP implementation of the directory client.
//!
//! Wraps `ldap3` with lazy connection establishment, a spawned connection
//! driver, and per-operation timeouts. The session identity follows the
//! last successful bind, as the protocol prescribes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::{AttrValue, DirModify, DirectoryClient, ModifyOp};
use crate::entry::DirEntry;
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::Filter;

// LDAP result codes this client branches on.
const RC_NO_SUCH_ATTRIBUTE: u32 = 16;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_INVALID_CREDENTIALS: u32 = 49;
const RC_INSUFFICIENT_ACCESS: u32 = 50;
const RC_ENTRY_ALREADY_EXISTS: u32 = 68;

/// Configuration for [`LdapDirectory`].
#[derive(Debug, Clone)]
pub struct LdapDirectoryConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (389 plain/StartTLS, 636 LDAPS).
    pub port: u16,
    /// Connect over LDAPS.
    pub use_ssl: bool,
    /// Upgrade a plain connection with StartTLS.
    pub use_starttls: bool,
    /// Base DN used when a search passes no explicit base.
    pub default_base: String,
    /// Connect timeout.
    pub connect_timeout_secs: u64,
    /// Per-operation timeout; longer than connect so slow searches are not
    /// mistaken for dead servers.
    pub op_timeout_secs: u64,
}

impl Default for LdapDirectoryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 389,
            use_ssl: false,
            use_starttls: false,
            default_base: String::new(),
            connect_timeout_secs: 5,
            op_timeout_secs: 15,
        }
    }
}

impl LdapDirectoryConfig {
    /// Validate the configuration before a client is built from it.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.host.is_empty() {
            return Err(DirectoryError::InvalidConfiguration {
                message: "host must not be empty".to_string(),
            });
        }
        if self.use_ssl && self.use_starttls {
            return Err(DirectoryError::InvalidConfiguration {
                message: "LDAPS and StartTLS are mutually exclusive".to_string(),
            });
        }
        Ok(())
    }

    fn url(&self) -> String {
        if self.use_ssl {
            format!("ldaps://{}:{}", self.host, self.port)
        } else {
            format!("ldap://{}:{}", self.host, self.port)
        }
    }
}

/// Directory client over LDAP.
pub struct LdapDirectory {
    config: LdapDirectoryConfig,
    /// Cached connection handle (lazily initialized).
    connection: Arc<RwLock<Option<Ldap>>>,
}

impl LdapDirectory {
    /// Create a new client; the connection is established on first use.
    pub fn new(config: LdapDirectoryConfig) -> DirectoryResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connection: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the connection handle, creating one if necessary.
    async fn get_connection(&self) -> DirectoryResult<Ldap> {
        {
            let guard = self.connection.read().await;
            if let Some(ref conn) = *guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.create_connection().await?;

        {
            let mut guard = self.connection.write().await;
            *guard = Some(conn.clone());
        }

        Ok(conn)
    }

    async fn create_connection(&self) -> DirectoryResult<Ldap> {
        let url = self.config.url();
        debug!(url = %url, "Connecting to directory server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                DirectoryError::connection_failed_with_source(
                    format!("failed to connect to directory server at {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "directory connection driver error");
            }
        });

        info!(host = %self.config.host, "directory connection established");
        Ok(ldap)
    }

    /// Get the connection with the per-operation timeout armed.
    ///
    /// The timeout applies to the next operation only, so it is set anew
    /// for every call.
    async fn op_connection(&self) -> DirectoryResult<Ldap> {
        let mut ldap = self.get_connection().await?;
        ldap.with_timeout(Duration::from_secs(self.config.op_timeout_secs));
        Ok(ldap)
    }

    fn map_ldap_error(err: LdapError, context: &str) -> DirectoryError {
        match err {
            LdapError::LdapResult { result } => Self::map_result_code(result.rc, &result.text),
            other => DirectoryError::operation_failed_with_source(context.to_string(), other),
        }
    }

    fn map_result_code(rc: u32, text: &str) -> DirectoryError {
        match rc {
            RC_INVALID_CREDENTIALS => DirectoryError::InvalidCredentials,
            RC_INSUFFICIENT_ACCESS => DirectoryError::InsufficientAccess {
                operation: text.to_string(),
            },
            RC_NO_SUCH_OBJECT => DirectoryError::NoSuchEntry {
                dn: text.to_string(),
            },
            RC_ENTRY_ALREADY_EXISTS => DirectoryError::AlreadyExists {
                dn: text.to_string(),
            },
            _ => DirectoryError::operation_failed(format!("result code {rc}: {text}")),
        }
    }

    fn to_mods(changes: Vec<DirModify>) -> Vec<Mod<Vec<u8>>> {
        changes
            .into_iter()
            .map(|change| {
                let attr = change.attribute.into_bytes();
                let values: HashSet<Vec<u8>> = change
                    .values
                    .iter()
                    .map(|v| v.as_bytes().to_vec())
                    .collect();
                match change.op {
                    ModifyOp::Add => Mod::Add(attr, values),
                    ModifyOp::Replace => Mod::Replace(attr, values),
                    ModifyOp::Delete => Mod::Delete(attr, values),
                }
            })
            .collect()
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectory {
    async fn bind(&self, dn: &str, secret: &str) -> DirectoryResult<()> {
        let mut ldap = self.op_connection().await?;
        debug!(bind_dn = %dn, "performing simple bind");

        let result = ldap
            .simple_bind(dn, secret)
            .await
            .map_err(|e| Self::map_ldap_error(e, "bind failed"))?;

        if result.rc != 0 {
            return Err(Self::map_result_code(result.rc, &result.text));
        }
        Ok(())
    }

    async fn bind_negotiate(&self, _blob: &[u8]) -> DirectoryResult<String> {
        // The negotiation protocol is owned by the session bootstrap in
        // front of this client; it never reaches the plain LDAP client.
        Err(DirectoryError::InvalidConfiguration {
            message: "network-negotiated binds are handled by the session bootstrap".to_string(),
        })
    }

    async fn search(
        &self,
        base: Option<&str>,
        filter: &Filter,
        attributes: &[&str],
    ) -> DirectoryResult<Vec<DirEntry>> {
        let mut ldap = self.op_connection().await?;
        let base = base.unwrap_or(&self.config.default_base);
        let filter_str = filter.to_filter_string();
        let attrs: Vec<&str> = if attributes.is_empty() {
            vec!["*"]
        } else {
            attributes.to_vec()
        };

        debug!(base = %base, filter = %filter_str, "directory search");

        let (entries, _) = ldap
            .search(base, Scope::Subtree, &filter_str, attrs)
            .await
            .map_err(|e| Self::map_ldap_error(e, "search failed"))?
            .success()
            .map_err(|e| Self::map_ldap_error(e, "search failed"))?;

        Ok(entries
            .into_iter()
            .map(|re| {
                let se = SearchEntry::construct(re);
                DirEntry {
                    dn: se.dn,
                    attrs: se.attrs,
                    bin_attrs: se.bin_attrs,
                }
            })
            .collect())
    }

    async fn modify(&self, dn: &str, changes: Vec<DirModify>) -> DirectoryResult<()> {
        let mut ldap = self.op_connection().await?;
        debug!(dn = %dn, count = changes.len(), "directory modify");

        ldap.modify(dn, Self::to_mods(changes))
            .await
            .map_err(|e| Self::map_ldap_error(e, "modify failed"))?
            .success()
            .map_err(|e| Self::map_ldap_error(e, "modify failed"))?;
        Ok(())
    }

    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<AttrValue>)>) -> DirectoryResult<()> {
        let mut ldap = self.op_connection().await?;
        debug!(dn = %dn, "directory add");

        let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = attributes
            .into_iter()
            .map(|(name, values)| {
                (
                    name.into_bytes(),
                    values.iter().map(|v| v.as_bytes().to_vec()).collect(),
                )
            })
            .collect();

        ldap.add(dn, attrs)
            .await
            .map_err(|e| Self::map_ldap_error(e, "add failed"))?
            .success()
            .map_err(|e| Self::map_ldap_error(e, "add failed"))?;
        Ok(())
    }

    async fn can_modify(
        &self,
        actor_dn: &str,
        target_dn: &str,
        attribute: &str,
    ) -> DirectoryResult<bool> {
        // Access control is evaluated before value existence, so deleting a
        // sentinel value that cannot exist distinguishes "no rights"
        // (rc 50) from "would be allowed" (rc 16) without changing data.
        let mut ldap = self.op_connection().await?;
        debug!(actor = %actor_dn, target = %target_dn, attribute = %attribute, "effective-rights probe");

        let sentinel: HashSet<Vec<u8>> =
            std::iter::once(b"\0campusid-rights-probe".to_vec()).collect();
        let result = ldap
            .modify(
                target_dn,
                vec![Mod::Delete(attribute.as_bytes().to_vec(), sentinel)],
            )
            .await
            .map_err(|e| Self::map_ldap_error(e, "rights probe failed"))?;

        match result.rc {
            0 | RC_NO_SUCH_ATTRIBUTE => Ok(true),
            RC_INSUFFICIENT_ACCESS => Ok(false),
            rc => Err(Self::map_result_code(rc, &result.text)),
        }
    }

    async fn unbind(&self) -> DirectoryResult<()> {
        let conn = {
            let mut guard = self.connection.write().await;
            guard.take()
        };
        if let Some(mut ldap) = conn {
            ldap.unbind()
                .await
                .map_err(|e| Self::map_ldap_error(e, "unbind failed"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = LdapDirectoryConfig {
            host: String::new(),
            ..Default::default()
        };
        assert!(LdapDirectory::new(config.clone()).is_err());

        config.host = "ldap.example.org".to_string();
        config.use_ssl = true;
        config.use_starttls = true;
        assert!(LdapDirectory::new(config.clone()).is_err());

        config.use_starttls = false;
        assert!(LdapDirectory::new(config).is_ok());
    }

    #[test]
    fn test_url_scheme_follows_ssl_flag() {
        let mut config = LdapDirectoryConfig {
            host: "dc1.example.org".to_string(),
            port: 636,
            use_ssl: true,
            ..Default::default()
        };
        assert_eq!(config.url(), "ldaps://dc1.example.org:636");
        config.use_ssl = false;
        config.port = 389;
        assert_eq!(config.url(), "ldap://dc1.example.org:389");
    }

    #[test]
    fn test_result_code_mapping() {
        assert!(matches!(
            LdapDirectory::map_result_code(49, ""),
            DirectoryError::InvalidCredentials
        ));
        assert!(matches!(
            LdapDirectory::map_result_code(50, "modify"),
            DirectoryError::InsufficientAccess { .. }
        ));
        assert!(matches!(
            LdapDirectory::map_result_code(32, "uid=x"),
            DirectoryError::NoSuchEntry { .. }
        ));
        assert!(matches!(
            LdapDirectory::map_result_code(80, "other"),
            DirectoryError::OperationFailed { .. }
        ));
    }

    #[test]
    fn test_modify_conversion_handles_binary() {
        let mods = LdapDirectory::to_mods(vec![
            DirModify::replace("unicodePwd", vec![vec![0x22, 0x00].into()]),
            DirModify::delete("lockedTime", vec![]),
        ]);
        assert_eq!(mods.len(), 2);
        assert!(matches!(&mods[0], Mod::Replace(attr, vals)
            if attr == b"unicodePwd" && vals.len() == 1));
        assert!(matches!(&mods[1], Mod::Delete(attr, vals)
            if attr == b"lockedTime" && vals.is_empty()));
    }
}
