//! Per-organization sync configuration.
//!
//! The typed model only; loading it from deployment files happens outside
//! this core.

use serde::{Deserialize, Serialize};

/// Which external directory vendor an organization synchronizes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorKind {
    /// Active Directory: quoted UTF-16LE password attribute, two-pass
    /// replace for self-service changes.
    ActiveDirectory,
    /// Any standards-following directory: privileged rebind-and-modify
    /// password changes.
    GenericLdap,
}

/// How the admin connection authenticates to the external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalAuthMethod {
    /// Simple bind with the configured admin credentials.
    BindCredentials,
    /// Client-certificate authentication.
    Certificate,
}

/// Transport encryption towards the external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// Plain connection.
    None,
    /// Plain connection upgraded with StartTLS.
    StartTls,
    /// TLS from the first byte.
    Ldaps,
}

/// One mapping rule: a glob pattern plus the operations applied when it
/// matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRule {
    /// Glob pattern, matched case-insensitively against the user's DN
    /// (by-DN rules) or against each group-reference value (by-group
    /// rules).
    pub pattern: String,
    /// Operations applied on match, in order.
    pub ops: Vec<RuleOp>,
}

impl SyncRule {
    /// Convenience constructor.
    pub fn new(pattern: impl Into<String>, ops: Vec<RuleOp>) -> Self {
        Self {
            pattern: pattern.into(),
            ops,
        }
    }
}

/// One operation of a mapping rule.
///
/// Group operations carry templates for the group abbreviation and display
/// name; see [`crate::rules`] for the placeholder syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    /// Grant a role.
    AddRole(String),
    /// Assign a school.
    AddSchool(String),
    /// Derive an administrative group.
    AdminGroup { abbrev: String, name: String },
    /// Derive the teaching group (exclusive category).
    TeachingGroup { abbrev: String, name: String },
    /// Derive the year-class group (exclusive category).
    YearClassGroup { abbrev: String, name: String },
}

/// The mapping-rule block of one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Rules matched against the external DN, evaluated first.
    #[serde(default)]
    pub by_dn: Vec<SyncRule>,
    /// Rules matched against each group-reference value, evaluated second;
    /// later matches can override earlier ones for non-exclusive fields.
    #[serde(default)]
    pub by_group: Vec<SyncRule>,
    /// Role assigned when no rule produced one.
    #[serde(default)]
    pub default_role: Option<String>,
    /// School assigned when no rule produced one.
    #[serde(default)]
    pub default_school: Option<String>,
    /// Month in which the school year rolls over.
    #[serde(default = "default_rollover_month")]
    pub school_year_rollover_month: u32,
}

fn default_rollover_month() -> u32 {
    8
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            by_dn: Vec::new(),
            by_group: Vec::new(),
            default_role: None,
            default_school: None,
            school_year_rollover_month: default_rollover_month(),
        }
    }
}

/// External-source configuration of one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSourceConfig {
    /// Vendor discriminator; selects the capability implementation.
    pub vendor: VendorKind,
    /// Privileged bind DN in the external source.
    pub admin_dn: String,
    /// Its secret.
    pub admin_secret: String,
    /// Admin authentication method.
    pub auth_method: ExternalAuthMethod,
    /// Transport encryption.
    pub encryption: EncryptionMode,
    /// Attribute carrying the stable external unique id.
    pub external_id_attribute: String,
    /// Attribute carrying the login name.
    pub username_attribute: String,
    /// Attribute carrying the learner id, when the source has one.
    #[serde(default)]
    pub learner_id_attribute: Option<String>,
    /// Attribute carrying the password-last-changed timestamp.
    #[serde(default)]
    pub password_changed_attribute: Option<String>,
    /// Subtrees searched for users, in order.
    pub subtrees: Vec<String>,
    /// Mapping rules.
    pub mapping: MappingConfig,
}

impl ExternalSourceConfig {
    /// Validate the configuration before a vendor adapter is built from it.
    pub fn validate(&self) -> Result<(), crate::SyncError> {
        if self.admin_dn.is_empty() {
            return Err(crate::SyncError::Config(
                "external admin DN must not be empty".to_string(),
            ));
        }
        if self.subtrees.is_empty() {
            return Err(crate::SyncError::Config(
                "at least one external subtree is required".to_string(),
            ));
        }
        if self.vendor == VendorKind::ActiveDirectory
            && self.encryption != EncryptionMode::Ldaps
        {
            // AD rejects password modifications over unencrypted
            // connections, so the misconfiguration is caught here instead
            // of at the first password change.
            return Err(crate::SyncError::Config(
                "Active Directory synchronization requires LDAPS".to_string(),
            ));
        }
        let month = self.mapping.school_year_rollover_month;
        if !(1..=12).contains(&month) {
            return Err(crate::SyncError::Config(format!(
                "school year rollover month {month} out of range"
            )));
        }
        Ok(())
    }
}

/// Where sync-managed records live in the local directory, and the
/// privileged identity used to write them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDirectoryConfig {
    /// Subtree holding user entries.
    pub user_base: String,
    /// Subtree holding group entries.
    pub group_base: String,
    /// Privileged local bind DN.
    pub admin_dn: String,
    /// Its secret.
    pub admin_secret: String,
}
