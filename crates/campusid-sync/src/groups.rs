//! Local groups and membership reconciliation.
//!
//! Groups are created on first reference, their display name is corrected
//! when the computed name changes, and members are added or removed to
//! match the current external mapping. Groups are never deleted, only
//! emptied, so file and resource associations keep their anchor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use campusid_directory::{
    escape_dn_value, AttrValue, DirModify, DirectoryClient, Filter,
};

use crate::config::LocalDirectoryConfig;
use crate::error::SyncError;
use crate::users::ATTR_EXTERNAL_ID;

/// Group attribute holding the kind discriminator.
pub const ATTR_GROUP_KIND: &str = "campusGroupKind";
/// Group attribute holding the display name.
pub const ATTR_DISPLAY_NAME: &str = "displayName";
/// Group attribute holding member DNs.
pub const ATTR_MEMBER: &str = "member";
/// Group attribute holding the school scope.
pub const ATTR_GROUP_SCHOOL: &str = "campusSchool";
/// Marker value identifying groups owned by synchronization.
pub const EXTERNAL_MARKER: &str = "external";

/// Group type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Freely assignable groups (projects, clubs, staff).
    Administrative,
    /// The teaching group; a user holds at most one.
    Teaching,
    /// The year class; a user holds at most one.
    YearClass,
}

impl GroupKind {
    /// Directory attribute value of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Administrative => "administrative",
            GroupKind::Teaching => "teaching",
            GroupKind::YearClass => "yearclass",
        }
    }

    /// Parse the directory attribute value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "administrative" => Some(GroupKind::Administrative),
            "teaching" => Some(GroupKind::Teaching),
            "yearclass" => Some(GroupKind::YearClass),
            _ => None,
        }
    }
}

/// A computed group: abbreviation plus display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    /// Abbreviation, unique within kind and school.
    pub abbrev: String,
    /// Human-readable display name.
    pub name: String,
}

impl GroupSpec {
    /// Convenience constructor.
    pub fn new(abbrev: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            abbrev: abbrev.into(),
            name: name.into(),
        }
    }
}

/// Repository over the local group subtree.
pub struct LocalGroups {
    client: Arc<dyn DirectoryClient>,
    config: LocalDirectoryConfig,
}

impl LocalGroups {
    /// Create a repository.
    pub fn new(client: Arc<dyn DirectoryClient>, config: LocalDirectoryConfig) -> Self {
        Self { client, config }
    }

    fn group_dn(&self, kind: GroupKind, abbrev: &str) -> String {
        // The kind is part of the RDN because abbreviations are only
        // unique within their kind and school scope.
        format!(
            "cn={}-{},{}",
            kind.as_str(),
            escape_dn_value(abbrev),
            self.config.group_base
        )
    }

    async fn ensure_admin(&self) -> Result<(), SyncError> {
        self.client
            .bind(&self.config.admin_dn, &self.config.admin_secret)
            .await?;
        Ok(())
    }

    /// Create the group if absent; correct its display name if it changed.
    ///
    /// Returns whether anything was written.
    pub async fn ensure_group(
        &self,
        kind: GroupKind,
        spec: &GroupSpec,
        school: Option<&str>,
    ) -> Result<bool, SyncError> {
        self.ensure_admin().await?;
        let dn = self.group_dn(kind, &spec.abbrev);

        let filter = Filter::and(vec![
            Filter::eq("cn", format!("{}-{}", kind.as_str(), spec.abbrev)),
            Filter::eq(ATTR_GROUP_KIND, kind.as_str()),
        ]);
        let existing = self
            .client
            .search(Some(&self.config.group_base), &filter, &[])
            .await?;

        match existing.into_iter().next() {
            None => {
                let mut attributes: Vec<(String, Vec<AttrValue>)> = vec![
                    (
                        "objectClass".to_string(),
                        vec!["top".into(), "groupOfNames".into()],
                    ),
                    (
                        "cn".to_string(),
                        vec![format!("{}-{}", kind.as_str(), spec.abbrev).into()],
                    ),
                    (ATTR_DISPLAY_NAME.to_string(), vec![spec.name.clone().into()]),
                    (
                        ATTR_GROUP_KIND.to_string(),
                        vec![kind.as_str().into()],
                    ),
                    (
                        ATTR_EXTERNAL_ID.to_string(),
                        vec![EXTERNAL_MARKER.into()],
                    ),
                ];
                if let Some(school) = school {
                    attributes.push((ATTR_GROUP_SCHOOL.to_string(), vec![school.into()]));
                }
                self.client.add(&dn, attributes).await?;
                info!(group = %dn, kind = kind.as_str(), "created group");
                Ok(true)
            }
            Some(entry) => {
                if entry.get_first(ATTR_DISPLAY_NAME) != Some(spec.name.as_str()) {
                    self.client
                        .modify(
                            &entry.dn,
                            vec![DirModify::replace(
                                ATTR_DISPLAY_NAME,
                                vec![spec.name.clone().into()],
                            )],
                        )
                        .await?;
                    debug!(group = %entry.dn, "corrected group display name");
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    /// Add `user_dn` to the group if not already a member.
    pub async fn add_member(
        &self,
        kind: GroupKind,
        abbrev: &str,
        user_dn: &str,
    ) -> Result<bool, SyncError> {
        self.ensure_admin().await?;
        let dn = self.group_dn(kind, abbrev);
        let entries = self
            .client
            .search(
                Some(&self.config.group_base),
                &Filter::and(vec![
                    Filter::eq("cn", format!("{}-{}", kind.as_str(), abbrev)),
                    Filter::eq(ATTR_MEMBER, user_dn),
                ]),
                &[],
            )
            .await?;
        if !entries.is_empty() {
            return Ok(false);
        }
        self.client
            .modify(&dn, vec![DirModify::add(ATTR_MEMBER, vec![user_dn.into()])])
            .await?;
        debug!(group = %dn, user = %user_dn, "added member");
        Ok(true)
    }

    /// Reconcile the user's memberships in sync-owned groups.
    ///
    /// Every desired group is created/renamed/joined as needed; membership
    /// in any sync-owned group no longer desired is removed. Groups
    /// themselves are never deleted.
    pub async fn reconcile(
        &self,
        user_dn: &str,
        desired: &[(GroupKind, GroupSpec)],
        school: Option<&str>,
    ) -> Result<bool, SyncError> {
        let mut changed = false;

        for (kind, spec) in desired {
            changed |= self.ensure_group(*kind, spec, school).await?;
            changed |= self.add_member(*kind, &spec.abbrev, user_dn).await?;
        }

        // Stale memberships: sync-owned groups that still carry the user
        // but are no longer externally assigned.
        self.ensure_admin().await?;
        let member_of = self
            .client
            .search(
                Some(&self.config.group_base),
                &Filter::and(vec![
                    Filter::eq(ATTR_EXTERNAL_ID, EXTERNAL_MARKER),
                    Filter::eq(ATTR_MEMBER, user_dn),
                ]),
                &[],
            )
            .await?;

        for entry in member_of {
            let Some(kind) = entry
                .get_first(ATTR_GROUP_KIND)
                .and_then(GroupKind::parse)
            else {
                continue;
            };
            let cn = entry.get_first("cn").unwrap_or_default();
            let still_desired = desired.iter().any(|(k, spec)| {
                *k == kind && cn == format!("{}-{}", k.as_str(), spec.abbrev)
            });
            if !still_desired {
                self.client
                    .modify(
                        &entry.dn,
                        vec![DirModify::delete(ATTR_MEMBER, vec![user_dn.into()])],
                    )
                    .await?;
                info!(group = %entry.dn, user = %user_dn, "removed stale membership");
                changed = true;
            }
        }

        Ok(changed)
    }

    /// Sync-owned groups of one kind the user currently belongs to.
    pub async fn memberships(
        &self,
        user_dn: &str,
        kind: GroupKind,
    ) -> Result<Vec<String>, SyncError> {
        self.ensure_admin().await?;
        let entries = self
            .client
            .search(
                Some(&self.config.group_base),
                &Filter::and(vec![
                    Filter::eq(ATTR_EXTERNAL_ID, EXTERNAL_MARKER),
                    Filter::eq(ATTR_GROUP_KIND, kind.as_str()),
                    Filter::eq(ATTR_MEMBER, user_dn),
                ]),
                &[],
            )
            .await?;
        Ok(entries.into_iter().map(|e| e.dn).collect())
    }
}
