//! The external user record.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Attributes pulled from the external source for one external identity.
///
/// Fetched fresh on every login attempt; never cached across requests.
#[derive(Debug, Clone, Default)]
pub struct ExternalUserRecord {
    /// Stable unique id in the external source.
    pub external_id: String,
    /// Login name in the external source.
    pub username: String,
    /// Distinguished name in the external source.
    pub dn: String,
    /// Given name.
    pub given_name: Option<String>,
    /// Family name.
    pub surname: Option<String>,
    /// Learner id, when the source carries one.
    pub learner_id: Option<String>,
    /// When the external password was last changed.
    pub password_changed_at: Option<DateTime<Utc>>,
    /// Raw group-reference values (membership by group reference).
    pub group_refs: Vec<String>,
}

impl ExternalUserRecord {
    /// Attribute view used to resolve template placeholders in mapping
    /// rules.
    #[must_use]
    pub fn template_attrs(&self) -> HashMap<&'static str, String> {
        let mut attrs = HashMap::new();
        attrs.insert("username", self.username.clone());
        attrs.insert("dn", self.dn.clone());
        attrs.insert("external_id", self.external_id.clone());
        if let Some(v) = &self.given_name {
            attrs.insert("given_name", v.clone());
        }
        if let Some(v) = &self.surname {
            attrs.insert("surname", v.clone());
        }
        if let Some(v) = &self.learner_id {
            attrs.insert("learner_id", v.clone());
        }
        attrs
    }
}
