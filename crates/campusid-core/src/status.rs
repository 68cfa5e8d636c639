//! Closed result codes for external-login synchronization and upstream
//! password changes.
//!
//! Callers branch on these variants, never on free-text messages. The
//! HTTP-facing layer translates them to status codes outside this core.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Outcome of one external-login synchronization pass or of the upstream
/// stage of a password change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtLoginStatus {
    /// The local record was changed (created, updated, password set or
    /// group memberships reconciled).
    #[serde(rename = "UPDATED")]
    Updated,
    /// External data matched the local record; nothing was written.
    #[serde(rename = "NOCHANGE")]
    NoChange,
    /// The user does not exist in the external source.
    #[serde(rename = "USERMISSING")]
    UserMissing,
    /// The supplied credentials were rejected by the external source.
    #[serde(rename = "BADUSERCREDS")]
    BadUserCreds,
    /// External login is not configured for this organization, or the
    /// account is managed locally only. Terminal but not an error.
    #[serde(rename = "NOTCONFIGURED")]
    NotConfigured,
    /// The configuration exists but is unusable (missing defaults,
    /// malformed mapping rules).
    #[serde(rename = "CONFIGERROR")]
    ConfigError,
    /// The external source could not be reached.
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    /// The external bind succeeded but a local write failed afterwards.
    #[serde(rename = "UPDATEERROR")]
    UpdateError,
    /// The external bind failed, and the stale local credential was
    /// invalidated as a consequence.
    #[serde(rename = "UPDATED_BUT_FAIL")]
    UpdatedButFail,
}

impl ExtLoginStatus {
    /// Stable code for audit records and downstream callers.
    #[must_use]
    pub fn as_code(&self) -> &'static str {
        match self {
            ExtLoginStatus::Updated => "UPDATED",
            ExtLoginStatus::NoChange => "NOCHANGE",
            ExtLoginStatus::UserMissing => "USERMISSING",
            ExtLoginStatus::BadUserCreds => "BADUSERCREDS",
            ExtLoginStatus::NotConfigured => "NOTCONFIGURED",
            ExtLoginStatus::ConfigError => "CONFIGERROR",
            ExtLoginStatus::Unavailable => "UNAVAILABLE",
            ExtLoginStatus::UpdateError => "UPDATEERROR",
            ExtLoginStatus::UpdatedButFail => "UPDATED_BUT_FAIL",
        }
    }

    /// Whether the pass left the caller authenticated.
    ///
    /// Only [`ExtLoginStatus::Updated`] and [`ExtLoginStatus::NoChange`]
    /// mean the supplied credentials were accepted upstream.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExtLoginStatus::Updated | ExtLoginStatus::NoChange)
    }
}

impl Display for ExtLoginStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExtLoginStatus::Updated.as_code(), "UPDATED");
        assert_eq!(ExtLoginStatus::UpdatedButFail.as_code(), "UPDATED_BUT_FAIL");
        assert_eq!(ExtLoginStatus::BadUserCreds.as_code(), "BADUSERCREDS");
    }

    #[test]
    fn test_success_classification() {
        assert!(ExtLoginStatus::Updated.is_success());
        assert!(ExtLoginStatus::NoChange.is_success());
        assert!(!ExtLoginStatus::UpdatedButFail.is_success());
        assert!(!ExtLoginStatus::Unavailable.is_success());
        assert!(!ExtLoginStatus::NotConfigured.is_success());
    }

    #[test]
    fn test_serde_uses_codes() {
        let json = serde_json::to_string(&ExtLoginStatus::NoChange).unwrap();
        assert_eq!(json, "\"NOCHANGE\"");
        let back: ExtLoginStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExtLoginStatus::NoChange);
    }
}
