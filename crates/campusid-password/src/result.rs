//! The aggregated result of one password change.

use std::time::Duration;

use campusid_core::ExtLoginStatus;
use serde::Serialize;

/// Overall pass/fail of the whole operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Every attempted stage succeeded (permitted skips included).
    Success,
    /// A stage failed and the remainder was aborted.
    Failure,
}

/// Result of one password-change run.
///
/// The stage statuses stay distinct on purpose: callers need to tell "your
/// old password was wrong" (stage 1) from "a downstream policy rejected
/// the new one" (stage 3).
#[derive(Debug, Clone, Serialize)]
pub struct PasswordChangeResult {
    /// Overall outcome.
    pub exit_status: ExitStatus,
    /// Fine-grained outcome of the upstream stage.
    pub extlogin_status: ExtLoginStatus,
    /// Code reported by the downstream dispatcher, when stage 3 ran.
    pub sync_status: Option<String>,
    /// Human-readable diagnostic.
    pub message: String,
    /// Wall-clock duration of the whole run.
    pub duration: Duration,
}

impl PasswordChangeResult {
    /// Whether the change went through everywhere it was attempted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_status == ExitStatus::Success
    }
}
