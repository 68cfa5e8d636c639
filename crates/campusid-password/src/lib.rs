//! Password change orchestration.
//!
//! A password change runs through strictly ordered stages: the external
//! authoritative source, the local directory, then the downstream systems
//! configured for the target's school. Each stage can short-circuit the
//! remainder; a downstream failure triggers a best-effort rollback of the
//! local change when the actor changed their own password.

pub mod integrations;
pub mod orchestrator;
pub mod result;

pub use integrations::{
    HttpIntegrations, Integrations, IntegrationRegistry, IntegrationRules, SyncAction,
    ACTION_CHANGE_PASSWORD,
};
pub use orchestrator::{Actor, PasswordOrchestrator};
pub use result::{ExitStatus, PasswordChangeResult};
