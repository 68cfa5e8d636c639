//! External directory synchronization.
//!
//! Reconciles the local directory against an authoritative external school
//! directory on every successful external login: validate credentials
//! upstream, fetch the external record, evaluate the mapping rules, upsert
//! the local user, sync the password and reconcile group memberships.
//!
//! Vendor differences (authentication, password change mechanism, external
//! id lookup) are behind the [`ExternalDirectory`] capability trait with
//! one implementation per vendor, selected by a configuration
//! discriminator at construction time.

pub mod config;
pub mod engine;
pub mod error;
pub mod groups;
pub mod record;
pub mod rules;
pub mod users;
pub mod vendor;

pub use config::{
    EncryptionMode, ExternalAuthMethod, ExternalSourceConfig, LocalDirectoryConfig,
    MappingConfig, RuleOp, SyncRule, VendorKind,
};
pub use engine::{SyncEngine, SyncReport};
pub use error::SyncError;
pub use groups::{GroupKind, GroupSpec, LocalGroups};
pub use record::ExternalUserRecord;
pub use rules::{school_year_label, MappedAssignments, RuleEngine};
pub use users::{LocalUser, LocalUsers};
pub use vendor::{build_vendor, BindOutcome, ExternalDirectory};
