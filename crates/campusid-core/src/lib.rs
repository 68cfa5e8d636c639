//! Core types shared across the campusid platform.
//!
//! Provides strongly-typed identifiers, the closed result-code enums that
//! login synchronization and password changes report through, and the
//! platform-wide error type.

pub mod error;
pub mod ids;
pub mod status;

pub use error::{CampusError, Result};
pub use ids::{CorrelationId, OrgId, ParseIdError};
pub use status::ExtLoginStatus;
