//! Bearer-token validation for campusid.
//!
//! Verifies signed access tokens (signature, issuer, audience, expiry,
//! type-header sentinel), extracts scopes and claim allow-lists, and emits
//! audit records for every validation outcome on the token path.

pub mod audit;
pub mod claims;
pub mod error;
pub mod validator;

pub use audit::{AuditSink, MemoryAuditSink, TokenAuditRecord, TracingAuditSink};
pub use claims::{TokenClaims, TokenClaimsBuilder};
pub use error::AuthError;
pub use validator::{encode_token, TokenValidator, TOKEN_TYPE_SENTINEL};
