//! The directory client trait.

use async_trait::async_trait;

use crate::entry::DirEntry;
use crate::error::DirectoryResult;
use crate::filter::Filter;

/// One attribute value in a modify or add operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Textual value.
    Text(String),
    /// Binary value (e.g. vendor-specific password encodings).
    Binary(Vec<u8>),
}

impl AttrValue {
    /// The value as raw bytes, whichever representation it carries.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttrValue::Text(s) => s.as_bytes(),
            AttrValue::Binary(b) => b.as_slice(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(value: Vec<u8>) -> Self {
        AttrValue::Binary(value)
    }
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    /// Add the values to the attribute.
    Add,
    /// Replace all values of the attribute.
    Replace,
    /// Delete the given values (or the whole attribute when none given).
    Delete,
}

/// One attribute modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirModify {
    /// What to do.
    pub op: ModifyOp,
    /// Attribute name.
    pub attribute: String,
    /// Values; may be empty for `Delete`.
    pub values: Vec<AttrValue>,
}

impl DirModify {
    /// Replace all values of `attribute` with `values`.
    pub fn replace(attribute: impl Into<String>, values: Vec<AttrValue>) -> Self {
        Self {
            op: ModifyOp::Replace,
            attribute: attribute.into(),
            values,
        }
    }

    /// Add `values` to `attribute`.
    pub fn add(attribute: impl Into<String>, values: Vec<AttrValue>) -> Self {
        Self {
            op: ModifyOp::Add,
            attribute: attribute.into(),
            values,
        }
    }

    /// Delete `values` from `attribute`; the whole attribute when empty.
    pub fn delete(attribute: impl Into<String>, values: Vec<AttrValue>) -> Self {
        Self {
            op: ModifyOp::Delete,
            attribute: attribute.into(),
            values,
        }
    }
}

/// The query/bind/modify interface to a directory store.
///
/// All three subsystems (credential resolution, synchronization, password
/// propagation) depend only on this shape; the concrete protocol is an
/// implementation detail of the client behind it.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Authenticate the session as `dn` with `secret`.
    ///
    /// A successful bind switches the session's authorization to that
    /// identity; subsequent operations run with its privileges.
    async fn bind(&self, dn: &str, secret: &str) -> DirectoryResult<()>;

    /// Authenticate the session from an opaque network-negotiated blob.
    ///
    /// The blob is not interpreted here; it is handed to the protocol
    /// layer's negotiation mechanism. Returns the DN the session was bound
    /// to. Clients that do not support negotiation return
    /// [`crate::DirectoryError::InvalidConfiguration`].
    async fn bind_negotiate(&self, blob: &[u8]) -> DirectoryResult<String>;

    /// Search the subtree under `base` (or the client's default base when
    /// `None`) for entries matching `filter`, returning the requested
    /// attributes (all when empty).
    async fn search(
        &self,
        base: Option<&str>,
        filter: &Filter,
        attributes: &[&str],
    ) -> DirectoryResult<Vec<DirEntry>>;

    /// Apply attribute modifications to the entry at `dn`.
    async fn modify(&self, dn: &str, changes: Vec<DirModify>) -> DirectoryResult<()>;

    /// Create a new entry at `dn` with the given attributes.
    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<AttrValue>)>) -> DirectoryResult<()>;

    /// Probe whether `actor_dn` has the rights to modify `attribute` of the
    /// entry at `target_dn`, without committing a change (effective-rights
    /// query).
    async fn can_modify(
        &self,
        actor_dn: &str,
        target_dn: &str,
        attribute: &str,
    ) -> DirectoryResult<bool>;

    /// Release the session. Always called on exit, success or failure.
    async fn unbind(&self) -> DirectoryResult<()>;
}
