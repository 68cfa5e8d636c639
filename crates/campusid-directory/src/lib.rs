//! Directory client interface.
//!
//! Credential resolution, synchronization and password propagation all reach
//! the directory store through the same three operations: bind, search with
//! a filter, and attribute modify. This crate defines that interface
//! ([`DirectoryClient`]), the filter AST with RFC 4515 escaping, DN value
//! escaping per RFC 4514, an [`ldap::LdapDirectory`] implementation over
//! `ldap3`, and an [`memory::MemoryDirectory`] double used by tests across
//! the workspace.

pub mod client;
pub mod entry;
pub mod error;
pub mod filter;
pub mod ldap;
pub mod memory;

pub use client::{AttrValue, DirModify, DirectoryClient, ModifyOp};
pub use entry::DirEntry;
pub use error::{DirectoryError, DirectoryResult};
pub use filter::{escape_dn_value, escape_filter_value, Filter};
