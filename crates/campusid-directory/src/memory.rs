//! In-memory directory used by tests across the workspace.
//!
//! Implements the full [`DirectoryClient`] contract against a process-local
//! entry map: binds verify `userPassword`, searches evaluate the filter AST
//! directly, modifies mutate the map. An offline switch simulates an
//! unreachable server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{AttrValue, DirModify, DirectoryClient, ModifyOp};
use crate::entry::DirEntry;
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::Filter;

type RightsFn = dyn Fn(&str, &str, &str) -> bool + Send + Sync;

/// In-memory [`DirectoryClient`].
pub struct MemoryDirectory {
    root_dn: String,
    root_password: String,
    entries: Mutex<HashMap<String, DirEntry>>,
    negotiate: Mutex<HashMap<Vec<u8>, String>>,
    bound: Mutex<Option<String>>,
    offline: AtomicBool,
    rights: Mutex<Option<Box<RightsFn>>>,
}

impl MemoryDirectory {
    /// Create a directory with a privileged root identity.
    pub fn new(root_dn: impl Into<String>, root_password: impl Into<String>) -> Self {
        Self {
            root_dn: root_dn.into(),
            root_password: root_password.into(),
            entries: Mutex::new(HashMap::new()),
            negotiate: Mutex::new(HashMap::new()),
            bound: Mutex::new(None),
            offline: AtomicBool::new(false),
            rights: Mutex::new(None),
        }
    }

    /// Seed an entry, replacing any previous one at the same DN.
    pub fn seed(&self, entry: DirEntry) {
        self.entries.lock().unwrap().insert(entry.dn.clone(), entry);
    }

    /// Register a negotiation blob that resolves to `dn`.
    pub fn seed_negotiate(&self, blob: Vec<u8>, dn: impl Into<String>) {
        self.negotiate.lock().unwrap().insert(blob, dn.into());
    }

    /// Drop an entry, as an out-of-band administrative deletion would.
    pub fn remove(&self, dn: &str) {
        self.entries.lock().unwrap().remove(dn);
    }

    /// Simulate the server being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Override the effective-rights rule used by [`DirectoryClient::can_modify`].
    ///
    /// Default rule: the root identity and self-service (actor equals
    /// target) are allowed, everything else is denied.
    pub fn set_rights_fn(&self, f: impl Fn(&str, &str, &str) -> bool + Send + Sync + 'static) {
        *self.rights.lock().unwrap() = Some(Box::new(f));
    }

    /// The DN the session is currently bound to, if any.
    pub fn bound_dn(&self) -> Option<String> {
        self.bound.lock().unwrap().clone()
    }

    /// Snapshot of one entry, for assertions.
    pub fn entry(&self, dn: &str) -> Option<DirEntry> {
        self.entries.lock().unwrap().get(dn).cloned()
    }

    /// All entry DNs, for assertions.
    pub fn dns(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    fn check_online(&self) -> DirectoryResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DirectoryError::connection_failed(
                "directory server unreachable",
            ));
        }
        Ok(())
    }

    fn matches(filter: &Filter, entry: &DirEntry) -> bool {
        match filter {
            Filter::And(filters) => filters.iter().all(|f| Self::matches(f, entry)),
            Filter::Or(filters) => filters.iter().any(|f| Self::matches(f, entry)),
            Filter::Not(filter) => !Self::matches(filter, entry),
            Filter::Equals { attribute, value } => entry
                .get_all(attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Filter::Present { attribute } => entry.has(attribute),
        }
    }

    fn value_to_string(value: &AttrValue) -> String {
        match value {
            AttrValue::Text(s) => s.clone(),
            AttrValue::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn bind(&self, dn: &str, secret: &str) -> DirectoryResult<()> {
        self.check_online()?;

        if dn == self.root_dn && secret == self.root_password {
            *self.bound.lock().unwrap() = Some(dn.to_string());
            return Ok(());
        }

        let ok = self
            .entries
            .lock()
            .unwrap()
            .get(dn)
            .map(|entry| {
                !secret.is_empty()
                    && entry.get_all("userPassword").iter().any(|p| p == secret)
            })
            .unwrap_or(false);

        if ok {
            *self.bound.lock().unwrap() = Some(dn.to_string());
            Ok(())
        } else {
            Err(DirectoryError::InvalidCredentials)
        }
    }

    async fn bind_negotiate(&self, blob: &[u8]) -> DirectoryResult<String> {
        self.check_online()?;
        let dn = self
            .negotiate
            .lock()
            .unwrap()
            .get(blob)
            .cloned()
            .ok_or(DirectoryError::InvalidCredentials)?;
        *self.bound.lock().unwrap() = Some(dn.clone());
        Ok(dn)
    }

    async fn search(
        &self,
        base: Option<&str>,
        filter: &Filter,
        _attributes: &[&str],
    ) -> DirectoryResult<Vec<DirEntry>> {
        self.check_online()?;
        let entries = self.entries.lock().unwrap();
        let mut found: Vec<DirEntry> = entries
            .values()
            .filter(|e| base.map_or(true, |b| e.dn.ends_with(b)))
            .filter(|e| Self::matches(filter, e))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.dn.cmp(&b.dn));
        Ok(found)
    }

    async fn modify(&self, dn: &str, changes: Vec<DirModify>) -> DirectoryResult<()> {
        self.check_online()?;
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(dn).ok_or_else(|| DirectoryError::NoSuchEntry {
            dn: dn.to_string(),
        })?;

        for change in changes {
            let values: Vec<String> = change.values.iter().map(Self::value_to_string).collect();
            match change.op {
                ModifyOp::Replace => {
                    entry.attrs.insert(change.attribute, values);
                }
                ModifyOp::Add => {
                    entry
                        .attrs
                        .entry(change.attribute)
                        .or_default()
                        .extend(values);
                }
                ModifyOp::Delete => {
                    if values.is_empty() {
                        entry.attrs.remove(&change.attribute);
                    } else if let Some(existing) = entry.attrs.get_mut(&change.attribute) {
                        existing.retain(|v| !values.contains(v));
                        if existing.is_empty() {
                            entry.attrs.remove(&change.attribute);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn add(&self, dn: &str, attributes: Vec<(String, Vec<AttrValue>)>) -> DirectoryResult<()> {
        self.check_online()?;
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(dn) {
            return Err(DirectoryError::AlreadyExists { dn: dn.to_string() });
        }
        let mut entry = DirEntry::new(dn);
        for (name, values) in attributes {
            let values: Vec<String> = values.iter().map(Self::value_to_string).collect();
            entry.attrs.insert(name, values);
        }
        entries.insert(dn.to_string(), entry);
        Ok(())
    }

    async fn can_modify(
        &self,
        actor_dn: &str,
        target_dn: &str,
        attribute: &str,
    ) -> DirectoryResult<bool> {
        self.check_online()?;
        let rights = self.rights.lock().unwrap();
        if let Some(ref f) = *rights {
            return Ok(f(actor_dn, target_dn, attribute));
        }
        Ok(actor_dn == self.root_dn || actor_dn == target_dn)
    }

    async fn unbind(&self) -> DirectoryResult<()> {
        *self.bound.lock().unwrap() = None;
        Ok(())
    }
}
