//! Directory entry as returned by searches.

use std::collections::HashMap;

/// One entry returned by a directory search: a DN plus its attributes.
///
/// Textual attributes and binary attributes are kept apart, mirroring the
/// way the wire protocol delivers them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Textual attribute values, keyed by attribute name.
    pub attrs: HashMap<String, Vec<String>>,
    /// Binary attribute values, keyed by attribute name.
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirEntry {
    /// Create an empty entry with the given DN.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
            bin_attrs: HashMap::new(),
        }
    }

    /// First value of a textual attribute, if present.
    #[must_use]
    pub fn get_first(&self, attribute: &str) -> Option<&str> {
        self.attrs
            .get(attribute)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values of a textual attribute; empty when absent.
    #[must_use]
    pub fn get_all(&self, attribute: &str) -> &[String] {
        self.attrs.get(attribute).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the attribute is present with at least one value.
    #[must_use]
    pub fn has(&self, attribute: &str) -> bool {
        self.attrs
            .get(attribute)
            .is_some_and(|v| !v.is_empty())
            || self
                .bin_attrs
                .get(attribute)
                .is_some_and(|v| !v.is_empty())
    }

    /// Set a textual attribute, replacing previous values.
    pub fn set(&mut self, attribute: impl Into<String>, values: Vec<String>) {
        self.attrs.insert(attribute.into(), values);
    }

    /// Builder-style single-valued attribute.
    #[must_use]
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(attribute.into(), vec![value.into()]);
        self
    }

    /// Builder-style multi-valued attribute.
    #[must_use]
    pub fn with_all(mut self, attribute: impl Into<String>, values: Vec<String>) -> Self {
        self.attrs
            .insert(attribute.into(), values);
        self
    }
}
