//! Request view consumed by the strategy chain.
//!
//! The HTTP layer marshals whatever it received into this shape; the
//! resolver never touches the transport directly.

use std::collections::HashMap;

/// The slice of an inbound request the resolver looks at: headers and,
/// for form logins, body fields.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    headers: HashMap<String, String>,
    form: HashMap<String, String>,
}

impl AuthRequest {
    /// Create an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style header. Names are matched case-insensitively.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Builder-style form field.
    #[must_use]
    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    /// Header value, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The `Authorization` header value with the given scheme stripped,
    /// if the header is present and uses that scheme.
    #[must_use]
    pub fn authorization(&self, scheme: &str) -> Option<&str> {
        let value = self.header("authorization")?;
        let (found_scheme, rest) = value.split_once(' ')?;
        if found_scheme.eq_ignore_ascii_case(scheme) {
            Some(rest.trim())
        } else {
            None
        }
    }

    /// Form field value, if present.
    #[must_use]
    pub fn form_field(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }
}
