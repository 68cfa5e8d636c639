//! Search filter AST and escaping helpers.
//!
//! Filters are built as values and rendered to the directory protocol's
//! string form at the client boundary. Every value position is escaped per
//! RFC 4515 so user-supplied names can never alter filter structure.

/// A directory search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All inner filters must match.
    And(Vec<Filter>),
    /// At least one inner filter must match.
    Or(Vec<Filter>),
    /// The inner filter must not match.
    Not(Box<Filter>),
    /// Attribute equals value.
    Equals { attribute: String, value: String },
    /// Attribute is present with any value.
    Present { attribute: String },
}

impl Filter {
    /// Equality filter on `attribute`.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Presence filter on `attribute`.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Conjunction of `filters`.
    #[must_use]
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Render to the protocol string form with escaped values.
    #[must_use]
    pub fn to_filter_string(&self) -> String {
        match self {
            Filter::And(filters) => {
                let inner: Vec<String> = filters.iter().map(Filter::to_filter_string).collect();
                format!("(&{})", inner.join(""))
            }
            Filter::Or(filters) => {
                let inner: Vec<String> = filters.iter().map(Filter::to_filter_string).collect();
                format!("(|{})", inner.join(""))
            }
            Filter::Not(filter) => format!("(!{})", filter.to_filter_string()),
            Filter::Equals { attribute, value } => {
                format!("({}={})", attribute, escape_filter_value(value))
            }
            Filter::Present { attribute } => format!("({attribute}=*)"),
        }
    }
}

/// Escape special characters in filter values (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Escape special characters in a DN attribute value per RFC 4514.
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            '"' | '+' | ',' | ';' | '<' | '>' | '\\' => {
                result.push('\\');
                result.push(c);
            }
            '#' if i == 0 => {
                result.push('\\');
                result.push(c);
            }
            ' ' if i == 0 || i == value.len() - 1 => {
                result.push('\\');
                result.push(c);
            }
            _ => result.push(c),
        }
    }
    result
}

/// Whether a login name looks like a distinguished name rather than a
/// plain username. A DN has at least one `attr=value` component.
#[must_use]
pub fn looks_like_dn(name: &str) -> bool {
    name.contains('=')
        && name
            .split(',')
            .all(|part| part.trim().contains('=') && !part.trim().starts_with('='))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_filter_escapes_value() {
        let f = Filter::eq("uid", "ad*min)(x");
        assert_eq!(f.to_filter_string(), "(uid=ad\\2amin\\29\\28x)");
    }

    #[test]
    fn test_nested_filter_rendering() {
        let f = Filter::and(vec![
            Filter::eq("objectClass", "person"),
            Filter::Or(vec![Filter::eq("uid", "luke"), Filter::present("mail")]),
            Filter::Not(Box::new(Filter::present("lockedTime"))),
        ]);
        assert_eq!(
            f.to_filter_string(),
            "(&(objectClass=person)(|(uid=luke)(mail=*))(!(lockedTime=*)))"
        );
    }

    #[test]
    fn test_escape_filter_backslash_first() {
        // The backslash must be escaped before the escape sequences are
        // introduced, otherwise they would be double-escaped.
        assert_eq!(escape_filter_value("a\\*b"), "a\\5c\\2ab");
    }

    #[test]
    fn test_escape_dn_value() {
        assert_eq!(escape_dn_value("Doe, John"), "Doe\\, John");
        assert_eq!(escape_dn_value("#admin"), "\\#admin");
        assert_eq!(escape_dn_value(" padded "), "\\ padded\\ ");
        assert_eq!(escape_dn_value("plain"), "plain");
    }

    #[test]
    fn test_looks_like_dn() {
        assert!(looks_like_dn("uid=luke,ou=people,dc=example,dc=org"));
        assert!(looks_like_dn("cn=admin"));
        assert!(!looks_like_dn("luke.skywalker"));
        assert!(!looks_like_dn("luke,skywalker"));
        assert!(!looks_like_dn("=broken,uid=x"));
    }
}
