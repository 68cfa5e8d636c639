//! Pure evaluation of mapping rules.
//!
//! Rules are glob patterns matched against the external DN (first) and the
//! group-reference list (second). Matching rules apply their operations in
//! order; non-exclusive fields accumulate, the exclusive categories
//! (teaching group, year class) must resolve to exactly one candidate or
//! the whole category is dropped.
//!
//! # Template placeholders
//!
//! Group abbreviations and display names are templates:
//!
//! - `{username}`, `{surname}`, ... — external attributes of the record
//! - `{attr:regex}` — the first capture group of `regex` applied to the
//!   attribute (the whole match when the regex has no group)
//! - `{match}` / `{match:regex}` — the value the rule's pattern matched
//!   (the DN for by-DN rules, the group reference for by-group rules)
//! - `{schoolyear}` — the current school year label, e.g. `2025/26`;
//!   the year rolls over in the configured month

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::config::{MappingConfig, RuleOp, SyncRule};
use crate::error::SyncError;
use crate::groups::GroupSpec;
use crate::record::ExternalUserRecord;

/// Assignments computed by one rule-evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedAssignments {
    /// Granted roles.
    pub roles: BTreeSet<String>,
    /// Assigned schools in first-seen order; the first is primary.
    pub schools: Vec<String>,
    /// Administrative groups (non-exclusive).
    pub admin_groups: Vec<GroupSpec>,
    /// The teaching group, when exactly one candidate resolved.
    pub teaching_group: Option<GroupSpec>,
    /// The year-class group, when exactly one candidate resolved.
    pub year_class: Option<GroupSpec>,
}

/// The school-year label for `today`, e.g. `2025/26`.
///
/// Before the rollover month the year still counts to the previous
/// school year.
#[must_use]
pub fn school_year_label(today: NaiveDate, rollover_month: u32) -> String {
    let start_year = if today.month() >= rollover_month {
        today.year()
    } else {
        today.year() - 1
    };
    format!("{}/{:02}", start_year, (start_year + 1) % 100)
}

/// Evaluates mapping rules against external records.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    mapping: MappingConfig,
}

impl RuleEngine {
    /// Create an engine over one organization's mapping block.
    #[must_use]
    pub fn new(mapping: MappingConfig) -> Self {
        Self { mapping }
    }

    /// Evaluate all rules against `record`.
    ///
    /// By-DN rules run first, then by-group rules; within each list, rules
    /// run in configuration order and later matches accumulate onto (and
    /// for exclusive categories, compete with) earlier ones.
    #[must_use]
    pub fn evaluate(&self, record: &ExternalUserRecord, today: NaiveDate) -> MappedAssignments {
        let mut state = EvalState::default();

        for rule in &self.mapping.by_dn {
            match glob_to_regex(&rule.pattern) {
                Ok(re) if re.is_match(&record.dn) => {
                    self.apply(rule, record, &record.dn, today, &mut state);
                }
                Ok(_) => {}
                Err(err) => warn!(pattern = %rule.pattern, error = %err, "unusable rule pattern skipped"),
            }
        }

        for rule in &self.mapping.by_group {
            match glob_to_regex(&rule.pattern) {
                Ok(re) => {
                    for group_ref in &record.group_refs {
                        if re.is_match(group_ref) {
                            self.apply(rule, record, group_ref, today, &mut state);
                        }
                    }
                }
                Err(err) => warn!(pattern = %rule.pattern, error = %err, "unusable rule pattern skipped"),
            }
        }

        state.collapse(&record.username)
    }

    fn apply(
        &self,
        rule: &SyncRule,
        record: &ExternalUserRecord,
        matched: &str,
        today: NaiveDate,
        state: &mut EvalState,
    ) {
        let rollover = self.mapping.school_year_rollover_month;
        for op in &rule.ops {
            let result = match op {
                RuleOp::AddRole(template) => {
                    expand_template(template, record, matched, today, rollover)
                        .map(|role| state.roles.insert(role))
                        .map(|_| ())
                }
                RuleOp::AddSchool(template) => {
                    expand_template(template, record, matched, today, rollover).map(|school| {
                        if !state.schools.contains(&school) {
                            state.schools.push(school);
                        }
                    })
                }
                RuleOp::AdminGroup { abbrev, name } => self
                    .group_spec(abbrev, name, record, matched, today)
                    .map(|spec| push_unique(&mut state.admin_groups, spec)),
                RuleOp::TeachingGroup { abbrev, name } => self
                    .group_spec(abbrev, name, record, matched, today)
                    .map(|spec| push_unique(&mut state.teaching_candidates, spec)),
                RuleOp::YearClassGroup { abbrev, name } => self
                    .group_spec(abbrev, name, record, matched, today)
                    .map(|spec| push_unique(&mut state.year_class_candidates, spec)),
            };
            if let Err(err) = result {
                warn!(pattern = %rule.pattern, error = %err, "rule operation skipped");
            }
        }
    }

    fn group_spec(
        &self,
        abbrev: &str,
        name: &str,
        record: &ExternalUserRecord,
        matched: &str,
        today: NaiveDate,
    ) -> Result<GroupSpec, SyncError> {
        let rollover = self.mapping.school_year_rollover_month;
        Ok(GroupSpec {
            abbrev: expand_template(abbrev, record, matched, today, rollover)?,
            name: expand_template(name, record, matched, today, rollover)?,
        })
    }
}

#[derive(Debug, Default)]
struct EvalState {
    roles: BTreeSet<String>,
    schools: Vec<String>,
    admin_groups: Vec<GroupSpec>,
    teaching_candidates: Vec<GroupSpec>,
    year_class_candidates: Vec<GroupSpec>,
}

impl EvalState {
    /// Collapse exclusive categories: more than one distinct candidate
    /// drops the whole category, never an arbitrary pick.
    fn collapse(self, username: &str) -> MappedAssignments {
        MappedAssignments {
            roles: self.roles,
            schools: self.schools,
            admin_groups: self.admin_groups,
            teaching_group: collapse_exclusive(self.teaching_candidates, "teaching group", username),
            year_class: collapse_exclusive(self.year_class_candidates, "year class", username),
        }
    }
}

fn collapse_exclusive(
    candidates: Vec<GroupSpec>,
    category: &str,
    username: &str,
) -> Option<GroupSpec> {
    match candidates.len() {
        0 => None,
        1 => candidates.into_iter().next(),
        n => {
            warn!(
                username = %username,
                category = %category,
                candidates = n,
                "exclusive category resolved to multiple groups; dropping all of them"
            );
            None
        }
    }
}

fn push_unique(list: &mut Vec<GroupSpec>, spec: GroupSpec) {
    if !list.iter().any(|g| g.abbrev == spec.abbrev) {
        list.push(spec);
    }
}

/// Compile a glob pattern (`*`, `?`) into an anchored, case-insensitive
/// regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, SyncError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    RegexBuilder::new(&expr)
        .case_insensitive(true)
        .build()
        .map_err(|e| SyncError::Config(format!("invalid pattern '{pattern}': {e}")))
}

/// Expand a template against one record and the matched value.
pub fn expand_template(
    template: &str,
    record: &ExternalUserRecord,
    matched: &str,
    today: NaiveDate,
    rollover_month: u32,
) -> Result<String, SyncError> {
    let attrs = record.template_attrs();
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = matching_brace(after).ok_or_else(|| {
            SyncError::Config(format!("unterminated placeholder in template '{template}'"))
        })?;
        let placeholder = &after[..end];
        rest = &after[end + 1..];

        let (name, pattern) = match placeholder.split_once(':') {
            Some((name, pattern)) => (name, Some(pattern)),
            None => (placeholder, None),
        };

        let value = match name {
            "schoolyear" => school_year_label(today, rollover_month),
            "match" => matched.to_string(),
            other => attrs
                .get(other)
                .cloned()
                .ok_or_else(|| {
                    SyncError::Config(format!("template attribute '{other}' not available"))
                })?,
        };

        match pattern {
            None => out.push_str(&value),
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(|e| {
                    SyncError::Config(format!("invalid template regex '{pattern}': {e}"))
                })?;
                let captures = re.captures(&value).ok_or_else(|| {
                    SyncError::Config(format!(
                        "template regex '{pattern}' did not match '{name}'"
                    ))
                })?;
                let captured = captures
                    .get(1)
                    .or_else(|| captures.get(0))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                out.push_str(captured);
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Index of the brace closing a placeholder, tolerating balanced braces
/// inside (regex repetitions like `{2}`).
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}
