//! `${VAR}` / `${VAR:-default}` template expansion
//!
//! Expansion is single-pass and non-recursive: the replacement text for a match is
//! never itself re-scanned for further `${...}` references. This keeps expansion order
//! independent of variable content and rules out substitution injection loops.

use crate::scope::{VariableScope, VariableSource};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Literal substituted for a bare `${NAME}` reference whose name is undefined anywhere
/// in the scope.
pub const UNDEFINED_TOKEN: &str = "UNDEFINED";

static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?:(?P<op>:-)(?P<default>[^}]*))?\}")
        .expect("static template pattern is valid")
});

/// One resolved variable reference, as reported by a dry-run expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVariable {
    pub name: String,
    pub value: String,
    pub source: String,
}

/// The result of a dry-run expansion: the text that would be produced, every resolved
/// reference and the layer it came from, and the set of names that resolved to
/// `UNDEFINED` because they were not defined anywhere in the scope.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunResult {
    pub rendered: String,
    pub resolved: Vec<ResolvedVariable>,
    pub undefined: HashSet<String>,
}

/// Expand `text` against `scope`, substituting in place without tracking diagnostics.
pub fn expand(text: &str, scope: &VariableScope) -> String {
    VAR_PATTERN
        .replace_all(text, |caps: &regex::Captures| substitute(caps, scope).0)
        .into_owned()
}

/// Expand `text` against `scope`, additionally returning the full audit trail used by
/// the dry-run / preview command.
pub fn expand_dry_run(text: &str, scope: &VariableScope) -> DryRunResult {
    let mut resolved = Vec::new();
    let mut undefined = HashSet::new();

    let rendered = VAR_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let (value, name, source, is_undefined) = substitute(caps, scope);
            if is_undefined {
                undefined.insert(name);
            } else {
                resolved.push(ResolvedVariable {
                    name,
                    value: value.clone(),
                    source,
                });
            }
            value
        })
        .into_owned();

    DryRunResult {
        rendered,
        resolved,
        undefined,
    }
}

/// The set of `NAME`s referenced anywhere in `text`, used to prove hermeticity:
/// expansion depends only on the scope restricted to these names.
pub fn referenced_names(text: &str) -> HashSet<String> {
    VAR_PATTERN
        .captures_iter(text)
        .map(|caps| caps["name"].to_string())
        .collect()
}

/// Returns `(substituted_text, name, source_label, was_undefined)`.
fn substitute(caps: &regex::Captures, scope: &VariableScope) -> (String, String, String, bool) {
    let name = caps["name"].to_string();
    let default = caps.name("default").map(|m| m.as_str());

    match (scope.lookup(&name), default) {
        (Some((value, _source)), Some(default)) if value.is_empty() => {
            (default.to_string(), name, VariableSource::Default.to_string(), false)
        }
        (Some((value, source)), _) => (value.to_string(), name, source.to_string(), false),
        (None, Some(default)) => (default.to_string(), name, VariableSource::Default.to_string(), false),
        (None, None) => (UNDEFINED_TOKEN.to_string(), name, String::new(), true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_plain_reference() {
        let scope = VariableScope::new()
            .with_layer(VariableSource::Environment, map(&[("LOG_LEVEL", "debug")]));
        assert_eq!(expand("level=${LOG_LEVEL}", &scope), "level=debug");
    }

    #[test]
    fn uses_default_when_absent() {
        let scope = VariableScope::new();
        assert_eq!(expand("ttl=${CACHE_TTL:-60}", &scope), "ttl=60");
    }

    #[test]
    fn uses_default_when_present_but_empty() {
        let scope = VariableScope::new().with_layer(VariableSource::Environment, map(&[("CACHE_TTL", "")]));
        assert_eq!(expand("ttl=${CACHE_TTL:-60}", &scope), "ttl=60");
    }

    #[test]
    fn bare_reference_to_undefined_name_becomes_undefined_token() {
        let scope = VariableScope::new();
        assert_eq!(expand("x=${MISSING}", &scope), "x=UNDEFINED");
    }

    #[test]
    fn non_matching_dollar_sequences_pass_through() {
        let scope = VariableScope::new();
        assert_eq!(expand("price: $5, ${1invalid}", &scope), "price: $5, ${1invalid}");
    }

    #[test]
    fn expansion_is_not_recursive() {
        // VALUE itself contains a ${...} reference; it must not be re-scanned.
        let scope = VariableScope::new().with_layer(
            VariableSource::Environment,
            map(&[("A", "${B}"), ("B", "leaked")]),
        );
        assert_eq!(expand("${A}", &scope), "${B}");
    }

    #[test]
    fn dry_run_reports_source_and_undefined_set() {
        let scope = VariableScope::new()
            .with_layer(VariableSource::Environment, map(&[("LOG_LEVEL", "debug")]));
        let result = expand_dry_run(
            "level=${LOG_LEVEL} ttl=${CACHE_TTL:-60} x=${MISSING}",
            &scope,
        );
        assert_eq!(result.rendered, "level=debug ttl=60 x=UNDEFINED");
        assert!(result.undefined.contains("MISSING"));
        assert!(result
            .resolved
            .iter()
            .any(|r| r.name == "LOG_LEVEL" && r.source == "environment"));
        assert!(result
            .resolved
            .iter()
            .any(|r| r.name == "CACHE_TTL" && r.source == "default"));
    }

    #[test]
    fn referenced_names_collects_all_distinct_names() {
        let names = referenced_names("${A} ${B:-x} ${A} plain text");
        assert_eq!(names.len(), 2);
        assert!(names.contains("A"));
        assert!(names.contains("B"));
    }

    #[test]
    fn hermeticity_unreferenced_layer_changes_do_not_affect_output() {
        let text = "only=${A}";
        let scope1 = VariableScope::new()
            .with_layer(VariableSource::Environment, map(&[("A", "1"), ("UNUSED", "x")]));
        let scope2 = VariableScope::new()
            .with_layer(VariableSource::Environment, map(&[("A", "1"), ("UNUSED", "y")]));
        assert_eq!(expand(text, &scope1), expand(text, &scope2));
    }
}
