//! Lexical discovery of free template variables
//!
//! Variables are found without evaluating the template: every `{{ ... }}` and
//! `{% ... %}` body is scanned (string literals blanked out) for dotted paths
//! rooted in one of the known namespaces.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Namespaces whose paths count as free variables.
pub const NAMESPACES: [&str; 6] = ["environment", "env", "vars", "user", "state", "self"];

/// Variables found in one template.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ScannedVariables {
    /// Every dotted path, e.g. `env.partner_id`
    pub paths: BTreeSet<String>,
    /// Paths iterated over by `{% for x in path %}`
    pub iterated: BTreeSet<String>,
}

struct Patterns {
    tag: Regex,
    string: Regex,
    path: Regex,
    for_in: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let namespaces = NAMESPACES.join("|");
            Some(Patterns {
                tag: Regex::new(r"(?s)\{\{-?(.*?)-?\}\}|\{%-?(.*?)-?%\}").ok()?,
                string: Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`[^`]*`"#).ok()?,
                path: Regex::new(&format!(
                    r"(?:^|[^A-Za-z0-9_.:])((?:{namespaces})(?:\.[A-Za-z0-9_]+)*)\b"
                ))
                .ok()?,
                for_in: Regex::new(r"^\s*for\s+[A-Za-z0-9_,\s]+\s+in\s+([A-Za-z0-9_.]+)").ok()?,
            })
        })
        .as_ref()
}

/// Scans `text` for namespace-rooted variable paths.
pub(crate) fn scan_variables(text: &str) -> ScannedVariables {
    let mut found = ScannedVariables::default();
    let Some(p) = patterns() else {
        return found;
    };

    for caps in p.tag.captures_iter(text) {
        let (body, is_statement) = match (caps.get(1), caps.get(2)) {
            (Some(expr), _) => (expr.as_str(), false),
            (None, Some(stmt)) => (stmt.as_str(), true),
            (None, None) => continue,
        };
        let body = p.string.replace_all(body, |c: &regex::Captures<'_>| " ".repeat(c[0].len()));

        for m in p.path.captures_iter(&body) {
            let Some(path) = m.get(1) else { continue };
            let rest = &body[path.end()..];
            // `env(...)` would be a call, not a variable
            if rest.trim_start().starts_with('(') {
                continue;
            }
            // Named arguments look like `user="x"`; comparisons use `==`
            let trimmed = rest.trim_start();
            if trimmed.starts_with('=') && !trimmed.starts_with("==") {
                continue;
            }
            found.paths.insert(path.as_str().to_string());
        }

        if is_statement {
            if let Some(target) = p.for_in.captures(&body).and_then(|c| c.get(1)) {
                let target = target.as_str();
                if NAMESPACES.iter().any(|ns| target.split('.').next() == Some(ns)) {
                    found.iterated.insert(target.to_string());
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(text: &str) -> Vec<String> {
        scan_variables(text).paths.into_iter().collect()
    }

    #[test]
    fn test_scans_expressions_and_statements() {
        let text = r#"SELECT * FROM t WHERE id = {{ env.partner_id }}
{% if user.admin %}AND 1=1{% endif %}
{{ state.watermark | default(value="0") }}"#;
        assert_eq!(paths(text), vec!["env.partner_id", "state.watermark", "user.admin"]);
    }

    #[test]
    fn test_ignores_string_literals_and_plain_text() {
        let text = r#"SELECT 'env.not_a_var' AS x, {{ "user.name" }} FROM env.table"#;
        assert!(paths(text).is_empty());
    }

    #[test]
    fn test_ignores_other_roots_and_nested_members() {
        let text = "{{ foo.env.bar }} {{ self.meta.name }} {{ environment }}";
        assert_eq!(paths(text), vec!["environment", "self.meta.name"]);
    }

    #[test]
    fn test_ignores_named_arguments() {
        let text = r#"{{ ref(name="orders") }} {{ configure(key="state", value=env.limit) }}"#;
        assert_eq!(paths(text), vec!["env.limit"]);
    }

    #[test]
    fn test_keeps_comparisons() {
        let text = r#"{% if environment == "prod" %}x{% endif %}"#;
        assert_eq!(paths(text), vec!["environment"]);
    }

    #[test]
    fn test_records_iterated_paths() {
        let found = scan_variables("{% for r in env.regions %}{{ r }}{% endfor %}");
        assert!(found.paths.contains("env.regions"));
        assert!(found.iterated.contains("env.regions"));
    }
}
