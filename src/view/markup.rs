//! `{VARIABLE}` substitution used by email templates and page layouts.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable values keyed by name.
pub type Variables = HashMap<String, String>;

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid variable regex"));

/// Replace every `{NAME}` whose name is present in `variables`.
///
/// Unknown placeholders are left in place.
pub fn render(source: &str, variables: &Variables) -> String {
    VARIABLE
        .replace_all(source, |captures: &regex::Captures<'_>| {
            variables
                .get(&captures[1])
                .cloned()
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_variables() {
        let mut vars = Variables::new();
        vars.insert("FIRST_NAME".into(), "Ada".into());
        vars.insert("EMAIL".into(), "ada@example.com".into());

        assert_eq!(
            render("Hi {FIRST_NAME} <{EMAIL}> {UNKNOWN}", &vars),
            "Hi Ada <ada@example.com> {UNKNOWN}"
        );
    }

    #[test]
    fn values_are_not_rescanned() {
        let mut vars = Variables::new();
        vars.insert("A".into(), "{B}".into());
        vars.insert("B".into(), "b".into());
        assert_eq!(render("{A}", &vars), "{B}");
    }
}
