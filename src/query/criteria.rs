//! Placeholder substitution for stored criteria fragments.
//!
//! Criteria rows hold JSON query fragments containing `{VAR}` placeholders. The
//! values come from the per-message `field_values` JSON plus the built-in
//! `TODAY` (day number since the Unix epoch) and `NOW` (Unix timestamp).

use super::plain_integer;
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

/// Resolved form of a criteria variable.
#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    Number(Number),
    Scalar(String),
    List(Vec<Value>),
}

fn resolve(value: &Value) -> Resolved {
    match value {
        Value::Array(items) => Resolved::List(items.clone()),
        Value::Number(n) => Resolved::Number(n.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => Resolved::List(items),
            Ok(Value::Number(n)) => Resolved::Number(n),
            Ok(Value::String(inner)) => Resolved::Scalar(inner),
            _ => Resolved::Scalar(s.clone()),
        },
        Value::Null => Resolved::Scalar(String::new()),
        Value::Bool(true) => Resolved::Scalar("1".to_string()),
        Value::Bool(false) => Resolved::Scalar(String::new()),
        Value::Object(_) => Resolved::Scalar(value.to_string()),
    }
}

/// An item of a comma-separated IN list.
fn list_item(part: &str) -> Value {
    match plain_integer(part) {
        Some(i) => Value::from(i),
        None => Value::String(part.to_string()),
    }
}

fn placeholder_name(item: &Value) -> Option<&str> {
    item.as_str()?
        .trim()
        .strip_prefix('{')?
        .strip_suffix('}')
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "0",
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Bool(b) => !b,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Day number since the Unix epoch.
pub fn today(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(86_400)
}

/// Build the variable map for a criteria row.
///
/// `field_values` is the JSON object stored on the message/criteria link. A
/// missing or malformed value yields only the built-in variables.
pub fn criteria_variables(field_values: Option<&str>, now: DateTime<Utc>) -> Map<String, Value> {
    let mut variables = field_values
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    if variables.get("TODAY").is_none_or(is_empty_value) {
        variables.insert("TODAY".to_string(), Value::from(today(now)));
    }
    if variables.get("NOW").is_none_or(is_empty_value) {
        variables.insert("NOW".to_string(), Value::from(now.timestamp()));
    }
    variables
}

/// Replace placeholders throughout a fragment.
///
/// - A string leaf that is exactly `{VAR}` for a numeric variable becomes a
///   JSON number, so it binds as one.
/// - In string leaves, list variables replace `{{VAR}}` with `"a", "b"` and
///   scalar variables replace `{VAR}` with their text.
/// - In an array, an element that is exactly `{VAR}` and follows `"IN"` or
///   `"NOT IN"` becomes a JSON list: the variable's list, or its text split
///   on commas with each item trimmed.
pub fn replace_criteria_variables(segment: &mut Value, variables: &Map<String, Value>) {
    let resolved: Vec<(&str, Resolved)> = variables
        .iter()
        .map(|(name, value)| (name.as_str(), resolve(value)))
        .collect();
    walk(segment, &resolved);
}

fn walk(node: &mut Value, variables: &[(&str, Resolved)]) {
    match node {
        Value::Array(items) => {
            let mut next_is_list = false;
            for item in items.iter_mut() {
                if next_is_list {
                    next_is_list = false;
                    if let Some(list) = list_for_placeholder(item, variables) {
                        *item = list;
                        continue;
                    }
                }
                if let Value::String(s) = item {
                    let upper = s.trim().to_ascii_uppercase();
                    if upper == "IN" || upper == "NOT IN" {
                        next_is_list = true;
                        continue;
                    }
                }
                walk(item, variables);
            }
        }
        Value::Object(map) => {
            for value in map.values_mut() {
                walk(value, variables);
            }
        }
        Value::String(_) => {
            if let Some(n) = number_for_placeholder(node, variables) {
                *node = Value::Number(n);
            } else if let Value::String(s) = node {
                *s = substitute(s, variables);
            }
        }
        _ => {}
    }
}

fn number_for_placeholder(item: &Value, variables: &[(&str, Resolved)]) -> Option<Number> {
    let name = placeholder_name(item)?;
    variables.iter().find_map(|(var, resolved)| match resolved {
        Resolved::Number(n) if *var == name => Some(n.clone()),
        _ => None,
    })
}

fn list_for_placeholder(item: &Value, variables: &[(&str, Resolved)]) -> Option<Value> {
    let name = placeholder_name(item)?;
    let (_, resolved) = variables.iter().find(|(var, _)| *var == name)?;

    Some(match resolved {
        Resolved::List(items) => Value::Array(items.clone()),
        Resolved::Number(n) => Value::Array(vec![Value::Number(n.clone())]),
        Resolved::Scalar(text) => {
            Value::Array(text.split(',').map(|part| list_item(part.trim())).collect())
        }
    })
}

fn substitute(source: &str, variables: &[(&str, Resolved)]) -> String {
    let mut output = source.to_string();
    for (name, resolved) in variables {
        match resolved {
            Resolved::List(items) => {
                let joined = items
                    .iter()
                    .map(|item| format!("\"{}\"", scalar_text(item)))
                    .collect::<Vec<_>>()
                    .join(", ");
                output = output.replace(&format!("{{{{{}}}}}", name), &joined);
            }
            Resolved::Number(n) => {
                output = output.replace(&format!("{{{}}}", name), &n.to_string());
            }
            Resolved::Scalar(text) => {
                output = output.replace(&format!("{{{}}}", name), text);
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn builtins_fill_missing_or_empty_values() {
        let vars = criteria_variables(Some(r#"{"TODAY": "", "STATE": "CA"}"#), fixed_now());
        assert_eq!(vars["TODAY"], json!(19724));
        assert_eq!(vars["NOW"], json!(fixed_now().timestamp()));
        assert_eq!(vars["STATE"], json!("CA"));
    }

    #[test]
    fn explicit_builtins_are_kept() {
        let vars = criteria_variables(Some(r#"{"TODAY": 100}"#), fixed_now());
        assert_eq!(vars["TODAY"], json!(100));
    }

    #[test]
    fn malformed_field_values_are_ignored() {
        let vars = criteria_variables(Some("not json"), fixed_now());
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn replaces_scalars_inside_strings() {
        let vars = criteria_variables(Some(r#"{"DAYS": 30}"#), fixed_now());
        let mut fragment = json!({
            "users.created": [">", "{TODAY}"],
            "0": "users.last_login > {NOW} - {DAYS} * 86400"
        });
        replace_criteria_variables(&mut fragment, &vars);

        assert_eq!(fragment["users.created"], json!([">", 19724]));
        assert_eq!(
            fragment["0"],
            json!(format!("users.last_login > {} - 30 * 86400", fixed_now().timestamp()))
        );
    }

    #[test]
    fn in_placeholders_become_lists() {
        let vars = criteria_variables(
            Some(r#"{"STATES": "CA, NY ,TX", "IDS": "[1,2,3]"}"#),
            fixed_now(),
        );
        let mut fragment = json!({
            "users.state": ["IN", "{STATES}"],
            "users.user_id": ["NOT IN", "{IDS}"]
        });
        replace_criteria_variables(&mut fragment, &vars);

        assert_eq!(fragment["users.state"], json!(["IN", ["CA", "NY", "TX"]]));
        assert_eq!(fragment["users.user_id"], json!(["NOT IN", [1, 2, 3]]));
    }

    #[test]
    fn numeric_variables_stay_numbers_only_as_whole_values() {
        let vars = criteria_variables(Some(r#"{"MIN": "30", "ZIP": "02134", "IDS": "4, 5, x"}"#), fixed_now());
        let mut fragment = json!({
            "orders.total": [">=", "{MIN}"],
            "users.zip": "{ZIP}",
            "users.user_id": ["IN", "{IDS}"],
            "users.note": "over {MIN}"
        });
        replace_criteria_variables(&mut fragment, &vars);

        assert_eq!(fragment["orders.total"], json!([">=", 30]));
        assert_eq!(fragment["users.zip"], json!("02134"));
        assert_eq!(fragment["users.user_id"], json!(["IN", [4, 5, "x"]]));
        assert_eq!(fragment["users.note"], json!("over 30"));
    }

    #[test]
    fn json_encoded_scalars_are_decoded() {
        let vars = criteria_variables(Some(r#"{"STATE": "\"CA\""}"#), fixed_now());
        let mut fragment = json!({ "users.state": "{STATE}", "0": "state = '{STATE}'" });
        replace_criteria_variables(&mut fragment, &vars);

        assert_eq!(fragment["users.state"], json!("CA"));
        assert_eq!(fragment["0"], json!("state = 'CA'"));
    }

    #[test]
    fn list_variables_expand_double_braces() {
        let mut vars = Map::new();
        vars.insert("TAGS".into(), json!(["a", "b"]));
        let mut fragment = json!({ "0": "tag IN ({{TAGS}})" });
        replace_criteria_variables(&mut fragment, &vars);
        assert_eq!(fragment["0"], json!("tag IN (\"a\", \"b\")"));
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let vars = criteria_variables(None, fixed_now());
        let mut fragment = json!({ "users.state": ["IN", "{MISSING}"], "a": "{MISSING}" });
        replace_criteria_variables(&mut fragment, &vars);
        assert_eq!(fragment["users.state"], json!(["IN", "{MISSING}"]));
        assert_eq!(fragment["a"], json!("{MISSING}"));
    }

    #[test]
    fn today_counts_whole_days() {
        let midnight = Utc.with_ymd_and_hms(1970, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(today(midnight), 1);
    }
}
