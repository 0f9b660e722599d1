//! Application configuration management.
//!
//! Two layers live here:
//! - `Settings`: process bootstrap values read from environment variables with `envy`.
//! - `Configuration`: the site configuration tree (routes, mailer, contact form, social keys...)
//!   loaded from JSON files and addressed with dotted paths such as `mailer.default_name`.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Built-in configuration shipped with the binary. Site files override it.
const DEFAULT_CONFIGURATION: &str = include_str!("../config/default.json");

/// Bootstrap settings loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `CONFIG_PATH` (optional): site configuration file, defaults to `config/config.json`
/// - `HOME_PATH` (optional): site root used for static assets and file browser storage
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    #[serde(default = "default_home_path")]
    pub home_path: PathBuf,
}

fn default_port() -> u16 {
    3000
}

fn default_config_path() -> PathBuf {
    PathBuf::from("config/config.json")
}

fn default_home_path() -> PathBuf {
    PathBuf::from(".")
}

impl Settings {
    /// Load bootstrap settings from environment variables.
    ///
    /// A `.env` file is read first if present.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        envy::from_env::<Settings>()
    }
}

/// Errors raised while reading configuration files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("configuration root in {0} must be an object")]
    NotAnObject(String),
}

/// The site configuration tree.
///
/// Values are looked up with dotted paths. When several sources are loaded the
/// first one wins for any given leaf, and nested objects are merged key by key.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    root: Value,
}

impl Configuration {
    /// Load the site file and overlay it on the built-in defaults.
    ///
    /// A missing site file is not fatal: the defaults alone are used and a
    /// warning is logged.
    pub fn load(settings: &Settings) -> Result<Self, ConfigError> {
        let mut configuration = Self::from_value(Value::Object(Map::new()));

        match read_configuration_file(&settings.config_path) {
            Ok(site) => configuration.root = site,
            Err(ConfigError::Io { path, source }) => {
                tracing::warn!(path = %path.display(), error = %source, "Site configuration not found");
            }
            Err(e) => return Err(e),
        }

        let defaults = parse_configuration("default.json", DEFAULT_CONFIGURATION)?;
        configuration.root = replace_recursive(defaults, configuration.root);

        Ok(configuration)
    }

    /// Build a configuration from an existing tree.
    pub fn from_value(root: Value) -> Self {
        let root = match root {
            Value::Object(_) => root,
            _ => Value::Object(Map::new()),
        };
        Self { root }
    }

    /// Get the value at a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Get the value at a path, or `default` when the path is missing or null.
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        match self.get(path) {
            Some(Value::Null) | None => default,
            Some(value) => value.clone(),
        }
    }

    /// Get a non-empty string value.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Get a value as a loosely typed boolean (`true`, non-zero, non-empty string).
    pub fn get_bool(&self, path: &str) -> bool {
        self.get(path).is_some_and(truthy)
    }

    /// Get an integer, accepting numeric strings.
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        match self.get(path)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Set a value at a dotted path, creating intermediate objects.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut node = &mut self.root;
        for segment in parents {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            // is_object checked just above
            let Value::Object(map) = node else { return };
            node = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            map.insert(last.to_string(), value);
        }
    }

    /// Merge new data into the configuration. New values win.
    pub fn merge(&mut self, new_data: Value) {
        let current = std::mem::take(&mut self.root);
        self.root = replace_recursive(current, new_data);
    }

    /// Replace the entire configuration.
    pub fn override_all(&mut self, new_configuration: Value) {
        *self = Self::from_value(new_configuration);
    }
}

fn read_configuration_file(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_configuration(&path.display().to_string(), &raw)
}

fn parse_configuration(name: &str, raw: &str) -> Result<Value, ConfigError> {
    let value: Value = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
        path: name.to_string(),
        source,
    })?;
    if !value.is_object() {
        return Err(ConfigError::NotAnObject(name.to_string()));
    }
    Ok(value)
}

/// Recursively replace values in `base` with values from `overlay`.
///
/// Objects merge key by key and arrays merge index by index; anything else in
/// `overlay` replaces what is in `base`.
pub fn replace_recursive(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                // Merge in place so overridden keys keep their position.
                match base.get_mut(&key) {
                    Some(existing) => {
                        *existing = replace_recursive(std::mem::take(existing), value);
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Object(base)
        }
        (Value::Array(mut base), Value::Array(overlay)) => {
            for (i, value) in overlay.into_iter().enumerate() {
                if i < base.len() {
                    let existing = std::mem::take(&mut base[i]);
                    base[i] = replace_recursive(existing, value);
                } else {
                    base.push(value);
                }
            }
            Value::Array(base)
        }
        (_, overlay) => overlay,
    }
}

/// Loose truthiness for configuration and request values.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_paths_reach_nested_values() {
        let config = Configuration::from_value(json!({
            "mailer": { "default_name": "reader" },
            "contact": { "to": ["a@example.com", "b@example.com"] }
        }));

        assert_eq!(config.get_str("mailer.default_name"), Some("reader"));
        assert_eq!(
            config.get("contact.to.1"),
            Some(&json!("b@example.com"))
        );
        assert!(config.get("mailer.missing").is_none());
        assert_eq!(config.get_or("mailer.missing", json!(5)), json!(5));
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut config = Configuration::default();
        config.set("social.google.client_id", json!("abc"));
        config.set("site.name", json!("Lightning"));

        assert_eq!(config.get_str("social.google.client_id"), Some("abc"));
        assert_eq!(config.get_str("site.name"), Some("Lightning"));
    }

    #[test]
    fn set_replaces_scalar_parent() {
        let mut config = Configuration::from_value(json!({ "debug": true }));
        config.set("debug.level", json!(3));
        assert_eq!(config.get_i64("debug.level"), Some(3));
    }

    #[test]
    fn merge_keeps_unrelated_keys_and_replaces_leaves() {
        let mut config = Configuration::from_value(json!({
            "site": { "name": "Old", "domain": "old.example" },
            "routes": { "static": { "contact": "contact" } }
        }));
        config.merge(json!({
            "site": { "name": "New" },
            "routes": { "static": { "blog": "blog" } }
        }));

        assert_eq!(config.get_str("site.name"), Some("New"));
        assert_eq!(config.get_str("site.domain"), Some("old.example"));
        assert_eq!(config.get_str("routes.static.contact"), Some("contact"));
        assert_eq!(config.get_str("routes.static.blog"), Some("blog"));
    }

    #[test]
    fn arrays_merge_by_index() {
        let merged = replace_recursive(json!([1, 2, 3]), json!([9]));
        assert_eq!(merged, json!([9, 2, 3]));
    }

    #[test]
    fn override_all_discards_previous_tree() {
        let mut config = Configuration::from_value(json!({ "a": 1 }));
        config.override_all(json!({ "b": 2 }));
        assert!(config.get("a").is_none());
        assert_eq!(config.get_i64("b"), Some(2));
    }

    #[test]
    fn site_file_wins_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "site": { "name": "Site From File" } }"#).unwrap();

        let settings = Settings {
            database_url: "postgres://localhost/test".to_string(),
            server_port: 3000,
            config_path: path,
            home_path: dir.path().to_path_buf(),
        };
        let config = Configuration::load(&settings).unwrap();

        assert_eq!(config.get_str("site.name"), Some("Site From File"));
        // Comes from the built-in defaults.
        assert_eq!(config.get_str("routes.static.contact"), Some("contact"));
    }

    #[test]
    fn truthiness_follows_loose_rules() {
        assert!(truthy(&json!("contact_only")));
        assert!(!truthy(&json!("0")));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!([1])));
        assert!(!truthy(&Value::Null));
    }

    #[test]
    fn overriding_a_route_keeps_file_order() {
        let base = json!({ "routes": { "dynamic": {
            ".*\\.html$": "page",
            "^blog(/.*)?$": "blog",
            ".*\\.htm$": "page"
        }}});
        let site = json!({ "routes": { "dynamic": { ".*\\.html$": "contact" } } });

        let merged = replace_recursive(base, site);
        let dynamic = merged["routes"]["dynamic"].as_object().unwrap();
        let keys: Vec<&str> = dynamic.keys().map(String::as_str).collect();
        assert_eq!(keys, vec![".*\\.html$", "^blog(/.*)?$", ".*\\.htm$"]);
        assert_eq!(dynamic[".*\\.html$"], json!("contact"));
    }
}
