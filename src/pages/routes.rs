//! Mapping request locations to pages.
//!
//! `routes.static` maps exact locations, `routes.dynamic` maps regular
//! expressions (tried in file order) when no static route matches.

use super::PageKind;
use crate::config::Configuration;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PageRoutes {
    static_routes: HashMap<String, PageKind>,
    dynamic_routes: Vec<(Regex, PageKind)>,
}

impl PageRoutes {
    /// Build the route table. Unknown page names and invalid patterns are
    /// logged and skipped.
    pub fn from_config(config: &Configuration) -> Self {
        let mut routes = Self::default();

        if let Some(Value::Object(map)) = config.get("routes.static") {
            for (location, name) in map {
                match name.as_str().and_then(PageKind::from_name) {
                    Some(kind) => {
                        routes.static_routes.insert(location.clone(), kind);
                    }
                    None => tracing::warn!(location = %location, page = %name, "Unknown page in static route"),
                }
            }
        }

        if let Some(Value::Object(map)) = config.get("routes.dynamic") {
            for (pattern, name) in map {
                let Some(kind) = name.as_str().and_then(PageKind::from_name) else {
                    tracing::warn!(pattern = %pattern, page = %name, "Unknown page in dynamic route");
                    continue;
                };
                match Regex::new(pattern) {
                    Ok(regex) => routes.dynamic_routes.push((regex, kind)),
                    Err(e) => tracing::warn!(pattern = %pattern, error = %e, "Invalid route pattern"),
                }
            }
        }

        routes
    }

    /// Find the page for a location (no leading slash).
    pub fn resolve(&self, location: &str) -> Option<PageKind> {
        if let Some(kind) = self.static_routes.get(location) {
            return Some(*kind);
        }
        self.dynamic_routes
            .iter()
            .find(|(regex, _)| regex.is_match(location))
            .map(|(_, kind)| *kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::AdminTable;

    fn routes() -> PageRoutes {
        let config = Configuration::from_value(serde_json::json!({
            "routes": {
                "static": {
                    "": "page",
                    "contact": "contact",
                    "admin/roles": "admin_roles",
                    "broken": "no_such_page"
                },
                "dynamic": {
                    ".*\\.html$": "page",
                    "^blog(/.*)?$": "blog",
                    ".*\\.htm$": "blog",
                    "([": "page"
                }
            }
        }));
        PageRoutes::from_config(&config)
    }

    #[test]
    fn static_routes_match_exactly() {
        let routes = routes();
        assert_eq!(routes.resolve(""), Some(PageKind::Content));
        assert_eq!(routes.resolve("contact"), Some(PageKind::Contact));
        assert_eq!(
            routes.resolve("admin/roles"),
            Some(PageKind::AdminTable(AdminTable::Roles))
        );
        assert_eq!(routes.resolve("broken"), None);
    }

    #[test]
    fn dynamic_routes_follow_file_order() {
        let routes = routes();
        assert_eq!(routes.resolve("about.html"), Some(PageKind::Content));
        assert_eq!(routes.resolve("blog/category/news"), Some(PageKind::Blog));
        assert_eq!(routes.resolve("my-post.htm"), Some(PageKind::Blog));
        assert_eq!(routes.resolve("nothing/here"), None);
    }
}
