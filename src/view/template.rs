//! The site layout.
//!
//! Pages produce an inner content fragment; [`Template`] wraps it with the
//! document head (meta data, styles, scripts), status messages and the layout
//! flags a page controls.

use super::html::escape;
use super::markup::{self, Variables};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{TITLE}</title>
{META}<link rel="stylesheet" href="/css/lightning.css">
<link rel="stylesheet" href="/css/font-awesome.min.css">
<link rel="stylesheet" href="/css/site.css">
</head>
<body class="{BODY_CLASS}">
{HEADER}{MENU}<main>
{MESSAGES}{CONTENT}{RIGHT_COLUMN}</main>
{FOOTER}<script>var lightning_vars = {JS_VARS};</script>
<script src="/js/lightning.min.js"></script>
<script>lightning.startup.init();</script>
</body>
</html>
"#;

/// Everything the layout needs to render a page.
#[derive(Debug, Clone)]
pub struct Template {
    pub site_name: String,
    /// Inner HTML produced by the page.
    pub content: String,
    pub meta: BTreeMap<String, String>,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
    /// Values exposed to the browser scripts as `lightning_vars`.
    pub js_vars: Map<String, Value>,
    pub full_width: bool,
    pub right_column: bool,
    pub hide_header: bool,
    pub hide_menu: bool,
    pub hide_footer: bool,
    pub share: bool,
    /// Social buttons shown in the share box.
    pub share_links: String,
    pub menu_context: String,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            site_name: String::new(),
            content: String::new(),
            meta: BTreeMap::new(),
            messages: Vec::new(),
            errors: Vec::new(),
            js_vars: Map::new(),
            full_width: false,
            right_column: true,
            hide_header: false,
            hide_menu: false,
            hide_footer: false,
            share: true,
            share_links: String::new(),
            menu_context: String::new(),
        }
    }
}

impl Template {
    pub fn set_js(&mut self, key: &str, value: impl Into<Value>) {
        self.js_vars.insert(key.to_string(), value.into());
    }

    pub fn render(&self) -> String {
        let mut vars = Variables::new();

        let title = self
            .meta
            .get("title")
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.site_name);
        vars.insert("TITLE".into(), escape(title));
        vars.insert("META".into(), self.meta_tags());
        vars.insert(
            "BODY_CLASS".into(),
            escape(&format!("menu-{}", self.menu_context)),
        );

        vars.insert(
            "HEADER".into(),
            if self.hide_header {
                String::new()
            } else {
                format!(
                    "<header><a href=\"/\" class=\"site-name\">{}</a></header>\n",
                    escape(&self.site_name)
                )
            },
        );
        vars.insert(
            "MENU".into(),
            if self.hide_menu {
                String::new()
            } else {
                "<nav id=\"menu\"></nav>\n".to_string()
            },
        );
        vars.insert(
            "FOOTER".into(),
            if self.hide_footer {
                String::new()
            } else {
                format!("<footer>&copy; {}</footer>\n", escape(&self.site_name))
            },
        );

        vars.insert("MESSAGES".into(), self.message_blocks());
        vars.insert(
            "CONTENT".into(),
            if self.full_width {
                self.content.clone()
            } else {
                format!("<div class=\"column\">{}</div>\n", self.content)
            },
        );
        vars.insert(
            "RIGHT_COLUMN".into(),
            if self.right_column {
                let share = if self.share {
                    format!("<div class=\"share\">{}</div>", self.share_links)
                } else {
                    String::new()
                };
                format!("<aside class=\"right-column\">{}</aside>\n", share)
            } else {
                String::new()
            },
        );

        let mut js_vars = self.js_vars.clone();
        js_vars.insert("menu_context".into(), Value::from(self.menu_context.clone()));
        let js = serde_json::to_string(&js_vars)
            .unwrap_or_else(|_| "{}".to_string())
            .replace("</", "<\\/");
        vars.insert("JS_VARS".into(), js);

        markup::render(LAYOUT, &vars)
    }

    fn meta_tags(&self) -> String {
        let mut tags = String::new();
        for (field, value) in &self.meta {
            if value.is_empty() || field == "title" {
                continue;
            }
            let tag = match field.as_str() {
                "image" => format!("<meta property=\"og:image\" content=\"{}\">\n", escape(value)),
                "twitter_site" => format!("<meta name=\"twitter:site\" content=\"{}\">\n", escape(value)),
                "twitter_creator" => {
                    format!("<meta name=\"twitter:creator\" content=\"{}\">\n", escape(value))
                }
                other => format!(
                    "<meta name=\"{}\" content=\"{}\">\n",
                    escape(other),
                    escape(value)
                ),
            };
            tags.push_str(&tag);
        }
        if let Some(title) = self.meta.get("title").filter(|t| !t.is_empty()) {
            tags.push_str(&format!(
                "<meta property=\"og:title\" content=\"{}\">\n",
                escape(title)
            ));
        }
        tags
    }

    fn message_blocks(&self) -> String {
        let mut html = String::new();
        for error in &self.errors {
            html.push_str(&format!("<div class=\"messenger error\">{}</div>\n", escape(error)));
        }
        for message in &self.messages {
            html.push_str(&format!(
                "<div class=\"messenger message\">{}</div>\n",
                escape(message)
            ));
        }
        html
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Template {
        Template {
            site_name: "Lightning".into(),
            content: "<p>Hello</p>".into(),
            ..Template::default()
        }
    }

    #[test]
    fn title_falls_back_to_site_name() {
        let html = template().render();
        assert!(html.contains("<title>Lightning</title>"));
        assert!(html.contains("<div class=\"column\"><p>Hello</p></div>"));
    }

    #[test]
    fn renders_meta_and_messages() {
        let mut page = template();
        page.meta.insert("title".into(), "Post | Lightning".into());
        page.meta.insert("description".into(), "About \"things\"".into());
        page.meta.insert("keywords".into(), String::new());
        page.errors.push("Bad <input>".into());
        page.messages.push("Saved".into());

        let html = page.render();
        assert!(html.contains("<title>Post | Lightning</title>"));
        assert!(html.contains("<meta name=\"description\" content=\"About &quot;things&quot;\">"));
        assert!(!html.contains("name=\"keywords\""));
        assert!(html.contains("<div class=\"messenger error\">Bad &lt;input&gt;</div>"));
        assert!(html.contains("<div class=\"messenger message\">Saved</div>"));
    }

    #[test]
    fn layout_flags_hide_sections() {
        let mut page = template();
        page.full_width = true;
        page.right_column = false;
        page.hide_header = true;
        page.hide_footer = true;

        let html = page.render();
        assert!(!html.contains("<header>"));
        assert!(!html.contains("<footer>"));
        assert!(!html.contains("right-column"));
        assert!(!html.contains("class=\"column\""));
    }

    #[test]
    fn js_vars_cannot_close_the_script() {
        let mut page = template();
        page.set_js("token", "</script><script>alert(1)");
        let html = page.render();
        assert!(html.contains("<\\/script>"));
        assert!(html.contains("\"menu_context\":\"\""));
    }
}
