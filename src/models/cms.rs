//! Editable content blocks.
//!
//! A CMS block is a named piece of HTML (or an image URL) that admins edit in
//! place. Pages embed blocks with `{CMS:name}`.

use crate::{
    db::DbPool,
    error::AppError,
    view::html::{escape, implode_attributes},
};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static CMS_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{CMS:([A-Za-z0-9_-]+)\}").expect("valid cms tag regex"));

#[derive(Debug, Clone, Default, sqlx::FromRow, Serialize)]
pub struct Cms {
    pub cms_id: i64,
    pub name: String,
    pub content: String,
    pub class: String,
    pub last_modified: i64,
}

/// Block names are used as element IDs.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

impl Cms {
    pub async fn load(pool: &DbPool, name: &str) -> Result<Option<Self>, AppError> {
        Ok(sqlx::query_as::<_, Cms>(
            "SELECT cms_id, name, content, class, last_modified FROM cms WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await?)
    }

    /// Create or replace a block's content.
    pub async fn save(pool: &DbPool, name: &str, content: &str) -> Result<(), AppError> {
        Self::upsert(pool, name, content, None).await
    }

    /// Store an image block: the image URL and its CSS classes.
    pub async fn save_image(pool: &DbPool, name: &str, url: &str, class: &str) -> Result<(), AppError> {
        Self::upsert(pool, name, url, Some(class)).await
    }

    async fn upsert(
        pool: &DbPool,
        name: &str,
        content: &str,
        class: Option<&str>,
    ) -> Result<(), AppError> {
        if !valid_name(name) {
            return Err(AppError::InvalidRequest("Invalid content name".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO cms (name, content, class, last_modified)
            VALUES ($1, $2, COALESCE($3, ''), EXTRACT(EPOCH FROM NOW())::BIGINT)
            ON CONFLICT (name) DO UPDATE SET
                content = EXCLUDED.content,
                class = COALESCE($3, cms.class),
                last_modified = EXCLUDED.last_modified
            "#,
        )
        .bind(name)
        .bind(content)
        .bind(class)
        .execute(pool)
        .await?;

        tracing::info!(name, "CMS block saved");
        Ok(())
    }
}

/// HTML for a block. Admins get the edit and save controls.
pub fn render_editable(name: &str, content: &str, editable: bool) -> String {
    let block = format!(
        "<div {}>{}</div>",
        implode_attributes(&[
            ("id", format!("cms_{}", name)),
            ("class", "cms_content".to_string()),
        ]),
        content
    );
    if !editable {
        return block;
    }

    let name = escape(name);
    format!(
        "<a href=\"#\" id=\"cms_edit_{name}\" class=\"cms_edit button\" \
         onclick=\"lightning.cms.edit('cms_{name}'); return false;\">Edit</a>\
         <a href=\"#\" id=\"cms_save_{name}\" class=\"cms_save button\" style=\"display:none\" \
         onclick=\"lightning.cms.save('cms_{name}'); return false;\">Save</a>{block}"
    )
}

/// Names of the blocks referenced by `{CMS:name}` tags, in order.
pub fn referenced_blocks(body: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in CMS_TAG.captures_iter(body) {
        let name = captures[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Replace `{CMS:name}` tags with rendered blocks.
pub async fn render_blocks(pool: &DbPool, body: &str, editable: bool) -> Result<String, AppError> {
    let mut rendered = body.to_string();
    for name in referenced_blocks(body) {
        let content = Cms::load(pool, &name)
            .await?
            .map(|cms| cms.content)
            .unwrap_or_default();
        rendered = rendered.replace(
            &format!("{{CMS:{}}}", name),
            &render_editable(&name, &content, editable),
        );
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_names() {
        assert!(valid_name("home_intro-2"));
        assert!(!valid_name(""));
        assert!(!valid_name("bad name"));
        assert!(!valid_name("x\"><script>"));
    }

    #[test]
    fn finds_referenced_blocks_once() {
        assert_eq!(
            referenced_blocks("{CMS:intro}<p>{CMS:footer}</p>{CMS:intro}{CMS:bad name}"),
            vec!["intro", "footer"]
        );
    }

    #[test]
    fn editable_blocks_have_controls() {
        let plain = render_editable("intro", "<p>Hi</p>", false);
        assert_eq!(plain, "<div id=\"cms_intro\" class=\"cms_content\"><p>Hi</p></div>");

        let admin = render_editable("intro", "<p>Hi</p>", true);
        assert!(admin.contains("lightning.cms.edit('cms_intro')"));
        assert!(admin.contains("id=\"cms_save_intro\""));
        assert!(admin.ends_with(&plain));
    }
}
