//! Content pages.

use crate::{db::DbPool, error::AppError};
use serde::Serialize;

/// URL of the page shown when nothing else matches.
pub const NOT_FOUND_URL: &str = "404";

#[derive(Debug, Clone, Default, sqlx::FromRow, Serialize)]
pub struct PageRecord {
    pub page_id: i64,
    pub url: String,
    pub title: String,
    pub body: String,
    pub keywords: String,
    pub description: String,
    pub menu_context: String,
    pub right_column: bool,
    pub full_width: bool,
}

impl PageRecord {
    /// Normalize a request location to a page URL: `about.html` → `about`,
    /// the site root → `index`.
    pub fn url_from_location(location: &str) -> String {
        let url = location.trim_matches('/');
        let url = url.strip_suffix(".html").unwrap_or(url);
        if url.is_empty() {
            "index".to_string()
        } else {
            url.to_string()
        }
    }

    pub async fn load_by_url(pool: &DbPool, url: &str) -> Result<Option<Self>, AppError> {
        Ok(sqlx::query_as::<_, PageRecord>(
            r#"
            SELECT page_id, url, title, body, keywords, description, menu_context, right_column, full_width
            FROM page WHERE url = $1
            "#,
        )
        .bind(url)
        .fetch_optional(pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_map_to_urls() {
        assert_eq!(PageRecord::url_from_location(""), "index");
        assert_eq!(PageRecord::url_from_location("/about.html"), "about");
        assert_eq!(PageRecord::url_from_location("page"), "page");
    }
}
