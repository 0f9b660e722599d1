//! Blog posts, categories and authors.

use crate::{
    db::DbPool,
    error::AppError,
    query::{Conditions, Direction, Join, SelectField, SelectQuery},
    view::html::strip_tags,
};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static FIRST_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"']+)["']"#).expect("valid image regex")
});

#[derive(Debug, Clone, Default, sqlx::FromRow, Serialize)]
pub struct BlogPost {
    pub blog_id: i64,
    pub user_id: Option<i64>,
    pub title: String,
    pub url: String,
    pub body: String,
    pub keywords: String,
    pub header_image: Option<String>,
    pub time: i64,
    pub author_name: Option<String>,
    pub author_url: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BlogCategory {
    pub cat_id: i64,
    pub category: String,
    pub cat_url: String,
}

impl BlogPost {
    pub fn link(&self) -> String {
        format!("/{}.htm", self.url)
    }

    /// Plain text preview of at most `length` characters, cut on a word
    /// boundary. `ellipsis` appends `...` when the body was shortened.
    pub fn short_body(&self, length: usize, ellipsis: bool) -> String {
        let text = strip_tags(&self.body);
        let text = text.trim();
        if text.chars().count() <= length {
            return text.to_string();
        }

        let cut: String = text.chars().take(length).collect();
        let cut = match cut.rfind(char::is_whitespace) {
            Some(index) if index > 0 => cut[..index].trim_end().to_string(),
            _ => cut,
        };
        if ellipsis { format!("{}...", cut) } else { cut }
    }

    /// The post's header image, or the first image in its body.
    pub fn header_image(&self) -> Option<String> {
        self.header_image
            .clone()
            .filter(|image| !image.is_empty())
            .or_else(|| {
                FIRST_IMAGE
                    .captures(&self.body)
                    .map(|captures| captures[1].to_string())
            })
    }
}

/// Which posts a blog roll shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Category(i64),
    Author(i64),
}

/// What a blog URL asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlogRoute {
    ById(i64),
    Post(String),
    Category { category: String, page: i64 },
    Author(String),
    List { page: i64 },
}

fn strip_htm(segment: &str) -> &str {
    segment.strip_suffix(".htm").unwrap_or(segment)
}

/// Interpret a request location such as `blog/category/news-2` or
/// `my-post.htm`. An explicit `id` parameter wins.
pub fn parse_route(location: &str, id: Option<i64>) -> BlogRoute {
    if let Some(id) = id.filter(|id| *id > 0) {
        return BlogRoute::ById(id);
    }

    let path: Vec<&str> = location.trim_matches('/').split('/').collect();
    let first = path.first().copied().unwrap_or_default();
    if first.is_empty() && path.len() <= 2 {
        return BlogRoute::List { page: 1 };
    }

    let page = path
        .last()
        .and_then(|segment| segment.parse::<i64>().ok())
        .filter(|page| *page > 0)
        .unwrap_or(1);

    if first.ends_with(".htm") {
        return BlogRoute::Post(strip_htm(first).to_string());
    }

    if path.len() == 3 && path[1] == "category" {
        let category = strip_htm(path[2]);
        // A trailing `-<n>` is the page number.
        return match category.rsplit_once('-') {
            Some((name, number)) if number.parse::<i64>().is_ok() => BlogRoute::Category {
                category: name.to_string(),
                page: number.parse::<i64>().unwrap_or(1).max(1),
            },
            _ => BlogRoute::Category {
                category: category.to_string(),
                page: 1,
            },
        };
    }

    if path.len() == 3 && path[1] == "author" {
        return BlogRoute::Author(strip_htm(path[2]).to_string());
    }

    BlogRoute::List { page }
}

fn posts_query() -> SelectQuery {
    let mut query =
        SelectQuery::from_table("blog").join(Join::left_using("blog_author", "user_id"));
    query.add_select(None, SelectField::Column("blog.*".into()));
    query.add_select(None, SelectField::Column("blog_author.author_name".into()));
    query.add_select(None, SelectField::Column("blog_author.author_url".into()));
    query
}

fn filtered(mut query: SelectQuery, filter: ListFilter) -> SelectQuery {
    match filter {
        ListFilter::All => query,
        ListFilter::Category(cat_id) => {
            query = query.join(Join::inner(
                "blog_blog_category",
                Conditions::and().equals_column("blog_blog_category.blog_id", "blog.blog_id"),
            ));
            query.filter(Conditions::and().equals("blog_blog_category.cat_id", cat_id))
        }
        ListFilter::Author(user_id) => {
            query.filter(Conditions::and().equals("blog.user_id", user_id))
        }
    }
}

pub async fn load_content_by_id(pool: &DbPool, blog_id: i64) -> Result<Option<BlogPost>, AppError> {
    let posts = posts_query()
        .filter(Conditions::and().equals("blog.blog_id", blog_id))
        .fetch_all_as::<BlogPost>(pool)
        .await?;
    Ok(posts.into_iter().next())
}

pub async fn load_content_by_url(pool: &DbPool, url: &str) -> Result<Option<BlogPost>, AppError> {
    let posts = posts_query()
        .filter(Conditions::and().equals("blog.url", url))
        .fetch_all_as::<BlogPost>(pool)
        .await?;
    Ok(posts.into_iter().next())
}

/// One page of posts, newest first, and the total number of matching posts.
pub async fn load_list(
    pool: &DbPool,
    filter: ListFilter,
    page: i64,
    per_page: i64,
) -> Result<(Vec<BlogPost>, i64), AppError> {
    let per_page = per_page.max(1);
    let posts = filtered(posts_query(), filter)
        .order_by("blog.time", Direction::Desc)
        .limit(per_page, (page.max(1) - 1) * per_page)
        .fetch_all_as::<BlogPost>(pool)
        .await?;

    let mut count = filtered(SelectQuery::from_table("blog"), filter);
    count.add_select(Some("count"), SelectField::Expression("COUNT(*)".into()));
    let total = count.fetch_scalar_i64(pool).await?;

    Ok((posts, total))
}

pub async fn get_category(pool: &DbPool, cat_url: &str) -> Result<Option<BlogCategory>, AppError> {
    Ok(sqlx::query_as::<_, BlogCategory>(
        "SELECT cat_id, category, cat_url FROM blog_category WHERE cat_url = $1",
    )
    .bind(cat_url)
    .fetch_optional(pool)
    .await?)
}

pub async fn get_author_id(pool: &DbPool, author_url: &str) -> Result<Option<i64>, AppError> {
    Ok(sqlx::query_scalar::<_, i64>("SELECT user_id FROM blog_author WHERE author_url = $1")
        .bind(author_url)
        .fetch_optional(pool)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(body: &str) -> BlogPost {
        BlogPost {
            blog_id: 1,
            title: "Post".into(),
            url: "post".into(),
            body: body.into(),
            ..BlogPost::default()
        }
    }

    #[test]
    fn routes_from_locations() {
        assert_eq!(parse_route("blog", None), BlogRoute::List { page: 1 });
        assert_eq!(parse_route("blog/page/3", None), BlogRoute::List { page: 3 });
        assert_eq!(
            parse_route("my-first-post.htm", None),
            BlogRoute::Post("my-first-post".into())
        );
        assert_eq!(
            parse_route("blog/category/rust-tips-2", None),
            BlogRoute::Category {
                category: "rust-tips".into(),
                page: 2
            }
        );
        assert_eq!(
            parse_route("blog/category/news.htm", None),
            BlogRoute::Category {
                category: "news".into(),
                page: 1
            }
        );
        assert_eq!(parse_route("blog/author/ada", None), BlogRoute::Author("ada".into()));
        assert_eq!(parse_route("blog/anything", Some(9)), BlogRoute::ById(9));
    }

    #[test]
    fn short_body_cuts_on_words() {
        let post = post("<p>The quick brown fox jumps</p>");
        assert_eq!(post.short_body(100, true), "The quick brown fox jumps");
        assert_eq!(post.short_body(12, true), "The quick...");
        assert_eq!(post.short_body(12, false), "The quick");
    }

    #[test]
    fn header_image_falls_back_to_body() {
        let mut post = post("<p>x</p><img class=\"a\" src='/images/a.png'><img src=\"/b.png\">");
        assert_eq!(post.header_image().as_deref(), Some("/images/a.png"));
        post.header_image = Some("/header.jpg".into());
        assert_eq!(post.header_image().as_deref(), Some("/header.jpg"));
        assert_eq!(BlogPost::default().header_image(), None);
    }

    #[test]
    fn category_lists_join_the_link_table() {
        let (sql, _) = filtered(posts_query(), ListFilter::Category(4))
            .order_by("blog.time", Direction::Desc)
            .limit(10, 10)
            .render();
        assert!(sql.contains("LEFT JOIN \"blog_author\" USING (\"user_id\")"));
        assert!(sql.contains("JOIN \"blog_blog_category\" ON"));
        assert!(sql.ends_with("ORDER BY \"blog\".\"time\" DESC LIMIT 10 OFFSET 10"));
    }
}
