//! The blog: single posts, the blog roll, categories and authors.

use super::context::{Output, PageContext};
use crate::{
    error::AppError,
    models::blog::{self, BlogPost, BlogRoute, ListFilter},
    view::html::escape,
};

const DEFAULT_PER_PAGE: i64 = 10;
const PREVIEW_LENGTH: usize = 250;

pub async fn handle(ctx: &mut PageContext, method: &str) -> Result<Output, AppError> {
    match method {
        "get" => get(ctx).await,
        _ => Err(AppError::MethodNotAvailable),
    }
}

async fn get(ctx: &mut PageContext) -> Result<Output, AppError> {
    let id = ctx
        .query
        .get_int("id")
        .or_else(|| ctx.query.get_int("blog_id"));
    let route = blog::parse_route(&ctx.location, id);
    let per_page = ctx
        .state
        .config
        .get_i64("modules.blog.per_page")
        .unwrap_or(DEFAULT_PER_PAGE);
    let pool = ctx.state.pool.clone();

    match route {
        BlogRoute::ById(blog_id) => {
            let post = blog::load_content_by_id(&pool, blog_id)
                .await?
                .ok_or(AppError::NotFound)?;
            show_post(ctx, &post);
        }
        BlogRoute::Post(url) => {
            let post = blog::load_content_by_url(&pool, &url)
                .await?
                .ok_or(AppError::NotFound)?;
            show_post(ctx, &post);
        }
        BlogRoute::Category { category, page } => {
            let category = blog::get_category(&pool, &category)
                .await?
                .ok_or(AppError::NotFound)?;
            let (posts, total) =
                blog::load_list(&pool, ListFilter::Category(category.cat_id), page, per_page)
                    .await?;
            ctx.set_meta("title", category.category.clone());
            let base = format!("/blog/category/{}", category.cat_url);
            show_list(ctx, &posts, page, pages(total, per_page), |n| {
                format!("{}-{}", base, n)
            });
        }
        BlogRoute::Author(author_url) => {
            let user_id = blog::get_author_id(&pool, &author_url)
                .await?
                .ok_or(AppError::NotFound)?;
            let (posts, total) =
                blog::load_list(&pool, ListFilter::Author(user_id), 1, per_page).await?;
            if let Some(name) = posts.first().and_then(|p| p.author_name.clone()) {
                ctx.set_meta("title", name);
            }
            show_list(ctx, &posts, 1, pages(total, per_page), |_| {
                format!("/blog/author/{}", author_url)
            });
        }
        BlogRoute::List { page } => {
            let (posts, total) = blog::load_list(&pool, ListFilter::All, page, per_page).await?;
            if page > 1 && posts.is_empty() {
                return Err(AppError::NotFound);
            }
            show_list(ctx, &posts, page, pages(total, per_page), |n| {
                format!("/blog/page/{}", n)
            });
        }
    }

    Ok(Output::Page)
}

fn pages(total: i64, per_page: i64) -> i64 {
    let per_page = per_page.max(1);
    (total + per_page - 1) / per_page
}

fn show_post(ctx: &mut PageContext, post: &BlogPost) {
    ctx.set_meta("title", post.title.clone());
    ctx.set_meta("keywords", post.keywords.clone());
    ctx.set_meta("description", post.short_body(PREVIEW_LENGTH, false));
    if let Some(image) = post.header_image() {
        ctx.set_meta("image", image);
    }

    let author = match (&post.author_name, &post.author_url) {
        (Some(name), Some(url)) => format!(
            "<div class=\"author\">By <a href=\"/blog/author/{}\">{}</a></div>",
            escape(url),
            escape(name)
        ),
        _ => String::new(),
    };
    ctx.template.content = format!(
        "<article class=\"blog-post\"><h1>{}</h1>{}<div class=\"date\">{}</div>{}</article>",
        escape(&post.title),
        author,
        format_date(post.time),
        post.body
    );
}

fn show_list(
    ctx: &mut PageContext,
    posts: &[BlogPost],
    page: i64,
    page_count: i64,
    link: impl Fn(i64) -> String,
) {
    let mut html = String::from("<div class=\"blog-roll\">");
    for post in posts {
        html.push_str(&format!(
            "<article class=\"blog-preview\"><h2><a href=\"{}\">{}</a></h2><div class=\"date\">{}</div><p>{}</p></article>",
            escape(&post.link()),
            escape(&post.title),
            format_date(post.time),
            escape(&post.short_body(PREVIEW_LENGTH, true))
        ));
    }
    html.push_str(&pagination(page, page_count, link));
    html.push_str("</div>");
    ctx.template.content = html;
}

/// Previous/next links around the current page.
fn pagination(page: i64, page_count: i64, link: impl Fn(i64) -> String) -> String {
    if page_count <= 1 {
        return String::new();
    }
    let mut html = String::from("<div class=\"pagination\">");
    if page > 1 {
        html.push_str(&format!("<a class=\"prev\" href=\"{}\">Newer</a>", escape(&link(page - 1))));
    }
    html.push_str(&format!("<span>Page {} of {}</span>", page, page_count));
    if page < page_count {
        html.push_str(&format!("<a class=\"next\" href=\"{}\">Older</a>", escape(&link(page + 1))));
    }
    html.push_str("</div>");
    html
}

fn format_date(time: i64) -> String {
    chrono::DateTime::from_timestamp(time, 0)
        .map(|date| date.format("%B %-d, %Y").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(pages(0, 10), 0);
        assert_eq!(pages(10, 10), 1);
        assert_eq!(pages(11, 10), 2);
        assert_eq!(pages(5, 0), 5);
    }

    #[test]
    fn pagination_links() {
        let html = pagination(2, 3, |n| format!("/blog/page/{}", n));
        assert!(html.contains("href=\"/blog/page/1\""));
        assert!(html.contains("href=\"/blog/page/3\""));
        assert!(html.contains("Page 2 of 3"));
        assert!(pagination(1, 1, |n| n.to_string()).is_empty());
    }

    #[test]
    fn dates_are_readable() {
        assert_eq!(format_date(0), "January 1, 1970");
    }
}
