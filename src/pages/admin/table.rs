//! Generic table editor used by the role, permission and mailing admin pages.
//!
//! Actions (`action` parameter):
//! - none: paged list, filtered by `q` over the search fields
//! - `new` / `edit`: the edit form (`id` for edit)
//! - `insert` / `update` / `delete` (POST)

use super::super::{
    AdminTable,
    context::{Output, PageContext, Params, with_query},
};
use crate::{
    error::AppError,
    models::link::LinkTable,
    query::{
        self, BindValue, Condition, Conditions, Direction, Operand, Operator, SelectField,
        SelectQuery, quote_identifier,
    },
    view::{html::escape, language::translate},
};
use serde_json::Value;

const PER_PAGE: i64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Text,
    LongText,
    Bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: ColumnKind,
}

/// Everything the editor needs to know about a table.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub title: &'static str,
    pub table: &'static str,
    pub key: &'static str,
    /// Editable columns. The key is never edited.
    pub columns: &'static [Column],
    pub search_fields: &'static [&'static str],
    pub sort: &'static str,
    pub link: Option<LinkTable>,
}

const NAME: Column = Column {
    name: "name",
    label: "Name",
    kind: ColumnKind::Text,
};

const SUBJECT: Column = Column {
    name: "subject",
    label: "Subject",
    kind: ColumnKind::Text,
};

const BODY: Column = Column {
    name: "body",
    label: "Body",
    kind: ColumnKind::LongText,
};

impl AdminTable {
    pub fn definition(self) -> TableDef {
        match self {
            AdminTable::Roles => TableDef {
                title: "Roles",
                table: "role",
                key: "role_id",
                columns: &[NAME],
                search_fields: &["role_id", "name"],
                sort: "role_id",
                link: Some(LinkTable {
                    display_name: "Permission",
                    index: "role_permission",
                    owner_key: "role_id",
                    target: "permission",
                    target_key: "permission_id",
                    display_column: "name",
                }),
            },
            AdminTable::Permissions => TableDef {
                title: "Permissions",
                table: "permission",
                key: "permission_id",
                columns: &[NAME],
                search_fields: &["permission_id", "name"],
                sort: "permission_id",
                link: None,
            },
            AdminTable::MailingLists => TableDef {
                title: "Mailing Lists",
                table: "message_list",
                key: "message_list_id",
                columns: &[NAME],
                search_fields: &["name"],
                sort: "name",
                link: None,
            },
            AdminTable::MailingMessages => TableDef {
                title: "Messages",
                table: "message",
                key: "message_id",
                columns: &[
                    Column {
                        name: "template_id",
                        label: "Template",
                        kind: ColumnKind::Int,
                    },
                    SUBJECT,
                    BODY,
                    Column {
                        name: "never_resend",
                        label: "Never resend",
                        kind: ColumnKind::Bool,
                    },
                ],
                search_fields: &["subject", "body"],
                sort: "message_id",
                link: Some(LinkTable {
                    display_name: "Mailing List",
                    index: "message_message_list",
                    owner_key: "message_id",
                    target: "message_list",
                    target_key: "message_list_id",
                    display_column: "name",
                }),
            },
            AdminTable::MailingTemplates => TableDef {
                title: "Templates",
                table: "message_template",
                key: "template_id",
                columns: &[
                    Column {
                        name: "title",
                        label: "Title",
                        kind: ColumnKind::Text,
                    },
                    SUBJECT,
                    BODY,
                ],
                search_fields: &["title", "subject"],
                sort: "template_id",
                link: None,
            },
        }
    }
}

pub async fn handle(
    table: AdminTable,
    ctx: &mut PageContext,
    method: &str,
) -> Result<Output, AppError> {
    let def = table.definition();
    match method {
        "get" => get_list(&def, ctx).await,
        "get_new" => get_form(&def, ctx, None).await,
        "get_edit" => {
            let id = ctx.request_int("id").ok_or(AppError::NotFound)?;
            get_form(&def, ctx, Some(id)).await
        }
        "post_insert" => post_insert(&def, ctx).await,
        "post_update" => post_update(&def, ctx).await,
        "post_delete" => post_delete(&def, ctx).await,
        _ => Err(AppError::MethodNotAvailable),
    }
}

fn column(def: &TableDef, name: &str) -> String {
    format!("{}.{}", def.table, name)
}

/// Escape `LIKE` wildcards so the search text matches literally.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// `q` matched case-insensitively against every search field.
pub fn search_conditions(def: &TableDef, search: &str) -> Conditions {
    let mut conditions = Conditions::or();
    for field in def.search_fields {
        conditions.push(Condition::Compare {
            column: format!("{}::text", quote_identifier(&column(def, field))),
            operator: Operator::ILike,
            operand: Operand::Value(BindValue::Text(like_pattern(search))),
        });
    }
    conditions
}

fn list_query(def: &TableDef, search: Option<&str>) -> SelectQuery {
    let query = SelectQuery::from_table(def.table);
    match search {
        Some(search) if !def.search_fields.is_empty() => query.filter(search_conditions(def, search)),
        _ => query,
    }
}

/// Display text for a JSON cell.
fn cell_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(true)) => "Yes".to_string(),
        Some(Value::Bool(false)) => "No".to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn page_path(ctx: &PageContext) -> String {
    format!("/{}", ctx.location)
}

async fn get_list(def: &TableDef, ctx: &mut PageContext) -> Result<Output, AppError> {
    let pool = ctx.state.pool.clone();
    let search = ctx.get("q").map(str::trim).filter(|q| !q.is_empty()).map(str::to_string);
    let page = ctx.query.get_int("p").unwrap_or(1).max(1);

    let mut count = list_query(def, search.as_deref());
    count.add_select(Some("count"), SelectField::Expression("COUNT(*)".into()));
    let total = count.fetch_scalar_i64(&pool).await?;

    let rows = list_query(def, search.as_deref())
        .order_by(&column(def, def.sort), Direction::Asc)
        .limit(PER_PAGE, (page - 1) * PER_PAGE)
        .fetch_json_rows(&pool)
        .await?;

    let path = page_path(ctx);
    let mut html = format!(
        "<h1>{}</h1><form method=\"get\" action=\"{}\" class=\"table-search\">\
         <input type=\"text\" name=\"q\" value=\"{}\"><input type=\"submit\" class=\"button\" value=\"Search\"></form>\
         <a class=\"button\" href=\"{}\">New</a><table class=\"list\"><tr><th>ID</th>",
        escape(def.title),
        escape(&path),
        escape(search.as_deref().unwrap_or_default()),
        escape(&with_query(&path, &[("action", "new")])),
    );
    for col in def.columns.iter().filter(|c| c.kind != ColumnKind::LongText) {
        html.push_str(&format!("<th>{}</th>", escape(col.label)));
    }
    html.push_str("<th></th></tr>");

    for row in &rows {
        let id = cell_text(row.get(def.key));
        html.push_str(&format!("<tr><td>{}</td>", escape(&id)));
        for col in def.columns.iter().filter(|c| c.kind != ColumnKind::LongText) {
            html.push_str(&format!("<td>{}</td>", escape(&cell_text(row.get(col.name)))));
        }
        html.push_str(&format!(
            "<td><a href=\"{}\">Edit</a></td></tr>",
            escape(&with_query(&path, &[("action", "edit"), ("id", &id)]))
        ));
    }
    html.push_str("</table>");

    let pages = (total + PER_PAGE - 1) / PER_PAGE;
    if pages > 1 {
        html.push_str(&format!("<div class=\"pagination\">Page {} of {}", page, pages));
        for (label, target) in [("Previous", page - 1), ("Next", page + 1)] {
            if target >= 1 && target <= pages {
                let p = target.to_string();
                let mut params = vec![("p", p.as_str())];
                if let Some(q) = search.as_deref() {
                    params.push(("q", q));
                }
                html.push_str(&format!(
                    " <a href=\"{}\">{}</a>",
                    escape(&with_query(&path, &params)),
                    label
                ));
            }
        }
        html.push_str("</div>");
    }

    ctx.template.content = html;
    Ok(Output::Page)
}

async fn load_row(def: &TableDef, ctx: &PageContext, id: i64) -> Result<Value, AppError> {
    SelectQuery::from_table(def.table)
        .filter(Conditions::and().equals(&column(def, def.key), id))
        .fetch_json_rows(&ctx.state.pool)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)
}

fn input(col: &Column, value: Option<&Value>) -> String {
    let name = escape(col.name);
    let label = escape(col.label);
    match col.kind {
        ColumnKind::LongText => format!(
            "<div><label>{}<textarea name=\"{}\" rows=\"12\">{}</textarea></label></div>",
            label,
            name,
            escape(&cell_text(value))
        ),
        ColumnKind::Bool => format!(
            "<div><label><input type=\"checkbox\" name=\"{}\" value=\"1\"{}> {}</label></div>",
            name,
            if value.and_then(Value::as_bool).unwrap_or(false) { " checked" } else { "" },
            label
        ),
        ColumnKind::Int | ColumnKind::Text => format!(
            "<div><label>{}<input type=\"{}\" name=\"{}\" value=\"{}\"></label></div>",
            label,
            if col.kind == ColumnKind::Int { "number" } else { "text" },
            name,
            escape(&cell_text(value))
        ),
    }
}

async fn get_form(def: &TableDef, ctx: &mut PageContext, id: Option<i64>) -> Result<Output, AppError> {
    let row = match id {
        Some(id) => Some(load_row(def, ctx, id).await?),
        None => None,
    };
    let token = ctx.ensure_session().await?.token.clone();
    let path = page_path(ctx);

    let mut html = format!(
        "<h1>{}</h1><form method=\"post\" action=\"{}\" class=\"table-edit\">\
         <input type=\"hidden\" name=\"token\" value=\"{}\">\
         <input type=\"hidden\" name=\"action\" value=\"{}\">",
        escape(def.title),
        escape(&path),
        escape(&token),
        if id.is_some() { "update" } else { "insert" }
    );
    if let Some(id) = id {
        html.push_str(&format!("<input type=\"hidden\" name=\"id\" value=\"{}\">", id));
    }
    for col in def.columns {
        html.push_str(&input(col, row.as_ref().and_then(|r| r.get(col.name))));
    }

    if let Some(link) = &def.link {
        let linked = match id {
            Some(id) => link.linked(&ctx.state.pool, id).await?,
            None => Vec::new(),
        };
        html.push_str(&format!("<fieldset><legend>{}</legend>", escape(link.display_name)));
        for option in link.options(&ctx.state.pool).await? {
            html.push_str(&format!(
                "<label><input type=\"checkbox\" name=\"links[]\" value=\"{}\"{}> {}</label>",
                option.id,
                if linked.contains(&option.id) { " checked" } else { "" },
                escape(&option.name)
            ));
        }
        html.push_str("</fieldset>");
    }
    html.push_str("<input type=\"submit\" class=\"button\" value=\"Save\"></form>");

    if let Some(id) = id {
        html.push_str(&format!(
            "<form method=\"post\" action=\"{}\" class=\"table-delete\">\
             <input type=\"hidden\" name=\"token\" value=\"{}\">\
             <input type=\"hidden\" name=\"action\" value=\"delete\">\
             <input type=\"hidden\" name=\"id\" value=\"{}\">\
             <input type=\"submit\" class=\"button alert\" value=\"Delete\"></form>",
            escape(&path),
            escape(&token),
            id
        ));
    }

    ctx.template.content = html;
    Ok(Output::Page)
}

/// Typed values for every editable column, in column order.
///
/// # Errors
///
/// `InvalidRequest` when an integer column holds something else.
pub fn column_values(def: &TableDef, form: &Params) -> Result<Vec<BindValue>, AppError> {
    def.columns
        .iter()
        .map(|col| match col.kind {
            ColumnKind::Bool => Ok(BindValue::Bool(form.get_bool(col.name))),
            ColumnKind::Int => match form.get_text(col.name) {
                None => Ok(BindValue::Int(0)),
                Some(raw) => raw.parse::<i64>().map(BindValue::Int).map_err(|_| {
                    AppError::InvalidRequest(format!("{} must be a number.", col.label))
                }),
            },
            ColumnKind::Text | ColumnKind::LongText => Ok(BindValue::Text(
                form.get(col.name).unwrap_or_default().to_string(),
            )),
        })
        .collect()
}

pub fn insert_sql(def: &TableDef) -> String {
    let columns: Vec<String> = def.columns.iter().map(|c| quote_identifier(c.name)).collect();
    let placeholders: Vec<String> = (1..=def.columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        quote_identifier(def.table),
        columns.join(", "),
        placeholders.join(", "),
        quote_identifier(def.key)
    )
}

pub fn update_sql(def: &TableDef) -> String {
    let assignments: Vec<String> = def
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_identifier(c.name), i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        quote_identifier(def.table),
        assignments.join(", "),
        quote_identifier(def.key),
        def.columns.len() + 1
    )
}

fn delete_sql(def: &TableDef) -> String {
    format!(
        "DELETE FROM {} WHERE {} = $1",
        quote_identifier(def.table),
        quote_identifier(def.key)
    )
}

fn selected_links(form: &Params) -> Vec<i64> {
    form.get_all("links")
        .into_iter()
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

async fn post_insert(def: &TableDef, ctx: &mut PageContext) -> Result<Output, AppError> {
    let values = column_values(def, &ctx.form)?;
    let id = query::fetch_i64_with(&ctx.state.pool, &insert_sql(def), values).await?;
    if let Some(link) = &def.link {
        link.set_links(&ctx.state.pool, id, &selected_links(&ctx.form)).await?;
    }

    tracing::info!(table = def.table, id, "Row inserted");
    ctx.message(translate("saved", &[]));
    let path = page_path(ctx);
    ctx.redirect(&path).await
}

async fn post_update(def: &TableDef, ctx: &mut PageContext) -> Result<Output, AppError> {
    let id = ctx.request_int("id").ok_or(AppError::NotFound)?;
    let mut values = column_values(def, &ctx.form)?;
    values.push(BindValue::Int(id));

    let updated = query::execute_with(&ctx.state.pool, &update_sql(def), values).await?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    if let Some(link) = &def.link {
        link.set_links(&ctx.state.pool, id, &selected_links(&ctx.form)).await?;
    }

    tracing::info!(table = def.table, id, "Row updated");
    ctx.message(translate("saved", &[]));
    let path = page_path(ctx);
    ctx.redirect(&path).await
}

async fn post_delete(def: &TableDef, ctx: &mut PageContext) -> Result<Output, AppError> {
    let id = ctx.request_int("id").ok_or(AppError::NotFound)?;
    let deleted =
        query::execute_with(&ctx.state.pool, &delete_sql(def), vec![BindValue::Int(id)]).await?;
    if deleted == 0 {
        return Err(AppError::NotFound);
    }

    tracing::info!(table = def.table, id, "Row deleted");
    ctx.message(translate("deleted", &[]));
    let path = page_path(ctx);
    ctx.redirect(&path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statements_for_messages() {
        let def = AdminTable::MailingMessages.definition();
        assert_eq!(
            insert_sql(&def),
            "INSERT INTO \"message\" (\"template_id\", \"subject\", \"body\", \"never_resend\") \
             VALUES ($1, $2, $3, $4) RETURNING \"message_id\""
        );
        assert_eq!(
            update_sql(&def),
            "UPDATE \"message\" SET \"template_id\" = $1, \"subject\" = $2, \"body\" = $3, \
             \"never_resend\" = $4 WHERE \"message_id\" = $5"
        );
        assert_eq!(delete_sql(&def), "DELETE FROM \"message\" WHERE \"message_id\" = $1");
    }

    #[test]
    fn form_values_are_typed() {
        let def = AdminTable::MailingMessages.definition();
        let form = Params::parse("template_id=3&subject=Hi&body=%3Cp%3EBody%3C%2Fp%3E&never_resend=on");
        assert_eq!(
            column_values(&def, &form).unwrap(),
            vec![
                BindValue::Int(3),
                BindValue::Text("Hi".into()),
                BindValue::Text("<p>Body</p>".into()),
                BindValue::Bool(true),
            ]
        );

        let bad = Params::parse("template_id=abc");
        assert!(matches!(
            column_values(&def, &bad),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn search_matches_every_field_as_text() {
        let def = AdminTable::Roles.definition();
        let (sql, binds) = list_query(&def, Some("50%")).render();
        assert!(sql.contains("(\"role\".\"role_id\"::text ILIKE $1 OR \"role\".\"name\"::text ILIKE $2)"));
        assert_eq!(binds[0], BindValue::Text("%50\\%%".into()));
    }

    #[test]
    fn cells_render_as_text() {
        let row = json!({ "a": "x", "b": 5, "c": true, "d": null });
        assert_eq!(cell_text(row.get("a")), "x");
        assert_eq!(cell_text(row.get("b")), "5");
        assert_eq!(cell_text(row.get("c")), "Yes");
        assert_eq!(cell_text(row.get("d")), "");
        assert_eq!(cell_text(row.get("missing")), "");
    }

    #[test]
    fn links_are_parsed_from_the_form() {
        let form = Params::parse("links%5B%5D=1&links%5B%5D=x&links%5B%5D=4");
        assert_eq!(selected_links(&form), vec![1, 4]);
    }
}
