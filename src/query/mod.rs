//! Structured SELECT queries.
//!
//! Queries are assembled from typed parts ([`SelectQuery`], [`Join`],
//! [`Conditions`]) or parsed from the JSON fragments stored alongside mailing
//! messages, then rendered to Postgres SQL with `$n` placeholders.
//!
//! # JSON condition format
//!
//! ```json
//! {
//!   "users.first": "Ada",                 // = $1
//!   "tracker_event.user_id": null,        // IS NULL
//!   "users.user_id": ["IN", [1, 2, 3]],   // IN ($2, $3, $4)
//!   "users.created": [">", 19000],        // > $5
//!   "users.updated": ["users.created"],   // = "users"."created"
//!   "#or": { "a": 1, "b": 2 },            // (a = $6 OR b = $7)
//!   "0": "users.email LIKE '%@example.com'"
//! }
//! ```

pub mod criteria;
mod render;

use crate::db::DbPool;
use serde_json::Value;

pub use render::quote_identifier;

/// Errors raised while parsing JSON query fragments.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error("unsupported operator `{0}`")]
    UnsupportedOperator(String),

    #[error("malformed condition for `{column}`: {reason}")]
    MalformedCondition { column: String, reason: String },

    #[error("malformed join: {0}")]
    MalformedJoin(String),

    #[error("malformed select field: {0}")]
    MalformedSelect(String),

    #[error("expected a JSON object for {0}")]
    ExpectedObject(&'static str),
}

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl BindValue {
    /// Convert a JSON scalar. Returns `None` for null, arrays and objects.
    ///
    /// Only JSON numbers bind as numbers; strings always bind as text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A plain integer: optional minus, digits, no leading zero.
pub fn plain_integer(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

/// Comparison operators accepted in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Like,
    ILike,
}

impl Operator {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw.trim().to_ascii_uppercase().as_str() {
            "=" => Self::Eq,
            "!=" | "<>" => Self::NotEq,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "<=" => Self::LtEq,
            ">=" => Self::GtEq,
            "LIKE" => Self::Like,
            "ILIKE" => Self::ILike,
            _ => return None,
        })
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(BindValue),
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        operator: Operator,
        operand: Operand,
    },
    In {
        column: String,
        negated: bool,
        values: Vec<BindValue>,
    },
    Between {
        column: String,
        low: BindValue,
        high: BindValue,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    Group(Conditions),
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

/// A list of conditions joined by AND or OR.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conditions {
    pub conjunction: Conjunction,
    pub items: Vec<Condition>,
}

impl Conditions {
    pub fn and() -> Self {
        Self::default()
    }

    pub fn or() -> Self {
        Self {
            conjunction: Conjunction::Or,
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.iter().all(|item| match item {
            Condition::Group(group) => group.is_empty(),
            _ => false,
        })
    }

    pub fn push(&mut self, condition: Condition) -> &mut Self {
        self.items.push(condition);
        self
    }

    /// `column = value`
    pub fn equals(mut self, column: &str, value: impl Into<BindValue>) -> Self {
        self.items.push(Condition::Compare {
            column: column.to_string(),
            operator: Operator::Eq,
            operand: Operand::Value(value.into()),
        });
        self
    }

    /// `column = other_column`
    pub fn equals_column(mut self, column: &str, other: &str) -> Self {
        self.items.push(Condition::Compare {
            column: column.to_string(),
            operator: Operator::Eq,
            operand: Operand::Column(other.to_string()),
        });
        self
    }

    /// `column IN (values...)`
    pub fn is_in(mut self, column: &str, values: Vec<BindValue>) -> Self {
        self.items.push(Condition::In {
            column: column.to_string(),
            negated: false,
            values,
        });
        self
    }

    /// `column IS NULL`
    pub fn is_null(mut self, column: &str) -> Self {
        self.items.push(Condition::IsNull {
            column: column.to_string(),
            negated: false,
        });
        self
    }

    /// Parse a JSON condition object, or a list of positional entries.
    pub fn from_json(value: &Value) -> Result<Self, QueryError> {
        let mut conditions = Self::and();
        match value {
            Value::Object(map) => {
                for (key, value) in map {
                    conditions.items.push(parse_condition(key, value)?);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    conditions.items.push(parse_positional(&i.to_string(), item)?);
                }
            }
            _ => return Err(QueryError::ExpectedObject("conditions")),
        }
        Ok(conditions)
    }
}

/// An entry without a column: an object is a nested AND group, a string is
/// raw SQL.
fn parse_positional(key: &str, value: &Value) -> Result<Condition, QueryError> {
    match value {
        Value::Object(_) => Ok(Condition::Group(Conditions::from_json(value)?)),
        Value::String(raw) => Ok(Condition::Raw(raw.clone())),
        _ => Err(QueryError::MalformedCondition {
            column: key.to_string(),
            reason: "positional entries must be objects or raw SQL".to_string(),
        }),
    }
}

fn parse_condition(key: &str, value: &Value) -> Result<Condition, QueryError> {
    let malformed = |reason: &str| QueryError::MalformedCondition {
        column: key.to_string(),
        reason: reason.to_string(),
    };

    if key == "#or" || key == "#and" {
        let mut group = Conditions::from_json(value)?;
        if key == "#or" {
            group.conjunction = Conjunction::Or;
        }
        return Ok(Condition::Group(group));
    }

    if key.bytes().all(|b| b.is_ascii_digit()) {
        return parse_positional(key, value);
    }

    let column = key.to_string();
    match value {
        Value::Null => Ok(Condition::IsNull {
            column,
            negated: false,
        }),
        Value::Object(_) => Err(malformed("objects are not valid operands")),
        Value::Array(items) => parse_array_condition(column, items),
        scalar => Ok(Condition::Compare {
            column,
            operator: Operator::Eq,
            // scalars always convert
            operand: Operand::Value(
                BindValue::from_json(scalar).ok_or_else(|| malformed("invalid scalar"))?,
            ),
        }),
    }
}

fn parse_array_condition(column: String, items: &[Value]) -> Result<Condition, QueryError> {
    let malformed = |reason: &str| QueryError::MalformedCondition {
        column: column.clone(),
        reason: reason.to_string(),
    };

    // ["other.column"] compares against another column.
    if let [Value::String(other)] = items {
        return Ok(Condition::Compare {
            column,
            operator: Operator::Eq,
            operand: Operand::Column(other.clone()),
        });
    }

    let Some(Value::String(raw_operator)) = items.first() else {
        return Err(malformed("expected an operator"));
    };
    let operator = raw_operator.trim().to_ascii_uppercase();

    match operator.as_str() {
        "IN" | "NOT IN" => {
            let Some(Value::Array(values)) = items.get(1) else {
                return Err(malformed("IN expects a list"));
            };
            let values = values
                .iter()
                .map(|v| BindValue::from_json(v).ok_or_else(|| malformed("IN lists hold scalars")))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Condition::In {
                negated: operator == "NOT IN",
                column,
                values,
            })
        }
        "BETWEEN" => {
            let (Some(low), Some(high)) = (
                items.get(1).and_then(BindValue::from_json),
                items.get(2).and_then(BindValue::from_json),
            ) else {
                return Err(malformed("BETWEEN expects two scalars"));
            };
            Ok(Condition::Between { column, low, high })
        }
        _ => {
            let parsed = Operator::parse(&operator)
                .ok_or_else(|| QueryError::UnsupportedOperator(raw_operator.clone()))?;
            match items.get(1) {
                None | Some(Value::Null) => match parsed {
                    Operator::Eq => Ok(Condition::IsNull {
                        column,
                        negated: false,
                    }),
                    Operator::NotEq => Ok(Condition::IsNull {
                        column,
                        negated: true,
                    }),
                    _ => Err(malformed("only = and != compare with null")),
                },
                Some(Value::Array(inner)) => match inner.as_slice() {
                    [Value::String(other)] => Ok(Condition::Compare {
                        column,
                        operator: parsed,
                        operand: Operand::Column(other.clone()),
                    }),
                    _ => Err(malformed("column operands are single-element lists")),
                },
                Some(scalar) => Ok(Condition::Compare {
                    operator: parsed,
                    operand: Operand::Value(
                        BindValue::from_json(scalar).ok_or_else(|| malformed("invalid operand"))?,
                    ),
                    column,
                }),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw
            .trim()
            .to_ascii_uppercase()
            .replace('_', " ")
            .as_str()
        {
            "JOIN" | "INNER JOIN" => Some(Self::Inner),
            "LEFT JOIN" | "LEFT OUTER JOIN" => Some(Self::Left),
            "RIGHT JOIN" | "RIGHT OUTER JOIN" => Some(Self::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinConstraint {
    On(Conditions),
    Using(String),
    /// Raw SQL following the table, such as `ON a.id = b.id`.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: Option<String>,
    pub constraint: JoinConstraint,
}

impl Join {
    pub fn inner(table: &str, on: Conditions) -> Self {
        Self {
            kind: JoinKind::Inner,
            table: table.to_string(),
            alias: None,
            constraint: JoinConstraint::On(on),
        }
    }

    pub fn left(table: &str, on: Conditions) -> Self {
        Self {
            kind: JoinKind::Left,
            ..Self::inner(table, on)
        }
    }

    pub fn left_using(table: &str, column: &str) -> Self {
        Self {
            kind: JoinKind::Left,
            table: table.to_string(),
            alias: None,
            constraint: JoinConstraint::Using(column.to_string()),
        }
    }

    /// Parse a join from its JSON form.
    ///
    /// Accepted shapes:
    /// - `{"left_join": "table", "on": {...}}`, `{"join": "table", "using": "col"}`,
    ///   optionally with `"as": "alias"`
    /// - `["LEFT JOIN", "table", "ON table.x = other.x"]`
    pub fn from_json(value: &Value) -> Result<Self, QueryError> {
        match value {
            Value::Array(parts) => {
                let (Some(Value::String(kind)), Some(Value::String(table))) =
                    (parts.first(), parts.get(1))
                else {
                    return Err(QueryError::MalformedJoin(value.to_string()));
                };
                let kind = JoinKind::parse(kind)
                    .ok_or_else(|| QueryError::MalformedJoin(kind.clone()))?;
                let constraint = match parts.get(2) {
                    Some(Value::String(raw)) => JoinConstraint::Raw(raw.clone()),
                    Some(on @ Value::Object(_)) => JoinConstraint::On(Conditions::from_json(on)?),
                    _ => return Err(QueryError::MalformedJoin(value.to_string())),
                };
                Ok(Self {
                    kind,
                    table: table.clone(),
                    alias: None,
                    constraint,
                })
            }
            Value::Object(map) => {
                let (kind, table) = ["join", "inner_join", "left_join", "right_join"]
                    .iter()
                    .find_map(|key| {
                        let table = map.get(*key)?.as_str()?;
                        Some((JoinKind::parse(key)?, table.to_string()))
                    })
                    .ok_or_else(|| QueryError::MalformedJoin(value.to_string()))?;

                let constraint = if let Some(on) = map.get("on") {
                    JoinConstraint::On(Conditions::from_json(on)?)
                } else if let Some(Value::String(column)) = map.get("using") {
                    JoinConstraint::Using(column.clone())
                } else {
                    return Err(QueryError::MalformedJoin(format!(
                        "join on `{}` has no `on` or `using`",
                        table
                    )));
                };

                Ok(Self {
                    kind,
                    table,
                    alias: map.get("as").and_then(Value::as_str).map(str::to_string),
                    constraint,
                })
            }
            _ => Err(QueryError::MalformedJoin(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectField {
    /// A column reference, quoted on render.
    Column(String),
    /// Raw SQL such as `COUNT(DISTINCT(users.user_id))`.
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub alias: Option<String>,
    pub field: SelectField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Table(String),
    Subquery { query: Box<SelectQuery>, alias: String },
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub distinct: bool,
    pub from: Source,
    pub joins: Vec<Join>,
    pub conditions: Conditions,
    pub select: Vec<Selection>,
    pub group_by: Vec<SelectField>,
    pub having: Conditions,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SelectQuery {
    pub fn from_table(table: &str) -> Self {
        Self::with_from(Source::Table(table.to_string()))
    }

    pub fn from_subquery(query: SelectQuery, alias: &str) -> Self {
        Self::with_from(Source::Subquery {
            query: Box::new(query),
            alias: alias.to_string(),
        })
    }

    fn with_from(from: Source) -> Self {
        Self {
            distinct: false,
            from,
            joins: Vec::new(),
            conditions: Conditions::and(),
            select: Vec::new(),
            group_by: Vec::new(),
            having: Conditions::and(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn filter(mut self, conditions: Conditions) -> Self {
        self.conditions.items.push(Condition::Group(conditions));
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = (offset > 0).then_some(offset);
        self
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.select
            .iter()
            .any(|s| s.alias.as_deref() == Some(alias))
    }

    /// Add a field unless another field already uses the alias.
    pub fn add_select(&mut self, alias: Option<&str>, field: SelectField) {
        if let Some(alias) = alias {
            if self.has_alias(alias) {
                return;
            }
        }
        self.select.push(Selection {
            alias: alias.map(str::to_string),
            field,
        });
    }

    /// Merge a JSON select fragment: `{"alias": "col", "n": {"expression": "..."}}`
    /// or `["col", ...]`. Existing aliases are kept.
    pub fn merge_select_json(&mut self, value: &Value) -> Result<(), QueryError> {
        match value {
            Value::Object(map) => {
                for (key, field) in map {
                    let alias = (!key.bytes().all(|b| b.is_ascii_digit())).then_some(key.as_str());
                    self.add_select(alias, parse_select_field(field)?);
                }
                Ok(())
            }
            Value::Array(fields) => {
                for field in fields {
                    self.add_select(None, parse_select_field(field)?);
                }
                Ok(())
            }
            other => Err(QueryError::MalformedSelect(other.to_string())),
        }
    }

    /// Merge a JSON group-by fragment: a list (or object) of column names.
    pub fn merge_group_by_json(&mut self, value: &Value) -> Result<(), QueryError> {
        let fields: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            other => return Err(QueryError::MalformedSelect(other.to_string())),
        };
        for field in fields {
            let parsed = parse_select_field(field)?;
            if !self.group_by.contains(&parsed) {
                self.group_by.push(parsed);
            }
        }
        Ok(())
    }

    /// Render to SQL and its bind values.
    pub fn render(&self) -> (String, Vec<BindValue>) {
        let mut writer = render::SqlWriter::default();
        writer.select_query(self);
        writer.finish()
    }

    /// Run the query and map every row.
    pub async fn fetch_all_as<T>(&self, pool: &DbPool) -> Result<Vec<T>, sqlx::Error>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let (sql, binds) = self.render();
        tracing::debug!(%sql, binds = binds.len(), "Running query");

        let mut query = sqlx::query_as::<_, T>(&sql);
        for bind in binds {
            query = match bind {
                BindValue::Int(v) => query.bind(v),
                BindValue::Float(v) => query.bind(v),
                BindValue::Text(v) => query.bind(v),
                BindValue::Bool(v) => query.bind(v),
            };
        }
        query.fetch_all(pool).await
    }

    /// Run the query and read a single integer (e.g. a COUNT).
    pub async fn fetch_scalar_i64(&self, pool: &DbPool) -> Result<i64, sqlx::Error> {
        let (sql, binds) = self.render();
        tracing::debug!(%sql, binds = binds.len(), "Running scalar query");

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for bind in binds {
            query = match bind {
                BindValue::Int(v) => query.bind(v),
                BindValue::Float(v) => query.bind(v),
                BindValue::Text(v) => query.bind(v),
                BindValue::Bool(v) => query.bind(v),
            };
        }
        query.fetch_one(pool).await
    }

    /// Run the query and return each row as a JSON object.
    ///
    /// Used where the columns are only known at runtime (admin tables).
    pub async fn fetch_json_rows(self, pool: &DbPool) -> Result<Vec<Value>, sqlx::Error> {
        #[derive(sqlx::FromRow)]
        struct JsonRow {
            row: Value,
        }

        let mut wrapper = SelectQuery::from_subquery(self, "t");
        wrapper.add_select(Some("row"), SelectField::Expression("row_to_json(t)".into()));
        let rows = wrapper.fetch_all_as::<JsonRow>(pool).await?;
        Ok(rows.into_iter().map(|r| r.row).collect())
    }
}

/// Run a statement with positional `$n` binds. Returns the affected row count.
pub async fn execute_with(
    pool: &DbPool,
    sql: &str,
    binds: Vec<BindValue>,
) -> Result<u64, sqlx::Error> {
    tracing::debug!(%sql, binds = binds.len(), "Running statement");

    let mut query = sqlx::query(sql);
    for bind in binds {
        query = match bind {
            BindValue::Int(v) => query.bind(v),
            BindValue::Float(v) => query.bind(v),
            BindValue::Text(v) => query.bind(v),
            BindValue::Bool(v) => query.bind(v),
        };
    }
    Ok(query.execute(pool).await?.rows_affected())
}

/// Run a statement returning one integer, such as `INSERT ... RETURNING id`.
pub async fn fetch_i64_with(
    pool: &DbPool,
    sql: &str,
    binds: Vec<BindValue>,
) -> Result<i64, sqlx::Error> {
    tracing::debug!(%sql, binds = binds.len(), "Running statement");

    let mut query = sqlx::query_scalar::<_, i64>(sql);
    for bind in binds {
        query = match bind {
            BindValue::Int(v) => query.bind(v),
            BindValue::Float(v) => query.bind(v),
            BindValue::Text(v) => query.bind(v),
            BindValue::Bool(v) => query.bind(v),
        };
    }
    query.fetch_one(pool).await
}

fn parse_select_field(value: &Value) -> Result<SelectField, QueryError> {
    match value {
        Value::String(column) => Ok(SelectField::Column(column.clone())),
        Value::Object(map) => map
            .get("expression")
            .and_then(Value::as_str)
            .map(|sql| SelectField::Expression(sql.to_string()))
            .ok_or_else(|| QueryError::MalformedSelect(value.to_string())),
        other => Err(QueryError::MalformedSelect(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_json_numbers_bind_as_numbers() {
        assert_eq!(BindValue::from_json(&json!(42)), Some(BindValue::Int(42)));
        assert_eq!(BindValue::from_json(&json!(1.5)), Some(BindValue::Float(1.5)));
        assert_eq!(
            BindValue::from_json(&json!("90210")),
            Some(BindValue::Text("90210".into()))
        );
        assert_eq!(BindValue::from_json(&json!(null)), None);

        assert_eq!(plain_integer("-7"), Some(-7));
        assert_eq!(plain_integer("01234"), None);
        assert_eq!(plain_integer("4a"), None);
    }

    #[test]
    fn digit_strings_compare_as_text() {
        let query = SelectQuery::from_table("users")
            .filter(Conditions::from_json(&json!({ "users.zip": "90210" })).unwrap());
        let (_, binds) = query.render();
        assert_eq!(binds, vec![BindValue::Text("90210".into())]);
    }

    #[test]
    fn condition_lists_hold_positional_entries() {
        let conditions = Conditions::from_json(&json!([
            { "users.first": "Ada" },
            "users.email LIKE '%@example.com'"
        ]))
        .unwrap();

        assert_eq!(conditions.conjunction, Conjunction::And);
        assert_eq!(conditions.items.len(), 2);
        assert!(matches!(&conditions.items[0], Condition::Group(group) if group.items.len() == 1));
        assert_eq!(
            conditions.items[1],
            Condition::Raw("users.email LIKE '%@example.com'".into())
        );

        let err = Conditions::from_json(&json!([5])).unwrap_err();
        assert!(matches!(err, QueryError::MalformedCondition { .. }));
    }

    #[test]
    fn parses_condition_shapes() {
        let conditions = Conditions::from_json(&json!({
            "users.first": "Ada",
            "tracker_event.user_id": null,
            "users.user_id": ["IN", [1, 2]],
            "users.created": [">", 19000],
            "users.updated": ["users.created"],
            "users.last": ["!=", null],
            "#or": { "a": 1, "b": 2 },
            "0": "users.email LIKE '%@example.com'"
        }))
        .unwrap();

        assert_eq!(conditions.items.len(), 8);
        assert_eq!(
            conditions.items[1],
            Condition::IsNull {
                column: "tracker_event.user_id".into(),
                negated: false
            }
        );
        assert_eq!(
            conditions.items[4],
            Condition::Compare {
                column: "users.updated".into(),
                operator: Operator::Eq,
                operand: Operand::Column("users.created".into()),
            }
        );
        assert_eq!(
            conditions.items[5],
            Condition::IsNull {
                column: "users.last".into(),
                negated: true
            }
        );
        match &conditions.items[6] {
            Condition::Group(group) => assert_eq!(group.conjunction, Conjunction::Or),
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_operators() {
        let err = Conditions::from_json(&json!({ "a": ["SOUNDS LIKE", "x"] })).unwrap_err();
        assert_eq!(err, QueryError::UnsupportedOperator("SOUNDS LIKE".into()));
    }

    #[test]
    fn in_requires_a_list() {
        let err = Conditions::from_json(&json!({ "a": ["IN", "{IDS}"] })).unwrap_err();
        assert!(matches!(err, QueryError::MalformedCondition { .. }));
    }

    #[test]
    fn parses_join_shapes() {
        let join = Join::from_json(&json!({
            "left_join": "user_purchase",
            "on": { "user_purchase.user_id": ["users.user_id"] }
        }))
        .unwrap();
        assert_eq!(join.kind, JoinKind::Left);
        assert_eq!(join.table, "user_purchase");

        let join = Join::from_json(&json!({ "join": "message_criteria", "using": "message_criteria_id" }))
            .unwrap();
        assert_eq!(join.kind, JoinKind::Inner);
        assert_eq!(join.constraint, JoinConstraint::Using("message_criteria_id".into()));

        let join = Join::from_json(&json!(["LEFT JOIN", "orders", "ON orders.user_id = users.user_id"]))
            .unwrap();
        assert_eq!(join.constraint, JoinConstraint::Raw("ON orders.user_id = users.user_id".into()));

        assert!(Join::from_json(&json!({ "left_join": "orders" })).is_err());
    }

    #[test]
    fn select_merge_keeps_existing_aliases() {
        let mut query = SelectQuery::from_table("users");
        query.add_select(Some("uid"), SelectField::Column("users.user_id".into()));
        query
            .merge_select_json(&json!({
                "uid": "other.user_id",
                "total": { "expression": "SUM(orders.amount)" },
                "0": "users.email"
            }))
            .unwrap();

        assert_eq!(query.select.len(), 3);
        assert_eq!(query.select[0].field, SelectField::Column("users.user_id".into()));
        assert_eq!(
            query.select[1].field,
            SelectField::Expression("SUM(orders.amount)".into())
        );
        assert_eq!(query.select[2].alias, None);
    }

    #[test]
    fn group_by_merge_skips_duplicates() {
        let mut query = SelectQuery::from_table("users");
        query.merge_group_by_json(&json!(["users.user_id"])).unwrap();
        query.merge_group_by_json(&json!(["users.user_id", "orders.kind"])).unwrap();
        assert_eq!(query.group_by.len(), 2);
    }
}
