use super::{
    BindValue, Condition, Conditions, Conjunction, Direction, Join, JoinConstraint, JoinKind,
    Operand, SelectField, SelectQuery, Source,
};

/// Quote a (possibly dotted) identifier: `users.user_id` → `"users"."user_id"`.
///
/// Anything that is not a plain identifier path (function calls, arithmetic,
/// already quoted names) is returned untouched.
pub fn quote_identifier(identifier: &str) -> String {
    let plain = !identifier.is_empty()
        && identifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'*');
    if !plain {
        return identifier.to_string();
    }

    identifier
        .split('.')
        .map(|part| match part {
            "*" => "*".to_string(),
            _ => format!("\"{}\"", part),
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Default)]
pub(super) struct SqlWriter {
    sql: String,
    binds: Vec<BindValue>,
}

impl SqlWriter {
    pub(super) fn finish(self) -> (String, Vec<BindValue>) {
        (self.sql, self.binds)
    }

    fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    fn bind(&mut self, value: BindValue) {
        self.binds.push(value);
        let placeholder = format!("${}", self.binds.len());
        self.sql.push_str(&placeholder);
    }

    pub(super) fn select_query(&mut self, query: &SelectQuery) {
        self.push(if query.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });
        if query.select.is_empty() {
            self.push("*");
        } else {
            for (i, selection) in query.select.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.field(&selection.field);
                if let Some(alias) = &selection.alias {
                    self.push(" AS ");
                    self.push(&quote_identifier(alias));
                }
            }
        }

        self.push(" FROM ");
        match &query.from {
            Source::Table(table) => self.push(&quote_identifier(table)),
            Source::Subquery { query, alias } => {
                self.push("(");
                self.select_query(query);
                self.push(") AS ");
                self.push(&quote_identifier(alias));
            }
        }

        for join in &query.joins {
            self.join(join);
        }

        if !query.conditions.is_empty() {
            self.push(" WHERE ");
            self.conditions(&query.conditions);
        }

        if !query.group_by.is_empty() {
            self.push(" GROUP BY ");
            for (i, field) in query.group_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.field(field);
            }
        }

        if !query.having.is_empty() {
            self.push(" HAVING ");
            self.conditions(&query.having);
        }

        if !query.order_by.is_empty() {
            self.push(" ORDER BY ");
            let order: Vec<String> = query
                .order_by
                .iter()
                .map(|(column, direction)| {
                    format!(
                        "{} {}",
                        quote_identifier(column),
                        match direction {
                            Direction::Asc => "ASC",
                            Direction::Desc => "DESC",
                        }
                    )
                })
                .collect();
            self.push(&order.join(", "));
        }

        if let Some(limit) = query.limit {
            self.push(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = query.offset {
            self.push(&format!(" OFFSET {}", offset));
        }
    }

    fn field(&mut self, field: &SelectField) {
        match field {
            SelectField::Column(column) => self.push(&quote_identifier(column)),
            SelectField::Expression(sql) => self.push(sql),
        }
    }

    fn join(&mut self, join: &Join) {
        self.push(match join.kind {
            JoinKind::Inner => " JOIN ",
            JoinKind::Left => " LEFT JOIN ",
            JoinKind::Right => " RIGHT JOIN ",
        });
        self.push(&quote_identifier(&join.table));
        if let Some(alias) = &join.alias {
            self.push(" AS ");
            self.push(&quote_identifier(alias));
        }
        match &join.constraint {
            JoinConstraint::On(conditions) => {
                self.push(" ON ");
                if conditions.is_empty() {
                    self.push("TRUE");
                } else {
                    self.conditions(conditions);
                }
            }
            JoinConstraint::Using(column) => {
                self.push(" USING (");
                self.push(&quote_identifier(column));
                self.push(")");
            }
            JoinConstraint::Raw(sql) => {
                self.push(" ");
                self.push(sql);
            }
        }
    }

    fn conditions(&mut self, conditions: &Conditions) {
        let glue = match conditions.conjunction {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        };
        let mut first = true;
        for condition in &conditions.items {
            if let Condition::Group(group) = condition {
                if group.is_empty() {
                    continue;
                }
            }
            if !first {
                self.push(glue);
            }
            first = false;
            self.condition(condition);
        }
    }

    fn condition(&mut self, condition: &Condition) {
        match condition {
            Condition::Compare {
                column,
                operator,
                operand,
            } => {
                self.push(&quote_identifier(column));
                self.push(" ");
                self.push(operator.as_sql());
                self.push(" ");
                match operand {
                    Operand::Value(value) => self.bind(value.clone()),
                    Operand::Column(other) => self.push(&quote_identifier(other)),
                }
            }
            Condition::In {
                column,
                negated,
                values,
            } => {
                if values.is_empty() {
                    // An empty list matches nothing (or everything when negated).
                    self.push(if *negated { "TRUE" } else { "FALSE" });
                    return;
                }
                self.push(&quote_identifier(column));
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(value.clone());
                }
                self.push(")");
            }
            Condition::Between { column, low, high } => {
                self.push(&quote_identifier(column));
                self.push(" BETWEEN ");
                self.bind(low.clone());
                self.push(" AND ");
                self.bind(high.clone());
            }
            Condition::IsNull { column, negated } => {
                self.push(&quote_identifier(column));
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Condition::Group(group) => {
                self.push("(");
                self.conditions(group);
                self.push(")");
            }
            Condition::Raw(sql) => {
                self.push("(");
                self.push(sql);
                self.push(")");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SelectField, SelectQuery};
    use serde_json::json;

    #[test]
    fn quotes_plain_identifiers_only() {
        assert_eq!(quote_identifier("users.user_id"), "\"users\".\"user_id\"");
        assert_eq!(quote_identifier("users.*"), "\"users\".*");
        assert_eq!(quote_identifier("COUNT(*)"), "COUNT(*)");
    }

    #[test]
    fn renders_select_with_joins_and_conditions() {
        let mut query = SelectQuery::from_table("message_list_user")
            .join(Join::inner(
                "users",
                Conditions::and().equals_column("users.user_id", "message_list_user.user_id"),
            ))
            .filter(Conditions::and().is_in(
                "message_list_id",
                vec![BindValue::Int(1), BindValue::Int(2)],
            ));
        query.add_select(Some("uid"), SelectField::Expression("DISTINCT(users.user_id)".into()));

        let (sql, binds) = query.render();
        assert_eq!(
            sql,
            "SELECT DISTINCT(users.user_id) AS \"uid\" FROM \"message_list_user\" \
             JOIN \"users\" ON \"users\".\"user_id\" = \"message_list_user\".\"user_id\" \
             WHERE (\"message_list_id\" IN ($1, $2))"
        );
        assert_eq!(binds, vec![BindValue::Int(1), BindValue::Int(2)]);
    }

    #[test]
    fn placeholders_follow_render_order() {
        let query = SelectQuery::from_table("users")
            .join(Join::left(
                "tracker_event",
                Conditions::and()
                    .equals_column("tracker_event.user_id", "users.user_id")
                    .equals("tracker_event.tracker_id", 7),
            ))
            .filter(
                Conditions::from_json(&json!({
                    "users.created": ["BETWEEN", 10, 20],
                    "#or": { "users.first": "Ada", "users.last": ["LIKE", "L%"] }
                }))
                .unwrap(),
            );

        let (sql, binds) = query.render();
        assert!(sql.contains("\"tracker_event\".\"tracker_id\" = $1"));
        assert!(sql.contains("\"users\".\"created\" BETWEEN $2 AND $3"));
        assert!(sql.contains("(\"users\".\"first\" = $4 OR \"users\".\"last\" LIKE $5)"));
        assert_eq!(binds.len(), 5);
        assert_eq!(binds[0], BindValue::Int(7));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let query = SelectQuery::from_table("users")
            .filter(Conditions::and().is_in("users.user_id", Vec::new()));
        let (sql, binds) = query.render();
        assert!(sql.ends_with("WHERE (FALSE)"));
        assert!(binds.is_empty());
    }

    #[test]
    fn renders_subquery_group_having_order_and_limit() {
        let mut inner = SelectQuery::from_table("users");
        inner.add_select(Some("user_id"), SelectField::Column("users.user_id".into()));
        inner.group_by.push(SelectField::Column("users.user_id".into()));
        inner.having = Conditions::from_json(&json!({ "0": "COUNT(*) > 1" })).unwrap();

        let mut outer = SelectQuery::from_subquery(inner, "subtable")
            .order_by("count", Direction::Desc)
            .limit(10, 20);
        outer.add_select(Some("count"), SelectField::Expression("COUNT(DISTINCT(user_id))".into()));

        let (sql, _) = outer.render();
        assert_eq!(
            sql,
            "SELECT COUNT(DISTINCT(user_id)) AS \"count\" FROM (SELECT \"users\".\"user_id\" AS \"user_id\" \
             FROM \"users\" GROUP BY \"users\".\"user_id\" HAVING (COUNT(*) > 1)) AS \"subtable\" \
             ORDER BY \"count\" DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn distinct_prefixes_the_field_list() {
        let mut query = SelectQuery::from_table("users");
        query.distinct = true;
        query.add_select(Some("uid"), SelectField::Column("users.user_id".into()));
        assert_eq!(
            query.render().0,
            "SELECT DISTINCT \"users\".\"user_id\" AS \"uid\" FROM \"users\""
        );
    }

    #[test]
    fn empty_groups_are_skipped() {
        let query = SelectQuery::from_table("users").filter(Conditions::and());
        assert_eq!(query.render().0, "SELECT * FROM \"users\"");
    }
}
