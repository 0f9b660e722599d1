//! Table definitions described in code.
//!
//! A [`Schema`] lists a table's columns and keys and can render the DDL needed
//! to create it. `db::conform_schemas` runs that DDL at startup for every
//! definition returned by [`registered`].

mod tracker_event;

pub use tracker_event::TrackerEvent;

/// SQL type of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    BigInt,
    Varchar(u32),
    Text,
    /// Auto-incrementing primary key.
    Serial,
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub column_type: ColumnType,
    /// Postgres has no unsigned integers; unsigned columns get a `>= 0` check.
    pub unsigned: bool,
}

impl Column {
    fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            unsigned: false,
        }
    }

    fn definition(&self, name: &str) -> String {
        let mut sql = format!("\"{}\" ", name);
        sql.push_str(&match self.column_type {
            ColumnType::Int => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Varchar(length) => format!("VARCHAR({})", length),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Serial => "BIGSERIAL PRIMARY KEY".to_string(),
        });
        if self.column_type == ColumnType::Serial {
            return sql;
        }
        sql.push_str(" NOT NULL");
        if self.unsigned {
            sql.push_str(&format!(" CHECK (\"{}\" >= 0)", name));
        }
        sql
    }
}

/// 32-bit integer column. Unsigned columns are constrained to be non-negative.
pub fn int(unsigned: bool) -> Column {
    Column {
        unsigned,
        ..Column::new(ColumnType::Int)
    }
}

/// 64-bit integer column.
pub fn bigint(unsigned: bool) -> Column {
    Column {
        unsigned,
        ..Column::new(ColumnType::BigInt)
    }
}

pub fn varchar(length: u32) -> Column {
    Column::new(ColumnType::Varchar(length))
}

pub fn text() -> Column {
    Column::new(ColumnType::Text)
}

pub fn autoincrement() -> Column {
    Column::new(ColumnType::Serial)
}

/// An index over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub name: &'static str,
    pub columns: Vec<&'static str>,
    pub unique: bool,
}

/// A table definition.
pub trait Schema: Send + Sync {
    fn table(&self) -> &'static str;

    fn columns(&self) -> Vec<(&'static str, Column)>;

    fn keys(&self) -> Vec<Key> {
        Vec::new()
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns()
            .iter()
            .map(|(name, column)| column.definition(name))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.table(),
            columns.join(",\n    ")
        )
    }

    /// `CREATE INDEX IF NOT EXISTS` statements, one per key.
    fn index_sql(&self) -> Vec<String> {
        self.keys()
            .iter()
            .map(|key| {
                let columns: Vec<String> =
                    key.columns.iter().map(|c| format!("\"{}\"", c)).collect();
                format!(
                    "CREATE {}INDEX IF NOT EXISTS \"{}_{}\" ON \"{}\" ({})",
                    if key.unique { "UNIQUE " } else { "" },
                    self.table(),
                    key.name,
                    self.table(),
                    columns.join(", ")
                )
            })
            .collect()
    }
}

/// Every table managed by the schema layer.
pub fn registered() -> Vec<Box<dyn Schema>> {
    vec![Box::new(TrackerEvent)]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Example;

    impl Schema for Example {
        fn table(&self) -> &'static str {
            "example"
        }

        fn columns(&self) -> Vec<(&'static str, Column)> {
            vec![
                ("example_id", autoincrement()),
                ("title", varchar(64)),
                ("notes", text()),
            ]
        }
    }

    #[test]
    fn renders_create_table() {
        let sql = Example.create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"example\""));
        assert!(sql.contains("\"example_id\" BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains("\"title\" VARCHAR(64) NOT NULL,"));
        assert!(sql.ends_with("\"notes\" TEXT NOT NULL\n)"));
    }

    #[test]
    fn tables_without_keys_have_no_indexes() {
        assert!(Example.index_sql().is_empty());
    }
}
