//! SQL text differences between engines

use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl SqlDialect {
    pub fn name(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::Postgres => "postgresql",
            SqlDialect::Mysql => "mysql",
        }
    }

    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            SqlDialect::Mysql => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quote a possibly schema-qualified table name (`schema.table`)
    pub fn quote_table(&self, table: &str) -> String {
        table.split('.').map(|part| self.quote_ident(part)).join(".")
    }

    pub fn quote_columns(&self, columns: &[String]) -> String {
        columns.iter().map(|c| self.quote_ident(c)).join(", ")
    }

    /// Bind placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
            _ => "?".to_string(),
        }
    }

    /// Empty copy of the target restricted to `columns`
    pub fn create_staging_sql(&self, staging: &str, target: &str, columns: &[String], temporary: bool) -> String {
        let cols = self.quote_columns(columns);
        let staging = self.quote_ident(staging);
        let target = self.quote_table(target);
        let temp = if temporary { "TEMPORARY " } else { "" };
        match self {
            SqlDialect::Postgres => format!(
                "CREATE {}TABLE {} AS SELECT {} FROM {} WITH NO DATA",
                temp, staging, cols, target
            ),
            SqlDialect::Sqlite => format!("CREATE {}TABLE {} AS SELECT {} FROM {} WHERE 0", temp, staging, cols, target),
            SqlDialect::Mysql => format!("CREATE {}TABLE {} AS SELECT {} FROM {} LIMIT 0", temp, staging, cols, target),
        }
    }

    pub fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_ident(table))
    }

    /// Insert-or-update from the staging table, keyed by `primary_key`
    ///
    /// Only `columns` are written: columns absent from the load keep their
    /// values on existing rows and get their defaults on new ones.
    pub fn upsert_sql(&self, target: &str, staging: &str, columns: &[String], primary_key: &[String]) -> String {
        let cols = self.quote_columns(columns);
        let insert = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.quote_table(target),
            cols,
            cols,
            self.quote_ident(staging)
        );
        let updated: Vec<&String> = columns.iter().filter(|c| !primary_key.contains(c)).collect();

        match self {
            SqlDialect::Postgres | SqlDialect::Sqlite => {
                let conflict = self.quote_columns(primary_key);
                if updated.is_empty() {
                    format!("{} WHERE true ON CONFLICT ({}) DO NOTHING", insert, conflict)
                } else {
                    let set = updated
                        .iter()
                        .map(|c| format!("{} = excluded.{}", self.quote_ident(c), self.quote_ident(c)))
                        .join(", ");
                    format!("{} WHERE true ON CONFLICT ({}) DO UPDATE SET {}", insert, conflict, set)
                }
            }
            SqlDialect::Mysql => {
                let set = if updated.is_empty() {
                    let key = self.quote_ident(&primary_key[0]);
                    format!("{} = {}", key, key)
                } else {
                    updated
                        .iter()
                        .map(|c| format!("{} = VALUES({})", self.quote_ident(c), self.quote_ident(c)))
                        .join(", ")
                };
                format!("{} ON DUPLICATE KEY UPDATE {}", insert, set)
            }
        }
    }
}
