//! SQLite adapter (rusqlite)
//!
//! Bulk ingestion either goes through the `csv` virtual table module reading a
//! temporary file in-process, or through the `sqlite3` command-line tool's
//! `.import` in a child process.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use tracing::debug;
use uuid::Uuid;

use crate::config::{SqliteBulkMode, TabportConfig};
use crate::db::channel::{BulkChannel, ExternalTool, FileIngest};
use crate::db::{BulkFormat, ColumnInfo, DbAdapter, Nullable, RowSet, SqlDialect};
use crate::error::{Result, TabportError};
use crate::value::Value;

const NULL_TOKEN: &str = "\\N";

lazy_static! {
    static ref CLI_ROWS: Regex = Regex::new(r"rows: (\d+)").unwrap();
}

pub struct SqliteAdapter {
    conn: Connection,
    path: Option<PathBuf>,
    mode: SqliteBulkMode,
    cli: PathBuf,
}

impl SqliteAdapter {
    /// Open a database file, or an in-memory database when `path` is `None`
    pub fn open(path: Option<&Path>, config: &TabportConfig) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };
        let mut adapter = Self::from_connection(conn)?;
        adapter.path = path.map(Path::to_path_buf);
        adapter.mode = config.sqlite_bulk;
        adapter.cli = config.sqlite_cli.clone();
        Ok(adapter)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        rusqlite::vtab::csvtab::load_module(&conn)?;
        Ok(Self {
            conn,
            path: None,
            mode: SqliteBulkMode::Vtab,
            cli: PathBuf::from("sqlite3"),
        })
    }

    /// Switch the bulk channel to the `sqlite3` command-line tool
    pub fn with_cli(mut self, program: impl Into<PathBuf>) -> Self {
        self.mode = SqliteBulkMode::Cli;
        self.cli = program.into();
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn cli_tool(&self, table: &str, columns: &[String]) -> Result<ExternalTool> {
        let path = self.path.as_ref().ok_or_else(|| {
            TabportError::Load("sqlite3 command-line ingestion needs a database file".to_string())
        })?;

        let dialect = SqlDialect::Sqlite;
        let stage = format!("tabport_import_{}", Uuid::new_v4().simple());
        let select = columns
            .iter()
            .map(|c| format!("NULLIF({}, '{}')", dialect.quote_ident(c), NULL_TOKEN))
            .join(", ");
        let sql = format!(
            "PRAGMA foreign_keys = ON; INSERT INTO {} ({}) SELECT {} FROM {}; SELECT 'rows: ' || changes(); DROP TABLE {};",
            dialect.quote_table(table),
            dialect.quote_columns(columns),
            select,
            stage,
            stage
        );

        Ok(ExternalTool::new(
            self.cli.clone(),
            vec![
                path.to_string_lossy().to_string(),
                ".bail on".to_string(),
                ".mode csv".to_string(),
                format!(".import \"{{file}}\" {}", stage),
                ".mode list".to_string(),
                sql,
            ],
            CLI_ROWS.clone(),
        ))
    }
}

/// `csv` virtual table over a temporary file, copied with `INSERT ... SELECT`
struct CsvVtabIngest<'a> {
    conn: &'a Connection,
    table: String,
    columns: Vec<String>,
}

impl FileIngest for CsvVtabIngest<'_> {
    fn ingest_file(&mut self, path: &Path) -> Result<u64> {
        let dialect = SqlDialect::Sqlite;
        let stage = format!("tabport_csv_{}", Uuid::new_v4().simple());
        let schema = (0..self.columns.len()).map(|i| format!("c{} TEXT", i)).join(", ");
        let create = format!(
            "CREATE VIRTUAL TABLE temp.{} USING csv(filename='{}', header=no, columns={}, schema='CREATE TABLE x({})')",
            stage,
            path.to_string_lossy().replace('\'', "''"),
            self.columns.len(),
            schema
        );
        let select = (0..self.columns.len())
            .map(|i| format!("NULLIF(c{}, '{}')", i, NULL_TOKEN))
            .join(", ");
        let insert = format!(
            "INSERT INTO {} ({}) SELECT {} FROM temp.{}",
            dialect.quote_table(&self.table),
            dialect.quote_columns(&self.columns),
            select,
            stage
        );

        debug!("{}", create);
        self.conn.execute_batch(&create)?;
        let inserted = self.conn.execute(&insert, []);
        self.conn.execute_batch(&format!("DROP TABLE temp.{}", stage))?;
        Ok(inserted? as u64)
    }
}

fn is_foreign_key_error(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
        }
        _ => false,
    }
}

impl DbAdapter for SqliteAdapter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM pragma_table_info(?1)",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([table], |row| {
                let name: String = row.get(0)?;
                let engine_type: String = row.get(1)?;
                let not_null: bool = row.get(2)?;
                let pk: i64 = row.get(3)?;
                let nullable = if not_null || pk > 0 { Nullable::No } else { Nullable::Yes };
                Ok(ColumnInfo::new(name, engine_type, nullable))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    fn get_primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
        let names = stmt
            .query_map([table], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn truncate_table(&mut self, table: &str) -> Result<()> {
        let sql = format!("DELETE FROM {}", SqlDialect::Sqlite.quote_table(table));
        match self.conn.execute(&sql, []) {
            Ok(n) => {
                debug!("Deleted {} rows from {}", n, table);
                Ok(())
            }
            Err(e) if is_foreign_key_error(&e) => Err(TabportError::ForeignKeyViolation {
                table: table.to_string(),
                message: e.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn execute_query(&mut self, sql: &str, params: &[Value]) -> Result<RowSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let width = columns.len();
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width).map(|i| row.get::<_, Value>(i)).collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(RowSet { columns, rows })
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))? as u64)
    }

    fn bulk_format(&self) -> BulkFormat {
        BulkFormat {
            delimiter: ',',
            null_token: NULL_TOKEN.to_string(),
            bool_digits: true,
            header_line: self.mode == SqliteBulkMode::Cli,
        }
    }

    fn supports_temporary_staging(&self) -> bool {
        // The command-line tool runs in another process and cannot see our temp schema
        self.mode == SqliteBulkMode::Vtab
    }

    fn open_bulk_channel(&mut self, table: &str, columns: &[String]) -> Result<BulkChannel<'_>> {
        match self.mode {
            SqliteBulkMode::Vtab => Ok(BulkChannel::LocalFile(Box::new(CsvVtabIngest {
                conn: &self.conn,
                table: table.to_string(),
                columns: columns.to_vec(),
            }))),
            SqliteBulkMode::Cli => Ok(BulkChannel::ExternalTool(self.cli_tool(table, columns)?)),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            Value::Int(i) => SqlValue::Integer(*i),
            Value::Float(f) => SqlValue::Real(*f),
            Value::Decimal(d) => SqlValue::Text(d.to_string()),
            Value::Text(s) => SqlValue::Text(s.clone()),
            Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => SqlValue::Text(t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => SqlValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::TimestampTz(ts) => SqlValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()),
            Value::Duration(d) => SqlValue::Real(d.num_milliseconds() as f64 / 1000.0),
            Value::List(_) | Value::Map(_) => SqlValue::Text(self.to_json().to_string()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Value::Text(String::from_utf8_lossy(bytes).to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> SqliteAdapter {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .connection()
            .execute_batch(
                "CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT NOT NULL, amount NUMERIC(10,2));
                 CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id));
                 INSERT INTO parent VALUES (1, 'a', 1.5);
                 INSERT INTO child VALUES (1, 1);",
            )
            .unwrap();
        adapter
    }

    #[test]
    fn test_introspection() {
        let mut adapter = adapter();
        assert!(adapter.table_exists("parent").unwrap());
        assert!(!adapter.table_exists("missing").unwrap());

        let columns = adapter.get_table_columns("parent").unwrap();
        assert_eq!(
            columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["id", "name", "amount"]
        );
        assert_eq!(columns[0].nullable, Nullable::No);
        assert_eq!(columns[2].nullable, Nullable::Yes);
        assert_eq!(columns[2].semantic_type, crate::db::SemanticType::Decimal);
        assert_eq!(adapter.get_primary_key("parent").unwrap(), vec!["id".to_string()]);
    }

    #[test]
    fn test_truncate_referenced_table_fails() {
        let mut adapter = adapter();
        match adapter.truncate_table("parent") {
            Err(TabportError::ForeignKeyViolation { table, .. }) => assert_eq!(table, "parent"),
            other => panic!("expected a foreign key violation, got {:?}", other),
        }
        adapter.truncate_table("child").unwrap();
        adapter.truncate_table("parent").unwrap();
    }

    #[test]
    fn test_query_with_params() {
        let mut adapter = adapter();
        let result = adapter
            .execute_query("SELECT id, name FROM parent WHERE id = ?1", &[Value::Int(1)])
            .unwrap();
        assert_eq!(result.columns, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::Int(1), Value::from("a")]]);
    }

    #[test]
    fn test_vtab_channel_maps_null_token() {
        let mut adapter = adapter();
        let columns = vec!["id".to_string(), "name".to_string(), "amount".to_string()];
        let channel = adapter.open_bulk_channel("parent", &columns).unwrap();
        let count = channel
            .ingest(&mut "2,b,\\N\n3,\"c,d\",2.25\n".as_bytes())
            .unwrap();
        assert_eq!(count, 2);

        let rows = adapter
            .execute_query("SELECT id, name, amount FROM parent WHERE id > 1 ORDER BY id", &[])
            .unwrap()
            .rows;
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(2), Value::from("b"), Value::Null],
                vec![Value::Int(3), Value::from("c,d"), Value::Float(2.25)],
            ]
        );
    }
}
