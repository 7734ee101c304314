//! MySQL adapter (sqlx)
//!
//! Bulk ingestion goes through `LOAD DATA INFILE` on a spooled file, so the
//! server must be able to read the client's temporary directory (same host or
//! shared volume, with `secure_file_priv` allowing it).

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, MySql, Row, TypeInfo};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::codec::{format_value, CsvOptions, Rendered};
use crate::db::channel::{BulkChannel, FileIngest};
use crate::db::{BulkFormat, ColumnInfo, DbAdapter, Nullable, RowSet, SqlDialect};
use crate::error::{Result, TabportError};
use crate::value::Value;

pub struct MySqlAdapter {
    runtime: Runtime,
    conn: MySqlConnection,
}

impl MySqlAdapter {
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TabportError::Database(format!("Failed to start runtime: {}", e)))?;
        let conn = runtime
            .block_on(MySqlConnection::connect(url))
            .map_err(|e| TabportError::Database(format!("Failed to connect to MySQL: {}", e)))?;
        info!("Connected to MySQL");
        Ok(Self { runtime, conn })
    }

    fn fetch(&mut self, sql: &str, params: &[Value]) -> Result<Vec<MySqlRow>> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }
        Ok(self.runtime.block_on(query.fetch_all(&mut self.conn))?)
    }

    fn strings(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<String>>> {
        let rows = self.fetch(sql, params)?;
        rows.iter()
            .map(|r| {
                (0..r.columns().len())
                    .map(|i| r.try_get::<String, _>(i).map_err(TabportError::from))
                    .collect()
            })
            .collect()
    }
}

fn bind_value<'q>(query: Query<'q, MySql, MySqlArguments>, value: &Value) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(d) => query.bind(*d),
        Value::Text(s) => query.bind(s.clone()),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::Timestamp(ts) => query.bind(*ts),
        Value::TimestampTz(ts) => query.bind(ts.with_timezone(&Utc)),
        Value::Duration(_) | Value::List(_) | Value::Map(_) => {
            match format_value(value, None, &CsvOptions::default()) {
                Rendered::Text(text) => query.bind(text),
                Rendered::Null => query.bind(None::<String>),
            }
        }
    }
}

fn decode_column(row: &MySqlRow, i: usize) -> Value {
    let type_name = row.columns()[i].type_info().name().to_ascii_uppercase();
    let base = type_name.trim_end_matches(" UNSIGNED");
    let decoded = match base {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(i).map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" if type_name.ends_with("UNSIGNED") => {
            row.try_get::<Option<u64>, _>(i).map(|v| match v {
                Some(n) => i64::try_from(n).map(Value::Int).unwrap_or_else(|_| Value::Text(n.to_string())),
                None => Value::Null,
            })
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row.try_get::<Option<i64>, _>(i).map(Value::from),
        "FLOAT" | "DOUBLE" => row.try_get::<Option<f64>, _>(i).map(Value::from),
        "DECIMAL" => row.try_get::<Option<Decimal>, _>(i).map(Value::from),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(i).map(Value::from),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(i).map(Value::from),
        "DATETIME" | "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(i).map(Value::from),
        _ => row.try_get::<Option<String>, _>(i).map(Value::from),
    };
    decoded.unwrap_or_else(|e| {
        debug!("Cannot decode column {} ({}): {}", i, type_name, e);
        Value::Null
    })
}

fn is_foreign_key_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), sqlx::error::ErrorKind::ForeignKeyViolation)
                || db.message().to_ascii_lowercase().contains("foreign key")
        }
        _ => false,
    }
}

/// `LOAD DATA INFILE` from a spooled file
struct LoadDataInfile<'a> {
    runtime: &'a Runtime,
    conn: &'a mut MySqlConnection,
    table: String,
    columns: Vec<String>,
}

impl FileIngest for LoadDataInfile<'_> {
    fn ingest_file(&mut self, path: &Path) -> Result<u64> {
        let dialect = SqlDialect::Mysql;
        let file = path.to_string_lossy().replace('\\', "\\\\").replace('\'', "''");
        // LOAD DATA is not allowed as a prepared statement
        let statement = format!(
            "LOAD DATA INFILE '{}' INTO TABLE {} CHARACTER SET utf8mb4 \
             FIELDS TERMINATED BY ',' OPTIONALLY ENCLOSED BY '\"' ESCAPED BY '' \
             LINES TERMINATED BY '\\n' ({})",
            file,
            dialect.quote_table(&self.table),
            dialect.quote_columns(&self.columns)
        );
        debug!("{}", statement);
        let result = self.runtime.block_on(sqlx::raw_sql(&statement).execute(&mut *self.conn))?;
        Ok(result.rows_affected())
    }
}

impl DbAdapter for MySqlAdapter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Mysql
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let rows = self.fetch(
            "SELECT COUNT(*) FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
            &[Value::from(table)],
        )?;
        Ok(rows.first().and_then(|r| r.try_get::<i64, _>(0).ok()).unwrap_or(0) > 0)
    }

    fn get_table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self.strings(
            "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR), CAST(IS_NULLABLE AS CHAR) \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
            &[Value::from(table)],
        )?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let nullable = if r[2] == "YES" { Nullable::Yes } else { Nullable::No };
                ColumnInfo::new(r[0].clone(), r[1].clone(), nullable)
            })
            .collect())
    }

    fn get_primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let rows = self.strings(
            "SELECT CAST(COLUMN_NAME AS CHAR) FROM information_schema.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION",
            &[Value::from(table)],
        )?;
        Ok(rows.into_iter().filter_map(|r| r.into_iter().next()).collect())
    }

    fn truncate_table(&mut self, table: &str) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {}", SqlDialect::Mysql.quote_table(table));
        match self.runtime.block_on(sqlx::raw_sql(&sql).execute(&mut self.conn)) {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_error(&e) => Err(TabportError::ForeignKeyViolation {
                table: table.to_string(),
                message: e.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn execute_query(&mut self, sql: &str, params: &[Value]) -> Result<RowSet> {
        let rows = self.fetch(sql, params)?;
        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        Ok(RowSet {
            columns,
            rows: rows
                .iter()
                .map(|r| (0..r.columns().len()).map(|i| decode_column(r, i)).collect())
                .collect(),
        })
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }
        let result = self.runtime.block_on(query.execute(&mut self.conn))?;
        Ok(result.rows_affected())
    }

    fn bulk_format(&self) -> BulkFormat {
        BulkFormat {
            delimiter: ',',
            null_token: "NULL".to_string(),
            bool_digits: true,
            header_line: false,
        }
    }

    fn open_bulk_channel(&mut self, table: &str, columns: &[String]) -> Result<BulkChannel<'_>> {
        Ok(BulkChannel::LocalFile(Box::new(LoadDataInfile {
            runtime: &self.runtime,
            conn: &mut self.conn,
            table: table.to_string(),
            columns: columns.to_vec(),
        })))
    }
}
