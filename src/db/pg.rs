//! PostgreSQL adapter (sqlx)
//!
//! The adapter contract is synchronous; the connection is driven by a
//! current-thread tokio runtime owned by the adapter. Bulk ingestion uses
//! `COPY ... FROM STDIN` on the live connection.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgConnection, PgCopyIn, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Executor, Postgres, Row, Statement, TypeInfo};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::db::channel::{BulkChannel, CopyStream};
use crate::db::{BulkFormat, ColumnInfo, DbAdapter, Nullable, RowSet, SqlDialect};
use crate::error::{Result, TabportError};
use crate::value::Value;

pub struct PgAdapter {
    runtime: Runtime,
    conn: PgConnection,
}

impl PgAdapter {
    pub fn connect(url: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TabportError::Database(format!("Failed to start runtime: {}", e)))?;
        let conn = runtime
            .block_on(PgConnection::connect(url))
            .map_err(|e| TabportError::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;
        info!("Connected to PostgreSQL");
        Ok(Self { runtime, conn })
    }

    fn fetch(&mut self, sql: &str, params: &[Value]) -> Result<Vec<PgRow>> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }
        let rows = self.runtime.block_on(query.fetch_all(&mut self.conn))?;
        Ok(rows)
    }
}

pub(crate) fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
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
        Value::Duration(d) => query.bind(*d),
        Value::List(_) | Value::Map(_) => query.bind(value.to_json().to_string()),
    }
}

fn row_values(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|i| {
            let type_name = row.columns()[i].type_info().name().to_string();
            decode_column(row, i, &type_name)
        })
        .collect()
}

fn decode_column(row: &PgRow, i: usize, type_name: &str) -> Value {
    let decoded = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(i).map(Value::from),
        "INT2" => row.try_get::<Option<i16>, _>(i).map(|v| Value::from(v.map(i64::from))),
        "INT4" => row.try_get::<Option<i32>, _>(i).map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(i).map(Value::from),
        "FLOAT4" => row.try_get::<Option<f32>, _>(i).map(|v| Value::from(v.map(f64::from))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(i).map(Value::from),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(i).map(Value::from),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(i).map(Value::from),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(i).map(Value::from),
        "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(i).map(Value::from),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(i)
            .map(|v| Value::from(v.map(DateTime::<FixedOffset>::from))),
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
                || db.code().as_deref() == Some("0A000")
                || db.message().contains("foreign key")
        }
        _ => false,
    }
}

/// `COPY ... FROM STDIN` in progress
struct PgCopy<'a> {
    runtime: &'a Runtime,
    copy: PgCopyIn<&'a mut PgConnection>,
}

impl CopyStream for PgCopy<'_> {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.runtime.block_on(self.copy.send(chunk))?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64> {
        let PgCopy { runtime, copy } = *self;
        Ok(runtime.block_on(copy.finish())?)
    }

    fn abort(self: Box<Self>, reason: &str) -> Result<()> {
        let PgCopy { runtime, copy } = *self;
        runtime.block_on(copy.abort(reason.to_string()))?;
        Ok(())
    }
}

impl DbAdapter for PgAdapter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let rows = self.fetch("SELECT to_regclass($1::text) IS NOT NULL", &[Value::from(table)])?;
        Ok(rows
            .first()
            .and_then(|r| r.try_get::<bool, _>(0).ok())
            .unwrap_or(false))
    }

    fn get_table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        if !self.table_exists(table)? {
            return Ok(Vec::new());
        }
        // The extended protocol describes result columns but not their nullability
        let sql = format!("SELECT * FROM {} LIMIT 0", SqlDialect::Postgres.quote_table(table));
        let statement = self.runtime.block_on((&mut self.conn).prepare(&sql))?;
        Ok(statement
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), c.type_info().name(), Nullable::Unknown))
            .collect())
    }

    fn get_primary_key(&mut self, table: &str) -> Result<Vec<String>> {
        let rows = self.fetch(
            "SELECT a.attname::text FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE i.indrelid = to_regclass($1::text) AND i.indisprimary \
             ORDER BY array_position(i.indkey::int2[], a.attnum)",
            &[Value::from(SqlDialect::Postgres.quote_table(table))],
        )?;
        rows.iter()
            .map(|r| r.try_get::<String, _>(0).map_err(TabportError::from))
            .collect()
    }

    fn truncate_table(&mut self, table: &str) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {}", SqlDialect::Postgres.quote_table(table));
        match self.runtime.block_on(sqlx::query(&sql).execute(&mut self.conn)) {
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
            rows: rows.iter().map(row_values).collect(),
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
            null_token: String::new(),
            bool_digits: false,
            header_line: false,
        }
    }

    fn open_bulk_channel(&mut self, table: &str, columns: &[String]) -> Result<BulkChannel<'_>> {
        let dialect = SqlDialect::Postgres;
        let statement = format!(
            "COPY {} ({}) FROM STDIN (FORMAT csv, DELIMITER ',', NULL '')",
            dialect.quote_table(table),
            dialect.quote_columns(columns)
        );
        debug!("{}", statement);
        let copy = self.runtime.block_on(self.conn.copy_in_raw(&statement))?;
        Ok(BulkChannel::Stream(Box::new(PgCopy {
            runtime: &self.runtime,
            copy,
        })))
    }
}
