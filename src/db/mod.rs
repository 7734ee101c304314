//! Database adapters
//!
//! The bulk loader only talks to a database through [`DbAdapter`]: column
//! introspection, truncation, plain statements, and a bulk-ingestion channel
//! whose mechanism (copy protocol, local file, external tool) is hidden behind
//! [`BulkChannel`].

pub mod channel;
pub mod dialect;
pub mod mysql;
pub mod pg;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::codec::{CsvOptions, LineTerminator};
use crate::config::TabportConfig;
use crate::destination::{DbScheme, DbUrl};
use crate::error::Result;
use crate::header::CellFormat;
use crate::value::Value;

pub use channel::{BulkChannel, CopyStream, ExternalTool, FileIngest};
pub use dialect::SqlDialect;
pub use mysql::MySqlAdapter;
pub use pg::PgAdapter;
pub use sqlite::SqliteAdapter;

/// Engine-independent column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Date,
    Time,
    Timestamp,
    Binary,
    Other,
}

impl SemanticType {
    /// Map an engine type name (`INT4`, `varchar(20)`, `tinyint(1)`, ...)
    pub fn from_sql_type(engine_type: &str) -> Self {
        let lower = engine_type.trim().to_ascii_lowercase();
        if lower == "tinyint(1)" {
            return SemanticType::Boolean;
        }
        let base = lower
            .split('(')
            .next()
            .unwrap_or("")
            .trim_end_matches(" unsigned")
            .trim();

        match base {
            "int" | "integer" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "tinyint" | "mediumint"
            | "serial" | "bigserial" | "smallserial" => SemanticType::Integer,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => SemanticType::Float,
            "numeric" | "decimal" | "money" => SemanticType::Decimal,
            "bool" | "boolean" | "bit" => SemanticType::Boolean,
            "date" => SemanticType::Date,
            "time" | "timetz" | "time without time zone" | "time with time zone" => SemanticType::Time,
            "timestamp" | "timestamptz" | "datetime" | "timestamp without time zone" | "timestamp with time zone" => {
                SemanticType::Timestamp
            }
            "text" | "varchar" | "char" | "bpchar" | "character" | "character varying" | "nvarchar" | "nchar"
            | "tinytext" | "mediumtext" | "longtext" | "clob" | "uuid" | "json" | "jsonb" | "enum" => {
                SemanticType::Text
            }
            "blob" | "bytea" | "binary" | "varbinary" | "longblob" => SemanticType::Binary,
            // Type affinity rules for free-form declarations
            other if other.contains("int") && !other.contains("interval") && !other.contains("point") => {
                SemanticType::Integer
            }
            other if other.contains("char") || other.contains("clob") || other.contains("text") => SemanticType::Text,
            other if other.contains("real") || other.contains("floa") || other.contains("doub") => SemanticType::Float,
            _ => SemanticType::Other,
        }
    }

    /// Decode hint applied to source text headed for a column of this type
    pub fn cell_format(&self) -> Option<CellFormat> {
        match self {
            SemanticType::Integer => Some(CellFormat::Integer),
            SemanticType::Float => Some(CellFormat::Float),
            SemanticType::Decimal => Some(CellFormat::Decimal),
            SemanticType::Boolean => Some(CellFormat::Boolean),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nullable {
    Yes,
    No,
    /// The client protocol does not report it
    Unknown,
}

/// Normalized column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub semantic_type: SemanticType,
    /// Type name as reported by the engine
    pub engine_type: String,
    pub nullable: Nullable,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, engine_type: impl Into<String>, nullable: Nullable) -> Self {
        let engine_type = engine_type.into();
        Self {
            name: name.into(),
            semantic_type: SemanticType::from_sql_type(&engine_type),
            engine_type,
            nullable,
        }
    }
}

/// Materialized query result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// First value of the first row
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|r| r.first())
    }
}

/// Text layout a bulk channel expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFormat {
    pub delimiter: char,
    /// Unquoted token read back as NULL
    pub null_token: String,
    /// Booleans as `1`/`0`
    pub bool_digits: bool,
    /// The channel expects a header line naming the columns
    pub header_line: bool,
}

impl BulkFormat {
    pub fn csv_options(&self) -> CsvOptions {
        CsvOptions {
            delimiter: Some(self.delimiter),
            null_value: self.null_token.clone(),
            line_terminator: LineTerminator::Lf,
            bool_digits: self.bool_digits,
            ..CsvOptions::default()
        }
    }
}

/// Capabilities the bulk loader needs from a database engine
pub trait DbAdapter {
    fn dialect(&self) -> SqlDialect;

    fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Columns in table order; empty when the table does not exist
    fn get_table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Primary key columns in key order
    fn get_primary_key(&mut self, table: &str) -> Result<Vec<String>>;

    /// Remove every row; fails with `ForeignKeyViolation` when another table references it
    fn truncate_table(&mut self, table: &str) -> Result<()>;

    fn execute_query(&mut self, sql: &str, params: &[Value]) -> Result<RowSet>;

    /// Run a statement, returning the number of affected rows
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    fn bulk_format(&self) -> BulkFormat;

    /// Whether a staging table created as `TEMPORARY` is visible to the bulk channel
    fn supports_temporary_staging(&self) -> bool {
        true
    }

    fn open_bulk_channel(&mut self, table: &str, columns: &[String]) -> Result<BulkChannel<'_>>;
}

/// Open an adapter for a database URL
pub fn connect(url: &DbUrl, config: &TabportConfig) -> Result<Box<dyn DbAdapter>> {
    let adapter: Box<dyn DbAdapter> = match url.scheme {
        DbScheme::Sqlite => Box::new(SqliteAdapter::open(url.sqlite_path().as_deref(), config)?),
        DbScheme::Postgres => Box::new(PgAdapter::connect(&url.connection_url)?),
        DbScheme::Mysql => Box::new(MySqlAdapter::connect(&url.connection_url)?),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_type_mapping() {
        assert_eq!(SemanticType::from_sql_type("INT4"), SemanticType::Integer);
        assert_eq!(SemanticType::from_sql_type("bigint unsigned"), SemanticType::Integer);
        assert_eq!(SemanticType::from_sql_type("tinyint(1)"), SemanticType::Boolean);
        assert_eq!(SemanticType::from_sql_type("NUMERIC(10,2)"), SemanticType::Decimal);
        assert_eq!(SemanticType::from_sql_type("character varying"), SemanticType::Text);
        assert_eq!(SemanticType::from_sql_type("TIMESTAMPTZ"), SemanticType::Timestamp);
        assert_eq!(SemanticType::from_sql_type("interval"), SemanticType::Other);
        assert_eq!(SemanticType::from_sql_type("UNSIGNED BIG INT"), SemanticType::Integer);
        assert_eq!(SemanticType::from_sql_type(""), SemanticType::Other);
    }
}
