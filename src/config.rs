//! Environment-driven configuration
//!
//! Values are read from the process environment after an optional `.env`
//! file has been loaded. Every field has a default so an empty environment
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Result, TabportError};

/// How the SQLite adapter feeds its bulk channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqliteBulkMode {
    /// csv virtual table reading a temporary file in-process
    Vtab,
    /// `sqlite3` command-line `.import` in a child process
    Cli,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabportConfig {
    pub csv_delimiter: Option<char>,
    pub csv_decimal_separator: char,
    pub csv_null: String,
    pub csv_quote: char,
    pub csv_bom: bool,
    pub timezone: Option<String>,
    pub workbook_table: String,
    pub sqlite_bulk: SqliteBulkMode,
    pub sqlite_cli: PathBuf,
}

impl Default for TabportConfig {
    fn default() -> Self {
        Self {
            csv_delimiter: None,
            csv_decimal_separator: '.',
            csv_null: String::new(),
            csv_quote: '"',
            csv_bom: false,
            timezone: None,
            workbook_table: "Out".to_string(),
            sqlite_bulk: SqliteBulkMode::Vtab,
            sqlite_cli: PathBuf::from("sqlite3"),
        }
    }
}

impl TabportConfig {
    /// Load `.env` (if present) then read the environment
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("TABPORT_CSV_DELIMITER") {
            config.csv_delimiter = Some(parse_ascii_char("TABPORT_CSV_DELIMITER", &v)?);
        }
        if let Some(v) = lookup("TABPORT_CSV_DECIMAL_SEPARATOR") {
            config.csv_decimal_separator = parse_char("TABPORT_CSV_DECIMAL_SEPARATOR", &v)?;
        }
        if let Some(v) = lookup("TABPORT_CSV_NULL") {
            config.csv_null = v;
        }
        if let Some(v) = lookup("TABPORT_CSV_QUOTE") {
            config.csv_quote = parse_ascii_char("TABPORT_CSV_QUOTE", &v)?;
        }
        if let Some(v) = lookup("TABPORT_CSV_BOM") {
            config.csv_bom = parse_bool("TABPORT_CSV_BOM", &v)?;
        }
        if let Some(v) = lookup("TABPORT_TZ") {
            if !v.trim().is_empty() {
                config.timezone = Some(v.trim().to_string());
            }
        }
        if let Some(v) = lookup("TABPORT_WORKBOOK_TABLE") {
            config.workbook_table = v;
        }
        if let Some(v) = lookup("TABPORT_SQLITE_BULK") {
            config.sqlite_bulk = match v.trim().to_ascii_lowercase().as_str() {
                "vtab" => SqliteBulkMode::Vtab,
                "cli" => SqliteBulkMode::Cli,
                other => {
                    return Err(TabportError::Config(format!(
                        "TABPORT_SQLITE_BULK must be 'vtab' or 'cli', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(v) = lookup("TABPORT_SQLITE_CLI") {
            config.sqlite_cli = PathBuf::from(v);
        }

        Ok(config)
    }
}

fn parse_char(key: &str, value: &str) -> Result<char> {
    let unescaped = match value {
        "\\t" | "tab" => "\t",
        other => other,
    };
    let mut chars = unescaped.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(TabportError::Config(format!(
            "{} must be a single character, got '{}'",
            key, value
        ))),
    }
}

fn parse_ascii_char(key: &str, value: &str) -> Result<char> {
    let c = parse_char(key, value)?;
    if !c.is_ascii() {
        return Err(TabportError::Config(format!("{} must be an ASCII character, got '{}'", key, value)));
    }
    Ok(c)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(TabportError::Config(format!("{} must be a boolean, got '{}'", key, value))),
    }
}
