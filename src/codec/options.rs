//! Delimited-text options

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use std::str::FromStr;

use crate::config::TabportConfig;
use crate::error::{Result, TabportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTerminator {
    Crlf,
    Lf,
}

impl LineTerminator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineTerminator::Crlf => "\r\n",
            LineTerminator::Lf => "\n",
        }
    }

    /// Platform convention
    pub fn native() -> Self {
        if cfg!(windows) {
            LineTerminator::Crlf
        } else {
            LineTerminator::Lf
        }
    }
}

/// Target timezone for aware timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZoneSpec {
    Utc,
    Local,
    Fixed(FixedOffset),
}

impl TimeZoneSpec {
    pub fn to_naive(&self, ts: &DateTime<FixedOffset>) -> NaiveDateTime {
        match self {
            TimeZoneSpec::Utc => ts.with_timezone(&Utc).naive_local(),
            TimeZoneSpec::Local => ts.with_timezone(&Local).naive_local(),
            TimeZoneSpec::Fixed(offset) => ts.with_timezone(offset).naive_local(),
        }
    }
}

impl FromStr for TimeZoneSpec {
    type Err = TabportError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "utc" | "z" => return Ok(TimeZoneSpec::Utc),
            "local" => return Ok(TimeZoneSpec::Local),
            _ => {}
        }

        // "+02:00", "-0530"
        let (sign, rest) = match trimmed.chars().next() {
            Some('+') => (1, &trimmed[1..]),
            Some('-') => (-1, &trimmed[1..]),
            _ => return Err(TabportError::Config(format!("Invalid timezone: {}", s))),
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(TabportError::Config(format!("Invalid timezone: {}", s)));
        }
        let hours: i32 = digits[0..2].parse().unwrap_or(0);
        let minutes: i32 = digits[2..4].parse().unwrap_or(0);
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(TimeZoneSpec::Fixed)
            .ok_or_else(|| TabportError::Config(format!("Invalid timezone: {}", s)))
    }
}

/// Encode/decode options shared by every delimited-text reader and writer
#[derive(Debug, Clone, PartialEq)]
pub struct CsvOptions {
    /// `None`: sniffed on read, derived from the decimal separator on write
    pub delimiter: Option<char>,
    pub quote: char,
    /// Unquoted token standing for null (empty by default)
    pub null_value: String,
    pub decimal_separator: char,
    pub line_terminator: LineTerminator,
    /// Write a UTF-8 byte-order-mark at the start of new files
    pub bom: bool,
    /// Spreadsheet-friendly flavor: naive timestamps to the second
    pub excel: bool,
    pub timezone: Option<TimeZoneSpec>,
    pub list_separator: char,
    /// Render booleans as `1`/`0`
    pub bool_digits: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            quote: '"',
            null_value: String::new(),
            decimal_separator: '.',
            line_terminator: LineTerminator::Crlf,
            bom: false,
            excel: false,
            timezone: None,
            list_separator: '|',
            bool_digits: false,
        }
    }
}

impl CsvOptions {
    /// Options tuned for spreadsheet tools using the engine-default locale
    pub fn excel() -> Self {
        Self {
            bom: true,
            excel: true,
            ..Self::default()
        }
    }

    pub fn from_config(config: &TabportConfig) -> Result<Self> {
        let timezone = match &config.timezone {
            Some(tz) => Some(tz.parse()?),
            None => None,
        };
        let options = Self {
            delimiter: config.csv_delimiter,
            quote: config.csv_quote,
            null_value: config.csv_null.clone(),
            decimal_separator: config.csv_decimal_separator,
            bom: config.csv_bom,
            timezone,
            ..Self::default()
        };
        options.validate()?;
        Ok(options)
    }

    /// Delimiter and quote must be single ASCII characters
    pub fn validate(&self) -> Result<()> {
        if let Some(d) = self.delimiter.filter(|d| !d.is_ascii()) {
            return Err(TabportError::Config(format!("delimiter must be an ASCII character, got {:?}", d)));
        }
        if !self.quote.is_ascii() {
            return Err(TabportError::Config(format!(
                "quote must be an ASCII character, got {:?}",
                self.quote
            )));
        }
        Ok(())
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn with_null_value(mut self, null_value: impl Into<String>) -> Self {
        self.null_value = null_value.into();
        self
    }

    pub fn with_decimal_separator(mut self, separator: char) -> Self {
        self.decimal_separator = separator;
        self
    }

    pub fn with_line_terminator(mut self, terminator: LineTerminator) -> Self {
        self.line_terminator = terminator;
        self
    }

    pub fn with_timezone(mut self, timezone: TimeZoneSpec) -> Self {
        self.timezone = Some(timezone);
        self
    }

    /// Delimiter used when writing: explicit, else `;` for comma-decimal locales
    pub fn write_delimiter(&self) -> char {
        match self.delimiter {
            Some(d) => d,
            None if self.excel && self.decimal_separator == ',' => ';',
            None => ',',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_ascii_delimiter_or_quote_is_rejected() {
        assert!(CsvOptions::default().with_delimiter(';').validate().is_ok());
        assert!(matches!(
            CsvOptions::default().with_delimiter('¦').validate(),
            Err(TabportError::Config(_))
        ));
        let options = CsvOptions {
            quote: '«',
            ..CsvOptions::default()
        };
        assert!(matches!(options.validate(), Err(TabportError::Config(_))));
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!("UTC".parse::<TimeZoneSpec>().unwrap(), TimeZoneSpec::Utc);
        assert_eq!(
            "+02:00".parse::<TimeZoneSpec>().unwrap(),
            TimeZoneSpec::Fixed(FixedOffset::east_opt(7200).unwrap())
        );
        assert_eq!(
            "-0530".parse::<TimeZoneSpec>().unwrap(),
            TimeZoneSpec::Fixed(FixedOffset::west_opt(5 * 3600 + 1800).unwrap())
        );
        assert!("Europe/Paris".parse::<TimeZoneSpec>().is_err());
    }

    #[test]
    fn test_write_delimiter() {
        assert_eq!(CsvOptions::default().write_delimiter(), ',');
        assert_eq!(CsvOptions::excel().with_decimal_separator(',').write_delimiter(), ';');
        assert_eq!(CsvOptions::excel().write_delimiter(), ',');
    }
}
