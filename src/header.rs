//! Column headers and cell formats

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TabportError};

/// Selects how a cell renders to text (and how text decodes back)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellFormat {
    Text,
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    Time,
    Timestamp,
    /// Byte count rendered in GiB with nine decimals
    Gib,
    /// Byte count rendered with binary multiples (`20.0 MiB`)
    HumanBytes,
    /// Quantity rendered with SI multiples (`8.4 M`)
    HumanNumber,
    /// Fixed decimal scaling
    Decimals(u8),
}

impl CellFormat {
    /// Formats whose text representation carries a decimal separator
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CellFormat::Integer
                | CellFormat::Float
                | CellFormat::Decimal
                | CellFormat::Gib
                | CellFormat::HumanBytes
                | CellFormat::HumanNumber
                | CellFormat::Decimals(_)
        )
    }
}

impl FromStr for CellFormat {
    type Err = TabportError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let format = match lower.as_str() {
            "text" | "str" => CellFormat::Text,
            "int" | "integer" => CellFormat::Integer,
            "float" => CellFormat::Float,
            "decimal" => CellFormat::Decimal,
            "bool" | "boolean" => CellFormat::Boolean,
            "date" => CellFormat::Date,
            "time" => CellFormat::Time,
            "timestamp" | "datetime" => CellFormat::Timestamp,
            "gib" => CellFormat::Gib,
            "human_bytes" => CellFormat::HumanBytes,
            "human_number" => CellFormat::HumanNumber,
            other => {
                let digits = other
                    .strip_prefix("decimals(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|n| n.parse::<u8>().ok());
                match digits {
                    Some(n) => CellFormat::Decimals(n),
                    None => return Err(TabportError::Config(format!("Unknown cell format: {}", s))),
                }
            }
        };
        Ok(format)
    }
}

/// A named, ordered column with an optional cell format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    #[serde(default)]
    pub format: Option<CellFormat>,
}

impl Header {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: None,
        }
    }

    pub fn with_format(name: impl Into<String>, format: CellFormat) -> Self {
        Self {
            name: name.into(),
            format: Some(format),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Header {
    fn from(name: &str) -> Self {
        Header::new(name)
    }
}

impl From<String> for Header {
    fn from(name: String) -> Self {
        Header::new(name)
    }
}

/// Build a header list from plain names
pub fn headers<I, S>(names: I) -> Vec<Header>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(|n| Header::new(n)).collect()
}

/// Header selection used when decoding: every remaining column, or one named column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderSpec {
    All,
    Named(Header),
}

impl HeaderSpec {
    pub fn named(name: impl Into<String>) -> Self {
        HeaderSpec::Named(Header::new(name))
    }

    pub fn typed(name: impl Into<String>, format: CellFormat) -> Self {
        HeaderSpec::Named(Header::with_format(name, format))
    }
}

impl From<&str> for HeaderSpec {
    fn from(s: &str) -> Self {
        if s == "*" {
            HeaderSpec::All
        } else {
            HeaderSpec::named(s)
        }
    }
}

impl From<Header> for HeaderSpec {
    fn from(h: Header) -> Self {
        HeaderSpec::Named(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cell_format() {
        assert_eq!("gib".parse::<CellFormat>().unwrap(), CellFormat::Gib);
        assert_eq!("Decimals(3)".parse::<CellFormat>().unwrap(), CellFormat::Decimals(3));
        assert!("nope".parse::<CellFormat>().is_err());
    }

    #[test]
    fn test_star_spec() {
        assert_eq!(HeaderSpec::from("*"), HeaderSpec::All);
        assert_eq!(HeaderSpec::from("id"), HeaderSpec::named("id"));
    }
}
