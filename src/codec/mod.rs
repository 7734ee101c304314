//! Delimited-text codec
//!
//! The wire format every sink and the bulk loader speak: encoding rows to text
//! lines, decoding streams back into rows, and the BOM/delimiter detection that
//! goes with reading files written by other tools.

pub mod decode;
pub mod encode;
pub mod options;
pub mod sniff;

use std::fs;
use std::path::Path;

use crate::error::Result;

pub use decode::{decode_str, decode_stream, decode_value, parse_bool, CsvDecoder, Field, Record, RowDecoder};
pub use encode::{encode_field, encode_header, encode_row, format_value, CsvWriter, Rendered};
pub use options::{CsvOptions, LineTerminator, TimeZoneSpec};
pub use sniff::{delimiter_name, sniff_delimiter, strip_bom, strip_bom_bytes};

/// Sniff the delimiter of an existing file
pub fn sniff_file(path: &Path, options: &CsvOptions) -> Result<char> {
    if let Some(d) = options.delimiter {
        return Ok(d);
    }
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(strip_bom_bytes(&bytes));
    Ok(sniff_delimiter(&text, options.quote))
}

/// Read the header row of an existing delimited file
///
/// Returns `None` for a missing or empty file.
pub fn read_headers(path: &Path, options: &CsvOptions) -> Result<Option<Vec<String>>> {
    options.validate()?;
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let content = strip_bom_bytes(&bytes);
    if content.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }

    let delimiter = match options.delimiter {
        Some(d) => d,
        None => sniff_delimiter(&String::from_utf8_lossy(content), options.quote),
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .quote(options.quote as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(content);

    match reader.records().next() {
        Some(record) => Ok(Some(record?.iter().map(|s| s.to_string()).collect())),
        None => Ok(None),
    }
}

/// True when a file exists, is non-empty and does not end with a line break
pub fn needs_line_separator(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let bytes = fs::read(path)?;
    Ok(matches!(bytes.last(), Some(b) if *b != b'\n' && *b != b'\r'))
}
