//! Streaming delimited-text decoder
//!
//! The record reader works on physical lines so that every error can name the
//! line it was raised on, and keeps track of whether each field was quoted:
//! with a non-empty null sentinel, `""` and an unquoted empty field decode
//! differently.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tracing::debug;

use crate::codec::options::CsvOptions;
use crate::codec::sniff::{sniff_delimiter, strip_bom};
use crate::error::{Result, TabportError};
use crate::header::{CellFormat, HeaderSpec};
use crate::value::{Row, Value};

const SNIFF_LINES: usize = 5;

/// One raw field of a record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Field {
    pub text: String,
    pub quoted: bool,
}

impl Field {
    pub fn new(text: impl Into<String>, quoted: bool) -> Self {
        Self {
            text: text.into(),
            quoted,
        }
    }
}

/// One logical record with the physical line it started on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: usize,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Record reader over a buffered text stream
pub struct CsvDecoder<R: BufRead> {
    reader: R,
    delimiter: char,
    quote: char,
    lookahead: VecDeque<String>,
    line: usize,
    at_start: bool,
    /// Field count of the first record
    width: Option<usize>,
}

impl<R: BufRead> CsvDecoder<R> {
    /// Create a decoder, sniffing the delimiter when the options leave it unset
    pub fn new(reader: R, options: &CsvOptions) -> Result<Self> {
        options.validate()?;
        let mut decoder = Self {
            reader,
            delimiter: options.delimiter.unwrap_or(','),
            quote: options.quote,
            lookahead: VecDeque::new(),
            line: 0,
            at_start: true,
            width: None,
        };

        if options.delimiter.is_none() {
            for _ in 0..SNIFF_LINES {
                match decoder.read_physical_line(decoder.line + decoder.lookahead.len() + 1)? {
                    Some(line) => decoder.lookahead.push_back(line),
                    None => break,
                }
            }
            let sample: String = decoder.lookahead.iter().map(String::as_str).collect();
            decoder.delimiter = sniff_delimiter(&sample, decoder.quote);
            debug!("Sniffed delimiter {:?}", decoder.delimiter);
        }

        Ok(decoder)
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Physical line number of the last line consumed
    pub fn line(&self) -> usize {
        self.line
    }

    fn read_physical_line(&mut self, line_number: usize) -> Result<Option<String>> {
        let mut buf = String::new();
        let read = self.reader.read_line(&mut buf).map_err(|e| {
            if e.kind() == ErrorKind::InvalidData {
                TabportError::format(line_number, "stream is not valid UTF-8")
            } else {
                TabportError::Io(e)
            }
        })?;
        if read == 0 {
            return Ok(None);
        }
        if self.at_start {
            self.at_start = false;
            buf = strip_bom(&buf).to_string();
        }
        Ok(Some(buf))
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let next = match self.lookahead.pop_front() {
            Some(line) => Some(line),
            None => self.read_physical_line(self.line + 1)?,
        };
        if next.is_some() {
            self.line += 1;
        }
        Ok(next)
    }

    /// Read the next record
    ///
    /// Blank lines are skipped, except in single-column documents where a
    /// blank line is one empty field.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let mut line = loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(l) if split_terminator(&l).0.is_empty() => {
                    if self.width == Some(1) {
                        return Ok(Some(Record {
                            line: self.line,
                            fields: vec![Field::default()],
                        }));
                    }
                }
                Some(l) => break l,
            }
        };

        let start_line = self.line;
        let mut fields = Vec::new();
        let mut field = Field::default();
        let mut state = State::FieldStart;

        loop {
            let (content, terminator) = split_terminator(&line);
            for c in content.chars() {
                state = match state {
                    State::FieldStart if c == self.quote => {
                        field.quoted = true;
                        State::Quoted
                    }
                    State::FieldStart | State::Unquoted if c == self.delimiter => {
                        fields.push(std::mem::take(&mut field));
                        State::FieldStart
                    }
                    State::FieldStart | State::Unquoted => {
                        field.text.push(c);
                        State::Unquoted
                    }
                    State::Quoted if c == self.quote => State::QuoteInQuoted,
                    State::Quoted => {
                        field.text.push(c);
                        State::Quoted
                    }
                    State::QuoteInQuoted if c == self.quote => {
                        field.text.push(c);
                        State::Quoted
                    }
                    State::QuoteInQuoted if c == self.delimiter => {
                        fields.push(std::mem::take(&mut field));
                        State::FieldStart
                    }
                    State::QuoteInQuoted => {
                        return Err(TabportError::format(
                            self.line,
                            format!("unexpected {:?} after closing quote", c),
                        ));
                    }
                };
            }

            if state != State::Quoted {
                break;
            }
            // Line break inside a quoted field
            field.text.push_str(terminator);
            line = match self.next_line()? {
                Some(next) => next,
                None => return Err(TabportError::format(start_line, "unterminated quoted field")),
            };
        }

        fields.push(field);
        self.width.get_or_insert(fields.len());
        Ok(Some(Record {
            line: start_line,
            fields,
        }))
    }
}

fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(content) = line.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = line.strip_suffix('\n') {
        (content, "\n")
    } else if let Some(content) = line.strip_suffix('\r') {
        (content, "\r")
    } else {
        (line, "")
    }
}

/// Decode one raw field according to an optional format hint
pub fn decode_value(field: &Field, format: Option<CellFormat>, options: &CsvOptions, line: usize) -> Result<Value> {
    if !field.quoted && field.text == options.null_value {
        return Ok(Value::Null);
    }

    let format = match format {
        None | Some(CellFormat::Text) => return Ok(Value::Text(field.text.clone())),
        Some(f) => f,
    };

    let text = field.text.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }

    let invalid = |kind: &str| TabportError::format(line, format!("invalid {} value {:?}", kind, field.text));
    let numeric = || {
        if options.decimal_separator == '.' {
            text.to_string()
        } else {
            text.replace(options.decimal_separator, ".")
        }
    };

    let value = match format {
        CellFormat::Text => Value::Text(field.text.clone()),
        CellFormat::Integer => Value::Int(text.parse().map_err(|_| invalid("integer"))?),
        CellFormat::Float => Value::Float(numeric().parse().map_err(|_| invalid("float"))?),
        CellFormat::Decimal | CellFormat::Decimals(_) => {
            Value::Decimal(Decimal::from_str(&numeric()).map_err(|_| invalid("decimal"))?)
        }
        CellFormat::Boolean => Value::Bool(parse_bool(text).ok_or_else(|| invalid("boolean"))?),
        CellFormat::Date => Value::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| invalid("date"))?),
        CellFormat::Time => Value::Time(NaiveTime::parse_from_str(text, "%H:%M:%S%.f").map_err(|_| invalid("time"))?),
        CellFormat::Timestamp => parse_timestamp(text).ok_or_else(|| invalid("timestamp"))?,
        // Display-only formats do not decode back to numbers
        CellFormat::Gib | CellFormat::HumanBytes | CellFormat::HumanNumber => Value::Text(field.text.clone()),
    };
    Ok(value)
}

/// Accepts `true/false/1/0/t/f/yes/no`, case-insensitive
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<Value> {
    for pattern in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(text, pattern) {
            return Some(Value::TimestampTz(ts));
        }
    }
    for pattern in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(Value::Timestamp(ts));
        }
    }
    None
}

/// An output column of a [`RowDecoder`]
#[derive(Debug, Clone, PartialEq)]
struct OutColumn {
    source_index: usize,
    name: String,
    format: Option<CellFormat>,
}

/// Iterator of decoded rows
///
/// Rows are `Row::Keyed` when column names are known (from the header row or
/// from explicit specs), `Row::Positional` otherwise.
pub struct RowDecoder<R: BufRead> {
    decoder: CsvDecoder<R>,
    options: CsvOptions,
    columns: Option<Vec<OutColumn>>,
    source_headers: Option<Vec<String>>,
    finished: bool,
}

impl<R: BufRead> RowDecoder<R> {
    pub fn new(reader: R, options: &CsvOptions, specs: Option<&[HeaderSpec]>, has_header_row: bool) -> Result<Self> {
        let mut decoder = CsvDecoder::new(reader, options)?;

        let source_headers = if has_header_row {
            let names = decoder
                .read_record()?
                .map(|record| record.fields.into_iter().map(|f| f.text).collect())
                .unwrap_or_default();
            Some(names)
        } else {
            None
        };

        let columns = plan_columns(source_headers.as_deref(), specs)?;
        let options = CsvOptions {
            delimiter: Some(decoder.delimiter()),
            ..options.clone()
        };

        Ok(Self {
            decoder,
            options,
            columns,
            source_headers,
            finished: false,
        })
    }

    /// Delimiter in effect (explicit or sniffed)
    pub fn delimiter(&self) -> char {
        self.decoder.delimiter()
    }

    /// Header row read from the source, if any
    pub fn source_headers(&self) -> Option<&[String]> {
        self.source_headers.as_deref()
    }

    /// Names of the decoded columns, in output order (`None` for positional output)
    pub fn headers(&self) -> Option<Vec<String>> {
        self.columns
            .as_ref()
            .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
    }

    /// Physical line of the record last returned
    pub fn line(&self) -> usize {
        self.decoder.line()
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        let record = match self.decoder.read_record()? {
            Some(r) => r,
            None => return Ok(None),
        };

        match &self.columns {
            None => {
                let values = record
                    .fields
                    .iter()
                    .map(|f| decode_value(f, None, &self.options, record.line))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(Row::Positional(values)))
            }
            Some(columns) => {
                let mut entries = Vec::with_capacity(columns.len());
                for column in columns {
                    let value = match record.fields.get(column.source_index) {
                        Some(field) => decode_value(field, column.format, &self.options, record.line)?,
                        None => Value::Null,
                    };
                    entries.push((column.name.clone(), value));
                }
                Ok(Some(Row::Keyed(entries)))
            }
        }
    }
}

impl<R: BufRead> Iterator for RowDecoder<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn plan_columns(source_headers: Option<&[String]>, specs: Option<&[HeaderSpec]>) -> Result<Option<Vec<OutColumn>>> {
    let named: Vec<_> = specs
        .unwrap_or_default()
        .iter()
        .filter_map(|s| match s {
            HeaderSpec::Named(h) => Some(h),
            HeaderSpec::All => None,
        })
        .collect();
    let wants_all = specs.map_or(false, |s| s.iter().any(|spec| *spec == HeaderSpec::All));

    match (source_headers, specs) {
        (None, None) => Ok(None),
        (None, Some(_)) if wants_all => Err(TabportError::HeaderMismatch(
            "\"*\" requires a header row in the source".to_string(),
        )),
        (None, Some(_)) => Ok(Some(
            named
                .iter()
                .enumerate()
                .map(|(i, h)| OutColumn {
                    source_index: i,
                    name: h.name.clone(),
                    format: h.format,
                })
                .collect(),
        )),
        (Some(source), None) => Ok(Some(
            source
                .iter()
                .enumerate()
                .map(|(i, name)| OutColumn {
                    source_index: i,
                    name: name.clone(),
                    format: None,
                })
                .collect(),
        )),
        (Some(source), Some(_)) => {
            let missing: Vec<&str> = named
                .iter()
                .filter(|h| !source.contains(&h.name))
                .map(|h| h.name.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(TabportError::HeaderMismatch(format!(
                    "column(s) not found in source header: {}",
                    missing.join(", ")
                )));
            }

            if wants_all {
                Ok(Some(
                    source
                        .iter()
                        .enumerate()
                        .map(|(i, name)| OutColumn {
                            source_index: i,
                            name: name.clone(),
                            format: named.iter().find(|h| h.name == *name).and_then(|h| h.format),
                        })
                        .collect(),
                ))
            } else {
                Ok(Some(
                    named
                        .iter()
                        .filter_map(|h| {
                            source.iter().position(|n| *n == h.name).map(|i| OutColumn {
                                source_index: i,
                                name: h.name.clone(),
                                format: h.format,
                            })
                        })
                        .collect(),
                ))
            }
        }
    }
}

/// Decode a stream lazily
///
/// When `specs` is `None` and `has_header_row` is set, the first record names
/// the columns. `HeaderSpec::All` keeps every source column verbatim, named
/// specs add format hints or select and reorder columns.
pub fn decode_stream<R: Read>(
    reader: R,
    options: &CsvOptions,
    specs: Option<&[HeaderSpec]>,
    has_header_row: bool,
) -> Result<RowDecoder<BufReader<R>>> {
    RowDecoder::new(BufReader::new(reader), options, specs, has_header_row)
}

/// Decode an in-memory document into rows
pub fn decode_str(text: &str, options: &CsvOptions, specs: Option<&[HeaderSpec]>, has_header_row: bool) -> Result<Vec<Row>> {
    decode_stream(text.as_bytes(), options, specs, has_header_row)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(text: &str, options: &CsvOptions) -> Vec<Vec<Field>> {
        let mut decoder = CsvDecoder::new(text.as_bytes(), options).unwrap();
        let mut out = Vec::new();
        while let Some(record) = decoder.read_record().unwrap() {
            out.push(record.fields);
        }
        out
    }

    #[test]
    fn test_quoted_fields_and_doubled_quotes() {
        let options = CsvOptions::default().with_delimiter(',');
        let fields = records("a,\"b,c\",\"say \"\"hi\"\"\",\r\n", &options);
        assert_eq!(
            fields,
            vec![vec![
                Field::new("a", false),
                Field::new("b,c", true),
                Field::new("say \"hi\"", true),
                Field::new("", false),
            ]]
        );
    }

    #[test]
    fn test_multiline_field_keeps_line_break() {
        let options = CsvOptions::default().with_delimiter(';');
        let fields = records("1;\"New\r\nLine\";x\r\n2;y;z", &options);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0][1], Field::new("New\r\nLine", true));
        assert_eq!(fields[1][2], Field::new("z", false));
    }

    #[test]
    fn test_errors_carry_line_number() {
        let options = CsvOptions::default().with_delimiter(',');
        let mut decoder = CsvDecoder::new("a,b\n\"x\"y,z\n".as_bytes(), &options).unwrap();
        decoder.read_record().unwrap();
        match decoder.read_record() {
            Err(TabportError::Format { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected a format error, got {:?}", other),
        }

        let mut decoder = CsvDecoder::new("a\n\"open\n".as_bytes(), &options).unwrap();
        decoder.read_record().unwrap();
        assert!(matches!(decoder.read_record(), Err(TabportError::Format { line: 2, .. })));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let options = CsvOptions::default().with_delimiter(',');
        assert_eq!(records("\na,b\n\n\r\nc,d\n", &options).len(), 2);
    }

    #[test]
    fn test_blank_line_is_empty_field_in_single_column() {
        let options = CsvOptions::default().with_delimiter(',');
        let fields = records("a\r\n1\r\n\r\n3", &options);
        assert_eq!(
            fields,
            vec![
                vec![Field::new("a", false)],
                vec![Field::new("1", false)],
                vec![Field::new("", false)],
                vec![Field::new("3", false)],
            ]
        );
    }

    #[test]
    fn test_sniffs_delimiter_and_strips_bom() {
        let rows = decode_str("\u{feff}id;name\n1;x", &CsvOptions::default(), None, true).unwrap();
        assert_eq!(
            rows,
            vec![Row::keyed([("id", Value::from("1")), ("name", Value::from("x"))])]
        );
    }

    #[test]
    fn test_null_sentinel_distinguishes_empty_string() {
        let options = CsvOptions::default().with_delimiter(',').with_null_value("NULL");
        let rows = decode_str("NULL,\"NULL\",\"\",", &options, None, false).unwrap();
        assert_eq!(
            rows,
            vec![Row::Positional(vec![
                Value::Null,
                Value::from("NULL"),
                Value::from(""),
                Value::from(""),
            ])]
        );

        let rows = decode_str(",\"\"", &CsvOptions::default().with_delimiter(','), None, false).unwrap();
        assert_eq!(rows, vec![Row::Positional(vec![Value::Null, Value::from("")])]);
    }

    #[test]
    fn test_decimal_separator_only_for_numeric_columns() {
        let options = CsvOptions::default().with_delimiter(';').with_decimal_separator(',');
        let specs = vec![
            HeaderSpec::typed("amount", CellFormat::Float),
            HeaderSpec::named("label"),
        ];
        let rows = decode_str("amount;label\n3,14;1,5", &options, Some(&specs), true).unwrap();
        assert_eq!(
            rows,
            vec![Row::keyed([("amount", Value::Float(3.14)), ("label", Value::from("1,5"))])]
        );
    }

    #[test]
    fn test_star_keeps_all_columns_with_format_overrides() {
        let options = CsvOptions::default().with_delimiter(',');
        let specs = vec![HeaderSpec::All, HeaderSpec::typed("id", CellFormat::Integer)];
        let rows = decode_str("id,name\n7,x", &options, Some(&specs), true).unwrap();
        assert_eq!(rows, vec![Row::keyed([("id", Value::Int(7)), ("name", Value::from("x"))])]);
    }

    #[test]
    fn test_named_specs_select_and_reorder() {
        let options = CsvOptions::default().with_delimiter(',');
        let specs = vec![HeaderSpec::named("b"), HeaderSpec::named("a")];
        let rows = decode_str("a,b,c\n1,2,3", &options, Some(&specs), true).unwrap();
        assert_eq!(rows, vec![Row::keyed([("b", "2"), ("a", "1")])]);

        let missing = vec![HeaderSpec::named("zz")];
        assert!(matches!(
            decode_str("a,b\n1,2", &options, Some(&missing), true),
            Err(TabportError::HeaderMismatch(_))
        ));
    }

    #[test]
    fn test_specs_without_header_row_are_positional() {
        let options = CsvOptions::default().with_delimiter(',');
        let specs = vec![HeaderSpec::named("x"), HeaderSpec::typed("y", CellFormat::Boolean)];
        let rows = decode_str("1,yes\n2", &options, Some(&specs), false).unwrap();
        assert_eq!(
            rows,
            vec![
                Row::keyed([("x", Value::from("1")), ("y", Value::Bool(true))]),
                Row::keyed([("x", Value::from("2")), ("y", Value::Null)]),
            ]
        );
        assert!(decode_str("1", &options, Some(&[HeaderSpec::All]), false).is_err());
    }

    #[test]
    fn test_invalid_typed_value_is_a_format_error() {
        let options = CsvOptions::default().with_delimiter(',');
        let specs = vec![HeaderSpec::typed("n", CellFormat::Integer)];
        let result = decode_str("n\n1\nabc", &options, Some(&specs), true);
        assert!(matches!(result, Err(TabportError::Format { line: 3, .. })));
    }
}
