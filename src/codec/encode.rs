//! Row to delimited-text encoding

use std::io::Write;

use chrono::TimeDelta;

use crate::codec::options::CsvOptions;
use crate::error::Result;
use crate::header::CellFormat;
use crate::numbers;
use crate::value::Value;

/// A cell rendered to text, before quoting
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Null,
    Text(String),
}

/// Render a value to its textual form (no quoting)
pub fn format_value(value: &Value, format: Option<CellFormat>, options: &CsvOptions) -> Rendered {
    if let Some(format) = format {
        if let Some(text) = apply_format(value, format, options) {
            return Rendered::Text(text);
        }
    }

    let sep = options.decimal_separator;
    let text = match value {
        Value::Null => return Rendered::Null,
        Value::Bool(b) => match (options.bool_digits, b) {
            (true, true) => "1".to_string(),
            (true, false) => "0".to_string(),
            (false, b) => b.to_string(),
        },
        Value::Int(i) => i.to_string(),
        Value::Float(f) => with_separator(f.to_string(), sep),
        Value::Decimal(d) => with_separator(d.to_string(), sep),
        Value::Text(s) => s.clone(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        Value::Timestamp(ts) => {
            if options.excel {
                ts.format("%Y-%m-%d %H:%M:%S").to_string()
            } else {
                ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
            }
        }
        Value::TimestampTz(ts) => match (&options.timezone, options.excel) {
            (Some(tz), true) => tz.to_naive(ts).format("%Y-%m-%d %H:%M:%S").to_string(),
            (Some(tz), false) => tz.to_naive(ts).format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            (None, true) => ts.naive_local().format("%Y-%m-%d %H:%M:%S").to_string(),
            (None, false) => ts.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        },
        Value::Duration(d) => format_duration(d),
        Value::List(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match format_value(item, None, options) {
                    Rendered::Null => String::new(),
                    Rendered::Text(t) => t,
                })
                .collect();
            parts.join(&options.list_separator.to_string())
        }
        Value::Map(_) => value.to_json().to_string(),
    };
    Rendered::Text(text)
}

fn apply_format(value: &Value, format: CellFormat, options: &CsvOptions) -> Option<String> {
    let sep = options.decimal_separator;
    match format {
        CellFormat::Gib => value.as_f64().map(|v| numbers::gib(v, sep)),
        CellFormat::HumanBytes => value.as_f64().map(|v| numbers::human_bytes(v, 1, None, sep)),
        CellFormat::HumanNumber => value.as_f64().map(|v| numbers::human_number(v, 1, sep)),
        CellFormat::Decimals(n) => match value {
            Value::Decimal(d) => Some(with_separator(format!("{:.*}", n as usize, d), sep)),
            other => other.as_f64().map(|v| numbers::fixed(v, n as usize, sep, false)),
        },
        _ => None,
    }
}

fn with_separator(text: String, sep: char) -> String {
    if sep == '.' {
        text
    } else {
        text.replace('.', &sep.to_string())
    }
}

fn format_duration(d: &TimeDelta) -> String {
    let negative = *d < TimeDelta::zero();
    let total = if negative { -*d } else { *d };
    let secs = total.num_seconds();
    let micros = (total - TimeDelta::seconds(secs)).num_microseconds().unwrap_or(0);
    let mut out = format!(
        "{}{}:{:02}:{:02}",
        if negative { "-" } else { "" },
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    );
    if micros > 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

/// Quote a rendered cell when needed
pub fn encode_field(rendered: &Rendered, delimiter: char, options: &CsvOptions) -> String {
    let text = match rendered {
        Rendered::Null => return options.null_value.clone(),
        Rendered::Text(t) => t,
    };

    let needs_quotes = text.is_empty()
        || (!options.null_value.is_empty() && *text == options.null_value)
        || text
            .chars()
            .any(|c| c == delimiter || c == options.quote || c == '\r' || c == '\n');

    if !needs_quotes {
        return text.clone();
    }

    let quote = options.quote.to_string();
    let doubled = format!("{}{}", options.quote, options.quote);
    format!("{}{}{}", quote, text.replace(&quote, &doubled), quote)
}

/// Encode one row as a text line (without terminator)
pub fn encode_row(values: &[Value], formats: &[Option<CellFormat>], options: &CsvOptions) -> String {
    let delimiter = options.write_delimiter();
    let fields: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let format = formats.get(i).copied().flatten();
            encode_field(&format_value(v, format, options), delimiter, options)
        })
        .collect();
    fields.join(&delimiter.to_string())
}

/// Encode a header line
pub fn encode_header(names: &[String], options: &CsvOptions) -> String {
    let values: Vec<Value> = names.iter().map(|n| Value::Text(n.clone())).collect();
    encode_row(&values, &[], options)
}

/// Line-oriented writer: terminators separate lines, none follows the last one
pub struct CsvWriter<W: Write> {
    inner: W,
    options: CsvOptions,
    needs_separator: bool,
    lines: usize,
}

impl<W: Write> CsvWriter<W> {
    /// Start a new document (writes the BOM when requested)
    pub fn new(mut inner: W, options: CsvOptions) -> Result<Self> {
        options.validate()?;
        if options.bom {
            inner.write_all("\u{feff}".as_bytes())?;
        }
        Ok(Self {
            inner,
            options,
            needs_separator: false,
            lines: 0,
        })
    }

    /// Continue an existing document; `needs_separator` when it does not end with a line break
    pub fn resume(inner: W, options: CsvOptions, needs_separator: bool) -> Self {
        Self {
            inner,
            options,
            needs_separator,
            lines: 0,
        }
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    /// Write one line; an empty line (a one-field null row) is always terminated
    /// so that it survives as the last line of the document
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let terminator = self.options.line_terminator.as_str().as_bytes();
        if self.needs_separator {
            self.inner.write_all(terminator)?;
        }
        self.inner.write_all(line.as_bytes())?;
        if line.is_empty() {
            self.inner.write_all(terminator)?;
        }
        self.needs_separator = !line.is_empty();
        self.lines += 1;
        Ok(())
    }

    pub fn write_header(&mut self, names: &[String]) -> Result<()> {
        let line = encode_header(names, &self.options);
        self.write_line(&line)
    }

    pub fn write_row(&mut self, values: &[Value], formats: &[Option<CellFormat>]) -> Result<()> {
        let line = encode_row(values, formats, &self.options);
        self.write_line(&line)
    }

    /// Number of lines written by this writer
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};

    fn opts() -> CsvOptions {
        CsvOptions::default().with_delimiter(',')
    }

    #[test]
    fn test_quoting_rules() {
        let row = vec![
            Value::from("Text"),
            Value::from("\"Quote\""),
            Value::from("New\r\nLine"),
            Value::Int(1),
            Value::Float(3.14),
            Value::from(""),
            Value::Null,
        ];
        assert_eq!(
            encode_row(&row, &[], &opts()),
            "Text,\"\"\"Quote\"\"\",\"New\r\nLine\",1,3.14,\"\","
        );
    }

    #[test]
    fn test_empty_line_is_always_terminated() {
        let mut writer = CsvWriter::new(Vec::new(), opts()).unwrap();
        writer.write_header(&["a".to_string()]).unwrap();
        writer.write_row(&[Value::Int(1)], &[]).unwrap();
        writer.write_row(&[Value::Null], &[]).unwrap();
        assert_eq!(String::from_utf8(writer.get_mut().clone()).unwrap(), "a\r\n1\r\n\r\n");
        writer.write_row(&[Value::Int(3)], &[]).unwrap();
        assert_eq!(writer.lines(), 4);
        assert_eq!(String::from_utf8(writer.into_inner().unwrap()).unwrap(), "a\r\n1\r\n\r\n3");
    }

    #[test]
    fn test_sentinel_collision_is_quoted() {
        let options = opts().with_null_value("NULL");
        let row = vec![Value::from("NULL"), Value::Null, Value::from("")];
        assert_eq!(encode_row(&row, &[], &options), "\"NULL\",NULL,\"\"");
    }

    #[test]
    fn test_decimal_separator_only_touches_numbers() {
        let options = opts().with_delimiter(';').with_decimal_separator(',');
        let row = vec![Value::Float(3.14), Value::from("v1.2"), Value::Int(12)];
        assert_eq!(encode_row(&row, &[], &options), "3,14;v1.2;12");
    }

    #[test]
    fn test_default_rendering_of_nested_values() {
        let options = opts().with_delimiter(';');
        assert_eq!(
            encode_row(&[Value::from(vec![Value::Int(1), Value::from("A \"B\" C"), Value::Null])], &[], &options),
            "\"1|A \"\"B\"\" C|\""
        );
        assert_eq!(encode_row(&[Value::Bool(true)], &[], &options), "true");
    }

    #[test]
    fn test_timestamps() {
        let ts = DateTime::parse_from_rfc3339("1998-07-12T21:46:00.123+02:00").unwrap();
        let plain = opts();
        assert_eq!(
            encode_row(&[Value::TimestampTz(ts)], &[], &plain),
            "1998-07-12 21:46:00.123+02:00"
        );

        let excel = CsvOptions::excel();
        assert_eq!(encode_row(&[Value::TimestampTz(ts)], &[], &excel), "1998-07-12 21:46:00");

        let utc = CsvOptions::excel().with_timezone(crate::codec::TimeZoneSpec::Utc);
        assert_eq!(encode_row(&[Value::TimestampTz(ts)], &[], &utc), "1998-07-12 19:46:00");

        let date = NaiveDate::from_ymd_opt(2022, 3, 26).unwrap();
        assert_eq!(encode_row(&[Value::Date(date)], &[], &plain), "2022-03-26");
    }

    #[test]
    fn test_specific_formats() {
        let options = CsvOptions::excel().with_decimal_separator(',');
        let formats = [Some(CellFormat::Gib), Some(CellFormat::HumanBytes)];
        assert_eq!(
            encode_row(&[Value::Int(20971520), Value::Int(20971520)], &formats, &options),
            "0,019531250;20,0 MiB"
        );
    }

    #[test]
    fn test_duration() {
        assert_eq!(format_duration(&TimeDelta::seconds(93784)), "26:03:04");
        assert_eq!(format_duration(&-TimeDelta::milliseconds(1500)), "-0:00:01.500000");
    }

    #[test]
    fn test_writer_separates_lines() {
        let mut writer = CsvWriter::new(Vec::new(), opts()).unwrap();
        writer.write_header(&["a".to_string(), "b".to_string()]).unwrap();
        writer.write_row(&[Value::Int(1), Value::Int(2)], &[]).unwrap();
        let out = writer.into_inner().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a,b\r\n1,2");
    }
}
