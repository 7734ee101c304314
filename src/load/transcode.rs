//! Re-encode a delimited source into the layout a bulk channel expects
//!
//! Fields are decoded with the source options (and the decode hint of the
//! target column), reordered to the load column order, and written back with
//! the channel's delimiter, null token and boolean style.

use std::io::{self, BufRead, Read};

use crate::codec::{decode_value, encode_header, encode_row, CsvDecoder, CsvOptions};
use crate::error::TabportError;
use crate::header::CellFormat;
use crate::value::Value;

/// Where a load column's value comes from in each source record
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    pub name: String,
    pub source_index: usize,
    pub format: Option<CellFormat>,
}

pub struct Transcoder<R: BufRead> {
    decoder: CsvDecoder<R>,
    plan: Vec<ColumnPlan>,
    source: CsvOptions,
    target: CsvOptions,
    pending: Vec<u8>,
    pos: usize,
    rows: u64,
    error: Option<TabportError>,
    done: bool,
}

impl<R: BufRead> Transcoder<R> {
    /// `header_line` is emitted first when the channel expects one
    pub fn new(decoder: CsvDecoder<R>, plan: Vec<ColumnPlan>, source: CsvOptions, target: CsvOptions, header_line: bool) -> Self {
        let mut pending = Vec::new();
        if header_line {
            let names: Vec<String> = plan.iter().map(|c| c.name.clone()).collect();
            pending.extend_from_slice(encode_header(&names, &target).as_bytes());
            pending.push(b'\n');
        }
        Self {
            decoder,
            plan,
            source,
            target,
            pending,
            pos: 0,
            rows: 0,
            error: None,
            done: false,
        }
    }

    /// Source records transcoded so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// The decode error that interrupted the stream, if any
    pub fn take_error(&mut self) -> Option<TabportError> {
        self.error.take()
    }

    fn fill(&mut self) -> Result<bool, TabportError> {
        let record = match self.decoder.read_record()? {
            Some(record) => record,
            None => return Ok(false),
        };
        let values = self
            .plan
            .iter()
            .map(|column| match record.fields.get(column.source_index) {
                Some(field) => decode_value(field, column.format, &self.source, record.line),
                None => Ok(Value::Null),
            })
            .collect::<Result<Vec<Value>, TabportError>>()?;

        self.pending.clear();
        self.pos = 0;
        self.pending
            .extend_from_slice(encode_row(&values, &[], &self.target).as_bytes());
        self.pending.push(b'\n');
        self.rows += 1;
        Ok(true)
    }
}

impl<R: BufRead> Read for Transcoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            if self.done {
                return Ok(0);
            }
            match self.fill() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return Ok(0);
                }
                Err(e) => {
                    self.done = true;
                    let message = e.to_string();
                    self.error = Some(e);
                    return Err(io::Error::new(io::ErrorKind::InvalidData, message));
                }
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
