//! Aligned text table
//!
//! Column widths depend on every row, so the whole table is rendered on close.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};

use tracing::error;

use crate::codec::{format_value, CsvOptions, Rendered};
use crate::config::TabportConfig;
use crate::destination::Destination;
use crate::error::{Result, TabportError};
use crate::header::CellFormat;
use crate::reconcile::{ExtraColumns, HeaderReconciler};
use crate::sink::{log_close, log_open, SinkOptions, SinkReport, TabularSink};
use crate::value::{Row, Value};

const GUTTER: &str = "  ";

pub struct ConsoleSink {
    out: Box<dyn Write>,
    csv: CsvOptions,
    reconciler: HeaderReconciler,
    header: Vec<String>,
    rows: Vec<Vec<Value>>,
    target: String,
    title: Option<String>,
    report: Option<SinkReport>,
}

impl ConsoleSink {
    pub fn open(destination: Destination, options: SinkOptions, config: &TabportConfig) -> Result<Self> {
        let (out, target): (Box<dyn Write>, String) = match destination {
            Destination::Stdout => (Box::new(io::stdout()), "<stdout>".to_string()),
            Destination::Writer(writer) => (writer, "<stream>".to_string()),
            Destination::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                (Box::new(BufWriter::new(File::create(&path)?)), path.display().to_string())
            }
            other => {
                return Err(TabportError::Destination(format!(
                    "{} cannot receive a console table",
                    other
                )))
            }
        };
        Self::from_writer(out, &target, options, config)
    }

    pub fn from_writer(out: Box<dyn Write>, target: &str, options: SinkOptions, config: &TabportConfig) -> Result<Self> {
        let mut csv = options.csv_options(config)?;
        csv.excel = false;
        let mut reconciler = HeaderReconciler::new(
            options.headers.clone(),
            None,
            options.reconcile_options(ExtraColumns::Unheaded),
        )?;
        let header = reconciler.take_header().unwrap_or_default();
        log_open(options.title.as_deref(), false, target);
        Ok(Self {
            out,
            csv,
            reconciler,
            header,
            rows: Vec::new(),
            target: target.to_string(),
            title: options.title,
            report: None,
        })
    }

    fn render(&self) -> String {
        let formats = self.reconciler.formats();
        let width = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.header.len()))
            .max()
            .unwrap_or(0);

        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                (0..width)
                    .map(|i| match row.get(i) {
                        Some(v) => match format_value(v, formats.get(i).copied().flatten(), &self.csv) {
                            Rendered::Text(t) => t.replace(['\r', '\n'], " "),
                            Rendered::Null => String::new(),
                        },
                        None => String::new(),
                    })
                    .collect()
            })
            .collect();

        let columns: Vec<ColumnLayout> = (0..width)
            .map(|i| {
                let numeric = is_numeric_column(&self.rows, i, formats.get(i).copied().flatten());
                let header = self.header.get(i).map(String::as_str).unwrap_or("");
                ColumnLayout::new(header, cells.iter().map(|r| r[i].as_str()), numeric, self.csv.decimal_separator)
            })
            .collect();

        let mut lines = Vec::with_capacity(cells.len() + 2);
        if !self.header.is_empty() {
            lines.push(join(columns.iter().enumerate().map(|(i, c)| {
                c.pad(self.header.get(i).map(String::as_str).unwrap_or(""), false)
            })));
            lines.push(join(columns.iter().map(|c| "-".repeat(c.width))));
        }
        for row in &cells {
            lines.push(join(columns.iter().zip(row).map(|(c, cell)| c.pad(cell, true))));
        }

        let mut text = String::new();
        for line in lines {
            text.push_str(line.trim_end());
            text.push('\n');
        }
        text
    }
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(GUTTER)
}

fn is_numeric_column(rows: &[Vec<Value>], index: usize, format: Option<CellFormat>) -> bool {
    if let Some(format) = format {
        return matches!(format, CellFormat::Integer | CellFormat::Float | CellFormat::Decimal | CellFormat::Gib | CellFormat::Decimals(_));
    }
    let mut values = rows.iter().filter_map(|r| r.get(index)).filter(|v| !v.is_null()).peekable();
    values.peek().is_some() && values.all(Value::is_numeric)
}

struct ColumnLayout {
    width: usize,
    numeric: bool,
    separator: char,
    int_width: usize,
    frac_width: usize,
}

impl ColumnLayout {
    fn new<'a>(header: &str, cells: impl Iterator<Item = &'a str> + Clone, numeric: bool, separator: char) -> Self {
        let mut layout = Self {
            width: 0,
            numeric,
            separator,
            int_width: 0,
            frac_width: 0,
        };
        if numeric {
            for cell in cells.clone().filter(|c| !c.is_empty()) {
                let (int, frac) = layout.split(cell);
                layout.int_width = layout.int_width.max(int.chars().count());
                layout.frac_width = layout.frac_width.max(frac.chars().count());
            }
        }
        let cell_width = cells.map(|c| layout.aligned(c).chars().count()).max().unwrap_or(0);
        layout.width = cell_width.max(header.chars().count() + 2);
        layout
    }

    fn split<'a>(&self, cell: &'a str) -> (&'a str, &'a str) {
        match cell.find(self.separator) {
            Some(i) => cell.split_at(i),
            None => (cell, ""),
        }
    }

    /// Numeric cells aligned on the decimal separator
    fn aligned(&self, cell: &str) -> String {
        if !self.numeric || cell.is_empty() {
            return cell.to_string();
        }
        let (int, frac) = self.split(cell);
        format!("{:>iw$}{:<fw$}", int, frac, iw = self.int_width, fw = self.frac_width)
    }

    fn pad(&self, cell: &str, is_value: bool) -> String {
        let text = if is_value { self.aligned(cell) } else { cell.to_string() };
        if self.numeric {
            format!("{:>w$}", text, w = self.width)
        } else {
            format!("{:<w$}", text, w = self.width)
        }
    }
}

impl TabularSink for ConsoleSink {
    fn append(&mut self, row: Row) -> Result<()> {
        if self.report.is_some() {
            return Err(TabportError::Destination(format!("{} is closed", self.target)));
        }
        if let Some(values) = self.reconciler.append(row)? {
            self.rows.push(values);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<SinkReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }

        let pending = self.reconciler.finish()?;
        if let Some(header) = self.reconciler.take_header() {
            self.header = header;
        }
        self.rows.extend(pending);

        let text = self.render();
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;

        let report = SinkReport {
            row_count: self.reconciler.row_count(),
            diagnostics: self.reconciler.take_diagnostics(),
        };
        log_close(self.title.as_deref(), false, report.row_count, &self.target);
        self.report = Some(report.clone());
        Ok(report)
    }

    fn row_count(&self) -> usize {
        self.reconciler.row_count()
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        if self.report.is_none() {
            if let Err(e) = self.close() {
                error!("Cannot finalize {}: {}", self.target, e);
            }
        }
    }
}
