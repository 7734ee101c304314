//! Delimited-text sink (files and streams)

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::{debug, error};

use crate::codec::{needs_line_separator, read_headers, sniff_file, CsvOptions, CsvWriter};
use crate::config::TabportConfig;
use crate::destination::Destination;
use crate::error::{Result, TabportError};
use crate::reconcile::{ExtraColumns, HeaderReconciler};
use crate::sink::{log_close, log_open, SinkOptions, SinkReport, TabularSink};
use crate::value::{Row, Value};

pub struct DelimitedSink {
    writer: CsvWriter<Box<dyn Write>>,
    reconciler: HeaderReconciler,
    target: String,
    title: Option<String>,
    append: bool,
    report: Option<SinkReport>,
}

impl DelimitedSink {
    pub fn open(destination: Destination, options: SinkOptions, config: &TabportConfig) -> Result<Self> {
        let csv = options.csv_options(config)?;
        match destination {
            Destination::File(path) => Self::open_file(&path, options, csv),
            Destination::Stdout => Self::from_writer(Box::new(io::stdout()), "<stdout>", options, csv),
            Destination::Writer(writer) => Self::from_writer(writer, "<stream>", options, csv),
            other => Err(TabportError::Destination(format!(
                "{} is not a delimited-text destination",
                other
            ))),
        }
    }

    /// Write a new document to a stream
    pub fn from_writer(writer: Box<dyn Write>, target: &str, options: SinkOptions, csv: CsvOptions) -> Result<Self> {
        let reconciler = HeaderReconciler::new(
            options.headers.clone(),
            None,
            options.reconcile_options(ExtraColumns::Unheaded),
        )?;
        let writer = CsvWriter::new(writer, csv)?;
        Self::start(writer, reconciler, target.to_string(), &options)
    }

    fn open_file(path: &Path, options: SinkOptions, mut csv: CsvOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let target = path.display().to_string();

        let existing = if options.append { read_headers(path, &csv)? } else { None };
        let reconcile = options.reconcile_options(ExtraColumns::Unheaded);

        let (writer, reconciler) = match existing {
            Some(existing) => {
                if csv.delimiter.is_none() {
                    csv.delimiter = Some(sniff_file(path, &csv)?);
                }
                debug!("Append to {} with existing headers {:?}", target, existing);
                let needs_separator = needs_line_separator(path)?;
                let file = OpenOptions::new().append(true).open(path)?;
                let inner: Box<dyn Write> = Box::new(BufWriter::new(file));
                let reconciler = HeaderReconciler::new(options.headers.clone(), Some(existing), reconcile)?;
                (CsvWriter::resume(inner, csv, needs_separator), reconciler)
            }
            None => {
                let file = File::create(path).map_err(|e| {
                    TabportError::Destination(format!("Cannot create {}: {}", target, e))
                })?;
                let inner: Box<dyn Write> = Box::new(BufWriter::new(file));
                let reconciler = HeaderReconciler::new(options.headers.clone(), None, reconcile)?;
                (CsvWriter::new(inner, csv)?, reconciler)
            }
        };
        Self::start(writer, reconciler, target, &options)
    }

    fn start(
        writer: CsvWriter<Box<dyn Write>>,
        reconciler: HeaderReconciler,
        target: String,
        options: &SinkOptions,
    ) -> Result<Self> {
        log_open(options.title.as_deref(), options.append, &target);
        let mut sink = Self {
            writer,
            reconciler,
            target,
            title: options.title.clone(),
            append: options.append,
            report: None,
        };
        sink.write_header()?;
        Ok(sink)
    }

    fn write_header(&mut self) -> Result<()> {
        if let Some(header) = self.reconciler.take_header() {
            self.writer.write_header(&header)?;
        }
        Ok(())
    }

    fn write_values(&mut self, values: &[Value]) -> Result<()> {
        let formats = self.reconciler.formats();
        self.writer.write_row(values, &formats)
    }
}

impl TabularSink for DelimitedSink {
    fn append(&mut self, row: Row) -> Result<()> {
        if self.report.is_some() {
            return Err(TabportError::Destination(format!("{} is closed", self.target)));
        }
        match self.reconciler.append(row)? {
            Some(values) => self.write_values(&values),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<SinkReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }

        let pending = self.reconciler.finish()?;
        self.write_header()?;
        for values in &pending {
            self.write_values(values)?;
        }
        self.writer.flush()?;

        let report = SinkReport {
            row_count: self.reconciler.row_count(),
            diagnostics: self.reconciler.take_diagnostics(),
        };
        log_close(self.title.as_deref(), self.append, report.row_count, &self.target);
        self.report = Some(report.clone());
        Ok(report)
    }

    fn row_count(&self) -> usize {
        self.reconciler.row_count()
    }
}

impl Drop for DelimitedSink {
    fn drop(&mut self) {
        if self.report.is_none() {
            if let Err(e) = self.close() {
                error!("Cannot finalize {}: {}", self.target, e);
            }
        }
    }
}
