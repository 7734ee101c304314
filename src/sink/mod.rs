//! Tabular sinks
//!
//! A sink accepts rows one at a time and finalizes its destination on close.
//! Every variant shares the same surface ([`TabularSink`]); the variant is
//! picked once, from the destination descriptor, by [`open_sink`].

pub mod console;
pub mod database;
pub mod delimited;
pub mod null;
pub mod workbook;

use std::str::FromStr;

use serde::Serialize;
use tracing::{info, warn};

use crate::codec::CsvOptions;
use crate::config::TabportConfig;
use crate::destination::Destination;
use crate::diagnostics::Diagnostic;
use crate::error::{Result, TabportError};
use crate::header::Header;
use crate::reconcile::{ExtraColumns, ReconcileOptions};
use crate::value::Row;
use crate::workbook::WorkbookCache;

pub use console::ConsoleSink;
pub use database::DatabaseSink;
pub use delimited::DelimitedSink;
pub use null::NullSink;
pub use workbook::WorkbookSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Csv,
    /// Delimited text for spreadsheet tools: BOM, locale delimiter, naive timestamps
    CsvExcel,
    /// Aligned text table
    Console,
}

impl FromStr for OutputFormat {
    type Err = TabportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "csv-excel" | "excel" => Ok(OutputFormat::CsvExcel),
            "console" | "table" | "tabulate" => Ok(OutputFormat::Console),
            other => Err(TabportError::Config(format!(
                "unknown output format {:?} (expected csv, csv-excel or console)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub headers: Option<Vec<Header>>,
    pub append: bool,
    pub format: OutputFormat,
    /// Codec options; derived from the configuration and format when unset
    pub csv: Option<CsvOptions>,
    pub title: Option<String>,
    pub prefix: Option<String>,
    pub log_diagnostics: bool,
    /// Fail on the first header mismatch instead of recording a diagnostic
    pub strict_headers: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            headers: None,
            append: false,
            format: OutputFormat::Csv,
            csv: None,
            title: None,
            prefix: None,
            log_diagnostics: true,
            strict_headers: false,
        }
    }
}

impl SinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_headers<I, H>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<Header>,
    {
        self.headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    pub fn appending(mut self) -> Self {
        self.append = true;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_csv(mut self, csv: CsvOptions) -> Self {
        self.csv = Some(csv);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Keep diagnostics in the report only
    pub fn quiet(mut self) -> Self {
        self.log_diagnostics = false;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_headers = true;
        self
    }

    /// Explicit codec options, else the configured ones adjusted for the format
    pub fn csv_options(&self, config: &TabportConfig) -> Result<CsvOptions> {
        if let Some(csv) = &self.csv {
            return Ok(csv.clone());
        }
        let mut csv = CsvOptions::from_config(config)?;
        if self.format == OutputFormat::CsvExcel {
            csv.excel = true;
            csv.bom = true;
        }
        Ok(csv)
    }

    pub(crate) fn reconcile_options(&self, extra_columns: ExtraColumns) -> ReconcileOptions {
        ReconcileOptions {
            extra_columns,
            log_diagnostics: self.log_diagnostics,
            strict: self.strict_headers,
        }
    }
}

/// Outcome of a closed sink
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SinkReport {
    pub row_count: usize,
    pub diagnostics: Vec<Diagnostic>,
}

pub trait TabularSink {
    fn append(&mut self, row: Row) -> Result<()>;

    /// Flush buffered rows and finalize the destination; later calls return the same count
    fn close(&mut self) -> Result<SinkReport>;

    /// Rows appended so far
    fn row_count(&self) -> usize;
}

/// State shared by successive sink opens
pub struct SinkContext {
    pub config: TabportConfig,
    pub workbooks: Option<WorkbookCache>,
}

impl SinkContext {
    pub fn new(config: TabportConfig) -> Self {
        Self {
            config,
            workbooks: None,
        }
    }

    pub fn with_workbooks(mut self, cache: WorkbookCache) -> Self {
        self.workbooks = Some(cache);
        self
    }
}

/// Open the sink variant matching the destination and format
pub fn open_sink<'a>(
    destination: Destination,
    options: SinkOptions,
    context: &'a mut SinkContext,
) -> Result<Box<dyn TabularSink + 'a>> {
    let destination = destination.with_placeholders(options.title.as_deref(), options.prefix.as_deref());

    let sink: Box<dyn TabularSink + 'a> = match destination {
        Destination::Disabled => Box::new(NullSink::new()),
        Destination::Workbook { path, table } => {
            let table = table.unwrap_or_else(|| context.config.workbook_table.clone());
            let mut options = options;
            options.csv = Some(options.csv_options(&context.config)?);
            let cache = context.workbooks.as_mut().ok_or_else(|| {
                TabportError::Workbook(format!("no workbook backend available for {}", path.display()))
            })?;
            Box::new(WorkbookSink::open(cache, path, table, options)?)
        }
        Destination::Database(url) => Box::new(DatabaseSink::open(url, options, &context.config)?),
        other if options.format == OutputFormat::Console => Box::new(ConsoleSink::open(other, options, &context.config)?),
        other => Box::new(DelimitedSink::open(other, options, &context.config)?),
    };
    Ok(sink)
}

/// Run `f` against a freshly opened sink, closing it on every path
pub fn with_sink<T, F>(
    destination: Destination,
    options: SinkOptions,
    context: &mut SinkContext,
    f: F,
) -> Result<(T, SinkReport)>
where
    F: FnOnce(&mut dyn TabularSink) -> Result<T>,
{
    let mut sink = open_sink(destination, options, context)?;
    let outcome = f(sink.as_mut());
    let report = sink.close();
    match (outcome, report) {
        (Ok(value), Ok(report)) => Ok((value, report)),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("Sink close failed after an error: {}", close_err);
            Err(e)
        }
    }
}

pub(crate) fn log_open(title: Option<&str>, append: bool, target: &str) {
    if let Some(title) = title {
        if append {
            info!("Append {} to {}", title, target);
        } else {
            info!("Export {} to {}", title, target);
        }
    }
}

pub(crate) fn log_close(title: Option<&str>, append: bool, rows: usize, target: &str) {
    if title.is_some() {
        if append {
            info!("{} rows appended to {}", rows, target);
        } else {
            info!("{} rows exported to {}", rows, target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("CSV-Excel".parse::<OutputFormat>().unwrap(), OutputFormat::CsvExcel);
        assert_eq!("tabulate".parse::<OutputFormat>().unwrap(), OutputFormat::Console);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_csv_options_follow_format() {
        let config = TabportConfig::default();
        let csv = SinkOptions::new()
            .with_format(OutputFormat::CsvExcel)
            .csv_options(&config)
            .unwrap();
        assert!(csv.excel && csv.bom);

        let explicit = CsvOptions::default().with_delimiter('\t');
        let csv = SinkOptions::new().with_csv(explicit.clone()).csv_options(&config).unwrap();
        assert_eq!(csv, explicit);
    }
}
