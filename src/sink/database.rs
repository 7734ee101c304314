//! Database table sink
//!
//! Rows are spooled to a temporary delimited file and bulk-loaded into the
//! target table on close, with the resolved headers as load columns. Resolved
//! columns the table does not have are left out of the spool and reported as
//! [`Diagnostic::DroppedColumns`]; the table schema is never altered.

use std::io::{BufWriter, Seek, SeekFrom};

use tempfile::NamedTempFile;
use tracing::{debug, error};

use crate::codec::{CsvOptions, CsvWriter, LineTerminator};
use crate::config::TabportConfig;
use crate::db::{self, DbAdapter};
use crate::destination::DbUrl;
use crate::diagnostics::Diagnostic;
use crate::error::{Result, TabportError};
use crate::load::{BulkLoadEngine, BulkLoadRequest, ColumnSelection, MergeMode};
use crate::reconcile::{ExtraColumns, HeaderReconciler};
use crate::sink::{log_close, log_open, SinkOptions, SinkReport, TabularSink};
use crate::value::{Row, Value};

const SPOOL_NULL: &str = "\\N";

pub struct DatabaseSink {
    adapter: Box<dyn DbAdapter>,
    url: DbUrl,
    reconciler: HeaderReconciler,
    table_columns: Vec<String>,
    /// Per resolved column: whether the table has it
    kept: Vec<bool>,
    spool: Option<CsvWriter<BufWriter<NamedTempFile>>>,
    title: Option<String>,
    append: bool,
    report: Option<SinkReport>,
}

impl DatabaseSink {
    pub fn open(url: DbUrl, options: SinkOptions, config: &TabportConfig) -> Result<Self> {
        let adapter = db::connect(&url, config)?;
        Self::with_adapter(adapter, url, options)
    }

    /// Use an already connected adapter
    pub fn with_adapter(mut adapter: Box<dyn DbAdapter>, url: DbUrl, options: SinkOptions) -> Result<Self> {
        if !adapter.table_exists(&url.table)? {
            return Err(TabportError::Destination(format!("table {} not found", url.redacted())));
        }
        let table_columns: Vec<String> = adapter
            .get_table_columns(&url.table)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let existing = if options.append {
            Some(table_columns.clone())
        } else {
            None
        };
        let reconciler = HeaderReconciler::new(
            options.headers.clone(),
            existing,
            options.reconcile_options(ExtraColumns::Named),
        )?;

        let spool = NamedTempFile::with_prefix("tabport-sink-")?;
        debug!("Spool rows for {} to {}", url.table, spool.path().display());
        let writer = CsvWriter::new(BufWriter::new(spool), spool_options())?;

        log_open(options.title.as_deref(), options.append, &url.redacted());
        Ok(Self {
            adapter,
            url,
            reconciler,
            table_columns,
            kept: Vec::new(),
            spool: Some(writer),
            title: options.title,
            append: options.append,
            report: None,
        })
    }

    /// Extend the keep mask over columns resolved since the last row
    fn refresh_kept(&mut self) {
        let names = self.reconciler.column_names().unwrap_or_default();
        for name in names.iter().skip(self.kept.len()) {
            self.kept.push(self.table_columns.contains(name));
        }
        self.reconciler.take_added_columns();
    }

    fn write_values(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() > self.kept.len() {
            self.refresh_kept();
        }
        let kept = &self.kept;
        let values: Vec<Value> = values
            .into_iter()
            .enumerate()
            .filter(|(i, _)| kept.get(*i).copied().unwrap_or(false))
            .map(|(_, v)| v)
            .collect();
        match self.spool.as_mut() {
            Some(writer) => writer.write_row(&values, &[]),
            None => Err(TabportError::Destination(format!("{} is closed", self.url.redacted()))),
        }
    }

    /// Resolved columns the table has, in spool order
    fn load_columns(&mut self) -> Result<Vec<String>> {
        self.refresh_kept();
        let names = self.reconciler.column_names().unwrap_or_default();
        let (kept, dropped): (Vec<_>, Vec<_>) = names
            .into_iter()
            .zip(self.kept.iter().copied())
            .partition(|(_, keep)| *keep);
        if !dropped.is_empty() {
            self.reconciler.record(Diagnostic::DroppedColumns {
                table: self.url.table.clone(),
                columns: dropped.into_iter().map(|(name, _)| name).collect(),
            })?;
        }
        Ok(kept.into_iter().map(|(name, _)| name).collect())
    }

    fn load(&mut self, writer: CsvWriter<BufWriter<NamedTempFile>>) -> Result<usize> {
        let columns = self.load_columns()?;
        let rows = writer.lines();
        if rows == 0 {
            return Ok(0);
        }
        if columns.is_empty() {
            return Err(TabportError::Destination(format!(
                "cannot load {} rows into {} without column names",
                rows,
                self.url.redacted()
            )));
        }

        let mut file = writer
            .into_inner()?
            .into_inner()
            .map_err(|e| TabportError::Io(e.into_error()))?;
        file.seek(SeekFrom::Start(0))?;

        let request = BulkLoadRequest::new(file, self.url.table.clone())
            .with_columns(ColumnSelection::Named(columns))
            .with_merge(MergeMode::None)
            .with_header_row(false)
            .with_csv(spool_options());
        let loaded = BulkLoadEngine::new(self.adapter.as_mut()).load(request)?;
        Ok(loaded as usize)
    }
}

fn spool_options() -> CsvOptions {
    CsvOptions::default()
        .with_delimiter(',')
        .with_null_value(SPOOL_NULL)
        .with_line_terminator(LineTerminator::Lf)
}

impl TabularSink for DatabaseSink {
    fn append(&mut self, row: Row) -> Result<()> {
        if self.report.is_some() {
            return Err(TabportError::Destination(format!("{} is closed", self.url.redacted())));
        }
        match self.reconciler.append(row)? {
            Some(values) => self.write_values(values),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<SinkReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }

        let pending = self.reconciler.finish()?;
        for values in pending {
            self.write_values(values)?;
        }
        let writer = self
            .spool
            .take()
            .ok_or_else(|| TabportError::Destination(format!("{} is closed", self.url.redacted())))?;
        let loaded = self.load(writer)?;
        debug!("{} rows loaded into {}", loaded, self.url.table);

        let report = SinkReport {
            row_count: self.reconciler.row_count(),
            diagnostics: self.reconciler.take_diagnostics(),
        };
        log_close(self.title.as_deref(), self.append, report.row_count, &self.url.redacted());
        self.report = Some(report.clone());
        Ok(report)
    }

    fn row_count(&self) -> usize {
        self.reconciler.row_count()
    }
}

impl Drop for DatabaseSink {
    fn drop(&mut self) {
        if self.report.is_none() && self.spool.is_some() {
            if let Err(e) = self.close() {
                error!("Cannot finalize {}: {}", self.url.redacted(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteAdapter;

    fn adapter() -> Box<dyn DbAdapter> {
        let adapter = SqliteAdapter::open_in_memory().unwrap();
        adapter
            .connection()
            .execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, qty INTEGER DEFAULT 7)")
            .unwrap();
        Box::new(adapter)
    }

    #[test]
    fn test_rows_are_loaded_on_close() {
        let url = DbUrl::parse("sqlite://:memory:/items").unwrap();
        let mut sink = DatabaseSink::with_adapter(adapter(), url, SinkOptions::new().quiet()).unwrap();
        sink.append(Row::keyed(vec![("id", Value::from(1)), ("name", Value::from("a"))]))
            .unwrap();
        sink.append(Row::keyed(vec![("name", Value::from("")), ("id", Value::from(2))]))
            .unwrap();
        sink.append(Row::keyed(vec![("id", Value::from(3)), ("name", Value::Null)]))
            .unwrap();
        let report = sink.close().unwrap();
        assert_eq!(report.row_count, 3);

        let rows = sink
            .adapter
            .execute_query("SELECT id, name, qty FROM items ORDER BY id", &[])
            .unwrap()
            .rows;
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::from("a"), Value::Int(7)],
                vec![Value::Int(2), Value::from(""), Value::Int(7)],
                vec![Value::Int(3), Value::Null, Value::Int(7)],
            ]
        );
    }

    #[test]
    fn test_unknown_key_is_dropped_and_valid_rows_load() {
        let url = DbUrl::parse("sqlite://:memory:/items").unwrap();
        let options = SinkOptions::new().with_headers(["id", "name"]).quiet();
        let mut sink = DatabaseSink::with_adapter(adapter(), url, options).unwrap();
        sink.append(Row::keyed(vec![("id", Value::from(1)), ("name", Value::from("a"))]))
            .unwrap();
        sink.append(Row::keyed(vec![("id", Value::from(2)), ("extra", Value::from("x"))]))
            .unwrap();
        let report = sink.close().unwrap();

        assert_eq!(report.row_count, 2);
        assert_eq!(
            report.diagnostics,
            vec![
                Diagnostic::UnmatchedKeys {
                    row: 2,
                    keys: vec!["extra".to_string()],
                    column: 3,
                    named: true,
                },
                Diagnostic::DroppedColumns {
                    table: "items".to_string(),
                    columns: vec!["extra".to_string()],
                },
            ]
        );

        let rows = sink
            .adapter
            .execute_query("SELECT id, name, qty FROM items ORDER BY id", &[])
            .unwrap()
            .rows;
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::from("a"), Value::Int(7)],
                vec![Value::Int(2), Value::Null, Value::Int(7)],
            ]
        );
    }

    #[test]
    fn test_append_headers_missing_from_table() {
        let url = DbUrl::parse("sqlite://:memory:/items").unwrap();
        let options = SinkOptions::new().with_headers(["missing", "id"]).appending().quiet();
        let mut sink = DatabaseSink::with_adapter(adapter(), url, options).unwrap();
        sink.append(Row::positional(vec![Value::from("m"), Value::from(5)])).unwrap();
        let report = sink.close().unwrap();

        let messages: Vec<String> = report.diagnostics.iter().map(|d| d.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "Header \"missing\" not found in existing headers: added as new columns",
                "Column \"missing\" not found in table items: values will not be loaded",
            ]
        );

        let rows = sink
            .adapter
            .execute_query("SELECT id, name, qty FROM items", &[])
            .unwrap()
            .rows;
        assert_eq!(rows, vec![vec![Value::Int(5), Value::Null, Value::Null]]);
    }
}
