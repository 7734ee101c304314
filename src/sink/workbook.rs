//! Workbook table sink
//!
//! Writes into one named table region through the [`WorkbookCache`]. Writing
//! (not appending) to an existing table clears its rows but keeps its columns;
//! unknown headers and keys become new named columns.

use std::path::PathBuf;

use tracing::{debug, error};

use crate::codec::CsvOptions;
use crate::error::{Result, TabportError};
use crate::reconcile::{ExtraColumns, HeaderReconciler};
use crate::sink::{log_close, log_open, SinkOptions, SinkReport, TabularSink};
use crate::value::{Row, Value};
use crate::workbook::WorkbookCache;

pub struct WorkbookSink<'a> {
    cache: &'a mut WorkbookCache,
    path: PathBuf,
    table: String,
    csv: CsvOptions,
    reconciler: HeaderReconciler,
    created: bool,
    title: Option<String>,
    append: bool,
    report: Option<SinkReport>,
}

impl<'a> WorkbookSink<'a> {
    pub fn open(cache: &'a mut WorkbookCache, path: PathBuf, table: String, options: SinkOptions) -> Result<Self> {
        let csv = options.csv.clone().unwrap_or_default();
        let workbook = cache.get_or_open(&path)?;
        let existing = workbook
            .table(&table)
            .map(|t| t.column_names())
            .filter(|columns| !columns.is_empty());

        let reconciler = HeaderReconciler::new(
            options.headers.clone(),
            existing.clone(),
            options.reconcile_options(ExtraColumns::Named),
        )?;

        let mut created = false;
        if let Some(columns) = reconciler.column_names() {
            let t = workbook.table_mut(&table, &columns)?;
            if existing.is_some() && !options.append {
                debug!("Clear rows of {}#{}", path.display(), table);
                t.clear_rows()?;
            }
            created = true;
        }

        let mut sink = Self {
            cache,
            path,
            table,
            csv,
            reconciler,
            created,
            title: options.title,
            append: options.append,
            report: None,
        };
        log_open(sink.title.as_deref(), sink.append, &sink.target());
        sink.sync_columns()?;
        Ok(sink)
    }

    fn target(&self) -> String {
        format!("{}#{}", self.path.display(), self.table)
    }

    /// Add the columns the reconciler created since the last call
    fn sync_columns(&mut self) -> Result<()> {
        let added = self.reconciler.take_added_columns();
        if added.is_empty() || !self.created {
            return Ok(());
        }
        let workbook = self.cache.get_or_open(&self.path)?;
        let table = workbook.table_mut(&self.table, &[])?;
        let known = table.column_names();
        for name in added {
            if !known.contains(&name) {
                table.add_column(&name)?;
            }
        }
        Ok(())
    }

    fn write_values(&mut self, values: Vec<Value>) -> Result<()> {
        self.sync_columns()?;
        let values: Vec<Value> = values.into_iter().map(|v| self.to_cell(v)).collect();
        let workbook = self.cache.get_or_open(&self.path)?;
        workbook.table_mut(&self.table, &[])?.append_row(values)
    }

    /// Workbooks hold naive timestamps only
    fn to_cell(&self, value: Value) -> Value {
        match value {
            Value::TimestampTz(ts) => match &self.csv.timezone {
                Some(tz) => Value::Timestamp(tz.to_naive(&ts)),
                None => Value::Timestamp(ts.naive_local()),
            },
            other => other,
        }
    }
}

impl TabularSink for WorkbookSink<'_> {
    fn append(&mut self, row: Row) -> Result<()> {
        if self.report.is_some() {
            return Err(TabportError::Workbook(format!("{} is closed", self.target())));
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
        if !self.created {
            let columns = self.reconciler.column_names().unwrap_or_default();
            let workbook = self.cache.get_or_open(&self.path)?;
            let table = workbook.table_mut(&self.table, &columns)?;
            let known = table.column_names();
            for name in columns.iter().filter(|c| !known.contains(c)) {
                table.add_column(name)?;
            }
            self.created = true;
            self.reconciler.take_added_columns();
        }
        for values in pending {
            self.write_values(values)?;
        }
        self.cache.flush(&self.path)?;

        let report = SinkReport {
            row_count: self.reconciler.row_count(),
            diagnostics: self.reconciler.take_diagnostics(),
        };
        log_close(self.title.as_deref(), self.append, report.row_count, &self.target());
        self.report = Some(report.clone());
        Ok(report)
    }

    fn row_count(&self) -> usize {
        self.reconciler.row_count()
    }
}

impl Drop for WorkbookSink<'_> {
    fn drop(&mut self) {
        if self.report.is_none() {
            if let Err(e) = self.close() {
                error!("Cannot finalize {}: {}", self.target(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::MemoryWorkbookOpener;
    use std::path::Path;

    #[test]
    fn test_timestamps_become_naive() {
        let opener = MemoryWorkbookOpener::new();
        let mut cache = WorkbookCache::new(Box::new(opener.clone()));
        let path = Path::new("tz.xlsx").to_path_buf();
        let ts = chrono::DateTime::parse_from_rfc3339("1998-07-12T21:46:00.123+02:00").unwrap();

        let options = SinkOptions::new()
            .with_headers(["Col"])
            .with_csv(CsvOptions::default().with_timezone(crate::codec::TimeZoneSpec::Utc));
        let mut sink = WorkbookSink::open(&mut cache, path.clone(), "UTC".to_string(), options).unwrap();
        sink.append(Row::positional(vec![Value::from(ts)])).unwrap();
        sink.close().unwrap();
        drop(sink);

        let table = opener.saved_table(&path, "UTC").unwrap();
        let expected = chrono::NaiveDate::from_ymd_opt(1998, 7, 12)
            .unwrap()
            .and_hms_milli_opt(19, 46, 0, 123)
            .unwrap();
        assert_eq!(table.rows, vec![vec![Value::Timestamp(expected)]]);
    }
}
