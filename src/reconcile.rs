//! Header reconciliation
//!
//! Maps incoming rows (positional or keyed) onto a column order that is fixed
//! once resolved. State moves `Unset -> Delayed | Resolved -> Closed`:
//!
//! * headers given at open, or an append destination that already has a
//!   header row, resolve immediately;
//! * otherwise rows are buffered and the header is the first-seen union of
//!   the buffered keys, computed on [`HeaderReconciler::finish`].
//!
//! Mismatches never fail the sink (unless strict mode is on): they fall back
//! to padding with nulls or extra trailing columns and record a [`Diagnostic`].

use std::collections::HashMap;

use crate::codec::{format_value, CsvOptions, Rendered};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Result, TabportError};
use crate::header::{CellFormat, Header};
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Unset,
    Delayed,
    Resolved,
    Closed,
}

/// What happens to columns the resolved header does not know
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraColumns {
    /// Trailing columns without a header cell (delimited text, console)
    Unheaded,
    /// New named columns; positional extras are dropped (workbook, database table)
    Named,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub extra_columns: ExtraColumns,
    pub log_diagnostics: bool,
    /// Fail with `HeaderMismatch` instead of recording a diagnostic
    pub strict: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            extra_columns: ExtraColumns::Unheaded,
            log_diagnostics: true,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Column {
    key: String,
    format: Option<CellFormat>,
}

impl Column {
    fn named(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            format: None,
        }
    }
}

impl From<Header> for Column {
    fn from(h: Header) -> Self {
        Self {
            key: h.name,
            format: h.format,
        }
    }
}

pub struct HeaderReconciler {
    state: HeaderState,
    options: ReconcileOptions,
    columns: Vec<Column>,
    /// Positional input index -> output column index
    input_map: Vec<usize>,
    pending: Vec<(usize, Row)>,
    header_line: Option<Vec<String>>,
    added_columns: Vec<String>,
    row_count: usize,
    diagnostics: Diagnostics,
}

impl HeaderReconciler {
    /// `existing` is the header row already present at an append destination
    pub fn new(headers: Option<Vec<Header>>, existing: Option<Vec<String>>, options: ReconcileOptions) -> Result<Self> {
        let mut reconciler = Self {
            state: HeaderState::Unset,
            options,
            columns: Vec::new(),
            input_map: Vec::new(),
            pending: Vec::new(),
            header_line: None,
            added_columns: Vec::new(),
            row_count: 0,
            diagnostics: Diagnostics::new(options.log_diagnostics),
        };

        let headers = headers.filter(|h| !h.is_empty());
        match (existing.filter(|e| !e.is_empty()), headers) {
            (Some(existing), given) => reconciler.resolve_existing(existing, given)?,
            (None, Some(given)) => reconciler.resolve(given.into_iter().map(Column::from).collect(), true)?,
            (None, None) => reconciler.state = HeaderState::Delayed,
        }
        Ok(reconciler)
    }

    pub fn state(&self) -> HeaderState {
        self.state
    }

    /// Rows appended so far
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Names of the resolved columns, including columns added since
    pub fn column_names(&self) -> Option<Vec<String>> {
        match self.state {
            HeaderState::Unset | HeaderState::Delayed => None,
            _ => Some(self.columns.iter().map(|c| c.key.clone()).collect()),
        }
    }

    /// Cell formats of the resolved columns, by output position
    pub fn formats(&self) -> Vec<Option<CellFormat>> {
        self.columns.iter().map(|c| c.format).collect()
    }

    /// Header line to emit, returned once after resolution
    pub fn take_header(&mut self) -> Option<Vec<String>> {
        self.header_line.take()
    }

    /// Named columns created since the last call (`ExtraColumns::Named` only)
    pub fn take_added_columns(&mut self) -> Vec<String> {
        std::mem::take(&mut self.added_columns)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.items()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    /// Map a row onto the output columns; `None` while headers are delayed
    pub fn append(&mut self, row: Row) -> Result<Option<Vec<Value>>> {
        match self.state {
            HeaderState::Delayed => {
                self.row_count += 1;
                self.pending.push((self.row_count, row));
                Ok(None)
            }
            HeaderState::Resolved => {
                self.row_count += 1;
                self.map_row(self.row_count, row).map(Some)
            }
            HeaderState::Unset | HeaderState::Closed => Err(TabportError::Destination(
                "rows cannot be appended to a closed sink".to_string(),
            )),
        }
    }

    /// Resolve delayed headers and return the buffered rows, mapped
    pub fn finish(&mut self) -> Result<Vec<Vec<Value>>> {
        if self.state == HeaderState::Closed {
            return Ok(Vec::new());
        }

        if self.state == HeaderState::Delayed {
            let mut keys: Vec<String> = Vec::new();
            for (_, row) in &self.pending {
                if let Row::Keyed(entries) = row {
                    for (key, _) in entries {
                        if !keys.contains(key) {
                            keys.push(key.clone());
                        }
                    }
                }
            }
            self.resolve(keys.into_iter().map(Column::named).collect(), true)?;
        }

        let pending = std::mem::take(&mut self.pending);
        let mut rows = Vec::with_capacity(pending.len());
        for (row_no, row) in pending {
            rows.push(self.map_row(row_no, row)?);
        }
        self.state = HeaderState::Closed;
        Ok(rows)
    }

    /// Record a sink-side mismatch alongside the reconciliation ones
    pub fn record(&mut self, diagnostic: Diagnostic) -> Result<()> {
        self.warn(diagnostic)
    }

    fn warn(&mut self, diagnostic: Diagnostic) -> Result<()> {
        if self.options.strict {
            return Err(TabportError::HeaderMismatch(diagnostic.to_string()));
        }
        self.diagnostics.push(diagnostic);
        Ok(())
    }

    fn resolve(&mut self, columns: Vec<Column>, emit_header: bool) -> Result<()> {
        self.columns = columns;
        self.input_map = (0..self.columns.len()).collect();
        if emit_header && !self.columns.is_empty() {
            self.header_line = Some(self.columns.iter().map(|c| c.key.clone()).collect());
        }
        self.state = HeaderState::Resolved;
        self.check_duplicates()
    }

    fn resolve_existing(&mut self, existing: Vec<String>, given: Option<Vec<Header>>) -> Result<()> {
        let format_of = |name: &str| {
            given
                .as_ref()
                .and_then(|g| g.iter().find(|h| h.name == name))
                .and_then(|h| h.format)
        };
        let columns: Vec<Column> = existing
            .iter()
            .map(|name| Column {
                key: name.clone(),
                format: format_of(name),
            })
            .collect();
        self.resolve(columns, false)?;

        let given = match given {
            Some(g) => g,
            None => return Ok(()),
        };

        let mut input_map = Vec::with_capacity(given.len());
        let mut unmatched = Vec::new();
        for header in given {
            match self.columns.iter().position(|c| c.key == header.name) {
                Some(i) => input_map.push(i),
                None => {
                    unmatched.push(header.name.clone());
                    self.columns.push(Column::from(header));
                    input_map.push(self.columns.len() - 1);
                }
            }
        }
        self.input_map = input_map;

        if !unmatched.is_empty() {
            let named = self.options.extra_columns == ExtraColumns::Named;
            if named {
                self.added_columns.extend(unmatched.iter().cloned());
            }
            self.warn(Diagnostic::UnmatchedHeaders {
                headers: unmatched,
                named,
            })?;
        }
        Ok(())
    }

    fn check_duplicates(&mut self) -> Result<()> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for column in &self.columns {
            let count = counts.entry(column.key.as_str()).or_insert(0);
            if *count == 0 {
                order.push(column.key.as_str());
            }
            *count += 1;
        }
        let duplicates: Vec<Diagnostic> = order
            .into_iter()
            .filter(|name| counts[name] > 1)
            .map(|name| Diagnostic::DuplicateHeader {
                name: name.to_string(),
                count: counts[name],
            })
            .collect();
        for diagnostic in duplicates {
            self.warn(diagnostic)?;
        }
        Ok(())
    }

    fn map_row(&mut self, row_no: usize, row: Row) -> Result<Vec<Value>> {
        match row {
            Row::Keyed(entries) => self.map_keyed(row_no, entries),
            Row::Positional(values) => self.map_positional(row_no, values),
        }
    }

    fn map_keyed(&mut self, row_no: usize, entries: Vec<(String, Value)>) -> Result<Vec<Value>> {
        let mut out = vec![Value::Null; self.columns.len()];
        let mut unmatched = Vec::new();
        for (key, value) in entries {
            match self.columns.iter().position(|c| c.key == key) {
                Some(i) => out[i] = value,
                None => unmatched.push((key, value)),
            }
        }

        if !unmatched.is_empty() {
            let column = self.columns.len() + 1;
            let keys: Vec<String> = unmatched.iter().map(|(k, _)| k.clone()).collect();
            for (key, value) in unmatched {
                self.columns.push(Column::named(key));
                out.push(value);
            }
            let named = self.options.extra_columns == ExtraColumns::Named;
            if named {
                self.added_columns.extend(keys.iter().cloned());
            }
            self.warn(Diagnostic::UnmatchedKeys {
                row: row_no,
                keys,
                column,
                named,
            })?;
        }
        Ok(out)
    }

    fn map_positional(&mut self, row_no: usize, values: Vec<Value>) -> Result<Vec<Value>> {
        let expected = self.input_map.len();
        if expected == 0 {
            return Ok(values);
        }

        let length = values.len();
        let mut out = vec![Value::Null; self.columns.len()];
        let mut extras = Vec::new();
        for (i, value) in values.into_iter().enumerate() {
            match self.input_map.get(i) {
                Some(&column) => out[column] = value,
                None => extras.push(value),
            }
        }

        if length != expected {
            let ignored = match self.options.extra_columns {
                ExtraColumns::Unheaded => Vec::new(),
                ExtraColumns::Named => extras
                    .iter()
                    .filter_map(|v| match format_value(v, None, &CsvOptions::default()) {
                        Rendered::Text(t) => Some(t),
                        Rendered::Null => None,
                    })
                    .collect(),
            };
            self.warn(Diagnostic::RowLength {
                row: row_no,
                length,
                expected,
                ignored,
            })?;
        }

        if self.options.extra_columns == ExtraColumns::Unheaded {
            out.extend(extras);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::headers;

    fn quiet() -> ReconcileOptions {
        ReconcileOptions {
            log_diagnostics: false,
            ..ReconcileOptions::default()
        }
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    #[test]
    fn test_explicit_headers_reorder_keyed_rows() {
        let mut r = HeaderReconciler::new(Some(headers(["a", "b"])), None, quiet()).unwrap();
        assert_eq!(r.state(), HeaderState::Resolved);
        assert_eq!(r.take_header(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(r.take_header(), None);

        let row = r.append(Row::keyed([("b", 2), ("a", 1)])).unwrap();
        assert_eq!(row, Some(ints(&[1, 2])));
        assert!(r.diagnostics().is_empty());
    }

    #[test]
    fn test_delayed_union_of_keys() {
        let mut r = HeaderReconciler::new(None, None, quiet()).unwrap();
        assert_eq!(r.append(Row::keyed([("a", 1)])).unwrap(), None);
        assert_eq!(r.append(Row::keyed([("b", 2)])).unwrap(), None);
        assert_eq!(r.append(Row::keyed([("a", 3), ("c", 4)])).unwrap(), None);
        assert_eq!(r.take_header(), None);

        let rows = r.finish().unwrap();
        assert_eq!(r.take_header(), Some(vec!["a".to_string(), "b".to_string(), "c".to_string()]));
        assert_eq!(
            rows,
            vec![
                vec![Value::Int(1), Value::Null, Value::Null],
                vec![Value::Null, Value::Int(2), Value::Null],
                vec![Value::Int(3), Value::Null, Value::Int(4)],
            ]
        );
        assert_eq!(r.state(), HeaderState::Closed);
        assert!(r.append(Row::positional([1])).is_err());
    }

    #[test]
    fn test_delayed_positional_rows_have_no_header() {
        let mut r = HeaderReconciler::new(None, None, quiet()).unwrap();
        r.append(Row::positional([1, 2])).unwrap();
        r.append(Row::positional([3])).unwrap();
        let rows = r.finish().unwrap();
        assert_eq!(r.take_header(), None);
        assert_eq!(rows, vec![ints(&[1, 2]), ints(&[3])]);
        assert!(r.diagnostics().is_empty());
    }

    #[test]
    fn test_length_warnings() {
        let mut r = HeaderReconciler::new(Some(headers(["c1", "c2", "c3"])), None, quiet()).unwrap();
        assert_eq!(
            r.append(Row::positional(["v1", "v2"])).unwrap(),
            Some(vec![Value::from("v1"), Value::from("v2"), Value::Null])
        );
        assert_eq!(
            r.append(Row::positional(["v1", "v2", "v3", "extra"])).unwrap(),
            Some(vec![Value::from("v1"), Value::from("v2"), Value::from("v3"), Value::from("extra")])
        );
        r.append(Row::positional(["v1", "v2", "v3"])).unwrap();

        let messages: Vec<String> = r.diagnostics().iter().map(|d| d.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "Row 1 length: 2 (expected headers length: 3)",
                "Row 2 length: 4 (expected headers length: 3)",
            ]
        );
    }

    #[test]
    fn test_unmatched_keys_become_trailing_columns() {
        let mut r = HeaderReconciler::new(Some(headers(["col1", "col2", "col3"])), None, quiet()).unwrap();
        let row = r.append(Row::keyed([("col1", 51), ("col4", 54)])).unwrap();
        assert_eq!(row, Some(vec![Value::Int(51), Value::Null, Value::Null, Value::Int(54)]));
        // Same key again: already mapped, no new warning
        r.append(Row::keyed([("col4", 64)])).unwrap();

        assert_eq!(r.diagnostics().len(), 1);
        assert_eq!(
            r.diagnostics()[0].to_string(),
            "Row 1 key \"col4\" not found in headers: value will be appended at column 4 with an empty header"
        );
    }

    #[test]
    fn test_append_to_existing_headers() {
        let existing = vec!["previous".to_string(), "col2".to_string(), "col1".to_string()];
        let mut r = HeaderReconciler::new(Some(headers(["col1", "col2", "col3", "col4"])), Some(existing), quiet()).unwrap();
        assert_eq!(r.take_header(), None);

        let row = r.append(Row::positional([11, 12, 13, 14])).unwrap();
        assert_eq!(row, Some(vec![Value::Null, Value::Int(12), Value::Int(11), Value::Int(13), Value::Int(14)]));
        assert_eq!(
            r.diagnostics()
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>(),
            vec!["Header \"col3\", \"col4\" not found in existing headers: values will be appended without a column header"]
        );
    }

    #[test]
    fn test_named_policy_adds_columns_and_drops_extras() {
        let options = ReconcileOptions {
            extra_columns: ExtraColumns::Named,
            ..quiet()
        };
        let mut r = HeaderReconciler::new(Some(headers(["a"])), None, options).unwrap();
        r.append(Row::keyed([("a", 1), ("b", 2)])).unwrap();
        assert_eq!(r.take_added_columns(), vec!["b".to_string()]);

        let row = r.append(Row::positional([Value::Int(1), Value::Int(2), Value::Null, Value::from("x")])).unwrap();
        assert_eq!(row, Some(vec![Value::Int(1), Value::Null]));
        let messages: Vec<String> = r.diagnostics().iter().map(|d| d.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "Row 1 key \"b\" not found in headers: added as column 2",
                "Row 2 length: 4 (expected headers length: 1), ignored values: \"2\", \"x\"",
            ]
        );
    }

    #[test]
    fn test_named_policy_reports_unmatched_append_headers() {
        let options = ReconcileOptions {
            extra_columns: ExtraColumns::Named,
            ..quiet()
        };
        let existing = vec!["a".to_string()];
        let mut r = HeaderReconciler::new(Some(headers(["b", "a", "c"])), Some(existing), options).unwrap();
        assert_eq!(r.take_added_columns(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(
            r.diagnostics().to_vec(),
            vec![Diagnostic::UnmatchedHeaders {
                headers: vec!["b".to_string(), "c".to_string()],
                named: true,
            }]
        );
        assert_eq!(r.append(Row::positional([2, 1, 3])).unwrap(), Some(ints(&[1, 2, 3])));
    }

    #[test]
    fn test_duplicate_headers_map_to_first_occurrence() {
        let mut r = HeaderReconciler::new(Some(headers(["id", "id", "x"])), None, quiet()).unwrap();
        assert_eq!(
            r.diagnostics().to_vec(),
            vec![Diagnostic::DuplicateHeader {
                name: "id".to_string(),
                count: 2
            }]
        );
        assert_eq!(
            r.append(Row::keyed([("id", 1), ("x", 2)])).unwrap(),
            Some(vec![Value::Int(1), Value::Null, Value::Int(2)])
        );
        assert_eq!(r.append(Row::positional([1, 2, 3])).unwrap(), Some(ints(&[1, 2, 3])));
    }

    #[test]
    fn test_strict_mode_fails_on_mismatch() {
        let options = ReconcileOptions {
            strict: true,
            ..quiet()
        };
        let mut r = HeaderReconciler::new(Some(headers(["a", "b"])), None, options).unwrap();
        assert!(matches!(
            r.append(Row::positional([1])),
            Err(TabportError::HeaderMismatch(_))
        ));
    }
}
