//! Reconciliation warnings
//!
//! Header and row mismatches are not errors: the sink applies a fallback and
//! records a [`Diagnostic`]. The list is returned to the caller when the sink
//! closes; each entry is also logged through `tracing` unless disabled.

use itertools::Itertools;
use serde::Serialize;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Headers given for an append that the destination does not have
    ///
    /// `named` is set when the destination adds them as named columns.
    UnmatchedHeaders { headers: Vec<String>, named: bool },
    /// Keys of a keyed row without a matching header (1-based row, 1-based first column)
    UnmatchedKeys {
        row: usize,
        keys: Vec<String>,
        column: usize,
        named: bool,
    },
    /// Resolved columns the target table does not have; their values are not loaded
    DroppedColumns { table: String, columns: Vec<String> },
    /// Positional row whose length differs from the header count
    RowLength {
        row: usize,
        length: usize,
        expected: usize,
        /// Non-null values that could not be kept
        ignored: Vec<String>,
    },
    /// Same header name given more than once
    DuplicateHeader { name: String, count: usize },
}

fn quoted(names: &[String]) -> String {
    names.iter().map(|n| format!("\"{}\"", n)).join(", ")
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnmatchedHeaders { headers, named: true } => write!(
                f,
                "Header {} not found in existing headers: added as new columns",
                quoted(headers)
            ),
            Diagnostic::UnmatchedHeaders { headers, .. } => write!(
                f,
                "Header {} not found in existing headers: values will be appended without a column header",
                quoted(headers)
            ),
            Diagnostic::UnmatchedKeys {
                row,
                keys,
                column,
                named: true,
            } if keys.len() == 1 => write!(f, "Row {} key {} not found in headers: added as column {}", row, quoted(keys), column),
            Diagnostic::UnmatchedKeys {
                row,
                keys,
                column,
                named: true,
            } => write!(
                f,
                "Row {} keys {} not found in headers: added as columns {}-{}",
                row,
                quoted(keys),
                column,
                column + keys.len() - 1
            ),
            Diagnostic::UnmatchedKeys { row, keys, column, .. } if keys.len() == 1 => write!(
                f,
                "Row {} key {} not found in headers: value will be appended at column {} with an empty header",
                row,
                quoted(keys),
                column
            ),
            Diagnostic::UnmatchedKeys { row, keys, column, .. } => write!(
                f,
                "Row {} keys {} not found in headers: values will be appended at columns {}-{} with an empty header",
                row,
                quoted(keys),
                column,
                column + keys.len() - 1
            ),
            Diagnostic::RowLength {
                row,
                length,
                expected,
                ignored,
            } => {
                write!(f, "Row {} length: {} (expected headers length: {})", row, length, expected)?;
                if !ignored.is_empty() {
                    write!(f, ", ignored values: {}", quoted(ignored))?;
                }
                Ok(())
            }
            Diagnostic::DuplicateHeader { name, count } => write!(
                f,
                "Header \"{}\" appears {} times: keyed values will map to the first occurrence",
                name, count
            ),
            Diagnostic::DroppedColumns { table, columns } => write!(
                f,
                "Column {} not found in table {}: values will not be loaded",
                quoted(columns),
                table
            ),
        }
    }
}

/// Collected diagnostics of one sink
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    log: bool,
}

impl Diagnostics {
    pub fn new(log: bool) -> Self {
        Self { items: Vec::new(), log }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        if self.log {
            warn!("{}", diagnostic);
        }
        self.items.push(diagnostic);
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.items)
    }
}
