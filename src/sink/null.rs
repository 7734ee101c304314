//! Sink used when output is disabled: rows are counted and dropped

use crate::error::Result;
use crate::sink::{SinkReport, TabularSink};
use crate::value::Row;

#[derive(Debug, Default)]
pub struct NullSink {
    rows: usize,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TabularSink for NullSink {
    fn append(&mut self, _row: Row) -> Result<()> {
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<SinkReport> {
        Ok(SinkReport {
            row_count: self.rows,
            diagnostics: Vec::new(),
        })
    }

    fn row_count(&self) -> usize {
        self.rows
    }
}
