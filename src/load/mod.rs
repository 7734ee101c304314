//! Merge-aware bulk loading of delimited text into a database table
//!
//! The source is decoded once, reordered to the load columns and re-encoded
//! into the layout of the adapter's bulk channel. Upserts go through a
//! staging table that is always dropped afterwards.

pub mod columns;
pub mod transcode;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{CsvDecoder, CsvOptions};
use crate::db::{ColumnInfo, DbAdapter};
use crate::error::{Result, TabportError};

pub use columns::ColumnMatcher;
pub use transcode::{ColumnPlan, Transcoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Append the rows as they are
    #[default]
    None,
    /// Remove every existing row first
    Truncate,
    /// Insert or update by primary key
    Upsert,
}

impl FromStr for MergeMode {
    type Err = TabportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "append" => Ok(MergeMode::None),
            "truncate" | "replace" => Ok(MergeMode::Truncate),
            "upsert" | "merge" => Ok(MergeMode::Upsert),
            other => Err(TabportError::Config(format!(
                "unknown merge mode {:?} (expected none, truncate or upsert)",
                other
            ))),
        }
    }
}

/// Load columns: the source header as-is, or an explicit order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ColumnSelection {
    #[default]
    All,
    Named(Vec<String>),
}

impl ColumnSelection {
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnSelection::Named(names.into_iter().map(Into::into).collect())
    }
}

impl FromStr for ColumnSelection {
    type Err = TabportError;

    /// `*` or a comma-separated list
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" || s.is_empty() {
            return Ok(ColumnSelection::All);
        }
        let names: Vec<String> = s.split(',').map(|n| n.trim().to_string()).collect();
        if names.iter().any(String::is_empty) {
            return Err(TabportError::Config(format!("empty column name in {:?}", s)));
        }
        Ok(ColumnSelection::Named(names))
    }
}

/// One load invocation; consumed by [`BulkLoadEngine::load`]
pub struct BulkLoadRequest<R: Read> {
    pub source: R,
    pub target_table: String,
    pub columns: ColumnSelection,
    pub merge: MergeMode,
    pub has_header_row: bool,
    /// How the source is encoded
    pub csv: CsvOptions,
}

impl<R: Read> BulkLoadRequest<R> {
    pub fn new(source: R, target_table: impl Into<String>) -> Self {
        Self {
            source,
            target_table: target_table.into(),
            columns: ColumnSelection::All,
            merge: MergeMode::None,
            has_header_row: true,
            csv: CsvOptions::default(),
        }
    }

    pub fn with_columns(mut self, columns: ColumnSelection) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_merge(mut self, merge: MergeMode) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_header_row(mut self, has_header_row: bool) -> Self {
        self.has_header_row = has_header_row;
        self
    }

    pub fn with_csv(mut self, csv: CsvOptions) -> Self {
        self.csv = csv;
        self
    }
}

impl BulkLoadRequest<File> {
    pub fn from_path(path: &Path, target_table: impl Into<String>) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            TabportError::Load(format!("Cannot open {}: {}", path.display(), e))
        })?;
        Ok(Self::new(file, target_table))
    }
}

/// Drives one adapter's bulk channel under a merge mode
pub struct BulkLoadEngine<'a> {
    adapter: &'a mut dyn DbAdapter,
    matcher: ColumnMatcher,
}

impl<'a> BulkLoadEngine<'a> {
    pub fn new(adapter: &'a mut dyn DbAdapter) -> Self {
        Self {
            adapter,
            matcher: ColumnMatcher::default(),
        }
    }

    /// Load the source and return the number of source rows ingested
    pub fn load<R: Read>(&mut self, request: BulkLoadRequest<R>) -> Result<u64> {
        let table = request.target_table.clone();
        let target = self.adapter.get_table_columns(&table)?;
        if target.is_empty() {
            return Err(TabportError::Load(format!("table {} not found", table)));
        }

        let mut decoder = CsvDecoder::new(BufReader::new(request.source), &request.csv)?;
        let source_header = if request.has_header_row {
            match decoder.read_record()? {
                Some(record) => Some(record.fields.into_iter().map(|f| f.text).collect::<Vec<_>>()),
                None => {
                    if request.merge == MergeMode::Truncate {
                        self.adapter.truncate_table(&table)?;
                    }
                    info!("Source for {} is empty, nothing to load", table);
                    return Ok(0);
                }
            }
        } else {
            None
        };

        let plan = self.plan_columns(&table, &target, source_header.as_deref(), &request.columns)?;
        let names: Vec<String> = plan.iter().map(|c| c.name.clone()).collect();
        debug!("Load columns for {}: {:?}", table, names);

        if request.merge == MergeMode::Truncate {
            info!("Truncate {}", table);
            self.adapter.truncate_table(&table)?;
        }

        let format = self.adapter.bulk_format();
        let mut transcoder = Transcoder::new(decoder, plan, request.csv, format.csv_options(), format.header_line);

        match request.merge {
            MergeMode::None | MergeMode::Truncate => self.ingest(&table, &names, &mut transcoder),
            MergeMode::Upsert => self.upsert(&table, &names, &mut transcoder),
        }
    }

    /// Resolve load columns to source positions and decode hints
    fn plan_columns(
        &self,
        table: &str,
        target: &[ColumnInfo],
        source_header: Option<&[String]>,
        selection: &ColumnSelection,
    ) -> Result<Vec<ColumnPlan>> {
        let target_names: Vec<String> = target.iter().map(|c| c.name.clone()).collect();

        let pairs: Vec<(String, usize)> = match (selection, source_header) {
            (ColumnSelection::All, Some(header)) => header.iter().cloned().zip(0..).collect(),
            (ColumnSelection::All, None) => target_names.iter().cloned().zip(0..).collect(),
            (ColumnSelection::Named(names), None) => names.iter().cloned().zip(0..).collect(),
            (ColumnSelection::Named(names), Some(header)) => {
                let missing: Vec<&String> = names.iter().filter(|n| !header.contains(n)).collect();
                if !missing.is_empty() {
                    return Err(TabportError::HeaderMismatch(format!(
                        "column(s) {} not found in the source header",
                        missing.iter().map(|n| format!("{:?}", n)).collect::<Vec<_>>().join(", ")
                    )));
                }
                names
                    .iter()
                    .map(|n| (n.clone(), header.iter().position(|h| h == n).unwrap_or(0)))
                    .collect()
            }
        };

        let names: Vec<String> = pairs.iter().map(|(n, _)| n.clone()).collect();
        let mut seen = HashSet::new();
        if let Some(dup) = names.iter().find(|n| !seen.insert(n.as_str())) {
            return Err(TabportError::Load(format!("column {:?} is loaded more than once", dup)));
        }
        self.matcher.validate(table, &names, &target_names)?;

        Ok(pairs
            .into_iter()
            .map(|(name, source_index)| {
                let format = target
                    .iter()
                    .find(|c| c.name == name)
                    .and_then(|c| c.semantic_type.cell_format());
                ColumnPlan {
                    name,
                    source_index,
                    format,
                }
            })
            .collect())
    }

    fn ingest<R: std::io::BufRead>(&mut self, table: &str, columns: &[String], transcoder: &mut Transcoder<R>) -> Result<u64> {
        let channel = self.adapter.open_bulk_channel(table, columns)?;
        let kind = channel.kind();
        info!("Load {} through {} channel", table, kind);

        let ingested = match channel.ingest(transcoder) {
            Ok(count) => count,
            Err(e) => return Err(transcoder.take_error().unwrap_or(e)),
        };
        if let Some(e) = transcoder.take_error() {
            return Err(e);
        }

        let read = transcoder.rows();
        if ingested != read {
            return Err(TabportError::ChannelCountMismatch {
                table: table.to_string(),
                expected: read,
                actual: ingested,
            });
        }
        info!("{} rows loaded into {}", read, table);
        Ok(read)
    }

    fn upsert<R: std::io::BufRead>(&mut self, table: &str, columns: &[String], transcoder: &mut Transcoder<R>) -> Result<u64> {
        let primary_key = self.adapter.get_primary_key(table)?;
        if primary_key.is_empty() {
            return Err(TabportError::Load(format!("upsert into {} requires a primary key", table)));
        }
        let missing: Vec<&String> = primary_key.iter().filter(|k| !columns.contains(k)).collect();
        if !missing.is_empty() {
            return Err(TabportError::Load(format!(
                "upsert into {} requires key column(s) {} in the loaded columns",
                table,
                missing.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }

        let dialect = self.adapter.dialect();
        let staging = format!("tabport_stage_{}", Uuid::new_v4().simple());
        let temporary = self.adapter.supports_temporary_staging();
        self.adapter
            .execute(&dialect.create_staging_sql(&staging, table, columns, temporary), &[])?;
        debug!("Created staging table {}", staging);

        let merged = self.ingest(&staging, columns, transcoder).and_then(|count| {
            let affected = self
                .adapter
                .execute(&dialect.upsert_sql(table, &staging, columns, &primary_key), &[])?;
            debug!("Upsert into {} affected {} rows", table, affected);
            Ok(count)
        });

        if let Err(e) = self.adapter.execute(&dialect.drop_table_sql(&staging), &[]) {
            warn!("Cannot drop staging table {}: {}", staging, e);
        }
        merged
    }
}

/// Load a request through `adapter`
pub fn load<R: Read>(request: BulkLoadRequest<R>, adapter: &mut dyn DbAdapter) -> Result<u64> {
    BulkLoadEngine::new(adapter).load(request)
}
