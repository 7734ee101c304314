pub mod codec;
pub mod config;
pub mod db;
pub mod destination;
pub mod diagnostics;
pub mod error;
pub mod header;
pub mod load;
pub mod numbers;
pub mod reconcile;
pub mod sink;
pub mod value;
pub mod workbook;

pub use codec::{CsvOptions, LineTerminator, TimeZoneSpec};
pub use config::TabportConfig;
pub use db::{connect, BulkChannel, ColumnInfo, DbAdapter, SemanticType};
pub use destination::{DbUrl, Destination};
pub use diagnostics::Diagnostic;
pub use error::{Result, TabportError};
pub use header::{CellFormat, Header, HeaderSpec};
pub use load::{load, BulkLoadEngine, BulkLoadRequest, ColumnSelection, MergeMode};
pub use reconcile::HeaderReconciler;
pub use sink::{open_sink, with_sink, OutputFormat, SinkContext, SinkOptions, SinkReport, TabularSink};
pub use value::{Row, Value};
pub use workbook::{MemoryWorkbookOpener, WorkbookCache};
