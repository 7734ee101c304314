//! Spreadsheet workbook collaborator
//!
//! Workbook editing lives outside this crate. Sinks only need a narrow table
//! interface (column names, add a column, clear rows, append a row) and a way to
//! open a workbook by path. Opened workbooks are kept in a [`WorkbookCache`] so
//! successive sinks targeting different tables of the same file share one
//! parsed workbook until it is explicitly closed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info};

use crate::error::{Result, TabportError};
use crate::value::Value;

/// One named table region of a workbook
pub trait WorkbookTable {
    fn name(&self) -> &str;
    fn column_names(&self) -> Vec<String>;
    fn add_column(&mut self, name: &str) -> Result<()>;
    fn clear_rows(&mut self) -> Result<()>;
    fn append_row(&mut self, values: Vec<Value>) -> Result<()>;
    fn rows(&self) -> Vec<Vec<Value>>;
}

pub trait Workbook {
    fn path(&self) -> &Path;
    fn table_names(&self) -> Vec<String>;
    fn table(&self, name: &str) -> Option<&dyn WorkbookTable>;
    /// Get a table, creating it with the given columns when missing
    fn table_mut(&mut self, name: &str, columns: &[String]) -> Result<&mut dyn WorkbookTable>;
    fn save(&mut self) -> Result<()>;
}

pub trait WorkbookOpener {
    /// Open an existing workbook or start a new one
    fn open(&self, path: &Path) -> Result<Box<dyn Workbook>>;
}

/// Path-keyed cache of open workbooks
pub struct WorkbookCache {
    opener: Box<dyn WorkbookOpener>,
    open: HashMap<PathBuf, Box<dyn Workbook>>,
}

impl WorkbookCache {
    pub fn new(opener: Box<dyn WorkbookOpener>) -> Self {
        Self {
            opener,
            open: HashMap::new(),
        }
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.open.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<&dyn Workbook> {
        self.open.get(path).map(|w| w.as_ref())
    }

    /// Reuse the cached workbook or open it
    pub fn get_or_open(&mut self, path: &Path) -> Result<&mut dyn Workbook> {
        if !self.open.contains_key(path) {
            debug!("Open workbook {}", path.display());
            let workbook = self.opener.open(path)?;
            self.open.insert(path.to_path_buf(), workbook);
        }
        match self.open.get_mut(path) {
            Some(workbook) => Ok(workbook.as_mut()),
            None => Err(TabportError::Workbook(format!("workbook {} is not open", path.display()))),
        }
    }

    /// Save without evicting
    pub fn flush(&mut self, path: &Path) -> Result<()> {
        match self.open.get_mut(path) {
            Some(workbook) => workbook.save(),
            None => Ok(()),
        }
    }

    /// Save and evict
    pub fn close(&mut self, path: &Path) -> Result<()> {
        match self.open.remove(path) {
            Some(mut workbook) => {
                info!("Close workbook {}", path.display());
                workbook.save()
            }
            None => Ok(()),
        }
    }

    /// Save and evict every open workbook; the first failure is returned after all are tried
    pub fn close_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for (path, mut workbook) in self.open.drain() {
            if let Err(e) = workbook.save() {
                tracing::error!("Cannot save workbook {}: {}", path.display(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// In-process table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl WorkbookTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn add_column(&mut self, name: &str) -> Result<()> {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        Ok(())
    }

    fn clear_rows(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }

    fn append_row(&mut self, mut values: Vec<Value>) -> Result<()> {
        if values.len() > self.columns.len() {
            return Err(TabportError::Workbook(format!(
                "row has {} values but table {} has {} columns",
                values.len(),
                self.name,
                self.columns.len()
            )));
        }
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(values);
        Ok(())
    }

    fn rows(&self) -> Vec<Vec<Value>> {
        self.rows.clone()
    }
}

/// Saved workbooks of a [`MemoryWorkbookOpener`], by path
pub type MemoryStore = Rc<RefCell<HashMap<PathBuf, Vec<MemoryTable>>>>;

/// Workbook kept in memory; `save` publishes its tables to the shared store
pub struct MemoryWorkbook {
    path: PathBuf,
    tables: Vec<MemoryTable>,
    store: MemoryStore,
}

impl Workbook for MemoryWorkbook {
    fn path(&self) -> &Path {
        &self.path
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn table(&self, name: &str) -> Option<&dyn WorkbookTable> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .map(|t| t as &dyn WorkbookTable)
    }

    fn table_mut(&mut self, name: &str, columns: &[String]) -> Result<&mut dyn WorkbookTable> {
        let index = match self.tables.iter().position(|t| t.name == name) {
            Some(i) => i,
            None => {
                self.tables.push(MemoryTable {
                    name: name.to_string(),
                    columns: columns.to_vec(),
                    rows: Vec::new(),
                });
                self.tables.len() - 1
            }
        };
        Ok(&mut self.tables[index])
    }

    fn save(&mut self) -> Result<()> {
        self.store.borrow_mut().insert(self.path.clone(), self.tables.clone());
        Ok(())
    }
}

/// Opens [`MemoryWorkbook`]s backed by a shared store
#[derive(Clone, Default)]
pub struct MemoryWorkbookOpener {
    store: MemoryStore,
}

impl MemoryWorkbookOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> MemoryStore {
        Rc::clone(&self.store)
    }

    /// Saved content of one table
    pub fn saved_table(&self, path: &Path, table: &str) -> Option<MemoryTable> {
        self.store
            .borrow()
            .get(path)
            .and_then(|tables| tables.iter().find(|t| t.name == table).cloned())
    }
}

impl WorkbookOpener for MemoryWorkbookOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn Workbook>> {
        let tables = self.store.borrow().get(path).cloned().unwrap_or_default();
        Ok(Box::new(MemoryWorkbook {
            path: path.to_path_buf(),
            tables,
            store: Rc::clone(&self.store),
        }))
    }
}
