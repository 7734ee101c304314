//! Bulk-ingestion channels
//!
//! Every engine ingests delimited text differently. A channel is one of three
//! shapes, all consumed the same way: hand it a reader, get back the number of
//! rows the engine reports as ingested.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tracing::{debug, info};

use crate::error::{Result, TabportError};

const CHUNK_SIZE: usize = 64 * 1024;

/// Live copy protocol on an open connection
pub trait CopyStream {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;
    /// Complete the copy, returning the row count reported by the engine
    fn finish(self: Box<Self>) -> Result<u64>;
    fn abort(self: Box<Self>, reason: &str) -> Result<()>;
}

/// Engine-side ingestion of a file on the local filesystem
pub trait FileIngest {
    fn ingest_file(&mut self, path: &Path) -> Result<u64>;
}

/// External bulk utility run against a temporary file
#[derive(Debug, Clone)]
pub struct ExternalTool {
    pub program: PathBuf,
    /// Arguments; `{file}` is replaced by the data file path
    pub args: Vec<String>,
    /// First capture group holds the ingested row count
    pub count_pattern: Regex,
}

impl ExternalTool {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, count_pattern: Regex) -> Self {
        Self {
            program: program.into(),
            args,
            count_pattern,
        }
    }

    /// Run the tool on `path` and parse the row count from its output
    pub fn run(&self, path: &Path) -> Result<u64> {
        let file = path.to_string_lossy();
        let args: Vec<String> = self.args.iter().map(|a| a.replace("{file}", &file)).collect();
        let program = self.program.display().to_string();
        debug!("Run {} {:?}", program, args);

        let output = Command::new(&self.program).args(&args).output().map_err(|e| TabportError::BulkTool {
            program: program.clone(),
            status: "not started".to_string(),
            output: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let combined = format!("{}{}", stdout, stderr).trim().to_string();
            return Err(TabportError::BulkTool {
                program,
                status: output.status.to_string(),
                output: combined,
            });
        }
        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", program, stderr.trim());
        }

        self.count_pattern
            .captures_iter(&stdout)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .ok_or_else(|| TabportError::BulkTool {
                program,
                status: output.status.to_string(),
                output: format!("row count not found in output: {}", stdout.trim()),
            })
    }
}

pub enum BulkChannel<'a> {
    Stream(Box<dyn CopyStream + 'a>),
    LocalFile(Box<dyn FileIngest + 'a>),
    ExternalTool(ExternalTool),
}

impl<'a> BulkChannel<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            BulkChannel::Stream(_) => "stream",
            BulkChannel::LocalFile(_) => "local file",
            BulkChannel::ExternalTool(_) => "external tool",
        }
    }

    /// Feed the whole reader to the engine and return the ingested row count
    pub fn ingest(self, reader: &mut dyn Read) -> Result<u64> {
        match self {
            BulkChannel::Stream(mut stream) => {
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    let step = match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => stream.write_chunk(&buf[..n]),
                        Err(e) => Err(TabportError::Io(e)),
                    };
                    if let Err(e) = step {
                        if let Err(abort_err) = stream.abort(&e.to_string()) {
                            debug!("Abort failed: {}", abort_err);
                        }
                        return Err(e);
                    }
                }
                stream.finish()
            }
            BulkChannel::LocalFile(mut ingest) => {
                let file = spool(reader)?;
                ingest.ingest_file(file.path())
            }
            BulkChannel::ExternalTool(tool) => {
                let file = spool(reader)?;
                info!("Run {} on {}", tool.program.display(), file.path().display());
                tool.run(file.path())
            }
        }
    }
}

/// Copy a reader to a temporary file removed on drop
fn spool(reader: &mut dyn Read) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("tabport-")
        .suffix(".csv")
        .tempfile()?;
    std::io::copy(reader, file.as_file_mut())?;
    file.as_file_mut().flush()?;
    Ok(file)
}
