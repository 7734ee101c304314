use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabportError {
    #[error("Format error at line {line}: {message}")]
    Format {
        line: usize,
        message: String,
    },

    #[error("Header mismatch: {0}")]
    HeaderMismatch(String),

    #[error("Unknown column(s) in {table}: {}{}", .columns.join(", "), render_suggestions(.suggestions))]
    UnknownColumn {
        table: String,
        columns: Vec<String>,
        suggestions: Vec<(String, String)>,
    },

    #[error("Cannot truncate {table}: {message}")]
    ForeignKeyViolation {
        table: String,
        message: String,
    },

    #[error("Bulk tool {program} failed ({status}): {output}")]
    BulkTool {
        program: String,
        status: String,
        output: String,
    },

    #[error("Bulk channel for {table} ingested {actual} rows, {expected} rows were read from the source")]
    ChannelCountMismatch {
        table: String,
        expected: u64,
        actual: u64,
    },

    #[error("Load error: {0}")]
    Load(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Destination error: {0}")]
    Destination(String),

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TabportError {
    pub fn format(line: usize, message: impl Into<String>) -> Self {
        TabportError::Format {
            line,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for TabportError {
    fn from(e: rusqlite::Error) -> Self {
        TabportError::Database(e.to_string())
    }
}

impl From<sqlx::Error> for TabportError {
    fn from(e: sqlx::Error) -> Self {
        TabportError::Database(e.to_string())
    }
}

fn render_suggestions(suggestions: &[(String, String)]) -> String {
    if suggestions.is_empty() {
        return String::new();
    }
    let hints: Vec<String> = suggestions
        .iter()
        .map(|(unknown, known)| format!("{} -> {}", unknown, known))
        .collect();
    format!(" (did you mean: {})", hints.join(", "))
}

pub type Result<T> = std::result::Result<T, TabportError>;
