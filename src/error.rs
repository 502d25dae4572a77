use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema lookup failed for table '{table}': {message}")]
    SchemaLookup { table: String, message: String },

    #[error("Schema mismatch for table '{table}': {message}")]
    SchemaMismatch { table: String, message: String },

    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { column: String, table: String },

    #[error("Column '{column}' is ambiguous between '{left}' and '{right}'; qualify it as table.column")]
    AmbiguousColumn {
        column: String,
        left: String,
        right: String,
    },

    #[error("Malformed row at line {line}: expected {expected} fields, found {found}")]
    MalformedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Batch execution failed after {committed_rows} committed rows: {message}")]
    BatchExecution { committed_rows: u64, message: String },

    #[error("Ingest failed after {committed_rows} committed rows: {source}")]
    Ingest {
        committed_rows: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delimited format error: {0}")]
    Csv(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::SchemaLookup { .. } => -32010,
            Error::SchemaMismatch { .. } => -32011,
            Error::UnknownColumn { .. } => -32012,
            Error::AmbiguousColumn { .. } => -32013,
            Error::MalformedRow { .. } => -32014,
            Error::BatchExecution { .. } => -32015,
            Error::Io(_) => -32016,
            Error::Csv(_) => -32017,
            Error::InvalidIdentifier(_) => -32602,
            Error::InvalidRequest(_) => -32600,
            Error::Config(_) => -32001,
            Error::Executor(_) => -32000,
            Error::Json(_) => -32700,
            Error::Ingest { .. } => -32018,
        }
    }

    /// Rows already committed when an ingest failed part-way.
    pub fn committed_rows(&self) -> Option<u64> {
        match self {
            Error::BatchExecution { committed_rows, .. } | Error::Ingest { committed_rows, .. } => {
                Some(*committed_rows)
            }
            _ => None,
        }
    }

    /// True for failures detected before anything was written to the database or sink.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::SchemaLookup { .. }
                | Error::SchemaMismatch { .. }
                | Error::UnknownColumn { .. }
                | Error::AmbiguousColumn { .. }
                | Error::InvalidIdentifier(_)
                | Error::InvalidRequest(_)
                | Error::Config(_)
        )
    }

    pub fn with_context(self, operation: &str, table: Option<&str>) -> Self {
        let context = match table {
            Some(t) => format!("[operation={}, table={}]", operation, t),
            None => format!("[operation={}]", operation),
        };

        match self {
            Error::Executor(msg) => Error::Executor(format!("{} {}", context, msg)),
            Error::Csv(msg) => Error::Csv(format!("{} {}", context, msg)),
            Error::InvalidRequest(msg) => Error::InvalidRequest(format!("{} {}", context, msg)),
            other => other,
        }
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io) => Error::Io(io),
                other => Error::Csv(format!("{:?}", other)),
            }
        } else {
            Error::Csv(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
