pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
mod metrics;
pub mod progress;
pub mod transfer;
pub mod validation;

pub use codec::{
    check_rows, count_data_rows, read_header, DelimitedReader, DelimitedRow, DelimitedWriter,
};
pub use config::{ColumnMatching, Config, ConnectionConfig, MalformedRowPolicy};
pub use domain::{ColumnSelection, ExportResult, IngestResult, JoinSpec, TableSchema};
pub use error::{Error, Result};
pub use executor::{connect, ExecutorBackend, ExecutorMode, QueryResult, RowSink};
pub use progress::{FnObserver, ProgressEvent, ProgressObserver, ProgressReporter};
pub use transfer::{
    BatchIngestor, ColumnProjector, ExportOptions, IngestOptions, JoinOutcome, JoinPlanner, JoinQuery,
    SchemaIntrospector,
};
