//! Moves rows between a database backend and delimited text.
//!
//! Every operation borrows an open [`ExecutorBackend`] and resolves table
//! schemas through its own [`SchemaIntrospector`], so nothing is shared
//! between operations.

mod export;
mod ingest;
mod join;
mod schema;

pub use export::{ColumnProjector, ExportOptions, DEFAULT_PREVIEW_LIMIT};
pub use ingest::{BatchIngestor, IngestOptions};
pub use join::{JoinOutcome, JoinPlanner, JoinQuery};
pub use schema::SchemaIntrospector;

use std::io::{Read, Write};

use crate::domain::{ColumnSelection, ExportResult, IngestResult};
use crate::error::Result;
use crate::executor::ExecutorBackend;

pub async fn ingest<R: Read>(
    backend: &dyn ExecutorBackend,
    target_table: &str,
    source: R,
    options: IngestOptions,
) -> Result<IngestResult> {
    BatchIngestor::new(backend, options)
        .ingest(target_table, source)
        .await
}

pub async fn export<W: Write + Send>(
    backend: &dyn ExecutorBackend,
    table: &str,
    selection: &ColumnSelection,
    sink: W,
    options: &ExportOptions,
) -> Result<ExportResult> {
    ColumnProjector::new(backend)
        .export(table, selection, sink, options)
        .await
}
