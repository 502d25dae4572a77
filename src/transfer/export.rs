use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use super::SchemaIntrospector;
use crate::codec::{DelimitedWriter, DEFAULT_DELIMITER};
use crate::domain::{ColumnSelection, ExportResult, TableSchema};
use crate::error::{Error, Result};
use crate::executor::sql_builder::build_select_sql;
use crate::executor::{ExecutorBackend, QueryResult};
use crate::metrics;

pub const DEFAULT_PREVIEW_LIMIT: u64 = 100;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub delimiter: char,
    pub limit: Option<u64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            limit: None,
        }
    }
}

/// Exports selected columns of one table, in the caller's column order.
pub struct ColumnProjector<'a> {
    backend: &'a dyn ExecutorBackend,
}

impl<'a> ColumnProjector<'a> {
    pub fn new(backend: &'a dyn ExecutorBackend) -> Self {
        Self { backend }
    }

    /// Writes the header, then every selected row, to `sink`. An empty
    /// selection exports all columns in table order.
    ///
    /// Column names are checked before any query is sent. Rows already
    /// written stay in the sink if the query fails part way.
    pub async fn export<W: Write + Send>(
        &self,
        table: &str,
        selection: &ColumnSelection,
        sink: W,
        options: &ExportOptions,
    ) -> Result<ExportResult> {
        let columns = self.resolve(table, selection).await?;
        self.export_columns(table, columns, sink, options).await
    }

    pub async fn export_to_path(
        &self,
        table: &str,
        selection: &ColumnSelection,
        path: impl AsRef<Path>,
        options: &ExportOptions,
    ) -> Result<ExportResult> {
        // Validate before creating the file so a bad request leaves nothing behind.
        let columns = self.resolve(table, selection).await?;
        let file = File::create(path.as_ref())?;
        self.export_columns(table, columns, BufWriter::new(file), options)
            .await
    }

    /// Up to `limit` rows (100 when `None`) of the selected columns.
    pub async fn preview(
        &self,
        table: &str,
        selection: &ColumnSelection,
        limit: Option<u64>,
    ) -> Result<QueryResult> {
        let columns = self.resolve(table, selection).await?;
        let limit = limit.unwrap_or(DEFAULT_PREVIEW_LIMIT);
        let sql = build_select_sql(table, &columns, Some(limit));
        self.backend.execute_query(&sql).await
    }

    async fn export_columns<W: Write + Send>(
        &self,
        table: &str,
        columns: Vec<String>,
        sink: W,
        options: &ExportOptions,
    ) -> Result<ExportResult> {
        let start = Instant::now();
        let sql = build_select_sql(table, &columns, options.limit);
        debug!(table = %table, sql = %sql, "Exporting");

        let rows_written =
            stream_to_sink(self.backend, &sql, &columns, sink, options.delimiter).await?;

        metrics::record_rows_exported(table, rows_written);
        metrics::record_transfer_duration("export", start);
        info!(table = %table, rows = rows_written, "Export finished");
        Ok(ExportResult {
            rows_written,
            columns,
        })
    }

    async fn resolve(&self, table: &str, selection: &ColumnSelection) -> Result<Vec<String>> {
        let schema = SchemaIntrospector::new(self.backend).schema(table).await?;
        validate_selection(&schema, selection)
    }
}

fn validate_selection(schema: &TableSchema, selection: &ColumnSelection) -> Result<Vec<String>> {
    if selection.is_empty() {
        return Ok(schema.columns.clone());
    }
    if let Some(missing) = selection.columns().iter().find(|c| !schema.contains(c)) {
        return Err(Error::UnknownColumn {
            column: missing.clone(),
            table: schema.table.clone(),
        });
    }
    Ok(selection.columns().to_vec())
}

/// Writes `header` then streams `sql` through a delimited writer over `sink`.
pub(crate) async fn stream_to_sink<W: Write + Send>(
    backend: &dyn ExecutorBackend,
    sql: &str,
    header: &[String],
    sink: W,
    delimiter: char,
) -> Result<u64> {
    let mut writer = DelimitedWriter::new(sink, delimiter)?;
    writer.write_header(header)?;

    let streamed = backend.stream_query(sql, &mut writer).await;
    // Keep whatever was written even when the query failed.
    let flushed = writer.flush();
    let rows = streamed?;
    flushed?;
    Ok(rows)
}
