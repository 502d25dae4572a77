use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SchemaIntrospector;
use crate::codec::{check_rows, count_data_rows, DelimitedReader, DEFAULT_DELIMITER};
use crate::config::{ColumnMatching, MalformedRowPolicy, TransferConfig};
use crate::domain::{IngestResult, TableSchema};
use crate::error::{Error, Result};
use crate::executor::{ExecutorBackend, InsertStatement, DEFAULT_BATCH_SIZE};
use crate::metrics;
use crate::progress::{ProgressObserver, ProgressReporter};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub delimiter: char,
    pub batch_size: usize,
    pub malformed_rows: MalformedRowPolicy,
    pub column_matching: ColumnMatching,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            batch_size: DEFAULT_BATCH_SIZE,
            malformed_rows: MalformedRowPolicy::default(),
            column_matching: ColumnMatching::default(),
        }
    }
}

impl From<&TransferConfig> for IngestOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            delimiter: config.delimiter,
            batch_size: config.batch_size,
            malformed_rows: config.malformed_rows,
            column_matching: config.column_matching,
        }
    }
}

/// Loads delimited rows into an existing table in fixed-size batches.
pub struct BatchIngestor<'a> {
    backend: &'a dyn ExecutorBackend,
    options: IngestOptions,
    cancel: Option<CancellationToken>,
}

impl<'a> BatchIngestor<'a> {
    pub fn new(backend: &'a dyn ExecutorBackend, options: IngestOptions) -> Self {
        Self {
            backend,
            options,
            cancel: None,
        }
    }

    /// Stops submitting batches once `token` is cancelled. The pending batch is dropped.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn ingest<R: Read>(&self, target_table: &str, source: R) -> Result<IngestResult> {
        self.run(target_table, source, None, None).await
    }

    /// Reports rows processed (inserted or skipped) against `total` after every batch.
    pub async fn ingest_with_progress<R: Read>(
        &self,
        target_table: &str,
        source: R,
        total: u64,
        observer: &mut dyn ProgressObserver,
    ) -> Result<IngestResult> {
        let mut reporter = ProgressReporter::new(total, observer);
        self.run(target_table, source, Some(&mut reporter), None).await
    }

    /// Ingests a file. Under the abort policy every row is checked before the
    /// first batch is sent, so a malformed file inserts nothing.
    pub async fn ingest_file(
        &self,
        target_table: &str,
        path: impl AsRef<Path>,
    ) -> Result<IngestResult> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.run(target_table, BufReader::new(file), None, Some(path))
            .await
    }

    /// Like [`ingest_file`](Self::ingest_file), reporting against the file's data row count.
    pub async fn ingest_file_with_progress(
        &self,
        target_table: &str,
        path: impl AsRef<Path>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<IngestResult> {
        let path = path.as_ref();
        let total = count_data_rows(path)?;
        let file = File::open(path)?;
        let mut reporter = ProgressReporter::new(total, observer);
        self.run(target_table, BufReader::new(file), Some(&mut reporter), Some(path))
            .await
    }

    async fn run<R: Read>(
        &self,
        target_table: &str,
        source: R,
        mut reporter: Option<&mut ProgressReporter<'_>>,
        precheck: Option<&Path>,
    ) -> Result<IngestResult> {
        if self.options.batch_size == 0 {
            return Err(Error::InvalidRequest("batch_size must be at least 1".to_string()));
        }

        let start = Instant::now();
        let mut introspector = SchemaIntrospector::new(self.backend);
        let schema = introspector.schema(target_table).await?;
        let mut reader = DelimitedReader::new(source, self.options.delimiter)?;
        let reorder = match_columns(&schema, reader.header(), self.options.column_matching)?;
        if let Some(path) = precheck {
            if self.options.malformed_rows == MalformedRowPolicy::Abort {
                check_rows(path, self.options.delimiter)?;
            }
        }

        let insert = InsertStatement::new(target_table, &schema.columns);
        debug!(table = %target_table, sql = %insert.sql, "Prepared batch insert");

        let mut result = IngestResult::default();
        let mut batch: Vec<Vec<String>> = Vec::with_capacity(self.options.batch_size);
        let mut unreported = 0u64;

        loop {
            if self.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let row = match reader.next() {
                Some(Ok(row)) => row,
                Some(Err(e @ Error::MalformedRow { .. })) => {
                    if self.options.malformed_rows == MalformedRowPolicy::Abort {
                        return Err(after_commit(e, &result));
                    }
                    warn!(table = %target_table, error = %e, "Skipping malformed row");
                    result.rows_skipped += 1;
                    unreported += 1;
                    continue;
                }
                Some(Err(e)) => return Err(after_commit(e, &result)),
                None => break,
            };

            batch.push(match &reorder {
                Some(positions) => positions.iter().map(|&i| row.fields[i].clone()).collect(),
                None => row.fields,
            });

            if batch.len() >= self.options.batch_size {
                unreported += self.flush(&insert, &mut batch, &mut result).await?;
                if report(&mut reporter, &mut unreported).await.is_break() {
                    result.cancelled = true;
                    break;
                }
            }
        }

        if !result.cancelled {
            if !batch.is_empty() {
                unreported += self.flush(&insert, &mut batch, &mut result).await?;
            }
            if let Some(reporter) = reporter.as_deref_mut() {
                if unreported > 0 {
                    let _ = reporter.advance(unreported).await;
                }
                let _ = reporter.finish().await;
            }
        }

        if result.rows_skipped > 0 {
            metrics::record_rows_skipped(target_table, result.rows_skipped);
        }
        metrics::record_transfer_duration("ingest", start);
        info!(
            table = %target_table,
            rows = result.rows_inserted,
            skipped = result.rows_skipped,
            batches = result.batches,
            cancelled = result.cancelled,
            "Ingest finished"
        );
        Ok(result)
    }

    /// Submits and clears `batch`, returning the number of rows committed.
    async fn flush(
        &self,
        insert: &InsertStatement,
        batch: &mut Vec<Vec<String>>,
        result: &mut IngestResult,
    ) -> Result<u64> {
        let table = insert.table.as_str();
        match self.backend.execute_batch(insert, batch).await {
            Ok(_) => {
                let rows = batch.len() as u64;
                batch.clear();
                result.rows_inserted += rows;
                result.batches += 1;
                metrics::record_batch_executed(table);
                metrics::record_rows_ingested(table, rows);
                debug!(table = %table, batch = result.batches, rows, "Batch committed");
                Ok(rows)
            }
            Err(e) => {
                metrics::record_batch_failed(table);
                warn!(
                    table = %table,
                    batch = result.batches + 1,
                    committed_rows = result.rows_inserted,
                    error = %e,
                    "Batch failed"
                );
                Err(Error::BatchExecution {
                    committed_rows: result.rows_inserted,
                    message: e.to_string(),
                })
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Attaches the committed row count to a failure that follows committed batches.
fn after_commit(error: Error, result: &IngestResult) -> Error {
    if result.rows_inserted == 0 {
        return error;
    }
    warn!(committed_rows = result.rows_inserted, error = %error, "Ingest stopped after commits");
    Error::Ingest {
        committed_rows: result.rows_inserted,
        source: Box::new(error),
    }
}

async fn report(
    reporter: &mut Option<&mut ProgressReporter<'_>>,
    unreported: &mut u64,
) -> ControlFlow<()> {
    match reporter.as_deref_mut() {
        Some(reporter) => {
            let units = std::mem::take(unreported);
            let flow = reporter.advance(units).await;
            tokio::task::yield_now().await;
            flow
        }
        None => ControlFlow::Continue(()),
    }
}

/// Checks the source header against the table and returns, for by-name
/// matching, the source position of each table column.
fn match_columns(
    schema: &TableSchema,
    header: &[String],
    matching: ColumnMatching,
) -> Result<Option<Vec<usize>>> {
    if header.len() != schema.len() {
        return Err(Error::SchemaMismatch {
            table: schema.table.clone(),
            message: format!(
                "source has {} columns, table has {}",
                header.len(),
                schema.len()
            ),
        });
    }

    match matching {
        ColumnMatching::Positional => Ok(None),
        ColumnMatching::ByName => {
            let mut positions = Vec::with_capacity(schema.len());
            for column in &schema.columns {
                let matches: Vec<usize> = header
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| *h == column)
                    .map(|(i, _)| i)
                    .collect();
                match matches.as_slice() {
                    [only] => positions.push(*only),
                    [] => {
                        return Err(Error::SchemaMismatch {
                            table: schema.table.clone(),
                            message: format!("source has no column '{}'", column),
                        })
                    }
                    _ => {
                        return Err(Error::SchemaMismatch {
                            table: schema.table.clone(),
                            message: format!("source repeats column '{}'", column),
                        })
                    }
                }
            }
            Ok(Some(positions))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TestCountingExecutor;
    use crate::progress::{FnObserver, ProgressEvent};

    async fn bands() -> TestCountingExecutor {
        let executor = TestCountingExecutor::new();
        executor
            .seed("CREATE TABLE bands (code VARCHAR, band_name VARCHAR)")
            .await;
        executor
    }

    fn options(batch_size: usize) -> IngestOptions {
        IngestOptions {
            batch_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_two_rows() {
        let executor = bands().await;
        let ingestor = BatchIngestor::new(&executor, IngestOptions::default());
        let result = ingestor
            .ingest("bands", "code,band_name\n34,Band E\n35,Band F".as_bytes())
            .await
            .unwrap();

        assert_eq!(result.rows_inserted, 2);
        assert_eq!(result.batches, 1);
        assert!(!result.cancelled);
        assert_eq!(
            executor.rows("SELECT code, band_name FROM bands ORDER BY code").await,
            vec![vec!["34", "Band E"], vec!["35", "Band F"]]
        );
    }

    #[tokio::test]
    async fn test_ingest_batches_of_configured_size() {
        let executor = bands().await;
        let mut source = String::from("code,band_name\n");
        for i in 0..7 {
            source.push_str(&format!("{},Band {}\n", i, i));
        }

        let result = BatchIngestor::new(&executor, options(3))
            .ingest("bands", source.as_bytes())
            .await
            .unwrap();

        assert_eq!(result.rows_inserted, 7);
        assert_eq!(result.batches, 3);
        assert_eq!(executor.batch_sizes(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_ingest_header_count_mismatch_sends_nothing() {
        let executor = bands().await;
        let err = BatchIngestor::new(&executor, IngestOptions::default())
            .ingest("bands", "code\n34\n".as_bytes())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert_eq!(executor.query_count(), 0);
    }

    #[tokio::test]
    async fn test_ingest_header_only_wrong_header_fails() {
        let executor = bands().await;
        let err = BatchIngestor::new(&executor, IngestOptions::default())
            .ingest("bands", "a,b,c\n".as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_ingest_header_only() {
        let executor = bands().await;
        let result = BatchIngestor::new(&executor, IngestOptions::default())
            .ingest("bands", "code,band_name\n".as_bytes())
            .await
            .unwrap();
        assert_eq!(result.rows_inserted, 0);
        assert_eq!(result.batches, 0);
    }

    #[tokio::test]
    async fn test_ingest_empty_source() {
        let executor = bands().await;
        let err = BatchIngestor::new(&executor, IngestOptions::default())
            .ingest("bands", "".as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_ingest_abort_in_first_batch_inserts_nothing() {
        let executor = bands().await;
        let err = BatchIngestor::new(&executor, IngestOptions::default())
            .ingest("bands", "code,band_name\n1,a\n2\n3,c\n".as_bytes())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedRow { line: 3, .. }));
        assert!(executor.batch_sizes().is_empty());
        assert_eq!(executor.rows("SELECT count(*) FROM bands").await[0][0], "0");
    }

    #[tokio::test]
    async fn test_ingest_abort_after_commit_reports_committed_rows() {
        let executor = bands().await;
        let err = BatchIngestor::new(&executor, options(2))
            .ingest("bands", "code,band_name\n1,a\n2,b\n3,c\n4\n".as_bytes())
            .await
            .unwrap_err();

        match err {
            Error::Ingest {
                committed_rows,
                source,
            } => {
                assert_eq!(committed_rows, 2);
                assert!(matches!(*source, Error::MalformedRow { line: 5, .. }));
            }
            other => panic!("expected Ingest, got {:?}", other),
        }
        assert_eq!(executor.rows("SELECT count(*) FROM bands").await[0][0], "2");
    }

    #[tokio::test]
    async fn test_ingest_failing_reader_reports_committed_rows() {
        struct DropsAfter<'a> {
            data: &'a [u8],
        }
        impl Read for DropsAfter<'_> {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.data.is_empty() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "upload dropped",
                    ));
                }
                let n = buf.len().min(self.data.len());
                buf[..n].copy_from_slice(&self.data[..n]);
                self.data = &self.data[n..];
                Ok(n)
            }
        }

        let executor = bands().await;
        let source = DropsAfter {
            data: b"code,band_name\n1,a\n2,b\n3,c\n",
        };
        let err = BatchIngestor::new(&executor, options(2))
            .ingest("bands", source)
            .await
            .unwrap_err();

        assert_eq!(err.committed_rows(), Some(2));
        match err {
            Error::Ingest { source, .. } => assert!(matches!(*source, Error::Io(_))),
            other => panic!("expected Ingest, got {:?}", other),
        }
        assert_eq!(executor.rows("SELECT count(*) FROM bands").await[0][0], "2");
    }

    #[tokio::test]
    async fn test_ingest_file_abort_inserts_nothing() {
        use std::io::Write;

        let executor = bands().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"code,band_name\n1,a\n2,b\n3,c\n4\n").unwrap();

        let err = BatchIngestor::new(&executor, options(2))
            .ingest_file("bands", file.path())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedRow { line: 5, .. }));
        assert!(executor.batch_sizes().is_empty());
        assert_eq!(executor.rows("SELECT count(*) FROM bands").await[0][0], "0");
    }

    #[tokio::test]
    async fn test_ingest_file_skip_policy_does_not_precheck() {
        use std::io::Write;

        let executor = bands().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"code,band_name\n1,a\n2,b\n3,c\n4\n").unwrap();

        let opts = IngestOptions {
            batch_size: 2,
            malformed_rows: MalformedRowPolicy::Skip,
            ..Default::default()
        };
        let result = BatchIngestor::new(&executor, opts)
            .ingest_file("bands", file.path())
            .await
            .unwrap();
        assert_eq!(result.rows_inserted, 3);
        assert_eq!(result.rows_skipped, 1);
    }

    #[tokio::test]
    async fn test_ingest_file_with_progress() {
        use std::io::Write;

        let executor = bands().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"code,band_name\n1,a\n2,b\n").unwrap();

        let mut events: Vec<ProgressEvent> = Vec::new();
        let mut observer = FnObserver(|e: ProgressEvent| {
            events.push(e);
            ControlFlow::Continue(())
        });
        let result = BatchIngestor::new(&executor, options(1))
            .ingest_file_with_progress("bands", file.path(), &mut observer)
            .await
            .unwrap();
        drop(observer);

        assert_eq!(result.rows_inserted, 2);
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![50, 100]);
    }

    #[tokio::test]
    async fn test_ingest_skip_policy() {
        let executor = bands().await;
        let opts = IngestOptions {
            malformed_rows: MalformedRowPolicy::Skip,
            ..Default::default()
        };
        let result = BatchIngestor::new(&executor, opts)
            .ingest("bands", "code,band_name\n1,a\n2\n3,c,extra\n4,d\n".as_bytes())
            .await
            .unwrap();

        assert_eq!(result.rows_inserted, 2);
        assert_eq!(result.rows_skipped, 2);
    }

    #[tokio::test]
    async fn test_ingest_batch_failure_reports_committed_rows() {
        let executor = TestCountingExecutor::new().failing_batch(2);
        executor
            .seed("CREATE TABLE bands (code VARCHAR, band_name VARCHAR)")
            .await;

        let err = BatchIngestor::new(&executor, options(2))
            .ingest("bands", "code,band_name\n1,a\n2,b\n3,c\n4,d\n5,e\n".as_bytes())
            .await
            .unwrap_err();

        match err {
            Error::BatchExecution { committed_rows, .. } => assert_eq!(committed_rows, 2),
            other => panic!("expected BatchExecution, got {:?}", other),
        }
        assert_eq!(executor.batch_sizes(), vec![2, 2]);
        assert_eq!(executor.rows("SELECT count(*) FROM bands").await[0][0], "2");
    }

    #[tokio::test]
    async fn test_ingest_positional_binds_in_table_order() {
        let executor = bands().await;
        BatchIngestor::new(&executor, IngestOptions::default())
            .ingest("bands", "band_name,code\n34,Band E\n".as_bytes())
            .await
            .unwrap();

        assert_eq!(
            executor.rows("SELECT code, band_name FROM bands").await,
            vec![vec!["34", "Band E"]]
        );
        assert!(executor.statements()[0].contains("(\"code\", \"band_name\")"));
    }

    #[tokio::test]
    async fn test_ingest_by_name_reorders() {
        let executor = bands().await;
        let opts = IngestOptions {
            column_matching: ColumnMatching::ByName,
            ..Default::default()
        };
        BatchIngestor::new(&executor, opts)
            .ingest("bands", "band_name,code\nBand E,34\n".as_bytes())
            .await
            .unwrap();

        assert_eq!(
            executor.rows("SELECT code, band_name FROM bands").await,
            vec![vec!["34", "Band E"]]
        );
    }

    #[tokio::test]
    async fn test_ingest_by_name_unknown_header() {
        let executor = bands().await;
        let opts = IngestOptions {
            column_matching: ColumnMatching::ByName,
            ..Default::default()
        };
        let err = BatchIngestor::new(&executor, opts)
            .ingest("bands", "code,genre\n34,rock\n".as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_ingest_cancelled_before_start() {
        let executor = bands().await;
        let token = CancellationToken::new();
        token.cancel();

        let result = BatchIngestor::new(&executor, IngestOptions::default())
            .with_cancellation(token)
            .ingest("bands", "code,band_name\n1,a\n".as_bytes())
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.rows_inserted, 0);
        assert!(executor.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_with_progress_reports_per_batch() {
        let executor = bands().await;
        let mut events: Vec<ProgressEvent> = Vec::new();
        let mut observer = FnObserver(|e: ProgressEvent| {
            events.push(e);
            ControlFlow::Continue(())
        });

        let result = BatchIngestor::new(&executor, options(1))
            .ingest_with_progress(
                "bands",
                "code,band_name\n1,a\n2,b\n3,c\n4,d\n".as_bytes(),
                4,
                &mut observer,
            )
            .await
            .unwrap();
        drop(observer);

        assert_eq!(result.rows_inserted, 4);
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_ingest_with_progress_observer_break_cancels() {
        let executor = bands().await;
        let mut observer = FnObserver(|_e: ProgressEvent| ControlFlow::Break(()));

        let result = BatchIngestor::new(&executor, options(1))
            .ingest_with_progress(
                "bands",
                "code,band_name\n1,a\n2,b\n3,c\n".as_bytes(),
                3,
                &mut observer,
            )
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.rows_inserted, 1);
    }

    #[tokio::test]
    async fn test_ingest_file() {
        use std::io::Write;

        let executor = bands().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"code,band_name\n34,Band E\n").unwrap();

        let result = BatchIngestor::new(&executor, IngestOptions::default())
            .ingest_file("bands", file.path())
            .await
            .unwrap();
        assert_eq!(result.rows_inserted, 1);
    }

    #[test]
    fn test_match_columns_positional() {
        let schema = TableSchema::new("t", vec!["a".into(), "b".into()]);
        let header = vec!["x".to_string(), "y".to_string()];
        assert_eq!(
            match_columns(&schema, &header, ColumnMatching::Positional).unwrap(),
            None
        );
    }

    #[test]
    fn test_match_columns_by_name_positions() {
        let schema = TableSchema::new("t", vec!["a".into(), "b".into(), "c".into()]);
        let header = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(
            match_columns(&schema, &header, ColumnMatching::ByName).unwrap(),
            Some(vec![1, 2, 0])
        );
    }
}
