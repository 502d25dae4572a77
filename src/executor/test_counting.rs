use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{DuckDbExecutor, ExecutorBackend, ExecutorMode, InsertStatement, RowSink};
use crate::error::{Error, Result};

/// Wraps an in-memory DuckDB and records what reaches the backend.
pub struct TestCountingExecutor {
    inner: DuckDbExecutor,
    statements: Mutex<Vec<String>>,
    batch_sizes: Mutex<Vec<usize>>,
    describe_calls: AtomicUsize,
    fail_on_batch: Option<usize>,
}

impl TestCountingExecutor {
    pub fn new() -> Self {
        Self {
            inner: DuckDbExecutor::in_memory().expect("in-memory duckdb"),
            statements: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
            describe_calls: AtomicUsize::new(0),
            fail_on_batch: None,
        }
    }

    /// The `n`th batch (1-based) fails without touching the table.
    pub fn failing_batch(mut self, n: usize) -> Self {
        self.fail_on_batch = Some(n);
        self
    }

    pub async fn seed(&self, sql: &str) {
        self.inner.execute_statement(sql).await.unwrap();
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Statements and queries other than introspection.
    pub fn query_count(&self) -> usize {
        self.statements.lock().unwrap().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub async fn rows(&self, sql: &str) -> Vec<Vec<String>> {
        self.inner.execute_query(sql).await.unwrap().rows
    }

    fn record(&self, sql: &str) {
        self.statements.lock().unwrap().push(sql.to_string());
    }
}

#[async_trait]
impl ExecutorBackend for TestCountingExecutor {
    fn mode(&self) -> ExecutorMode {
        self.inner.mode()
    }

    async fn describe_columns(&self, table_name: &str) -> Result<Vec<String>> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.describe_columns(table_name).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn execute_statement(&self, sql: &str) -> Result<u64> {
        self.record(sql);
        self.inner.execute_statement(sql).await
    }

    async fn execute_batch(&self, insert: &InsertStatement, rows: &[Vec<String>]) -> Result<u64> {
        self.record(&insert.sql);
        let batch_number = {
            let mut sizes = self.batch_sizes.lock().unwrap();
            sizes.push(rows.len());
            sizes.len()
        };
        if self.fail_on_batch == Some(batch_number) {
            return Err(Error::Executor(format!("injected failure on batch {}", batch_number)));
        }
        self.inner.execute_batch(insert, rows).await
    }

    async fn stream_query(&self, sql: &str, sink: &mut (dyn RowSink + Send)) -> Result<u64> {
        self.record(sql);
        self.inner.stream_query(sql, sink).await
    }
}
