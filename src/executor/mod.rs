mod clickhouse;
mod duckdb;
pub(crate) mod sql_builder;

#[cfg(test)]
mod test_counting;

pub use self::clickhouse::ClickHouseExecutor;
pub use self::duckdb::DuckDbExecutor;
pub use self::sql_builder::InsertStatement;

#[cfg(test)]
pub use self::test_counting::TestCountingExecutor;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorMode {
    #[default]
    #[serde(rename = "duckdb")]
    DuckDb,
    #[serde(rename = "clickhouse")]
    ClickHouse,
}

/// Receives result rows one at a time, already converted to text.
/// `columns` is called once, before the first row.
pub trait RowSink {
    fn columns(&mut self, _names: &[String]) -> Result<()> {
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryResult {
    /// One JSON object per row, keyed by column name.
    pub fn to_records(&self) -> Vec<Map<String, JsonValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(|v| JsonValue::String(v.clone())))
                    .collect()
            })
            .collect()
    }
}

impl RowSink for QueryResult {
    fn columns(&mut self, names: &[String]) -> Result<()> {
        self.columns = names.to_vec();
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<()> {
        self.rows.push(row.to_vec());
        Ok(())
    }
}

#[async_trait]
pub trait ExecutorBackend: Send + Sync {
    fn mode(&self) -> ExecutorMode;

    async fn ping(&self) -> Result<()> {
        self.execute_query("SELECT 1").await.map(|_| ())
    }

    /// Ordered column names of `table_name`, or `SchemaLookup` when it does not exist.
    async fn describe_columns(&self, table_name: &str) -> Result<Vec<String>>;

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn execute_statement(&self, sql: &str) -> Result<u64>;

    /// Executes `insert` once per row as a single unit. Either every row of the
    /// batch is applied or the call fails.
    async fn execute_batch(&self, insert: &InsertStatement, rows: &[Vec<String>]) -> Result<u64>;

    /// Streams every result row of `sql` into `sink`, returning the row count.
    async fn stream_query(&self, sql: &str, sink: &mut (dyn RowSink + Send)) -> Result<u64>;

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let mut result = QueryResult::default();
        self.stream_query(sql, &mut result).await?;
        Ok(result)
    }

    async fn create_table_as(&self, table_name: &str, select_sql: &str) -> Result<u64> {
        let sql = sql_builder::build_create_table_as(table_name, select_sql, None);
        self.execute_statement(&sql).await
    }
}

/// Opens the backend named by `config.backend` and checks that it answers.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn ExecutorBackend>> {
    let backend: Box<dyn ExecutorBackend> = match config.backend {
        ExecutorMode::DuckDb => match &config.path {
            Some(path) => Box::new(DuckDbExecutor::open(path)?),
            None => Box::new(DuckDbExecutor::in_memory()?),
        },
        ExecutorMode::ClickHouse => Box::new(ClickHouseExecutor::new(config)?),
    };

    backend
        .ping()
        .await
        .map_err(|e| Error::Executor(format!("Connection check failed: {}", e)))?;

    tracing::info!(backend = ?config.backend, "Connected");
    Ok(backend)
}
