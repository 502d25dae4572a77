use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::sql_builder::build_create_table_as;
use super::{ExecutorBackend, ExecutorMode, InsertStatement, RowSink};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::validation::quote_table_name;

const MERGE_TREE_ENGINE: &str = "ENGINE = MergeTree ORDER BY tuple()";

/// ClickHouse over its HTTP interface. Rows travel as TabSeparated text.
pub struct ClickHouseExecutor {
    client: reqwest::Client,
    base_url: String,
    database: String,
    user: String,
    password: String,
}

impl ClickHouseExecutor {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Executor(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Sends `query` in the URL and `body` as the request payload.
    async fn send(&self, query: &str, body: String) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.base_url)
            .query(&[("query", query)])
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .header("X-ClickHouse-Database", &self.database)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Executor(format!("ClickHouse request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Executor(format!(
                "ClickHouse returned {}: {}\n\nSQL: {}",
                status,
                text.trim(),
                query
            )));
        }
        Ok(response)
    }

    async fn query_first_column(&self, sql: &str) -> Result<Vec<String>> {
        let text = self
            .send(&format!("{} FORMAT TabSeparated", sql), String::new())
            .await?
            .text()
            .await
            .map_err(|e| Error::Executor(format!("Failed to read response: {}", e)))?;

        Ok(text
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| unescape_tsv_field(line.split('\t').next().unwrap_or_default()))
            .collect())
    }
}

fn written_rows(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("X-ClickHouse-Summary")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| serde_json::from_str::<JsonValue>(s).ok())
        .and_then(|summary| match &summary["written_rows"] {
            JsonValue::String(s) => s.parse().ok(),
            JsonValue::Number(n) => n.as_u64(),
            _ => None,
        })
        .unwrap_or(0)
}

pub(crate) fn escape_tsv_field_into(field: &str, buf: &mut String) {
    for c in field.chars() {
        match c {
            '\\' => buf.push_str("\\\\"),
            '\t' => buf.push_str("\\t"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            '\0' => buf.push_str("\\0"),
            _ => buf.push(c),
        }
    }
}

/// `\N` (NULL) becomes the empty string.
pub(crate) fn unescape_tsv_field(field: &str) -> String {
    if field == "\\N" {
        return String::new();
    }
    if !field.contains('\\') {
        return field.to_string();
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

pub(crate) fn encode_tsv_rows(rows: &[Vec<String>]) -> String {
    let mut body = String::with_capacity(rows.len() * 32);
    for row in rows {
        for (i, field) in row.iter().enumerate() {
            if i > 0 {
                body.push('\t');
            }
            escape_tsv_field_into(field, &mut body);
        }
        body.push('\n');
    }
    body
}

/// Splits a TabSeparatedWithNames byte stream into rows as chunks arrive.
#[derive(Default)]
pub(crate) struct TsvLineDecoder {
    pending: Vec<u8>,
    header_seen: bool,
    rows: u64,
}

impl TsvLineDecoder {
    pub fn feed(&mut self, chunk: &[u8], sink: &mut (dyn RowSink + Send)) -> Result<()> {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1], sink)?;
        }
        Ok(())
    }

    pub fn finish(mut self, sink: &mut (dyn RowSink + Send)) -> Result<u64> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line, sink)?;
        }
        Ok(self.rows)
    }

    fn emit(&mut self, line: &[u8], sink: &mut (dyn RowSink + Send)) -> Result<()> {
        let line = std::str::from_utf8(line)
            .map_err(|e| Error::Executor(format!("Invalid UTF-8 in result: {}", e)))?;
        let fields: Vec<String> = line.split('\t').map(unescape_tsv_field).collect();
        if self.header_seen {
            sink.write_row(&fields)?;
            self.rows += 1;
        } else {
            sink.columns(&fields)?;
            self.header_seen = true;
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutorBackend for ClickHouseExecutor {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::ClickHouse
    }

    async fn describe_columns(&self, table_name: &str) -> Result<Vec<String>> {
        let columns = self
            .query_first_column(&format!("DESCRIBE TABLE {}", quote_table_name(table_name)))
            .await
            .map_err(|e| Error::SchemaLookup {
                table: table_name.to_string(),
                message: e.to_string(),
            })?;

        if columns.is_empty() {
            return Err(Error::SchemaLookup {
                table: table_name.to_string(),
                message: "table has no columns".to_string(),
            });
        }
        Ok(columns)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.query_first_column("SHOW TABLES").await
    }

    async fn execute_statement(&self, sql: &str) -> Result<u64> {
        let response = self.send(sql, String::new()).await?;
        Ok(written_rows(&response))
    }

    async fn execute_batch(&self, insert: &InsertStatement, rows: &[Vec<String>]) -> Result<u64> {
        // One INSERT is one block on the server, so the batch lands or fails as a unit.
        let query = format!(
            "INSERT INTO {} ({}) FORMAT TabSeparated",
            quote_table_name(&insert.table),
            insert.quoted_column_list()
        );
        self.send(&query, encode_tsv_rows(rows)).await?;
        Ok(rows.len() as u64)
    }

    async fn stream_query(&self, sql: &str, sink: &mut (dyn RowSink + Send)) -> Result<u64> {
        let mut response = self
            .send(&format!("{} FORMAT TabSeparatedWithNames", sql), String::new())
            .await?;

        let mut decoder = TsvLineDecoder::default();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Executor(format!("Failed to read response: {}", e)))?
        {
            decoder.feed(&chunk, sink)?;
        }
        decoder.finish(sink)
    }

    async fn create_table_as(&self, table_name: &str, select_sql: &str) -> Result<u64> {
        let sql = build_create_table_as(table_name, select_sql, Some(MERGE_TREE_ENGINE));
        self.execute_statement(&sql).await
    }
}
