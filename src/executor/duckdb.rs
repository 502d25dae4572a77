use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{Value, ValueRef};
use duckdb::Connection;

use super::{ExecutorBackend, ExecutorMode, InsertStatement, RowSink};
use crate::error::{Error, Result};
use crate::validation::split_table_name;

const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Embedded DuckDB backend, file-backed or in-memory.
pub struct DuckDbExecutor {
    db_path: Option<PathBuf>,
    connection: Mutex<Connection>,
}

impl DuckDbExecutor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let connection = Connection::open(&path)
            .map_err(|e| Error::Executor(format!("Failed to open DuckDB {}: {}", path.display(), e)))?;

        Ok(Self {
            db_path: Some(path),
            connection: Mutex::new(connection),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()
            .map_err(|e| Error::Executor(format!("Failed to create in-memory DuckDB: {}", e)))?;

        Ok(Self {
            db_path: None,
            connection: Mutex::new(connection),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| Error::Executor(format!("Lock error: {}", e)))
    }

    fn query_strings(&self, sql: &str, params: Vec<String>) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Executor(format!("{}\n\nSQL: {}", e, sql)))?;
        let mut rows = stmt
            .query(duckdb::params_from_iter(params))
            .map_err(|e| Error::Executor(format!("{}\n\nSQL: {}", e, sql)))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Executor(format!("Row fetch error: {}", e)))?
        {
            out.push(
                row.get::<_, String>(0)
                    .map_err(|e| Error::Executor(format!("Row read error: {}", e)))?,
            );
        }
        Ok(out)
    }
}

fn value_ref_to_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Boolean(b) => b.to_string(),
        ValueRef::TinyInt(i) => i.to_string(),
        ValueRef::SmallInt(i) => i.to_string(),
        ValueRef::Int(i) => i.to_string(),
        ValueRef::BigInt(i) => i.to_string(),
        ValueRef::HugeInt(i) => i.to_string(),
        ValueRef::UTinyInt(i) => i.to_string(),
        ValueRef::USmallInt(i) => i.to_string(),
        ValueRef::UInt(i) => i.to_string(),
        ValueRef::UBigInt(i) => i.to_string(),
        ValueRef::Float(f) => f.to_string(),
        ValueRef::Double(f) => f.to_string(),
        ValueRef::Decimal(d) => d.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Date32(days) => date_text(days),
        ValueRef::Time64(unit, t) => time_text(unit.to_micros(t)),
        ValueRef::Timestamp(unit, t) => timestamp_text(unit.to_micros(t)),
        ValueRef::Interval {
            months,
            days,
            nanos,
        } => interval_text(months, days, nanos),
        other => value_to_text(&other.to_owned()),
    }
}

/// Renders nested and enum values the way DuckDB casts them to VARCHAR.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Boolean(b) => b.to_string(),
        Value::TinyInt(i) => i.to_string(),
        Value::SmallInt(i) => i.to_string(),
        Value::Int(i) => i.to_string(),
        Value::BigInt(i) => i.to_string(),
        Value::HugeInt(i) => i.to_string(),
        Value::UTinyInt(i) => i.to_string(),
        Value::USmallInt(i) => i.to_string(),
        Value::UInt(i) => i.to_string(),
        Value::UBigInt(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(f) => f.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Text(s) | Value::Enum(s) => s.clone(),
        Value::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Date32(days) => date_text(*days),
        Value::Time64(unit, t) => time_text(unit.to_micros(*t)),
        Value::Timestamp(unit, t) => timestamp_text(unit.to_micros(*t)),
        Value::Interval {
            months,
            days,
            nanos,
        } => interval_text(*months, *days, *nanos),
        Value::List(items) | Value::Array(items) => {
            let items: Vec<String> = items.iter().map(nested_text).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Struct(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, v)| format!("'{}': {}", name, nested_text(v)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        Value::Map(entries) => {
            let entries: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}={}", nested_text(k), nested_text(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        Value::Union(inner) => value_to_text(inner),
        #[allow(unreachable_patterns)]
        other => format!("{:?}", other),
    }
}

fn nested_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        other => value_to_text(other),
    }
}

fn date_text(days: i32) -> String {
    NaiveDate::from_num_days_from_ce_opt(days.saturating_add(UNIX_EPOCH_DAYS_FROM_CE))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| days.to_string())
}

fn time_text(micros: i64) -> String {
    let secs = micros.div_euclid(1_000_000);
    let nanos = micros.rem_euclid(1_000_000) * 1_000;
    u32::try_from(secs)
        .ok()
        .and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, nanos as u32))
        .map(|t| t.format("%H:%M:%S%.f").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn timestamp_text(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|ts| ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn interval_text(months: i32, days: i32, nanos: i64) -> String {
    let mut parts = Vec::new();
    let (years, months) = (months / 12, months % 12);
    for (n, unit) in [(years, "year"), (months, "month"), (days, "day")] {
        if n != 0 {
            let plural = if n.abs() == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", n, unit, plural));
        }
    }
    if nanos != 0 || parts.is_empty() {
        let sign = if nanos < 0 { "-" } else { "" };
        let micros = (nanos / 1_000).unsigned_abs();
        let (secs, frac) = (micros / 1_000_000, micros % 1_000_000);
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        if frac != 0 {
            clock.push_str(&format!(".{:06}", frac));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

#[async_trait]
impl ExecutorBackend for DuckDbExecutor {
    fn mode(&self) -> ExecutorMode {
        ExecutorMode::DuckDb
    }

    async fn describe_columns(&self, table_name: &str) -> Result<Vec<String>> {
        let (schema, table) = split_table_name(table_name);
        let (sql, params) = match schema {
            Some(schema) => (
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
                vec![schema.to_string(), table.to_string()],
            ),
            None => (
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_name = ? ORDER BY ordinal_position",
                vec![table.to_string()],
            ),
        };

        let columns = self
            .query_strings(sql, params)
            .map_err(|e| Error::SchemaLookup {
                table: table_name.to_string(),
                message: e.to_string(),
            })?;

        if columns.is_empty() {
            return Err(Error::SchemaLookup {
                table: table_name.to_string(),
                message: "table does not exist".to_string(),
            });
        }
        Ok(columns)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.query_strings(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' ORDER BY table_name",
            Vec::new(),
        )
    }

    async fn execute_statement(&self, sql: &str) -> Result<u64> {
        let conn = self.lock()?;
        let affected = conn
            .execute(sql, [])
            .map_err(|e| Error::Executor(format!("{}\n\nSQL: {}", e, sql)))?;
        Ok(affected as u64)
    }

    async fn execute_batch(&self, insert: &InsertStatement, rows: &[Vec<String>]) -> Result<u64> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Executor(format!("Failed to begin transaction: {}", e)))?;

        {
            let mut stmt = tx
                .prepare(&insert.sql)
                .map_err(|e| Error::Executor(format!("{}\n\nSQL: {}", e, insert.sql)))?;
            for row in rows {
                stmt.execute(duckdb::params_from_iter(row.iter()))
                    .map_err(|e| Error::Executor(format!("{}\n\nSQL: {}", e, insert.sql)))?;
            }
        }

        tx.commit()
            .map_err(|e| Error::Executor(format!("Failed to commit batch: {}", e)))?;
        Ok(rows.len() as u64)
    }

    async fn stream_query(&self, sql: &str, sink: &mut (dyn RowSink + Send)) -> Result<u64> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Executor(format!("{}\n\nSQL: {}", e, sql)))?;

        // Column metadata is only available once the statement has run.
        let mut rows = stmt
            .query([])
            .map_err(|e| Error::Executor(format!("{}\n\nSQL: {}", e, sql)))?;

        let column_count = rows.as_ref().map(|r| r.column_count()).unwrap_or(0);
        let columns: Vec<String> = (0..column_count)
            .map(|i| {
                rows.as_ref()
                    .and_then(|r| r.column_name(i).ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("col{}", i))
            })
            .collect();
        sink.columns(&columns)?;

        let mut count = 0u64;
        let mut values = Vec::with_capacity(column_count);
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Executor(format!("Row fetch error: {}", e)))?
        {
            values.clear();
            for i in 0..column_count {
                let value = row
                    .get_ref(i)
                    .map_err(|e| Error::Executor(format!("Row read error: {}", e)))?;
                values.push(value_ref_to_text(value));
            }
            sink.write_row(&values)?;
            count += 1;
        }
        Ok(count)
    }
}
