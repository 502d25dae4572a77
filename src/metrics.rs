use metrics::{counter, histogram};
use std::time::Instant;

pub fn record_rows_ingested(table: &str, rows: u64) {
    counter!("rows_ingested_total", "table" => table.to_string()).increment(rows);
}

pub fn record_rows_skipped(table: &str, rows: u64) {
    counter!("rows_skipped_total", "table" => table.to_string()).increment(rows);
}

pub fn record_batch_executed(table: &str) {
    counter!("batches_executed_total", "table" => table.to_string()).increment(1);
}

pub fn record_batch_failed(table: &str) {
    counter!("batches_failed_total", "table" => table.to_string()).increment(1);
}

pub fn record_rows_exported(table: &str, rows: u64) {
    counter!("rows_exported_total", "table" => table.to_string()).increment(rows);
}

pub fn record_table_materialized() {
    counter!("tables_materialized_total").increment(1);
}

pub fn record_transfer_duration(operation: &'static str, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    histogram!("transfer_duration_seconds", "operation" => operation).record(duration);
}
