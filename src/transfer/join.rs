use std::collections::HashSet;
use std::io::Write;

use tracing::{debug, info};

use super::export::stream_to_sink;
use super::SchemaIntrospector;
use crate::domain::{ExportResult, JoinSpec, TableSchema};
use crate::error::{Error, Result};
use crate::executor::sql_builder::{build_join_select_sql, JoinProjection};
use crate::executor::ExecutorBackend;
use crate::metrics;
use crate::validation::{split_table_name, validate_table_name};

/// A validated two-table join, ready to materialize or export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinQuery {
    pub sql: String,
    /// Output column aliases, `table_column`, in request order.
    pub columns: Vec<String>,
}

/// What [`JoinPlanner::run`] did with a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Materialized { table: String, rows: u64 },
    Exported(ExportResult),
}

pub struct JoinPlanner<'a> {
    backend: &'a dyn ExecutorBackend,
}

impl<'a> JoinPlanner<'a> {
    pub fn new(backend: &'a dyn ExecutorBackend) -> Self {
        Self { backend }
    }

    /// Resolves every requested column against the two tables.
    ///
    /// `table.column` must name one of the join sides and a column of that
    /// table. A bare column is qualified with the only table that has it, and
    /// rejected when both or neither do.
    pub async fn plan(&self, spec: &JoinSpec) -> Result<JoinQuery> {
        if spec.columns.is_empty() {
            return Err(Error::InvalidRequest("no columns selected for join".to_string()));
        }
        if spec.left_table == spec.right_table {
            return Err(Error::InvalidRequest(format!(
                "cannot join '{}' with itself",
                spec.left_table
            )));
        }
        if spec.join_condition.trim().is_empty() {
            return Err(Error::InvalidRequest("join condition is empty".to_string()));
        }

        let mut introspector = SchemaIntrospector::new(self.backend);
        let left = introspector.schema(&spec.left_table).await?;
        let right = introspector.schema(&spec.right_table).await?;

        let mut projections = Vec::with_capacity(spec.columns.len());
        let mut seen = HashSet::new();
        for requested in spec.columns.columns() {
            let projection = resolve_column(requested, &left, &right)?;
            if !seen.insert(projection.alias.clone()) {
                return Err(Error::InvalidRequest(format!(
                    "column '{}' is selected more than once",
                    requested
                )));
            }
            projections.push(projection);
        }

        let sql = build_join_select_sql(
            &spec.left_table,
            &spec.right_table,
            &spec.join_condition,
            &projections,
        );
        debug!(left = %spec.left_table, right = %spec.right_table, sql = %sql, "Planned join");

        Ok(JoinQuery {
            sql,
            columns: projections.into_iter().map(|p| p.alias).collect(),
        })
    }

    /// Plans `spec`, then creates `spec.target_table` when one is set and
    /// streams the result to `sink` otherwise.
    pub async fn run<W: Write + Send>(
        &self,
        spec: &JoinSpec,
        sink: W,
        delimiter: char,
    ) -> Result<JoinOutcome> {
        let query = self.plan(spec).await?;
        match &spec.target_table {
            Some(target) => {
                let rows = self.materialize(&query, target).await?;
                Ok(JoinOutcome::Materialized {
                    table: target.clone(),
                    rows,
                })
            }
            None => Ok(JoinOutcome::Exported(
                self.export(&query, sink, delimiter).await?,
            )),
        }
    }

    pub async fn materialize(&self, query: &JoinQuery, target_table: &str) -> Result<u64> {
        validate_table_name(target_table)?;
        let rows = self
            .backend
            .create_table_as(target_table, &query.sql)
            .await
            .map_err(|e| e.with_context("materialize", Some(target_table)))?;

        metrics::record_table_materialized();
        info!(table = %target_table, rows, "Materialized join");
        Ok(rows)
    }

    pub async fn export<W: Write + Send>(
        &self,
        query: &JoinQuery,
        sink: W,
        delimiter: char,
    ) -> Result<ExportResult> {
        let rows_written =
            stream_to_sink(self.backend, &query.sql, &query.columns, sink, delimiter).await?;
        metrics::record_rows_exported("join", rows_written);
        info!(rows = rows_written, "Exported join");
        Ok(ExportResult {
            rows_written,
            columns: query.columns.clone(),
        })
    }
}

/// `orders` matches both `orders` and `db.orders`.
fn names_table(qualifier: &str, schema: &TableSchema) -> bool {
    qualifier == schema.table || qualifier == split_table_name(&schema.table).1
}

fn resolve_column(
    requested: &str,
    left: &TableSchema,
    right: &TableSchema,
) -> Result<JoinProjection> {
    let (table, column) = match requested.rsplit_once('.') {
        Some((qualifier, column)) => {
            let schema = match (names_table(qualifier, left), names_table(qualifier, right)) {
                (true, true) => {
                    return Err(Error::InvalidRequest(format!(
                        "'{}' could mean '{}' or '{}'; qualify it with the schema",
                        qualifier, left.table, right.table
                    )))
                }
                (true, false) => left,
                (false, true) => right,
                (false, false) => {
                    return Err(Error::InvalidRequest(format!(
                        "'{}' refers to table '{}', which is not part of the join",
                        requested, qualifier
                    )))
                }
            };
            if !schema.contains(column) {
                return Err(Error::UnknownColumn {
                    column: column.to_string(),
                    table: schema.table.clone(),
                });
            }
            (schema, column)
        }
        None => match (left.contains(requested), right.contains(requested)) {
            (true, true) => {
                return Err(Error::AmbiguousColumn {
                    column: requested.to_string(),
                    left: left.table.clone(),
                    right: right.table.clone(),
                })
            }
            (true, false) => (left, requested),
            (false, true) => (right, requested),
            (false, false) => {
                return Err(Error::UnknownColumn {
                    column: requested.to_string(),
                    table: format!("{}, {}", left.table, right.table),
                })
            }
        },
    };

    let (_, bare_table) = split_table_name(&table.table);
    Ok(JoinProjection {
        table: table.table.clone(),
        column: column.to_string(),
        alias: format!("{}_{}", bare_table, column),
    })
}
