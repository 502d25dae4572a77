use crate::validation::{quote_identifier, quote_table_name};

/// A positional INSERT with one `?` placeholder per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub sql: String,
}

impl InsertStatement {
    pub fn new(table: &str, columns: &[String]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.to_vec(),
            sql: build_insert_sql(table, columns),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn quoted_column_list(&self) -> String {
        quoted_list(&self.columns)
    }
}

fn quoted_list(columns: &[String]) -> String {
    let mut out = String::with_capacity(columns.iter().map(|c| c.len() + 4).sum());
    for (i, c) in columns.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&quote_identifier(c));
    }
    out
}

pub(crate) fn build_insert_sql(table_name: &str, columns: &[String]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_table_name(table_name),
        quoted_list(columns),
        placeholders
    )
}

pub(crate) fn build_select_sql(table_name: &str, columns: &[String], limit: Option<u64>) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}",
        quoted_list(columns),
        quote_table_name(table_name)
    );
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }
    sql
}

/// One `table.column AS table_column` projection of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinProjection {
    pub table: String,
    pub column: String,
    pub alias: String,
}

pub(crate) fn build_join_select_sql(
    left_table: &str,
    right_table: &str,
    join_condition: &str,
    projections: &[JoinProjection],
) -> String {
    let select_list = projections
        .iter()
        .map(|p| {
            format!(
                "{}.{} AS {}",
                quote_table_name(&p.table),
                quote_identifier(&p.column),
                quote_identifier(&p.alias)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {} FROM {} JOIN {} ON {}",
        select_list,
        quote_table_name(left_table),
        quote_table_name(right_table),
        join_condition
    )
}

/// `engine` is appended verbatim between the table name and `AS`, for
/// dialects that need a storage clause.
pub(crate) fn build_create_table_as(
    table_name: &str,
    select_sql: &str,
    engine: Option<&str>,
) -> String {
    match engine {
        Some(engine) => format!(
            "CREATE TABLE {} {} AS {}",
            quote_table_name(table_name),
            engine,
            select_sql
        ),
        None => format!("CREATE TABLE {} AS {}", quote_table_name(table_name), select_sql),
    }
}
