use serde::Serialize;

/// Ordered column names of one table, as reported at introspection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

/// Caller-ordered list of requested columns. Order decides output column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnSelection(Vec<String>);

impl ColumnSelection {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(columns.into_iter().map(Into::into).collect())
    }

    /// Parses `a,b, c` as typed on a command line.
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty()),
        )
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnSelection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub left_table: String,
    pub right_table: String,
    /// Raw boolean expression, interpolated as given.
    pub join_condition: String,
    pub columns: ColumnSelection,
    pub target_table: Option<String>,
}

impl JoinSpec {
    pub fn new(
        left_table: impl Into<String>,
        right_table: impl Into<String>,
        join_condition: impl Into<String>,
        columns: ColumnSelection,
    ) -> Self {
        Self {
            left_table: left_table.into(),
            right_table: right_table.into(),
            join_condition: join_condition.into(),
            columns,
            target_table: None,
        }
    }

    pub fn with_target(mut self, target_table: impl Into<String>) -> Self {
        self.target_table = Some(target_table.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub rows_inserted: u64,
    pub rows_skipped: u64,
    pub batches: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub rows_written: u64,
    pub columns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_schema_lookup() {
        let schema = TableSchema::new("bands", vec!["code".into(), "band_name".into()]);
        assert_eq!(schema.len(), 2);
        assert!(schema.contains("band_name"));
        assert!(!schema.contains("genre"));
        assert_eq!(schema.position("band_name"), Some(1));
    }

    #[test]
    fn test_column_selection_preserves_order() {
        let selection = ColumnSelection::new(["name", "id"]);
        assert_eq!(selection.columns(), &["name".to_string(), "id".to_string()]);
    }

    #[test]
    fn test_column_selection_parse() {
        let selection = ColumnSelection::parse("id, name,,orders.total ");
        assert_eq!(selection.columns(), &["id", "name", "orders.total"]);
    }

    #[test]
    fn test_join_spec_with_target() {
        let spec = JoinSpec::new(
            "orders",
            "users",
            "orders.user_id = users.id",
            ColumnSelection::new(["orders.id"]),
        )
        .with_target("order_users");
        assert_eq!(spec.target_table.as_deref(), Some("order_users"));
    }

    #[test]
    fn test_ingest_result_serializes_camel_case() {
        let result = IngestResult {
            rows_inserted: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["rowsInserted"], 2);
        assert_eq!(json["cancelled"], false);
    }
}
