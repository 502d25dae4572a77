use std::collections::HashMap;

use crate::domain::TableSchema;
use crate::error::Result;
use crate::executor::ExecutorBackend;
use crate::validation::validate_table_name;

/// Column lookups for one operation. Each table is asked for at most once;
/// later calls return the cached answer even if the table changed meanwhile.
pub struct SchemaIntrospector<'a> {
    backend: &'a dyn ExecutorBackend,
    cache: HashMap<String, TableSchema>,
}

impl<'a> SchemaIntrospector<'a> {
    pub fn new(backend: &'a dyn ExecutorBackend) -> Self {
        Self {
            backend,
            cache: HashMap::new(),
        }
    }

    pub async fn schema(&mut self, table: &str) -> Result<TableSchema> {
        if let Some(schema) = self.cache.get(table) {
            return Ok(schema.clone());
        }

        validate_table_name(table)?;
        let columns = self.backend.describe_columns(table).await?;
        tracing::debug!(table = %table, columns = columns.len(), "Resolved table schema");

        let schema = TableSchema::new(table, columns);
        self.cache.insert(table.to_string(), schema.clone());
        Ok(schema)
    }
}
