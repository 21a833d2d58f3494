//! In-memory source
//!
//! Serves a fixed [`SchemaModel`] and row sets. Rows are stored in the table's column order and
//! returned in insertion order.

use super::{Introspector, SourceError, SourceReader};
use crate::data::sql::BatchRequest;
use crate::data::value::SqlValue;
use crate::schema::{Column, Procedure, SchemaModel, Table, Trigger, View};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct MemorySource {
    schema: SchemaModel,
    rows: HashMap<String, Vec<Vec<SqlValue>>>,
    failing: HashSet<String>,
}

impl MemorySource {
    #[must_use]
    pub fn new(schema: SchemaModel) -> Self {
        Self {
            schema,
            rows: HashMap::new(),
            failing: HashSet::new(),
        }
    }

    /// Set the rows of `table` (values in column order)
    #[must_use]
    pub fn with_rows(mut self, table: &str, rows: Vec<Vec<SqlValue>>) -> Self {
        self.rows.insert(table.to_string(), rows);
        self
    }

    /// Make every fetch from `table` fail
    #[must_use]
    pub fn failing(mut self, table: &str) -> Self {
        self.failing.insert(table.to_string());
        self
    }

    fn table(&self, name: &str) -> Result<&Table, SourceError> {
        self.schema
            .table(name)
            .ok_or_else(|| SourceError::Query(format!("Table '{name}' doesn't exist")))
    }
}

impl Introspector for MemorySource {
    fn database(&self) -> &str {
        &self.schema.database
    }

    fn list_tables(&self) -> Result<Vec<Table>, SourceError> {
        Ok(self
            .schema
            .tables
            .iter()
            .map(|t| {
                let mut table = t.clone();
                table.row_count = Some(self.rows.get(&t.name).map(|r| r.len() as u64).unwrap_or(0));
                table
            })
            .collect())
    }

    fn list_views(&self) -> Result<Vec<View>, SourceError> {
        Ok(self.schema.views.clone())
    }

    fn list_procedures(&self) -> Result<Vec<Procedure>, SourceError> {
        Ok(self.schema.procedures.clone())
    }

    fn list_triggers(&self) -> Result<Vec<Trigger>, SourceError> {
        Ok(self.schema.triggers.clone())
    }
}

impl SourceReader for MemorySource {
    fn columns(&self, table: &str) -> Result<Vec<Column>, SourceError> {
        let columns = self.table(table)?.columns.clone();
        if columns.is_empty() {
            return Err(SourceError::NoColumns(table.to_string()));
        }
        Ok(columns)
    }

    fn fetch_batch(&self, request: &BatchRequest<'_>) -> Result<Vec<Vec<SqlValue>>, SourceError> {
        if self.failing.contains(request.table) {
            return Err(SourceError::Query(format!(
                "Simulated failure reading {}",
                request.table
            )));
        }
        let table = self.table(request.table)?;
        let positions = request
            .columns
            .iter()
            .map(|name| {
                table
                    .columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| SourceError::Query(format!("Unknown column '{name}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rows = self.rows.get(request.table).map(Vec::as_slice).unwrap_or(&[]);
        let start = (request.offset as usize).min(rows.len());
        let end = (start + request.limit).min(rows.len());
        Ok(rows[start..end]
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect())
    }

    fn count_rows(&self, table: &str) -> Result<u64, SourceError> {
        self.table(table)?;
        Ok(self.rows.get(table).map(|r| r.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemorySource {
        let schema = SchemaModel::new("shop").with_table(
            Table::new("item")
                .column(Column::new("id", "int"))
                .column(Column::new("name", "varchar(10)")),
        );
        MemorySource::new(schema).with_rows(
            "item",
            (1..=5)
                .map(|i| vec![SqlValue::Int(i), SqlValue::Text(format!("item{i}"))])
                .collect(),
        )
    }

    #[test]
    fn test_fetch_batch_paginates_and_projects() {
        let src = source();
        let columns = vec!["name".to_string()];
        let page = src
            .fetch_batch(&BatchRequest {
                table: "item",
                columns: &columns,
                order_by: &[],
                limit: 2,
                offset: 4,
            })
            .unwrap();
        assert_eq!(page, vec![vec![SqlValue::Text("item5".to_string())]]);
    }

    #[test]
    fn test_introspect_reports_row_counts() {
        let model = source().introspect().unwrap();
        assert_eq!(model.database, "shop");
        assert_eq!(model.tables[0].row_count, Some(5));
    }

    #[test]
    fn test_unknown_table_errors() {
        assert!(source().columns("nope").is_err());
        assert!(source().count_rows("nope").is_err());
    }
}
