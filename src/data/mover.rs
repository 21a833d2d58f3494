//! Batch data transfer
//!
//! Protocol for one run:
//!
//! 1. `SET session_replication_role = replica` so FK triggers do not fire during the load
//! 2. per table, in migration order: `DELETE FROM`, read the source column list, stream
//!    `LIMIT`/`OFFSET` batches, transform every value, multi-row `INSERT`
//! 3. restore `session_replication_role`
//! 4. `setval` every sequence-backed column to the column's maximum
//! 5. reconcile `COUNT(*)` per table
//!
//! A table that fails is recorded and the run moves on unless `continue_on_error` is off, in
//! which case the remaining tables are marked skipped.

use super::reconcile::{reconcile, RowCountCheck};
use super::sql::{delete_all_sql, insert_batch_sql, sequence_columns_sql, setval_sql, BatchRequest};
use super::value::{ColumnTransform, SqlValue};
use crate::config::MigrationSettings;
use crate::executor::TargetExecutor;
use crate::pipeline::context::{Progress, ProgressEvent};
use crate::schema::SchemaModel;
use crate::source::SourceReader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

const DISABLE_FK_ENFORCEMENT: &str = "SET session_replication_role = replica";
const RESTORE_FK_ENFORCEMENT: &str = "SET session_replication_role = DEFAULT";

/// Data mover settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoverOptions {
    pub batch_size: usize,
    pub continue_on_error: bool,
}

impl Default for MoverOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            continue_on_error: true,
        }
    }
}

impl From<&MigrationSettings> for MoverOptions {
    fn from(settings: &MigrationSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            continue_on_error: settings.continue_on_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Success,
    Failed,
    /// Not attempted because an earlier table failed with `continue_on_error` off
    Skipped,
}

/// Outcome for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMigrationResult {
    pub table: String,
    pub status: TableStatus,
    pub rows_migrated: u64,
    pub batches: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Values replaced by NULL
    pub warnings: u64,
}

impl TableMigrationResult {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            status: TableStatus::Success,
            rows_migrated: 0,
            batches: 0,
            duration_ms: 0,
            error: None,
            warnings: 0,
        }
    }
}

/// Type-conversion warnings aggregated per column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeWarning {
    pub table: String,
    pub column: String,
    /// First message seen for this column
    pub message: String,
    pub count: u64,
}

/// Outcome of a data mover run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataMigrationResult {
    pub tables: Vec<TableMigrationResult>,
    pub warnings: Vec<TypeWarning>,
    /// Sequences realigned after the load
    pub sequences_reset: Vec<String>,
    pub reconciliation: Vec<RowCountCheck>,
    pub total_rows: u64,
    pub duration_ms: u64,
}

impl DataMigrationResult {
    pub fn tables_migrated(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Success)
            .count()
    }

    pub fn tables_failed(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| t.status != TableStatus::Success)
            .count()
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &RowCountCheck> {
        self.reconciliation.iter().filter(|c| !c.matched)
    }

    /// Every table copied and every count matched
    pub fn success(&self) -> bool {
        self.tables_failed() == 0 && self.mismatches().next().is_none()
    }
}

/// Streams rows from a [`SourceReader`] into a [`TargetExecutor`]
pub struct DataMover<'a> {
    source: &'a dyn SourceReader,
    target: &'a dyn TargetExecutor,
    options: MoverOptions,
    primary_keys: HashMap<String, Vec<String>>,
    progress: Progress,
}

impl<'a> DataMover<'a> {
    pub fn new(
        source: &'a dyn SourceReader,
        target: &'a dyn TargetExecutor,
        options: MoverOptions,
    ) -> Self {
        Self {
            source,
            target,
            options,
            primary_keys: HashMap::new(),
            progress: Progress::disabled(),
        }
    }

    /// Order batches by each table's primary key so offset pagination is stable
    #[must_use]
    pub fn with_primary_keys(mut self, schema: &SchemaModel) -> Self {
        self.primary_keys = schema
            .tables
            .iter()
            .filter(|t| !t.primary_key.is_empty())
            .map(|t| (t.name.clone(), t.primary_key.clone()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Copy every table in `order`
    pub fn run(&self, order: &[String]) -> DataMigrationResult {
        let start = Instant::now();
        let mut result = DataMigrationResult::default();
        let mut warnings: BTreeMap<(String, String), TypeWarning> = BTreeMap::new();

        if let Err(e) = self.target.execute(DISABLE_FK_ENFORCEMENT) {
            log::warn!("Could not disable FK enforcement, loading with checks on: {}", e);
        }

        let mut halted = false;
        for table in order {
            if halted {
                let mut skipped = TableMigrationResult::new(table);
                skipped.status = TableStatus::Skipped;
                result.tables.push(skipped);
                continue;
            }

            let table_result = self.migrate_table(table, &mut warnings);
            self.progress.emit(ProgressEvent::TableMigrated {
                table: table.clone(),
                rows: table_result.rows_migrated,
                ok: table_result.status == TableStatus::Success,
            });
            result.total_rows += table_result.rows_migrated;
            if table_result.status == TableStatus::Failed && !self.options.continue_on_error {
                log::error!("Stopping data migration after failure in {}", table);
                halted = true;
            }
            result.tables.push(table_result);
        }

        if let Err(e) = self.target.execute(RESTORE_FK_ENFORCEMENT) {
            log::warn!("Could not restore FK enforcement: {}", e);
        }

        result.sequences_reset = self.reset_sequences(order);
        result.reconciliation = reconcile(self.source, self.target, order);
        result.warnings = warnings.into_values().collect();
        result.duration_ms = start.elapsed().as_millis() as u64;

        log::info!(
            "Data migration: {} rows, {} tables ok, {} failed, {} count mismatches",
            result.total_rows,
            result.tables_migrated(),
            result.tables_failed(),
            result.mismatches().count()
        );
        result
    }

    fn migrate_table(
        &self,
        table: &str,
        warnings: &mut BTreeMap<(String, String), TypeWarning>,
    ) -> TableMigrationResult {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migrate_table_span(table).entered();

        let start = Instant::now();
        let mut result = TableMigrationResult::new(table);
        if let Err(e) = self.copy_table(table, &mut result, warnings) {
            log::error!("✗ {}: {}", table, e);
            result.status = TableStatus::Failed;
            result.error = Some(e);
        } else {
            log::info!(
                "✓ {}: {} rows in {} batches",
                table,
                result.rows_migrated,
                result.batches
            );
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    fn copy_table(
        &self,
        table: &str,
        result: &mut TableMigrationResult,
        warnings: &mut BTreeMap<(String, String), TypeWarning>,
    ) -> Result<(), String> {
        self.target
            .execute(&delete_all_sql(table))
            .map_err(|e| format!("Failed to clear target table: {}", e.message()))?;

        let columns = self.source.columns(table).map_err(|e| e.to_string())?;
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let transforms: Vec<ColumnTransform> =
            columns.iter().map(ColumnTransform::for_column).collect();
        let order_by = self.primary_keys.get(table).cloned().unwrap_or_default();

        let mut offset = 0u64;
        loop {
            let batch = self
                .source
                .fetch_batch(&BatchRequest {
                    table,
                    columns: &names,
                    order_by: &order_by,
                    limit: self.options.batch_size,
                    offset,
                })
                .map_err(|e| format!("Batch at offset {offset}: {e}"))?;
            if batch.is_empty() {
                break;
            }
            let fetched = batch.len();

            let mut rows: Vec<Vec<SqlValue>> = Vec::with_capacity(fetched);
            for row in batch {
                let mut values = Vec::with_capacity(row.len());
                for ((value, transform), column) in row.into_iter().zip(&transforms).zip(&names) {
                    let out = transform.apply(value);
                    if let Some(message) = out.warning {
                        result.warnings += 1;
                        warnings
                            .entry((table.to_string(), column.clone()))
                            .or_insert_with(|| TypeWarning {
                                table: table.to_string(),
                                column: column.clone(),
                                message,
                                count: 0,
                            })
                            .count += 1;
                    }
                    values.push(out.value);
                }
                rows.push(values);
            }

            let insert = insert_batch_sql(table, &names, &rows)?;
            self.target
                .execute(&insert)
                .map_err(|e| format!("Insert at offset {offset}: {}", e.message()))?;

            result.rows_migrated += fetched as u64;
            result.batches += 1;
            #[cfg(feature = "metrics")]
            METRICS.record_rows(fetched as u64);

            offset += fetched as u64;
            if fetched < self.options.batch_size {
                break;
            }
        }
        Ok(())
    }

    fn reset_sequences(&self, order: &[String]) -> Vec<String> {
        let mut reset = Vec::new();
        for table in order {
            let rows = match self.target.query_rows(&sequence_columns_sql(table)) {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!("Could not list sequences of {}: {}", table, e);
                    continue;
                }
            };
            for row in rows {
                let (Some(Some(column)), Some(Some(sequence))) = (row.first(), row.get(1)) else {
                    continue;
                };
                match self.target.query_rows(&setval_sql(sequence, table, column)) {
                    Ok(_) => {
                        log::debug!("Reset {} to MAX({}.{})", sequence, table, column);
                        reset.push(sequence.clone());
                    }
                    Err(e) => log::warn!("Could not reset {}: {}", sequence, e),
                }
            }
        }
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Table};
    use crate::source::memory::MemorySource;
    use crate::test_helpers::MemoryTarget;

    fn schema() -> SchemaModel {
        SchemaModel::new("shop")
            .with_table(
                Table::new("item")
                    .column(Column::new("id", "int").auto_increment())
                    .column(Column::new("active", "tinyint(1)"))
                    .primary_key(["id"]),
            )
            .with_table(
                Table::new("event")
                    .column(Column::new("id", "int"))
                    .column(Column::new("happened", "datetime")),
            )
    }

    fn source(items: i64) -> MemorySource {
        MemorySource::new(schema())
            .with_rows(
                "item",
                (1..=items)
                    .map(|i| vec![SqlValue::Int(i), SqlValue::Int(i % 2)])
                    .collect(),
            )
            .with_rows(
                "event",
                vec![
                    vec![SqlValue::Int(1), SqlValue::Text("0000-00-00 00:00:00".into())],
                    vec![SqlValue::Int(2), SqlValue::Text("0000-00-00 00:00:00".into())],
                ],
            )
    }

    fn order() -> Vec<String> {
        vec!["item".to_string(), "event".to_string()]
    }

    #[test]
    fn test_batches_and_reconciles() {
        let source = source(25);
        let target = MemoryTarget::new().with_tables(["item", "event"]);
        let options = MoverOptions {
            batch_size: 10,
            continue_on_error: true,
        };
        let result = DataMover::new(&source, &target, options)
            .with_primary_keys(&schema())
            .run(&order());

        assert_eq!(result.total_rows, 27);
        assert_eq!(result.tables[0].batches, 3);
        assert!(result.success());
        assert!(result.reconciliation.iter().all(|c| c.matched));

        let log = target.statements();
        assert_eq!(log.first().map(String::as_str), Some(DISABLE_FK_ENFORCEMENT));
        assert!(log.iter().any(|s| s == RESTORE_FK_ENFORCEMENT));
        assert!(log.iter().any(|s| s == "DELETE FROM \"item\""));
        assert!(!log.iter().any(|s| s.contains("TRUNCATE")));
    }

    #[test]
    fn test_zero_dates_aggregate_into_one_warning() {
        let source = source(1);
        let target = MemoryTarget::new().with_tables(["item", "event"]);
        let result = DataMover::new(&source, &target, MoverOptions::default()).run(&order());

        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].column, "happened");
        assert_eq!(result.warnings[0].count, 2);
        assert_eq!(result.tables[1].warnings, 2);
        assert!(result.success());
    }

    #[test]
    fn test_failed_table_does_not_abort_run() {
        let source = source(3).failing("item");
        let target = MemoryTarget::new().with_tables(["item", "event"]);
        let result = DataMover::new(&source, &target, MoverOptions::default()).run(&order());

        assert_eq!(result.tables[0].status, TableStatus::Failed);
        assert_eq!(result.tables[1].status, TableStatus::Success);
        assert!(!result.success());
    }

    #[test]
    fn test_stop_on_error_skips_remaining_tables() {
        let source = source(3).failing("item");
        let target = MemoryTarget::new().with_tables(["item", "event"]);
        let options = MoverOptions {
            batch_size: 1000,
            continue_on_error: false,
        };
        let result = DataMover::new(&source, &target, options).run(&order());

        assert_eq!(result.tables[1].status, TableStatus::Skipped);
        assert_eq!(result.tables_failed(), 2);
    }

    #[test]
    fn test_sequences_reset_from_catalog() {
        let source = source(3);
        let target = MemoryTarget::new()
            .with_tables(["item", "event"])
            .respond(
                "pg_get_serial_sequence",
                vec![vec![
                    Some("id".to_string()),
                    Some("public.item_id_seq".to_string()),
                ]],
            );
        let result = DataMover::new(&source, &target, MoverOptions::default()).run(&order());

        // The canned catalog answer is returned for both tables
        assert_eq!(result.sequences_reset.len(), 2);
        assert!(target
            .statements()
            .iter()
            .any(|s| s.starts_with("SELECT setval('public.item_id_seq'")));
    }
}
