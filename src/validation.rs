//! Schema validation
//!
//! Compares the target catalog (after the sandbox passes) with the source [`SchemaModel`].
//! Validation never fails a run by itself: it produces a [`ValidationReport`] and the pipeline
//! decides whether to continue to data migration.

use crate::ddl::type_mapping::map_column;
use crate::executor::{ExecutorError, TargetExecutor};
use crate::schema::{Column, SchemaModel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

const TABLES_QUERY: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = 'public' AND table_type = 'BASE TABLE'";
const COLUMNS_QUERY: &str = "SELECT table_name::text, column_name::text, data_type::text \
     FROM information_schema.columns WHERE table_schema = 'public' \
     ORDER BY table_name, ordinal_position";
const PRIMARY_KEYS_QUERY: &str = "SELECT tc.table_name::text, kcu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema \
     WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = 'public' \
     ORDER BY tc.table_name, kcu.ordinal_position";
const FOREIGN_KEYS_QUERY: &str = "SELECT c.relname::text, r.relname::text \
     FROM pg_constraint con \
     JOIN pg_class c ON c.oid = con.conrelid \
     JOIN pg_class r ON r.oid = con.confrelid \
     JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE con.contype = 'f' AND n.nspname = 'public'";
const INDEX_COUNTS_QUERY: &str = "SELECT tablename::text, COUNT(*)::text FROM pg_indexes \
     WHERE schemaname = 'public' AND indexname NOT LIKE '%_pkey' GROUP BY tablename";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    MissingTable,
    ExtraTable,
    MissingColumn,
    TypeMismatch,
    PrimaryKeyMismatch,
    MissingForeignKey,
    MissingIndexes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// No critical issues
    pub passed: bool,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn critical(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// Target catalog snapshot
#[derive(Debug, Default)]
struct Catalog {
    tables: BTreeSet<String>,
    /// table -> column -> information_schema data_type
    columns: BTreeMap<String, BTreeMap<String, String>>,
    primary_keys: BTreeMap<String, Vec<String>>,
    /// (table, referenced table), one entry per constraint
    foreign_keys: Vec<(String, String)>,
    index_counts: BTreeMap<String, usize>,
}

impl Catalog {
    fn load(target: &dyn TargetExecutor) -> Result<Self, ExecutorError> {
        let mut catalog = Catalog::default();
        for row in target.query_rows(TABLES_QUERY)? {
            if let Some(Some(table)) = row.first() {
                catalog.tables.insert(table.clone());
            }
        }
        for row in target.query_rows(COLUMNS_QUERY)? {
            if let [Some(table), Some(column), data_type, ..] = row.as_slice() {
                catalog.columns.entry(table.clone()).or_default().insert(
                    column.clone(),
                    data_type.clone().unwrap_or_default().to_lowercase(),
                );
            }
        }
        for row in target.query_rows(PRIMARY_KEYS_QUERY)? {
            if let [Some(table), Some(column), ..] = row.as_slice() {
                catalog
                    .primary_keys
                    .entry(table.clone())
                    .or_default()
                    .push(column.clone());
            }
        }
        for row in target.query_rows(FOREIGN_KEYS_QUERY)? {
            if let [Some(table), Some(referenced), ..] = row.as_slice() {
                catalog.foreign_keys.push((table.clone(), referenced.clone()));
            }
        }
        for row in target.query_rows(INDEX_COUNTS_QUERY)? {
            if let [Some(table), Some(count), ..] = row.as_slice() {
                let count = count.trim().parse::<usize>().map_err(|e| {
                    ExecutorError::ParseError(format!("Invalid index count {:?}: {}", count, e))
                })?;
                catalog.index_counts.insert(table.clone(), count);
            }
        }
        Ok(catalog)
    }
}

pub struct SchemaValidator<'a> {
    schema: &'a SchemaModel,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(schema: &'a SchemaModel) -> Self {
        Self { schema }
    }

    /// Validate the target against the source schema
    ///
    /// # Errors
    ///
    /// Returns an error if a catalog query fails.
    pub fn validate(&self, target: &dyn TargetExecutor) -> Result<ValidationReport, ExecutorError> {
        let catalog = Catalog::load(target)?;
        let mut checks = Checks::default();

        for table in &self.schema.tables {
            let name = table.name.as_str();
            if !checks.check(catalog.tables.contains(name), || ValidationIssue {
                severity: Severity::Critical,
                category: IssueCategory::MissingTable,
                table: name.to_string(),
                message: format!("Table '{}' missing in target", name),
            }) {
                continue;
            }

            let target_columns = catalog.columns.get(name);
            for column in &table.columns {
                let actual = target_columns.and_then(|c| c.get(&column.name));
                let Some(actual) = actual else {
                    checks.fail(ValidationIssue {
                        severity: Severity::Critical,
                        category: IssueCategory::MissingColumn,
                        table: name.to_string(),
                        message: format!("Column '{}.{}' missing in target", name, column.name),
                    });
                    continue;
                };
                checks.pass();
                if let Some(compatible) = compatible_data_types(column) {
                    checks.check(compatible.contains(&actual.as_str()), || ValidationIssue {
                        severity: Severity::Warning,
                        category: IssueCategory::TypeMismatch,
                        table: name.to_string(),
                        message: format!(
                            "Column '{}.{}': source {} mapped to {}, target has {}",
                            name,
                            column.name,
                            column.source_type,
                            map_column(column).sql_type,
                            actual
                        ),
                    });
                }
            }

            let target_pk = catalog.primary_keys.get(name).cloned().unwrap_or_default();
            checks.check(target_pk == table.primary_key, || ValidationIssue {
                severity: Severity::Critical,
                category: IssueCategory::PrimaryKeyMismatch,
                table: name.to_string(),
                message: format!(
                    "Primary key of '{}': source ({}), target ({})",
                    name,
                    table.primary_key.join(", "),
                    target_pk.join(", ")
                ),
            });

            let mut available: Vec<&(String, String)> = catalog
                .foreign_keys
                .iter()
                .filter(|(t, _)| t == name)
                .collect();
            for fk in &table.foreign_keys {
                let found = available
                    .iter()
                    .position(|(_, referenced)| *referenced == fk.referenced_table);
                if let Some(i) = found {
                    available.swap_remove(i);
                }
                checks.check(found.is_some(), || ValidationIssue {
                    severity: Severity::Critical,
                    category: IssueCategory::MissingForeignKey,
                    table: name.to_string(),
                    message: format!(
                        "Foreign key {} -> {} missing in target",
                        fk.constraint_name(name),
                        fk.referenced_table
                    ),
                });
            }

            if !table.indexes.is_empty() {
                let target_count = catalog.index_counts.get(name).copied().unwrap_or(0);
                let source_count = table.indexes.len();
                checks.check(target_count * 2 >= source_count, || ValidationIssue {
                    severity: Severity::Warning,
                    category: IssueCategory::MissingIndexes,
                    table: name.to_string(),
                    message: format!(
                        "Table '{}' has {} of {} source indexes",
                        name, target_count, source_count
                    ),
                });
            }
        }

        for extra in catalog
            .tables
            .iter()
            .filter(|t| self.schema.table(t).is_none())
        {
            checks.issues.push(ValidationIssue {
                severity: Severity::Info,
                category: IssueCategory::ExtraTable,
                table: extra.clone(),
                message: format!("Table '{}' exists in target but not in source", extra),
            });
        }

        let report = checks.into_report();
        if report.passed {
            log::info!(
                "Schema validation passed: {}/{} checks ({} warnings)",
                report.passed_checks,
                report.total_checks,
                report.count(Severity::Warning)
            );
        } else {
            log::warn!(
                "Schema validation failed: {} critical issues, {}/{} checks passed",
                report.count(Severity::Critical),
                report.passed_checks,
                report.total_checks
            );
        }
        Ok(report)
    }
}

#[derive(Default)]
struct Checks {
    passed: usize,
    failed: usize,
    issues: Vec<ValidationIssue>,
}

impl Checks {
    fn pass(&mut self) {
        self.passed += 1;
    }

    fn fail(&mut self, issue: ValidationIssue) {
        self.failed += 1;
        self.issues.push(issue);
    }

    /// Count a check; build the issue only when it fails
    fn check(&mut self, ok: bool, issue: impl FnOnce() -> ValidationIssue) -> bool {
        if ok {
            self.pass();
        } else {
            self.fail(issue());
        }
        ok
    }

    fn into_report(self) -> ValidationReport {
        ValidationReport {
            passed: !self.issues.iter().any(|i| i.severity == Severity::Critical),
            total_checks: self.passed + self.failed,
            passed_checks: self.passed,
            failed_checks: self.failed,
            issues: self.issues,
        }
    }
}

/// `information_schema.columns.data_type` values acceptable for a mapped column
///
/// `None` when the mapped type is a passthrough the validator knows nothing about.
fn compatible_data_types(column: &Column) -> Option<&'static [&'static str]> {
    let mapped = map_column(column).sql_type;
    let family = mapped.split('(').next().unwrap_or_default().trim();
    let types: &'static [&'static str] = match family {
        "BOOLEAN" => &["boolean"],
        "SMALLINT" => &["smallint", "integer", "bigint"],
        "INTEGER" | "SERIAL" => &["integer", "bigint"],
        "BIGINT" | "BIGSERIAL" => &["bigint", "numeric"],
        "NUMERIC" => &["numeric"],
        "REAL" => &["real", "double precision"],
        "DOUBLE PRECISION" => &["double precision"],
        "CHAR" => &["character", "character varying", "text"],
        "VARCHAR" => &["character varying", "text"],
        "TEXT" => &["text", "character varying"],
        "TEXT[]" => &["array"],
        "BYTEA" => &["bytea"],
        "DATE" => &["date"],
        "TIMESTAMP" => &["timestamp without time zone", "timestamp with time zone"],
        "TIME" => &["time without time zone", "time with time zone"],
        "JSONB" => &["jsonb", "json"],
        "BIT" => &["bit", "bit varying"],
        "POINT" => &["point", "user-defined"],
        _ => return None,
    };
    Some(types)
}
