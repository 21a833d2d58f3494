//! End-of-run report

use super::context::RunContext;
use crate::data::{DataMigrationResult, RowCountCheck};
use crate::error::{ErrorKind, Phase, RunError};
use crate::schema::SchemaModel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Completed,
    CompletedWithErrors,
    Failed,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Completed => "completed",
            FinalStatus::CompletedWithErrors => "completed_with_errors",
            FinalStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pass/fail counts of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCounts {
    pub tables: usize,
    pub views: usize,
    pub procedures: usize,
    pub triggers: usize,
    pub indexes: usize,
    pub foreign_keys: usize,
}

impl ObjectCounts {
    pub fn from_schema(schema: &SchemaModel) -> Self {
        Self {
            tables: schema.tables.len(),
            views: schema.views.len(),
            procedures: schema.procedures.len(),
            triggers: schema.triggers.len(),
            indexes: schema.index_count(),
            foreign_keys: schema.foreign_key_count(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub tables: usize,
    pub matched: usize,
    /// Tables whose counts differ or could not be read
    pub mismatched: Vec<String>,
}

impl ReconciliationSummary {
    pub fn from_checks(checks: &[RowCountCheck]) -> Self {
        Self {
            tables: checks.len(),
            matched: checks.iter().filter(|c| c.matched).count(),
            mismatched: checks
                .iter()
                .filter(|c| !c.matched)
                .map(|c| c.table.clone())
                .collect(),
        }
    }
}

/// Errors of one category: total and the first few messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub count: usize,
    pub first: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub phases: Vec<PhaseSummary>,
    pub objects: ObjectCounts,
    pub total_rows: u64,
    pub reconciliation: ReconciliationSummary,
    pub errors: BTreeMap<ErrorKind, ErrorGroup>,
    pub final_status: FinalStatus,
}

impl RunReport {
    pub fn begin(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id,
            started_at: ctx.started_at,
            finished_at: None,
            elapsed_ms: 0,
            phases: Vec::new(),
            objects: ObjectCounts::default(),
            total_rows: 0,
            reconciliation: ReconciliationSummary::default(),
            errors: BTreeMap::new(),
            final_status: FinalStatus::Completed,
        }
    }

    /// Add (or accumulate into) the counts of `phase`
    pub fn record_phase(&mut self, phase: Phase, passed: usize, failed: usize) {
        match self.phases.iter_mut().find(|p| p.phase == phase) {
            Some(summary) => {
                summary.passed += passed;
                summary.failed += failed;
            }
            None => self.phases.push(PhaseSummary {
                phase,
                passed,
                failed,
            }),
        }
    }

    pub fn record_data(&mut self, data: &DataMigrationResult) {
        self.total_rows += data.total_rows;
        self.reconciliation = ReconciliationSummary::from_checks(&data.reconciliation);
    }

    /// Close the report
    ///
    /// `fatal` marks a run that aborted. Circular-dependency notes and type-conversion warnings
    /// are listed but do not downgrade a completed run.
    pub fn finish(&mut self, errors: &[RunError], error_limit: usize, fatal: bool) {
        let finished = Utc::now();
        self.elapsed_ms = (finished - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished);

        self.errors.clear();
        for error in errors {
            let group = self.errors.entry(error.error_type).or_default();
            group.count += 1;
            if group.first.len() < error_limit {
                group.first.push(error.to_string());
            }
        }

        let degraded = errors.iter().any(|e| {
            !matches!(
                e.error_type,
                ErrorKind::CircularDependency | ErrorKind::TypeConversion
            )
        });
        self.final_status = if fatal {
            FinalStatus::Failed
        } else if degraded || !self.reconciliation.mismatched.is_empty() {
            FinalStatus::CompletedWithErrors
        } else {
            FinalStatus::Completed
        };
    }

    pub fn error_count(&self) -> usize {
        self.errors.values().map(|g| g.count).sum()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "Run {} {}: {} tables, {} views, {} procedures, {} triggers; {} rows; {}/{} tables reconciled; {} errors in {:.1}s",
            self.run_id,
            self.final_status,
            self.objects.tables,
            self.objects.views,
            self.objects.procedures,
            self.objects.triggers,
            self.total_rows,
            self.reconciliation.matched,
            self.reconciliation.tables,
            self.error_count(),
            self.elapsed_ms as f64 / 1000.0
        )
    }
}
