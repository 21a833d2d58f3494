//! Production schema deploy
//!
//! Replays the statements the sandbox accepted (after repairs) against the production target,
//! in the same stage order. No reset: production is never dropped. A statement rejected
//! because its object already exists counts as deployed, so an interrupted deploy can be
//! run again.

use crate::data::{DataMigrationResult, RowCountCheck};
use crate::ddl::ObjectType;
use crate::executor::TargetExecutor;
use crate::sandbox::{ExecutionPlan, ObjectState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployFailure {
    pub object: String,
    pub object_type: ObjectType,
    pub statement: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub objects_deployed: usize,
    pub statements_executed: usize,
    /// Statements whose object was already present on the target
    pub statements_already_present: usize,
    /// Objects the sandbox never accepted; not sent to production
    pub objects_skipped: Vec<String>,
    pub failures: Vec<DeployFailure>,
}

impl DeployResult {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Schema deployed, every table copied and reconciled
    Success,
    /// Schema deployed, data incomplete or counts differ
    Partial,
    /// Schema deploy failed; no data was sent
    Failed,
}

/// The `production_deployment` artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub status: DeploymentStatus,
    pub schema: DeployResult,
    pub tables_migrated: usize,
    pub total_rows: u64,
    pub reconciliation: Vec<RowCountCheck>,
}

impl DeploymentSummary {
    /// `data` is `None` when the schema deploy failed and data was not attempted
    pub fn new(schema: DeployResult, data: Option<&DataMigrationResult>) -> Self {
        let status = match data {
            _ if !schema.success() => DeploymentStatus::Failed,
            Some(data) if data.success() => DeploymentStatus::Success,
            _ => DeploymentStatus::Partial,
        };
        Self {
            status,
            schema,
            tables_migrated: data.map_or(0, DataMigrationResult::tables_migrated),
            total_rows: data.map_or(0, |d| d.total_rows),
            reconciliation: data.map(|d| d.reconciliation.clone()).unwrap_or_default(),
        }
    }
}

/// Execute every sandbox-validated unit of `plan` against `target`
///
/// An object whose statement fails is recorded and the deploy continues with the next object.
pub fn replay(plan: &ExecutionPlan, target: &dyn TargetExecutor) -> DeployResult {
    let mut result = DeployResult::default();
    for unit in plan.units() {
        if unit.state != ObjectState::Success {
            log::warn!("Not deploying {} {}: failed in sandbox", unit.object_type, unit.name);
            result.objects_skipped.push(unit.name.clone());
            continue;
        }

        let mut failed = false;
        for statement in &unit.statements {
            match target.execute(statement) {
                Ok(_) => result.statements_executed += 1,
                Err(e) if already_exists(&e.message()) => {
                    log::debug!("{} {} already present: {}", unit.object_type, unit.name, e);
                    result.statements_already_present += 1;
                }
                Err(e) => {
                    log::error!("✗ {} {}: {}", unit.object_type, unit.name, e);
                    result.failures.push(DeployFailure {
                        object: unit.name.clone(),
                        object_type: unit.object_type,
                        statement: statement.clone(),
                        error: e.message(),
                    });
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            log::info!("✓ {} {}", unit.object_type, unit.name);
            result.objects_deployed += 1;
        }
    }
    log::info!(
        "Production deploy: {} objects, {} statements ({} already present), {} failed, {} skipped",
        result.objects_deployed,
        result.statements_executed,
        result.statements_already_present,
        result.failures.len(),
        result.objects_skipped.len()
    );
    result
}

fn already_exists(message: &str) -> bool {
    message.to_lowercase().contains("already exists")
}
