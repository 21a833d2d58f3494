//! Execution plan: generated artifacts broken into individually retriable units

use super::state::ObjectState;
use crate::ddl::{join_statements, DdlStatus, GeneratedDdl, ObjectType, TransformedDdl};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static INDEX_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?"?([^"\s(]+)"?"#)
        .expect("static regex")
});
static CONSTRAINT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)ADD\s+CONSTRAINT\s+"?([^"\s]+)"?"#).expect("static regex"));

/// One retriable object: a table, an index, a foreign key, a view or a routine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub name: String,
    pub object_type: ObjectType,
    /// Artifact this unit came from (`_indexes` for an index, the table name for a table)
    pub artifact: String,
    /// Statements run in order; a trigger is its function plus the `CREATE TRIGGER`
    pub statements: Vec<String>,
    pub source_ddl: String,
    pub state: ObjectState,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Statement index that failed last
    pub failed_statement: Option<usize>,
}

impl ExecutionUnit {
    fn new(
        name: String,
        object_type: ObjectType,
        artifact: &str,
        statements: Vec<String>,
        source_ddl: &str,
    ) -> Self {
        Self {
            name,
            object_type,
            artifact: artifact.to_string(),
            statements,
            source_ddl: source_ddl.to_string(),
            state: ObjectState::Pending,
            attempts: 0,
            last_error: None,
            failed_statement: None,
        }
    }

    /// Move to `to`
    ///
    /// # Errors
    ///
    /// Returns an error string for a transition the state machine does not allow.
    pub fn transition(&mut self, to: ObjectState) -> Result<(), String> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition(to) {
            return Err(format!(
                "{} {}: invalid transition {} -> {}",
                self.object_type, self.name, self.state, to
            ));
        }
        self.state = to;
        Ok(())
    }

    /// The statement that failed last (the whole unit when unknown)
    pub fn failing_statement(&self) -> String {
        match self.failed_statement.and_then(|i| self.statements.get(i)) {
            Some(statement) => statement.clone(),
            None => join_statements(&self.statements),
        }
    }

    /// Replace the failing statement with a repaired one and mark the unit for retry
    ///
    /// # Errors
    ///
    /// Returns an error string if the unit is not in the failed state.
    pub fn apply_repair(&mut self, statement: String) -> Result<(), String> {
        match self.failed_statement {
            Some(i) if i < self.statements.len() => self.statements[i] = statement,
            _ => self.statements = crate::ddl::split_statements(&statement),
        }
        self.transition(ObjectState::Retrying)
    }
}

/// Ordered units for a sandbox pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    units: Vec<ExecutionUnit>,
}

impl ExecutionPlan {
    /// Build from generated DDL
    ///
    /// Index and foreign key batches are split into one unit per statement, named after the
    /// index or constraint; every other artifact is one unit.
    pub fn from_generated(ddl: &GeneratedDdl) -> Self {
        let mut units = Vec::new();
        for artifact in ddl.artifacts() {
            let statements = artifact.statements();
            match artifact.object_type {
                ObjectType::Index | ObjectType::Constraint => {
                    for (i, statement) in statements.into_iter().enumerate() {
                        let name = statement_object_name(artifact.object_type, &statement)
                            .unwrap_or_else(|| format!("{}#{}", artifact.object_name, i + 1));
                        units.push(ExecutionUnit::new(
                            name,
                            artifact.object_type,
                            &artifact.object_name,
                            vec![statement],
                            &artifact.source_ddl,
                        ));
                    }
                }
                _ if statements.is_empty() => {
                    log::warn!(
                        "Skipping {} {}: no statements",
                        artifact.object_type,
                        artifact.object_name
                    );
                }
                _ => units.push(ExecutionUnit::new(
                    artifact.object_name.clone(),
                    artifact.object_type,
                    &artifact.object_name,
                    statements,
                    &artifact.source_ddl,
                )),
            }
        }
        // Stable: keeps dependency order within a stage
        units.sort_by_key(|u| u.object_type.stage());
        Self { units }
    }

    pub fn units(&self) -> &[ExecutionUnit] {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut [ExecutionUnit] {
        &mut self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExecutionUnit> {
        self.units
            .iter()
            .filter(|u| u.state == ObjectState::Failed)
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn find(&self, name: &str) -> Option<&ExecutionUnit> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Regroup units into artifacts carrying the current (possibly repaired) statements
    pub fn to_transformed(&self) -> Vec<TransformedDdl> {
        let mut out: Vec<TransformedDdl> = Vec::new();
        for unit in &self.units {
            let status = match unit.state {
                ObjectState::Success => DdlStatus::Success,
                ObjectState::Failed => DdlStatus::Failed,
                _ => DdlStatus::Pending,
            };
            match out.iter_mut().find(|a| a.object_name == unit.artifact) {
                Some(artifact) => {
                    let mut statements = artifact.statements();
                    statements.extend(unit.statements.iter().cloned());
                    artifact.target_ddl = join_statements(&statements);
                    artifact.status = merge_status(artifact.status, status);
                }
                None => {
                    let mut artifact = TransformedDdl::new(
                        unit.artifact.clone(),
                        unit.object_type,
                        unit.source_ddl.clone(),
                        join_statements(&unit.statements),
                    );
                    artifact.status = status;
                    out.push(artifact);
                }
            }
        }
        out
    }
}

fn merge_status(a: DdlStatus, b: DdlStatus) -> DdlStatus {
    match (a, b) {
        (DdlStatus::Failed, _) | (_, DdlStatus::Failed) => DdlStatus::Failed,
        (DdlStatus::Pending, _) | (_, DdlStatus::Pending) => DdlStatus::Pending,
        _ => DdlStatus::Success,
    }
}

/// Index or constraint name declared by a pass-2 statement
pub fn statement_object_name(object_type: ObjectType, statement: &str) -> Option<String> {
    let re = match object_type {
        ObjectType::Index => &INDEX_NAME,
        ObjectType::Constraint => &CONSTRAINT_NAME,
        _ => return None,
    };
    re.captures(statement).map(|c| c[1].to_string())
}
