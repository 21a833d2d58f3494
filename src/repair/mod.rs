//! Sandbox repair loop
//!
//! `sandbox pass → (failures and cycles left) → repair → sandbox pass → ...`
//!
//! The cycle counter is incremented exactly once, on entry to the repair step, so the loop runs
//! at most `max_retries` repair cycles. Each failed unit is classified; a deterministic
//! [`FixAction`] is applied locally and anything else (or a deterministic action that changes
//! nothing) goes to the [`SemanticRepair`] collaborator. No repair is trusted until the next
//! pass runs it. Objects still failing when the bound is reached stay failed and the pipeline
//! moves on.

pub mod actions;
pub mod classifier;
pub mod semantic;

pub use classifier::{ErrorClassifier, FixAction};
pub use semantic::{
    request_repair, strip_code_fences, NoopRepair, RepairError, RepairRequest, RetryPolicy,
    SemanticRepair,
};

use crate::ddl::ObjectType;
use crate::executor::ExecutorError;
use crate::graph::DependencyGraph;
use crate::pipeline::context::{Progress, ProgressEvent};
use crate::sandbox::plan::statement_object_name;
use crate::sandbox::{ExecutionPlan, ExecutionUnit, SandboxResult, SandboxRunner};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

static STATEMENT_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:\bON|\bALTER\s+TABLE|\bCREATE\s+TABLE)\s+(?:IF\s+NOT\s+EXISTS\s+)?"?([^"\s(]+)"?"#)
        .expect("static regex")
});

/// One repair decision for one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub cycle: u32,
    pub object: String,
    pub object_type: ObjectType,
    pub error: String,
    /// [`FixAction::name`] of the classification
    pub action: String,
    /// The semantic collaborator was asked
    pub semantic: bool,
    /// A replacement statement was applied (not yet validated)
    pub applied: bool,
}

/// Everything the loop did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub passes: Vec<SandboxResult>,
    pub cycles: u32,
    pub history: Vec<RepairAttempt>,
    /// Names of units still failing after the last pass
    pub remaining_failures: Vec<String>,
}

impl RepairOutcome {
    pub fn final_pass(&self) -> Option<&SandboxResult> {
        self.passes.last()
    }

    pub fn all_passed(&self) -> bool {
        self.remaining_failures.is_empty()
    }
}

pub struct RepairLoop<'a> {
    runner: &'a SandboxRunner<'a>,
    graph: &'a DependencyGraph,
    classifier: ErrorClassifier,
    semantic: &'a dyn SemanticRepair,
    max_retries: u32,
    retry_policy: RetryPolicy,
    progress: Progress,
}

impl<'a> RepairLoop<'a> {
    pub fn new(
        runner: &'a SandboxRunner<'a>,
        graph: &'a DependencyGraph,
        semantic: &'a dyn SemanticRepair,
        max_retries: u32,
    ) -> Self {
        Self {
            runner,
            graph,
            classifier: ErrorClassifier::new(graph.table_order()),
            semantic,
            max_retries,
            retry_policy: RetryPolicy::default(),
            progress: Progress::disabled(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Run the first pass and up to `max_retries` repair cycles
    ///
    /// # Errors
    ///
    /// Returns an error only when a sandbox reset fails.
    pub fn run(&self, plan: &mut ExecutionPlan) -> Result<RepairOutcome, ExecutorError> {
        let mut outcome = RepairOutcome::default();
        outcome.passes.push(self.runner.run_pass(plan, 1)?);

        while plan.failed_count() > 0 && outcome.cycles < self.max_retries {
            outcome.cycles += 1;
            let failures = plan.failed_count();
            #[cfg(feature = "metrics")]
            METRICS.record_repair_cycle();
            self.progress.emit(ProgressEvent::RepairCycle {
                attempt: outcome.cycles,
                failures,
            });
            log::info!(
                "Repair cycle {}/{}: {} failed objects",
                outcome.cycles,
                self.max_retries,
                failures
            );

            let attempts = self.repair_failures(plan, outcome.cycles);
            outcome.history.extend(attempts);
            outcome
                .passes
                .push(self.runner.run_pass(plan, outcome.cycles + 1)?);
        }

        outcome.remaining_failures = plan.failed().map(|u| u.name.clone()).collect();
        if outcome.remaining_failures.is_empty() {
            log::info!("Sandbox clean after {} repair cycles", outcome.cycles);
        } else {
            log::warn!(
                "Repair cycles exhausted ({}); still failing: {}",
                outcome.cycles,
                outcome.remaining_failures.join(", ")
            );
        }
        Ok(outcome)
    }

    fn repair_failures(&self, plan: &mut ExecutionPlan, cycle: u32) -> Vec<RepairAttempt> {
        let failed: Vec<usize> = plan
            .units()
            .iter()
            .enumerate()
            .filter(|(_, u)| u.state == crate::sandbox::ObjectState::Failed)
            .map(|(i, _)| i)
            .collect();

        let mut attempts = Vec::with_capacity(failed.len());
        for i in failed {
            let taken = taken_index_names(plan, i);
            let unit = &mut plan.units_mut()[i];
            attempts.push(self.repair_unit(unit, &taken, cycle));
        }
        attempts
    }

    fn repair_unit(
        &self,
        unit: &mut ExecutionUnit,
        taken: &HashSet<String>,
        cycle: u32,
    ) -> RepairAttempt {
        let statement = unit.failing_statement();
        let error = unit.last_error.clone().unwrap_or_default();
        let action = self.classifier.classify(&error, &statement);

        let mut semantic = false;
        let mut fixed = actions::apply(&action, &statement, taken);
        if fixed.is_none() {
            semantic = true;
            let fk_context = unit_table(unit)
                .map(|table| self.graph.fk_context(&table))
                .unwrap_or_default();
            let request = RepairRequest {
                statement: &statement,
                error: &error,
                object_type: unit.object_type,
                object_name: &unit.name,
                fk_context: &fk_context,
            };
            fixed = request_repair(self.semantic, &request, self.retry_policy);
        }

        let applied = match fixed {
            Some(replacement) => match unit.apply_repair(replacement) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("{}", e);
                    false
                }
            },
            None => false,
        };
        log::debug!(
            "{} {}: {} ({})",
            unit.object_type,
            unit.name,
            action,
            if applied { "rewritten" } else { "no change" }
        );

        RepairAttempt {
            cycle,
            object: unit.name.clone(),
            object_type: unit.object_type,
            error,
            action: action.name().to_string(),
            semantic,
            applied,
        }
    }
}

/// Index names declared by every index unit except `skip`
fn taken_index_names(plan: &ExecutionPlan, skip: usize) -> HashSet<String> {
    plan.units()
        .iter()
        .enumerate()
        .filter(|(i, u)| *i != skip && u.object_type == ObjectType::Index)
        .flat_map(|(_, u)| u.statements.iter())
        .filter_map(|s| statement_object_name(ObjectType::Index, s))
        .collect()
}

/// Table a unit belongs to, for FK context
fn unit_table(unit: &ExecutionUnit) -> Option<String> {
    match unit.object_type {
        ObjectType::Table => Some(unit.name.clone()),
        ObjectType::Index | ObjectType::Constraint | ObjectType::Trigger => unit
            .statements
            .iter()
            .rev()
            .find_map(|s| STATEMENT_TABLE.captures(s).map(|c| c[1].to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::DdlGenerator;
    use crate::schema::{Column, ForeignKey, Index, SchemaModel, Table, View};
    use crate::test_helpers::MemoryTarget;
    use std::cell::RefCell;
    use std::time::Duration;

    fn schema() -> SchemaModel {
        SchemaModel::new("shop")
            .with_table(
                Table::new("customer")
                    .column(Column::new("id", "int").not_null())
                    .primary_key(["id"]),
            )
            .with_table(
                Table::new("orders")
                    .column(Column::new("id", "int").not_null())
                    .column(Column::new("customer_id", "int"))
                    .primary_key(["id"])
                    .foreign_key(ForeignKey::new("customer_id", "customer", "id"))
                    .index(Index {
                        name: "customer_id".to_string(),
                        columns: vec!["customer_id".to_string()],
                        unique: false,
                    }),
            )
            .with_view(View {
                name: "big_orders".to_string(),
                definition: "select * from orderz".to_string(),
            })
    }

    fn plan(schema: &SchemaModel) -> ExecutionPlan {
        let ddl = DdlGenerator::new(schema)
            .generate(&["customer".to_string(), "orders".to_string()])
            .unwrap();
        ExecutionPlan::from_generated(&ddl)
    }

    /// Sandbox whose reset catalog lists both tables, so every pass starts empty
    fn target() -> MemoryTarget {
        MemoryTarget::new().respond(
            "pg_tables",
            vec![
                vec![Some("customer".to_string())],
                vec![Some("orders".to_string())],
            ],
        )
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }

    struct Rewrite {
        answer: &'static str,
        seen: RefCell<Vec<String>>,
    }

    impl SemanticRepair for Rewrite {
        fn repair(&self, request: &RepairRequest<'_>) -> Result<Option<String>, RepairError> {
            self.seen.borrow_mut().push(request.error.to_string());
            Ok(Some(self.answer.to_string()))
        }
    }

    #[test]
    fn test_always_failing_object_stops_at_max_retries() {
        let schema = schema();
        let graph = DependencyGraph::build(&schema);
        let target = target()
            .fail_when("orderz", "relation \"orderz\" does not exist")
            .fail_when("idx_orders_customer_id", "could not create index");
        let runner = SandboxRunner::new(&target, "shop");
        let (progress, rx) = Progress::channel();
        let repair = RepairLoop::new(&runner, &graph, &NoopRepair, 3)
            .with_retry_policy(fast())
            .with_progress(progress);

        let mut plan = plan(&schema);
        let outcome = repair.run(&mut plan).unwrap();

        assert_eq!(outcome.cycles, 3);
        assert_eq!(outcome.passes.len(), 4);
        assert_eq!(
            outcome.remaining_failures,
            vec!["idx_orders_customer_id", "big_orders"]
        );
        assert!(!outcome.all_passed());
        assert!(outcome.history.iter().all(|a| a.semantic && !a.applied));

        let cycles: Vec<u32> = rx
            .try_iter()
            .filter_map(|e| match e {
                ProgressEvent::RepairCycle { attempt, .. } => Some(attempt),
                _ => None,
            })
            .collect();
        assert_eq!(cycles, vec![1, 2, 3]);
    }

    #[test]
    fn test_clean_first_pass_needs_no_cycles() {
        let schema = SchemaModel::new("shop").with_table(
            Table::new("customer")
                .column(Column::new("id", "int").not_null())
                .primary_key(["id"]),
        );
        let graph = DependencyGraph::build(&schema);
        let target = target();
        let runner = SandboxRunner::new(&target, "shop");
        let mut plan = plan(&schema);

        let outcome = RepairLoop::new(&runner, &graph, &NoopRepair, 5)
            .run(&mut plan)
            .unwrap();
        assert_eq!(outcome.cycles, 0);
        assert_eq!(outcome.passes.len(), 1);
        assert!(outcome.all_passed());
    }

    #[test]
    fn test_deterministic_rename_fixes_duplicate_index() {
        let schema = SchemaModel::new("shop").with_table(
            Table::new("orders")
                .column(Column::new("id", "int").not_null())
                .column(Column::new("customer_id", "int"))
                .primary_key(["id"])
                .index(Index {
                    name: "customer_id".to_string(),
                    columns: vec!["customer_id".to_string()],
                    unique: false,
                }),
        );
        let graph = DependencyGraph::build(&schema);
        let target = target().fail_when(
            "\"idx_fk_customer_id\"",
            "relation \"idx_fk_customer_id\" already exists",
        );
        let runner = SandboxRunner::new(&target, "shop");
        let mut plan = plan(&schema);
        let index = plan
            .units()
            .iter()
            .position(|u| u.object_type == ObjectType::Index)
            .unwrap();
        plan.units_mut()[index].statements[0] =
            "CREATE INDEX \"idx_fk_customer_id\" ON \"orders\" (\"customer_id\")".to_string();

        let outcome = RepairLoop::new(&runner, &graph, &NoopRepair, 3)
            .run(&mut plan)
            .unwrap();

        assert_eq!(outcome.cycles, 1);
        assert!(outcome.all_passed());
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.history[0].action, "rename_duplicate_index");
        assert!(!outcome.history[0].semantic);
        assert_eq!(
            plan.units()[index].statements[0],
            "CREATE INDEX \"idx_orders_customer_id\" ON \"orders\" (\"customer_id\")"
        );
    }

    #[test]
    fn test_semantic_fix_is_revalidated() {
        let schema = schema();
        let graph = DependencyGraph::build(&schema);
        let target = target().fail_when("orderz", "relation \"orderz\" does not exist");
        let runner = SandboxRunner::new(&target, "shop");
        let collaborator = Rewrite {
            answer: "```sql\nCREATE OR REPLACE VIEW \"big_orders\" AS select * from orders\n```",
            seen: RefCell::new(Vec::new()),
        };
        let mut plan = plan(&schema);

        let outcome = RepairLoop::new(&runner, &graph, &collaborator, 3)
            .with_retry_policy(fast())
            .run(&mut plan)
            .unwrap();

        assert_eq!(outcome.cycles, 1);
        assert!(outcome.all_passed());
        assert_eq!(
            collaborator.seen.borrow().as_slice(),
            ["relation \"orderz\" does not exist"]
        );
        let view = plan.find("big_orders").unwrap();
        assert_eq!(
            view.statements,
            vec!["CREATE OR REPLACE VIEW \"big_orders\" AS select * from orders;"]
        );
        // Accepted only because the second pass ran it
        assert!(target
            .statements()
            .iter()
            .any(|s| s.ends_with("select * from orders;")));
    }

    #[test]
    fn test_unit_table_for_fk_context() {
        let schema = schema();
        let plan = plan(&schema);
        let fk = plan
            .units()
            .iter()
            .find(|u| u.object_type == ObjectType::Constraint)
            .unwrap();
        assert_eq!(unit_table(fk).as_deref(), Some("orders"));
        let index = plan
            .units()
            .iter()
            .find(|u| u.object_type == ObjectType::Index)
            .unwrap();
        assert_eq!(unit_table(index).as_deref(), Some("orders"));
    }
}
