//! Sandbox pass execution
//!
//! A pass resets the sandbox, then runs every unit of the plan in stage order: tables, indexes,
//! foreign keys, views, procedures/functions, triggers. A failing statement gets one inline
//! retry through the [`DeterministicFixer`]; whatever still fails is left `failed` for the
//! repair loop.

use super::fixer::DeterministicFixer;
use super::plan::{ExecutionPlan, ExecutionUnit};
use super::state::{ObjectOutcome, ObjectState, SandboxResult};
use crate::ddl::type_mapping::quote_ident;
use crate::executor::{ExecutorError, TargetExecutor};
use crate::pipeline::context::{Progress, ProgressEvent};
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Catalog queries and drop templates, in reset order
const RESET_STEPS: &[(&str, &str)] = &[
    (
        "SELECT table_name::text FROM information_schema.views WHERE table_schema = 'public'",
        "DROP VIEW IF EXISTS {} CASCADE",
    ),
    (
        "SELECT tablename::text FROM pg_tables WHERE schemaname = 'public'",
        "DROP TABLE IF EXISTS {} CASCADE",
    ),
    (
        "SELECT sequence_name::text FROM information_schema.sequences WHERE sequence_schema = 'public'",
        "DROP SEQUENCE IF EXISTS {} CASCADE",
    ),
    (
        "SELECT p.proname::text, pg_get_function_identity_arguments(p.oid)::text \
         FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
         WHERE n.nspname = 'public' AND p.prokind IN ('f', 'p') \
         AND NOT EXISTS (SELECT 1 FROM pg_depend d WHERE d.objid = p.oid AND d.deptype = 'e')",
        "DROP ROUTINE IF EXISTS {} CASCADE",
    ),
    (
        "SELECT t.typname::text FROM pg_type t JOIN pg_namespace n ON n.oid = t.typnamespace \
         WHERE n.nspname = 'public' AND t.typtype = 'e'",
        "DROP TYPE IF EXISTS {} CASCADE",
    ),
];

/// Executes plans against the sandbox target
pub struct SandboxRunner<'a> {
    target: &'a dyn TargetExecutor,
    fixer: DeterministicFixer,
    progress: Progress,
}

impl<'a> SandboxRunner<'a> {
    pub fn new(target: &'a dyn TargetExecutor, source_database: &str) -> Self {
        Self {
            target,
            fixer: DeterministicFixer::new(source_database),
            progress: Progress::disabled(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Drop every view, table, sequence, routine and enum type in `public`
    ///
    /// # Errors
    ///
    /// Returns the first catalog or drop error; a half-reset sandbox is not usable.
    pub fn reset(&self) -> Result<usize, ExecutorError> {
        let mut dropped = 0;
        for (query, template) in RESET_STEPS {
            for row in self.target.query_rows(query)? {
                let Some(Some(name)) = row.first() else {
                    continue;
                };
                let object = match row.get(1) {
                    Some(Some(args)) => format!("{}({})", quote_ident(name), args),
                    _ => quote_ident(name),
                };
                self.target.execute(&template.replace("{}", &object))?;
                dropped += 1;
            }
        }
        log::info!("Sandbox reset: dropped {} objects", dropped);
        Ok(dropped)
    }

    /// Reset the sandbox and execute every unit of `plan`
    ///
    /// # Errors
    ///
    /// Returns an error only if the reset fails; statement failures are recorded on the units.
    pub fn run_pass(&self, plan: &mut ExecutionPlan, pass: u32) -> Result<SandboxResult, ExecutorError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::sandbox_pass_span(pass).entered();

        let start = Instant::now();
        let objects_dropped = self.reset()?;

        let mut outcomes = Vec::with_capacity(plan.len());
        for unit in plan.units_mut() {
            if matches!(unit.state, ObjectState::Success | ObjectState::Failed) {
                move_unit(unit, ObjectState::Pending);
            }
            outcomes.push(self.execute_unit(unit));
        }

        let result = SandboxResult {
            pass,
            objects_dropped,
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        log::info!(
            "Sandbox pass {}: {} succeeded, {} failed",
            pass,
            result.succeeded(),
            result.failed()
        );
        Ok(result)
    }

    fn execute_unit(&self, unit: &mut ExecutionUnit) -> ObjectOutcome {
        let start = Instant::now();
        move_unit(unit, ObjectState::Running);
        unit.attempts += 1;
        unit.last_error = None;
        unit.failed_statement = None;

        let mut fixed_inline = false;
        for i in 0..unit.statements.len() {
            match self.execute_with_fix(&unit.statements[i]) {
                Ok(None) => {}
                Ok(Some(fixed)) => {
                    unit.statements[i] = fixed;
                    fixed_inline = true;
                }
                Err(e) => {
                    unit.last_error = Some(e);
                    unit.failed_statement = Some(i);
                    break;
                }
            }
        }

        move_unit(
            unit,
            if unit.last_error.is_none() {
                ObjectState::Success
            } else {
                ObjectState::Failed
            },
        );
        let state = unit.state;
        match &unit.last_error {
            None => log::info!("✓ {} {}", unit.object_type, unit.name),
            Some(e) => log::warn!("✗ {} {}: {}", unit.object_type, unit.name, e),
        }
        self.progress.emit(ProgressEvent::ObjectExecuted {
            name: unit.name.clone(),
            object_type: unit.object_type,
            state,
        });

        ObjectOutcome {
            name: unit.name.clone(),
            object_type: unit.object_type,
            state,
            error: unit.last_error.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
            fixed_inline,
        }
    }

    /// Execute; on failure retry once with the fixed statement
    ///
    /// `Ok(Some(fixed))` when the fixed statement is the one that succeeded.
    fn execute_with_fix(&self, statement: &str) -> Result<Option<String>, String> {
        let error = match self.target.execute(statement) {
            Ok(_) => return Ok(None),
            Err(e) => e.message(),
        };
        let Some(fixed) = self.fixer.fix(statement) else {
            return Err(error);
        };
        log::debug!("Retrying with deterministic fix after: {}", error);
        match self.target.execute(&fixed) {
            Ok(_) => Ok(Some(fixed)),
            Err(e) => Err(e.message()),
        }
    }
}

/// Outcomes report `unit.state`, so a refused transition shows up there as well as in the log
fn move_unit(unit: &mut ExecutionUnit, to: ObjectState) {
    if let Err(e) = unit.transition(to) {
        log::error!("{}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::{DdlGenerator, ObjectType};
    use crate::schema::{Column, ForeignKey, Index, SchemaModel, Table};
    use crate::test_helpers::MemoryTarget;

    fn plan() -> ExecutionPlan {
        let schema = SchemaModel::new("shop")
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
            );
        let ddl = DdlGenerator::new(&schema)
            .generate(&["customer".to_string(), "orders".to_string()])
            .unwrap();
        ExecutionPlan::from_generated(&ddl)
    }

    #[test]
    fn test_reset_drops_in_category_order() {
        let target = MemoryTarget::new()
            .with_tables(["stale"])
            .respond("information_schema.views", vec![vec![Some("v".to_string())]])
            .respond("pg_tables", vec![vec![Some("stale".to_string())]])
            .respond(
                "pg_proc",
                vec![vec![Some("f".to_string()), Some("integer".to_string())]],
            );
        let dropped = SandboxRunner::new(&target, "shop").reset().unwrap();
        assert_eq!(dropped, 3);

        let drops: Vec<String> = target
            .statements()
            .into_iter()
            .filter(|s| s.starts_with("DROP"))
            .collect();
        assert_eq!(
            drops,
            vec![
                "DROP VIEW IF EXISTS \"v\" CASCADE",
                "DROP TABLE IF EXISTS \"stale\" CASCADE",
                "DROP ROUTINE IF EXISTS \"f\"(integer) CASCADE",
            ]
        );
        assert!(target.table_names().is_empty());
    }

    #[test]
    fn test_pass_runs_tables_before_indexes_and_fks() {
        let target = MemoryTarget::new();
        let mut plan = plan();
        let result = SandboxRunner::new(&target, "shop").run_pass(&mut plan, 1).unwrap();
        assert!(result.all_passed());
        assert_eq!(result.succeeded(), 4);

        let log = target.statements();
        let pos = |prefix: &str| log.iter().position(|s| s.starts_with(prefix)).unwrap();
        assert!(pos("CREATE TABLE \"orders\"") < pos("CREATE INDEX"));
        assert!(pos("CREATE INDEX") < pos("ALTER TABLE"));
    }

    #[test]
    fn test_failure_is_recorded_and_pass_continues() {
        let target = MemoryTarget::new().fail_when("CREATE INDEX", "operator class does not exist");
        let mut plan = plan();
        let result = SandboxRunner::new(&target, "shop").run_pass(&mut plan, 1).unwrap();

        assert_eq!(result.failed(), 1);
        let failed = plan.failed().next().unwrap();
        assert_eq!(failed.object_type, ObjectType::Index);
        assert_eq!(failed.failed_statement, Some(0));
        assert_eq!(
            failed.last_error.as_deref(),
            Some("operator class does not exist")
        );
        // The FK after the failed index still ran
        assert!(plan
            .units()
            .iter()
            .any(|u| u.object_type == ObjectType::Constraint && u.state == ObjectState::Success));
    }

    #[test]
    fn test_inline_fix_retries_once() {
        let target = MemoryTarget::new().fail_when("UNSIGNED", "syntax error at or near \"UNSIGNED\"");
        let mut plan = plan();
        plan.units_mut()[0].statements[0] =
            "CREATE TABLE \"customer\" (\"id\" INTEGER UNSIGNED NOT NULL)".to_string();

        let result = SandboxRunner::new(&target, "shop").run_pass(&mut plan, 1).unwrap();
        assert!(result.all_passed());
        assert!(result.outcomes[0].fixed_inline);
        assert_eq!(
            plan.units()[0].statements[0],
            "CREATE TABLE \"customer\" (\"id\" INTEGER NOT NULL)"
        );
    }

    #[test]
    fn test_repaired_unit_runs_from_retrying() {
        let target = MemoryTarget::new().fail_when("CREATE INDEX", "operator class does not exist");
        let mut plan = plan();
        let runner = SandboxRunner::new(&target, "shop");
        let first = runner.run_pass(&mut plan, 1).unwrap();
        assert_eq!(first.failed(), 1);

        let unit = plan
            .units_mut()
            .iter_mut()
            .find(|u| u.state == ObjectState::Failed)
            .unwrap();
        unit.apply_repair("ALTER TABLE \"orders\" ADD COLUMN \"note\" TEXT".to_string())
            .unwrap();
        assert_eq!(unit.state, ObjectState::Retrying);

        // Fresh sandbox: the canned catalog would keep the first pass's tables around
        let clean = MemoryTarget::new();
        let second = SandboxRunner::new(&clean, "shop").run_pass(&mut plan, 2).unwrap();
        for (outcome, unit) in second.outcomes.iter().zip(plan.units()) {
            assert_eq!(outcome.state, unit.state, "{}", unit.name);
        }
        assert!(plan.units().iter().all(|u| u.state == ObjectState::Success));
    }

    #[test]
    fn test_every_unit_runs_each_pass() {
        let target = MemoryTarget::new();
        let mut plan = plan();
        let runner = SandboxRunner::new(&target, "shop");
        runner.run_pass(&mut plan, 1).unwrap();
        // The canned catalog lists nothing, so the reset leaves both tables behind
        let second = runner.run_pass(&mut plan, 2).unwrap();
        assert_eq!(second.pass, 2);
        assert_eq!(second.failed(), 2);
        assert!(plan.units().iter().all(|u| u.attempts == 2));
    }
}
