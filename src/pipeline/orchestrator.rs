//! Pipeline orchestration
//!
//! Stages run strictly in sequence:
//!
//! ```text
//! introspection → dependency analysis → schema transformation → logic conversion
//!   → sandbox ⇄ repair → validation → data migration → (production deploy) → reporting
//! ```
//!
//! Stage failures are caught at the stage boundary, recorded in the run context and the run
//! continues where that makes sense. Only a connection failure during introspection aborts a run.

use super::context::RunContext;
use super::deploy::{replay, DeployResult, DeploymentSummary};
use super::report::RunReport;
use super::{DataTarget, Progress};
use crate::artifacts::{self, ArtifactStore};
use crate::config::MigrationSettings;
use crate::data::{reconciliation_csv, DataMigrationResult, DataMover, MoverOptions, TableStatus};
use crate::ddl::{join_statements, DdlGenerator, GeneratedDdl, SqlTranslator};
use crate::error::{ErrorKind, PipelineError, Phase};
use crate::executor::TargetExecutor;
use crate::graph::{validate_references, BlueprintSet, DependencyGraph};
use crate::repair::{NoopRepair, RepairLoop, RepairOutcome, RetryPolicy, SemanticRepair};
use crate::sandbox::{ExecutionPlan, SandboxLock, SandboxRunner};
use crate::schema::SchemaModel;
use crate::source::{Introspector, SourceError, SourceReader};
use crate::validation::{SchemaValidator, ValidationReport};
use serde::Serialize;
use std::time::Duration;

static NOOP_REPAIR: NoopRepair = NoopRepair;

struct Run {
    ctx: RunContext,
    report: RunReport,
}

/// Schema and its derived order
struct Analyzed {
    schema: SchemaModel,
    graph: DependencyGraph,
}

/// Result of the sandbox stages
struct Tested {
    plan: ExecutionPlan,
    repair: RepairOutcome,
    validation: Option<ValidationReport>,
}

impl Tested {
    fn clean(&self) -> bool {
        self.repair.all_passed() && self.validation.as_ref().is_some_and(|v| v.passed)
    }
}

/// Migration pipeline over its collaborators
pub struct Pipeline<'a> {
    introspector: &'a dyn Introspector,
    source: &'a dyn SourceReader,
    sandbox: &'a dyn TargetExecutor,
    production: Option<&'a dyn TargetExecutor>,
    artifacts: &'a dyn ArtifactStore,
    semantic: &'a dyn SemanticRepair,
    translator: Option<&'a dyn SqlTranslator>,
    settings: MigrationSettings,
    retry_policy: RetryPolicy,
    progress: Progress,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        introspector: &'a dyn Introspector,
        source: &'a dyn SourceReader,
        sandbox: &'a dyn TargetExecutor,
        artifacts: &'a dyn ArtifactStore,
    ) -> Self {
        Self {
            introspector,
            source,
            sandbox,
            production: None,
            artifacts,
            semantic: &NOOP_REPAIR,
            translator: None,
            settings: MigrationSettings::default(),
            retry_policy: RetryPolicy::default(),
            progress: Progress::disabled(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: MigrationSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_production(mut self, production: &'a dyn TargetExecutor) -> Self {
        self.production = Some(production);
        self
    }

    #[must_use]
    pub fn with_semantic_repair(mut self, semantic: &'a dyn SemanticRepair) -> Self {
        self.semantic = semantic;
        self
    }

    #[must_use]
    pub fn with_translator(mut self, translator: &'a dyn SqlTranslator) -> Self {
        self.translator = Some(translator);
        self
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

    /// Introspection through data migration into the sandbox
    pub fn run_full(&self) -> RunReport {
        self.execute(|run| {
            let analyzed = self.analyze(run)?;
            let Some(_lock) = self.lock_sandbox(run) else {
                return Ok(Some(analyzed));
            };
            if let Some(tested) = self.build_and_test(run, &analyzed) {
                if self.data_allowed(run, &tested) {
                    self.migrate_data(run, &analyzed, DataTarget::Sandbox, self.sandbox);
                }
            }
            Ok(Some(analyzed))
        })
    }

    /// Stop after schema validation
    pub fn run_schema_only(&self) -> RunReport {
        self.execute(|run| {
            let analyzed = self.analyze(run)?;
            if let Some(_lock) = self.lock_sandbox(run) {
                self.build_and_test(run, &analyzed);
            }
            Ok(Some(analyzed))
        })
    }

    /// Copy data into an existing schema on `target`
    pub fn run_data_only(&self, target: DataTarget) -> RunReport {
        self.execute(|run| {
            let analyzed = self.analyze(run)?;
            match target {
                DataTarget::Sandbox => {
                    if let Some(_lock) = self.lock_sandbox(run) {
                        self.migrate_data(run, &analyzed, target, self.sandbox);
                    }
                }
                DataTarget::Production => match self.production {
                    Some(production) => {
                        self.migrate_data(run, &analyzed, target, production);
                    }
                    None => self.no_production(run),
                },
            }
            Ok(Some(analyzed))
        })
    }

    /// Validate in the sandbox, then deploy schema and data to production
    ///
    /// Production is touched only when every sandbox object passed and validation passed.
    pub fn deploy_production(&self) -> RunReport {
        self.execute(|run| {
            let analyzed = self.analyze(run)?;
            let Some(production) = self.production else {
                self.no_production(run);
                return Ok(Some(analyzed));
            };
            let tested = match self.lock_sandbox(run) {
                Some(_lock) => self.build_and_test(run, &analyzed),
                None => None,
            };
            let Some(tested) = tested else {
                return Ok(Some(analyzed));
            };
            if !tested.clean() {
                run.ctx.enter(Phase::ProductionDeploy);
                run.ctx.record_kind(
                    ErrorKind::Validation,
                    "Production deploy skipped: sandbox objects or schema validation failed",
                    None,
                );
                run.ctx.finish(Phase::ProductionDeploy, false);
                return Ok(Some(analyzed));
            }
            let schema = self.deploy_schema(run, &tested.plan, production);
            let data = schema
                .success()
                .then(|| self.migrate_data(run, &analyzed, DataTarget::Production, production));
            let summary = DeploymentSummary::new(schema, data.as_ref());
            log::info!("Production deployment {:?}", summary.status);
            self.store(run, artifacts::PRODUCTION_DEPLOYMENT, &summary);
            Ok(Some(analyzed))
        })
    }

    fn execute<F>(&self, body: F) -> RunReport
    where
        F: FnOnce(&mut Run) -> Result<Option<Analyzed>, PipelineError>,
    {
        let ctx = RunContext::new(self.progress.clone());
        log::info!("Starting run {}", ctx.run_id);
        let report = RunReport::begin(&ctx);
        let mut run = Run { ctx, report };

        let (analyzed, fatal) = match body(&mut run) {
            Ok(analyzed) => (analyzed, false),
            Err(e) => {
                let phase = e.phase();
                run.ctx.record(e.to_run_error());
                run.ctx.finish(phase, false);
                run.ctx.phase = Phase::Failed;
                (None, true)
            }
        };
        self.finish(run, analyzed.as_ref(), fatal)
    }

    fn finish(&self, mut run: Run, analyzed: Option<&Analyzed>, fatal: bool) -> RunReport {
        run.ctx.enter(Phase::Reporting);
        if let Some(analyzed) = analyzed {
            run.report.objects = super::report::ObjectCounts::from_schema(&analyzed.schema);
        }
        run.report.finish(
            run.ctx.errors(),
            self.settings.report_error_limit,
            fatal,
        );
        if let Err(e) = artifacts::put_serialized(self.artifacts, artifacts::MIGRATION_REPORT, &run.report)
        {
            log::error!("Failed to store migration report: {}", e);
        }
        run.ctx.finish(Phase::Reporting, true);
        run.ctx.phase = if fatal { Phase::Failed } else { Phase::Completed };
        log::info!("{}", run.report.summary());
        run.report
    }

    fn store<T: Serialize>(&self, run: &mut Run, key: &str, value: &T) {
        if let Err(e) = artifacts::put_serialized(self.artifacts, key, value) {
            run.ctx
                .record_kind(ErrorKind::Artifact, e.to_string(), Some(key));
        }
    }

    fn store_text(&self, run: &mut Run, key: &str, text: &str) {
        if let Err(e) = self.artifacts.put_sql(key, text) {
            run.ctx
                .record_kind(ErrorKind::Artifact, e.to_string(), Some(key));
        }
    }

    fn no_production(&self, run: &mut Run) {
        run.ctx.enter(Phase::ProductionDeploy);
        run.ctx.record_kind(
            ErrorKind::Connection,
            "No production target configured",
            None,
        );
        run.ctx.finish(Phase::ProductionDeploy, false);
    }

    /// Introspection and dependency analysis
    fn analyze(&self, run: &mut Run) -> Result<Analyzed, PipelineError> {
        let mut schema = self.introspect(run)?;

        run.ctx.enter(Phase::DependencyAnalysis);
        let graph = DependencyGraph::build(&schema);
        if let Err(problems) = validate_references(&schema) {
            for problem in problems {
                run.ctx.record_kind(ErrorKind::Validation, problem, None);
            }
        }
        let deferred = graph.circular.mark_deferred(&mut schema.tables);
        for pair in graph.circular.pairs() {
            run.ctx.record_kind(
                ErrorKind::CircularDependency,
                format!(
                    "Circular foreign keys between {} and {}; applied after both tables exist",
                    pair.0, pair.1
                ),
                Some(pair.0.as_str()),
            );
        }
        if deferred > 0 {
            log::info!("Deferred {} circular foreign keys", deferred);
        }
        run.report
            .record_phase(Phase::DependencyAnalysis, graph.nodes.len(), 0);
        self.store(run, artifacts::SCHEMA_METADATA, &schema);
        self.store(run, artifacts::DEPENDENCY_GRAPH, &graph);
        self.store(run, artifacts::TABLE_BLUEPRINTS, &BlueprintSet::build(&schema, &graph));
        run.ctx.finish(Phase::DependencyAnalysis, true);

        Ok(Analyzed { schema, graph })
    }

    /// Read the source schema
    ///
    /// Connection failures abort the run; any other failure is recorded and that object class
    /// is treated as empty.
    fn introspect(&self, run: &mut Run) -> Result<SchemaModel, PipelineError> {
        run.ctx.enter(Phase::Introspection);
        let mut schema = SchemaModel::new(self.introspector.database());
        let mut failed = 0;

        schema.tables = self.introspected(run, "tables", self.introspector.list_tables(), &mut failed)?;
        schema.views = self.introspected(run, "views", self.introspector.list_views(), &mut failed)?;
        schema.procedures = self.introspected(
            run,
            "procedures",
            self.introspector.list_procedures(),
            &mut failed,
        )?;
        schema.triggers =
            self.introspected(run, "triggers", self.introspector.list_triggers(), &mut failed)?;

        log::info!(
            "Introspected {}: {} tables, {} views, {} routines, {} triggers",
            schema.database,
            schema.tables.len(),
            schema.views.len(),
            schema.procedures.len(),
            schema.triggers.len()
        );
        let found = schema.tables.len()
            + schema.views.len()
            + schema.procedures.len()
            + schema.triggers.len();
        run.report.record_phase(Phase::Introspection, found, failed);
        run.ctx.finish(Phase::Introspection, failed == 0);
        Ok(schema)
    }

    fn introspected<T>(
        &self,
        run: &mut Run,
        what: &str,
        result: Result<Vec<T>, SourceError>,
        failed: &mut usize,
    ) -> Result<Vec<T>, PipelineError> {
        match result {
            Ok(items) => Ok(items),
            Err(e) if e.is_connection() => Err(PipelineError::Source {
                phase: Phase::Introspection,
                source: e,
            }),
            Err(e) => {
                *failed += 1;
                run.ctx.record_kind(
                    ErrorKind::StructuralDdl,
                    format!("Could not read {}: {}", what, e),
                    None,
                );
                Ok(Vec::new())
            }
        }
    }

    fn lock_sandbox(&self, run: &mut Run) -> Option<SandboxLock<'a>> {
        let timeout = Duration::from_secs(self.settings.lock_timeout_seconds);
        match SandboxLock::acquire(self.sandbox, timeout) {
            Ok(lock) => Some(lock),
            Err(e) => {
                run.ctx.enter(Phase::SandboxTesting);
                run.ctx.record_kind(
                    ErrorKind::Connection,
                    format!("Sandbox unavailable: {}", e),
                    None,
                );
                run.ctx.finish(Phase::SandboxTesting, false);
                None
            }
        }
    }

    /// DDL generation, sandbox ⇄ repair, validation
    ///
    /// `None` when the sandbox could not be used at all.
    fn build_and_test(&self, run: &mut Run, analyzed: &Analyzed) -> Option<Tested> {
        let ddl = self.generate(run, analyzed)?;

        run.ctx.enter(Phase::SandboxTesting);
        let mut plan = ExecutionPlan::from_generated(&ddl);
        let runner = SandboxRunner::new(self.sandbox, &analyzed.schema.database)
            .with_progress(run.ctx.progress().clone());
        let repair_loop = RepairLoop::new(
            &runner,
            &analyzed.graph,
            self.semantic,
            self.settings.max_retries,
        )
        .with_retry_policy(self.retry_policy)
        .with_progress(run.ctx.progress().clone());

        let repair = match repair_loop.run(&mut plan) {
            Ok(outcome) => outcome,
            Err(e) => {
                run.ctx.record(
                    PipelineError::Executor {
                        phase: Phase::SandboxTesting,
                        source: e,
                    }
                    .to_run_error(),
                );
                run.ctx.finish(Phase::SandboxTesting, false);
                return None;
            }
        };

        for unit in plan.failed() {
            run.ctx.record_kind(
                ErrorKind::RepairExhausted,
                format!(
                    "{} still failing after {} repair cycles: {}",
                    unit.object_type,
                    repair.cycles,
                    unit.last_error.as_deref().unwrap_or("unknown error")
                ),
                Some(unit.name.as_str()),
            );
        }
        let failed = plan.failed_count();
        run.report
            .record_phase(Phase::SandboxTesting, plan.len() - failed, failed);
        self.store(run, artifacts::SANDBOX_RESULTS, &repair);
        let transformed = plan.to_transformed();
        self.store(run, artifacts::TRANSFORMED_DDL, &transformed);
        let script: Vec<String> = plan
            .units()
            .iter()
            .flat_map(|u| u.statements.iter().cloned())
            .collect();
        self.store_text(run, artifacts::TRANSFORMED_DDL, &join_statements(&script));
        run.ctx.finish(Phase::SandboxTesting, failed == 0);

        let validation = self.validate(run, &analyzed.schema);
        Some(Tested {
            plan,
            repair,
            validation,
        })
    }

    fn generate(&self, run: &mut Run, analyzed: &Analyzed) -> Option<GeneratedDdl> {
        run.ctx.enter(Phase::SchemaTransformation);
        let mut generator = DdlGenerator::new(&analyzed.schema);
        if let Some(translator) = self.translator {
            generator = generator.with_translator(translator);
        }
        let ddl = match generator.generate(&analyzed.graph.table_order()) {
            Ok(ddl) => ddl,
            Err(message) => {
                run.ctx.record(
                    PipelineError::stage(Phase::SchemaTransformation, message).to_run_error(),
                );
                run.ctx.finish(Phase::SchemaTransformation, false);
                return None;
            }
        };
        run.report
            .record_phase(Phase::SchemaTransformation, ddl.schema_artifacts().len(), 0);
        run.ctx.finish(Phase::SchemaTransformation, true);

        run.ctx.enter(Phase::LogicConversion);
        self.store(run, artifacts::CONVERTED_PROCEDURES, &ddl.routines);
        run.report
            .record_phase(Phase::LogicConversion, ddl.views.len() + ddl.routines.len(), 0);
        run.ctx.finish(Phase::LogicConversion, true);
        Some(ddl)
    }

    fn validate(&self, run: &mut Run, schema: &SchemaModel) -> Option<ValidationReport> {
        run.ctx.enter(Phase::Validation);
        let report = match SchemaValidator::new(schema).validate(self.sandbox) {
            Ok(report) => report,
            Err(e) => {
                run.ctx.record(
                    PipelineError::Executor {
                        phase: Phase::Validation,
                        source: e,
                    }
                    .to_run_error(),
                );
                run.ctx.finish(Phase::Validation, false);
                return None;
            }
        };
        for issue in report.critical() {
            run.ctx
                .record_kind(ErrorKind::Validation, issue.message.clone(), Some(issue.table.as_str()));
        }
        run.report
            .record_phase(Phase::Validation, report.passed_checks, report.failed_checks);
        self.store(run, artifacts::VALIDATION_REPORT, &report);
        run.ctx.finish(Phase::Validation, report.passed);
        Some(report)
    }

    fn data_allowed(&self, run: &mut Run, tested: &Tested) -> bool {
        let passed = tested.validation.as_ref().is_some_and(|v| v.passed);
        if passed || !self.settings.skip_data_on_validation_failure {
            return true;
        }
        log::warn!("Skipping data migration: schema validation did not pass");
        run.ctx.record_kind(
            ErrorKind::Validation,
            "Data migration skipped because schema validation failed",
            None,
        );
        false
    }

    fn deploy_schema(
        &self,
        run: &mut Run,
        plan: &ExecutionPlan,
        production: &dyn TargetExecutor,
    ) -> DeployResult {
        run.ctx.enter(Phase::ProductionDeploy);
        let result: DeployResult = replay(plan, production);
        for failure in &result.failures {
            run.ctx.record_kind(
                ErrorKind::StructuralDdl,
                format!("{}: {}", failure.error, failure.statement),
                Some(failure.object.as_str()),
            );
        }
        run.report.record_phase(
            Phase::ProductionDeploy,
            result.objects_deployed,
            result.failures.len(),
        );
        run.ctx.finish(Phase::ProductionDeploy, result.success());
        result
    }

    fn migrate_data(
        &self,
        run: &mut Run,
        analyzed: &Analyzed,
        target: DataTarget,
        executor: &dyn TargetExecutor,
    ) -> DataMigrationResult {
        run.ctx.enter(Phase::DataMigration);
        log::info!("Migrating data into {}", target);
        let order = analyzed.graph.table_order();
        let result = DataMover::new(self.source, executor, MoverOptions::from(&self.settings))
            .with_primary_keys(&analyzed.schema)
            .with_progress(run.ctx.progress().clone())
            .run(&order);

        for table in &result.tables {
            match table.status {
                TableStatus::Success => {}
                TableStatus::Failed => run.ctx.record_kind(
                    ErrorKind::Data,
                    table.error.clone().unwrap_or_else(|| "failed".to_string()),
                    Some(table.table.as_str()),
                ),
                TableStatus::Skipped => run.ctx.record_kind(
                    ErrorKind::Data,
                    "skipped after an earlier table failed",
                    Some(table.table.as_str()),
                ),
            }
        }
        for warning in &result.warnings {
            run.ctx.record_kind(
                ErrorKind::TypeConversion,
                format!(
                    "{}: {} value(s) replaced by NULL ({})",
                    warning.column, warning.count, warning.message
                ),
                Some(warning.table.as_str()),
            );
        }
        for mismatch in result.mismatches() {
            let message = match &mismatch.error {
                Some(error) => error.clone(),
                None => format!(
                    "source {} rows, target {} rows",
                    count_text(mismatch.source_count),
                    count_text(mismatch.target_count)
                ),
            };
            run.ctx
                .record_kind(ErrorKind::RowCountMismatch, message, Some(mismatch.table.as_str()));
        }

        run.report.record_phase(
            Phase::DataMigration,
            result.tables_migrated(),
            result.tables_failed(),
        );
        run.report.record_data(&result);
        self.store(run, artifacts::DATA_MIGRATION_RESULTS, &result);
        match reconciliation_csv(&result.reconciliation) {
            Ok(csv) => self.store_text(run, artifacts::RECONCILIATION, &csv),
            Err(e) => run
                .ctx
                .record_kind(ErrorKind::Artifact, e, Some(artifacts::RECONCILIATION)),
        }
        run.ctx.finish(Phase::DataMigration, result.success());
        result
    }
}

fn count_text(count: Option<u64>) -> String {
    count.map_or_else(|| "?".to_string(), |c| c.to_string())
}
