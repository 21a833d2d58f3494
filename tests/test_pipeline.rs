//! End-to-end pipeline runs over an in-memory source and scripted PostgreSQL targets

use chrono::NaiveDate;
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;
use lifeport::artifacts::{self, ArtifactStore, MemoryArtifactStore};
use lifeport::config::MigrationSettings;
use lifeport::data::SqlValue;
use lifeport::pipeline::{Progress, ProgressEvent};
use lifeport::schema::{Column, ForeignKey, Procedure, SchemaModel, Table, Trigger, View};
use lifeport::source::memory::MemorySource;
use lifeport::source::{Introspector, SourceError};
use lifeport::test_helpers::MemoryTarget;
use lifeport::{DataTarget, ErrorKind, FinalStatus, Phase, Pipeline};
use rust_decimal::Decimal;

const CUSTOMERS: i64 = 9;
const PRODUCTS: i64 = 4;
const ORDERS: i64 = 23;

fn row(cells: &[&str]) -> Vec<Option<String>> {
    cells.iter().map(|c| Some(c.to_string())).collect()
}

fn shop_schema() -> SchemaModel {
    SchemaModel::new("shop")
        .with_table(
            Table::new("orders")
                .column(Column::new("id", "int").not_null().auto_increment())
                .column(Column::new("customer_id", "int"))
                .column(Column::new("product_id", "int"))
                .column(Column::new("placed", "datetime"))
                .primary_key(["id"])
                .foreign_key(ForeignKey::new("customer_id", "customer", "id"))
                .foreign_key(ForeignKey::new("product_id", "product", "id")),
        )
        .with_table(
            Table::new("customer")
                .column(Column::new("id", "int").not_null().auto_increment())
                .column(Column::new("name", "varchar(100)").not_null())
                .column(Column::new("email", "varchar(255)"))
                .primary_key(["id"]),
        )
        .with_table(
            Table::new("product")
                .column(Column::new("id", "int").not_null().auto_increment())
                .column(Column::new("title", "varchar(100)"))
                .column(Column::new("price", "decimal(10,2)"))
                .primary_key(["id"]),
        )
}

fn shop_source(schema: SchemaModel) -> MemorySource {
    let placed = NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(9, 30, 0))
        .unwrap();
    MemorySource::new(schema)
        .with_rows(
            "customer",
            (1..=CUSTOMERS)
                .map(|i| {
                    vec![
                        SqlValue::Int(i),
                        SqlValue::Text(Name().fake()),
                        SqlValue::Text(SafeEmail().fake()),
                    ]
                })
                .collect(),
        )
        .with_rows(
            "product",
            (1..=PRODUCTS)
                .map(|i| {
                    vec![
                        SqlValue::Int(i),
                        SqlValue::Text(format!("product {i}")),
                        SqlValue::Decimal(Decimal::new(1999 + i, 2)),
                    ]
                })
                .collect(),
        )
        .with_rows(
            "orders",
            (1..=ORDERS)
                .map(|i| {
                    vec![
                        SqlValue::Int(i),
                        SqlValue::Int(1 + i % CUSTOMERS),
                        SqlValue::Int(1 + i % PRODUCTS),
                        SqlValue::DateTime(placed),
                    ]
                })
                .collect(),
        )
}

/// Target that can be reset and whose catalog matches [`shop_schema`]
fn shop_target() -> MemoryTarget {
    MemoryTarget::new()
        .respond("pg_try_advisory_lock", vec![row(&["true"])])
        .respond("pg_get_serial_sequence", Vec::new())
        .respond(
            "pg_tables",
            vec![row(&["customer"]), row(&["product"]), row(&["orders"])],
        )
        .respond(
            "information_schema.tables",
            vec![row(&["customer"]), row(&["orders"]), row(&["product"])],
        )
        .respond(
            "information_schema.columns",
            vec![
                row(&["customer", "id", "integer"]),
                row(&["customer", "name", "character varying"]),
                row(&["customer", "email", "character varying"]),
                row(&["orders", "id", "integer"]),
                row(&["orders", "customer_id", "integer"]),
                row(&["orders", "product_id", "integer"]),
                row(&["orders", "placed", "timestamp without time zone"]),
                row(&["product", "id", "integer"]),
                row(&["product", "title", "character varying"]),
                row(&["product", "price", "numeric"]),
            ],
        )
        .respond(
            "PRIMARY KEY",
            vec![
                row(&["customer", "id"]),
                row(&["orders", "id"]),
                row(&["product", "id"]),
            ],
        )
        .respond(
            "contype",
            vec![row(&["orders", "customer"]), row(&["orders", "product"])],
        )
}

fn settings() -> MigrationSettings {
    MigrationSettings {
        batch_size: 7,
        max_retries: 2,
        lock_timeout_seconds: 0,
        ..Default::default()
    }
}

fn with_report_view(schema: SchemaModel) -> SchemaModel {
    schema.with_view(View {
        name: "order_totals".to_string(),
        definition: "select customer_id, count(*) as n from orders group by customer_id"
            .to_string(),
    })
}

#[test]
fn test_full_run_migrates_and_reconciles_three_tables() {
    let source = shop_source(shop_schema());
    let sandbox = shop_target();
    let store = MemoryArtifactStore::new();
    let (progress, events) = Progress::channel();

    let report = Pipeline::new(&source, &source, &sandbox, &store)
        .with_settings(settings())
        .with_progress(progress)
        .run_full();

    assert_eq!(report.final_status, FinalStatus::Completed, "{:?}", report.errors);
    assert_eq!(report.total_rows, (CUSTOMERS + PRODUCTS + ORDERS) as u64);
    assert_eq!(report.reconciliation.tables, 3);
    assert_eq!(report.reconciliation.matched, 3);
    assert_eq!(report.objects.tables, 3);
    assert_eq!(report.objects.foreign_keys, 2);

    assert_eq!(sandbox.row_count("customer"), Some(CUSTOMERS as u64));
    assert_eq!(sandbox.row_count("product"), Some(PRODUCTS as u64));
    assert_eq!(sandbox.row_count("orders"), Some(ORDERS as u64));

    // Referenced tables are created before the table that references them
    let creates: Vec<String> = sandbox
        .statements()
        .into_iter()
        .filter(|s| s.starts_with("CREATE TABLE"))
        .collect();
    assert_eq!(creates.len(), 3);
    assert!(creates[2].starts_with("CREATE TABLE \"orders\""));

    let phases: Vec<Phase> = events
        .try_iter()
        .filter_map(|e| match e {
            ProgressEvent::PhaseStarted(phase) => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            Phase::Introspection,
            Phase::DependencyAnalysis,
            Phase::SchemaTransformation,
            Phase::LogicConversion,
            Phase::SandboxTesting,
            Phase::Validation,
            Phase::DataMigration,
            Phase::Reporting,
        ]
    );

    let keys = store.keys().unwrap();
    for key in [
        artifacts::SCHEMA_METADATA,
        artifacts::DEPENDENCY_GRAPH,
        artifacts::TABLE_BLUEPRINTS,
        artifacts::CONVERTED_PROCEDURES,
        artifacts::SANDBOX_RESULTS,
        artifacts::TRANSFORMED_DDL,
        artifacts::VALIDATION_REPORT,
        artifacts::DATA_MIGRATION_RESULTS,
        artifacts::RECONCILIATION,
        artifacts::MIGRATION_REPORT,
    ] {
        assert!(keys.iter().any(|k| k == key), "missing artifact {key}");
    }
    let stored = store.get(artifacts::MIGRATION_REPORT).unwrap().unwrap();
    assert_eq!(stored["final_status"], "completed");
    assert!(store
        .text(artifacts::RECONCILIATION)
        .unwrap()
        .contains("orders"));
}

#[test]
fn test_failed_insert_shows_up_as_count_mismatch() {
    let source = shop_source(shop_schema());
    let sandbox = shop_target().fail_times("INSERT INTO \"orders\"", "deadlock detected", 1);
    let store = MemoryArtifactStore::new();

    let report = Pipeline::new(&source, &source, &sandbox, &store)
        .with_settings(settings())
        .run_full();

    assert_eq!(report.final_status, FinalStatus::CompletedWithErrors);
    assert_eq!(report.reconciliation.mismatched, vec!["orders"]);
    assert_eq!(report.errors[&ErrorKind::Data].count, 1);
    assert_eq!(report.errors[&ErrorKind::RowCountMismatch].count, 1);
    assert_eq!(sandbox.row_count("customer"), Some(CUSTOMERS as u64));
}

#[test]
fn test_repair_stops_after_max_retries() {
    let source = shop_source(with_report_view(shop_schema()));
    let sandbox = shop_target().fail_when("\"order_totals\"", "permission denied for schema public");
    let store = MemoryArtifactStore::new();

    let report = Pipeline::new(&source, &source, &sandbox, &store)
        .with_settings(settings())
        .run_schema_only();

    assert_eq!(report.final_status, FinalStatus::CompletedWithErrors);
    let exhausted = &report.errors[&ErrorKind::RepairExhausted];
    assert_eq!(exhausted.count, 1);
    assert!(exhausted.first[0].contains("order_totals"));

    let sandbox_results = store.get(artifacts::SANDBOX_RESULTS).unwrap().unwrap();
    assert_eq!(sandbox_results["cycles"], 2);
    assert_eq!(sandbox_results["passes"].as_array().map(Vec::len), Some(3));
    assert_eq!(sandbox_results["remaining_failures"][0], "order_totals");

    // Schema-only runs never move data
    assert_eq!(sandbox.row_count("orders"), Some(0));
    assert!(store.get(artifacts::DATA_MIGRATION_RESULTS).unwrap().is_none());
}

#[test]
fn test_production_untouched_when_sandbox_objects_fail() {
    let source = shop_source(with_report_view(shop_schema()));
    let sandbox = shop_target().fail_when("\"order_totals\"", "permission denied for schema public");
    let production = shop_target();
    let store = MemoryArtifactStore::new();

    let report = Pipeline::new(&source, &source, &sandbox, &store)
        .with_settings(settings())
        .with_production(&production)
        .deploy_production();

    assert!(production.statements().is_empty());
    assert_eq!(report.final_status, FinalStatus::CompletedWithErrors);
    assert!(report.errors[&ErrorKind::Validation]
        .first
        .iter()
        .any(|m| m.contains("Production deploy skipped")));
}

#[test]
fn test_production_deploy_after_clean_sandbox() {
    let source = shop_source(shop_schema());
    let sandbox = shop_target();
    let production = shop_target();
    let store = MemoryArtifactStore::new();

    let report = Pipeline::new(&source, &source, &sandbox, &store)
        .with_settings(settings())
        .with_production(&production)
        .deploy_production();

    assert_eq!(report.final_status, FinalStatus::Completed, "{:?}", report.errors);
    assert_eq!(production.table_names(), vec!["customer", "orders", "product"]);
    assert_eq!(production.row_count("orders"), Some(ORDERS as u64));
    assert!(production
        .statements()
        .iter()
        .all(|s| !s.starts_with("DROP")));
    // Sandbox holds schema only; data went to production
    assert_eq!(sandbox.row_count("orders"), Some(0));

    let summary = store.get(artifacts::PRODUCTION_DEPLOYMENT).unwrap().unwrap();
    assert_eq!(summary["status"], "success");
    assert_eq!(summary["total_rows"], report.total_rows);
    assert_eq!(summary["schema"]["failures"].as_array().unwrap().len(), 0);
    let blueprints = store.get(artifacts::TABLE_BLUEPRINTS).unwrap().unwrap();
    assert_eq!(blueprints["total_tables"], 3);
}

#[test]
fn test_data_only_without_production_target() {
    let source = shop_source(shop_schema());
    let sandbox = shop_target();
    let store = MemoryArtifactStore::new();

    let report = Pipeline::new(&source, &source, &sandbox, &store)
        .with_settings(settings())
        .run_data_only(DataTarget::Production);

    assert_eq!(report.final_status, FinalStatus::CompletedWithErrors);
    assert_eq!(report.errors[&ErrorKind::Connection].count, 1);
    assert_eq!(report.total_rows, 0);
}

#[test]
fn test_validation_failure_skips_data() {
    let source = shop_source(shop_schema());
    // Reset and lock work, but the catalog reports no tables
    let sandbox = MemoryTarget::new()
        .respond("pg_try_advisory_lock", vec![row(&["true"])])
        .respond(
            "pg_tables",
            vec![row(&["customer"]), row(&["product"]), row(&["orders"])],
        );
    let store = MemoryArtifactStore::new();

    let report = Pipeline::new(&source, &source, &sandbox, &store)
        .with_settings(settings())
        .run_full();

    assert_eq!(report.final_status, FinalStatus::CompletedWithErrors);
    assert_eq!(report.total_rows, 0);
    assert!(!sandbox
        .statements()
        .iter()
        .any(|s| s.starts_with("INSERT INTO")));
    let validation = store.get(artifacts::VALIDATION_REPORT).unwrap().unwrap();
    assert_eq!(validation["passed"], false);
}

#[test]
fn test_lock_timeout_is_recorded() {
    let source = shop_source(shop_schema());
    let sandbox = MemoryTarget::new().respond("pg_try_advisory_lock", vec![row(&["false"])]);
    let store = MemoryArtifactStore::new();

    let report = Pipeline::new(&source, &source, &sandbox, &store)
        .with_settings(settings())
        .run_full();

    assert_eq!(report.final_status, FinalStatus::CompletedWithErrors);
    assert!(report.errors[&ErrorKind::Connection].first[0].contains("sandbox lock"));
    assert!(!sandbox
        .statements()
        .iter()
        .any(|s| s.starts_with("CREATE TABLE")));
}

/// Source that cannot be reached
struct Unreachable;

impl Introspector for Unreachable {
    fn database(&self) -> &str {
        "shop"
    }

    fn list_tables(&self) -> Result<Vec<Table>, SourceError> {
        Err(SourceError::Connection(
            "Access denied for user 'root'@'localhost'".to_string(),
        ))
    }

    fn list_views(&self) -> Result<Vec<View>, SourceError> {
        Ok(Vec::new())
    }

    fn list_procedures(&self) -> Result<Vec<Procedure>, SourceError> {
        Ok(Vec::new())
    }

    fn list_triggers(&self) -> Result<Vec<Trigger>, SourceError> {
        Ok(Vec::new())
    }
}

#[test]
fn test_source_connection_failure_is_fatal() {
    let source = shop_source(shop_schema());
    let sandbox = shop_target();
    let store = MemoryArtifactStore::new();

    let report = Pipeline::new(&Unreachable, &source, &sandbox, &store)
        .with_settings(settings())
        .run_full();

    assert_eq!(report.final_status, FinalStatus::Failed);
    assert_eq!(report.errors[&ErrorKind::Connection].count, 1);
    assert!(sandbox.statements().is_empty());
    assert_eq!(store.keys().unwrap(), vec![artifacts::MIGRATION_REPORT]);
}
