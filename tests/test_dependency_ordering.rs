//! Migration order over a sakila-shaped schema

use lifeport::graph::{validate_references, DependencyGraph};
use lifeport::schema::{
    Column, ForeignKey, Procedure, ProcedureKind, SchemaModel, Table, Trigger, View,
};

fn id(name: &str) -> Column {
    Column::new(name, "smallint unsigned").not_null().auto_increment()
}

fn sakila() -> SchemaModel {
    let mut schema = SchemaModel::new("sakila")
        .with_table(
            Table::new("store")
                .column(id("store_id"))
                .column(Column::new("manager_staff_id", "tinyint unsigned"))
                .column(Column::new("address_id", "smallint unsigned"))
                .primary_key(["store_id"])
                .foreign_key(ForeignKey::new("manager_staff_id", "staff", "staff_id"))
                .foreign_key(ForeignKey::new("address_id", "address", "address_id")),
        )
        .with_table(
            Table::new("staff")
                .column(id("staff_id"))
                .column(Column::new("store_id", "tinyint unsigned"))
                .column(Column::new("address_id", "smallint unsigned"))
                .primary_key(["staff_id"])
                .foreign_key(ForeignKey::new("store_id", "store", "store_id"))
                .foreign_key(ForeignKey::new("address_id", "address", "address_id")),
        )
        .with_table(
            Table::new("film_actor")
                .column(Column::new("actor_id", "smallint unsigned"))
                .column(Column::new("film_id", "smallint unsigned"))
                .primary_key(["actor_id", "film_id"])
                .foreign_key(ForeignKey::new("actor_id", "actor", "actor_id"))
                .foreign_key(ForeignKey::new("film_id", "film", "film_id")),
        )
        .with_table(
            Table::new("film")
                .column(id("film_id"))
                .column(Column::new("language_id", "tinyint unsigned"))
                .primary_key(["film_id"])
                .foreign_key(ForeignKey::new("language_id", "language", "language_id")),
        )
        .with_table(Table::new("actor").column(id("actor_id")).primary_key(["actor_id"]))
        .with_table(
            Table::new("address")
                .column(id("address_id"))
                .column(Column::new("city_id", "smallint unsigned"))
                .primary_key(["address_id"])
                .foreign_key(ForeignKey::new("city_id", "city", "city_id")),
        )
        .with_table(
            Table::new("city")
                .column(id("city_id"))
                .column(Column::new("country_id", "smallint unsigned"))
                .primary_key(["city_id"])
                .foreign_key(ForeignKey::new("country_id", "country", "country_id")),
        )
        .with_table(Table::new("country").column(id("country_id")).primary_key(["country_id"]))
        .with_table(Table::new("language").column(id("language_id")).primary_key(["language_id"]))
        .with_view(View {
            name: "actor_info".to_string(),
            definition: "select a.actor_id from actor a join film_actor fa on fa.actor_id = a.actor_id"
                .to_string(),
        });
    schema.procedures.push(Procedure {
        name: "film_in_stock".to_string(),
        kind: ProcedureKind::Procedure,
        parameters: Vec::new(),
        return_type: None,
        source: "BEGIN SELECT film_id FROM film; END".to_string(),
    });
    schema.triggers.push(Trigger {
        name: "ins_film".to_string(),
        table: "film".to_string(),
        timing: "AFTER".to_string(),
        event: "INSERT".to_string(),
        source: "BEGIN END".to_string(),
    });
    schema
}

fn position(order: &[String], table: &str) -> usize {
    order
        .iter()
        .position(|t| t == table)
        .unwrap_or_else(|| panic!("{table} missing from order"))
}

#[test]
fn test_referenced_tables_come_first() {
    let schema = sakila();
    let graph = DependencyGraph::build(&schema);
    let order = graph.table_order();
    assert_eq!(order.len(), schema.tables.len());

    for table in &schema.tables {
        for fk in &table.foreign_keys {
            if graph.circular.is_circular(&table.name, &fk.referenced_table) {
                continue;
            }
            assert!(
                position(&order, &fk.referenced_table) < position(&order, &table.name),
                "{} must precede {}",
                fk.referenced_table,
                table.name
            );
        }
    }
}

#[test]
fn test_store_staff_cycle_is_detected_and_deferred() {
    let mut schema = sakila();
    let graph = DependencyGraph::build(&schema);

    assert_eq!(graph.circular.len(), 1);
    assert!(graph.circular.is_circular("staff", "store"));
    assert!(graph.circular.is_circular("store", "staff"));

    // Both members of the cycle still get a place in the order
    let order = graph.table_order();
    assert!(order.contains(&"store".to_string()));
    assert!(order.contains(&"staff".to_string()));

    assert_eq!(graph.circular.mark_deferred(&mut schema.tables), 2);
    let deferred: Vec<(&str, &str)> = schema
        .tables
        .iter()
        .flat_map(|t| {
            t.foreign_keys
                .iter()
                .filter(|fk| fk.is_deferred)
                .map(move |fk| (t.name.as_str(), fk.referenced_table.as_str()))
        })
        .collect();
    assert_eq!(deferred, vec![("store", "staff"), ("staff", "store")]);
}

#[test]
fn test_views_and_routines_follow_tables() {
    let graph = DependencyGraph::build(&sakila());
    let view = graph.position("view:actor_info").unwrap();
    let trigger = graph.position("trigger:ins_film").unwrap();

    assert!(graph.position("table:actor").unwrap() < view);
    assert!(graph.position("table:film_actor").unwrap() < view);
    assert!(graph.position("table:film").unwrap() < trigger);
    assert!(graph.position("procedure:film_in_stock").is_some());
    assert_eq!(graph.migration_order.len(), graph.nodes.len());
}

#[test]
fn test_order_is_reproducible() {
    let first = DependencyGraph::build(&sakila());
    let second = DependencyGraph::build(&sakila());
    assert_eq!(first.migration_order, second.migration_order);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

#[test]
fn test_dangling_reference_reported() {
    let schema = sakila().with_table(
        Table::new("payment")
            .column(id("payment_id"))
            .foreign_key(ForeignKey::new("rental_id", "rental", "rental_id")),
    );
    let problems = validate_references(&schema).unwrap_err();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("'rental'"));

    // The table is still ordered
    let graph = DependencyGraph::build(&schema);
    assert!(graph.table_order().contains(&"payment".to_string()));
}

#[test]
fn test_fk_context_describes_neighbours() {
    let graph = DependencyGraph::build(&sakila());
    let context = graph.fk_context("store");
    assert!(context.contains("References (FK to): staff, address"));
    assert!(context.contains("Referenced by: staff"));
    assert!(context.contains("circular"));
}
