//! Per-table blueprints
//!
//! A blueprint gathers everything known about one table in a single document: its source
//! definition (with circular FKs already flagged deferred), its FK neighbours, and the views,
//! triggers and routines that touch it. The set is stored as the `table_blueprints` artifact
//! and is the context a reviewer or repair collaborator reads for that table.

use super::circular::TablePair;
use super::dependency::{DependencyGraph, EdgeType, NodeType};
use crate::schema::{SchemaModel, Table};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableBlueprint {
    pub table: Table,
    /// Tables this one references, excluding itself
    pub depends_on: Vec<String>,
    /// Tables referencing this one
    pub depended_by: Vec<String>,
    pub has_circular_fk: bool,
    pub related_views: Vec<String>,
    pub related_triggers: Vec<String>,
    /// Routines whose source mentions the table name
    pub related_procedures: Vec<String>,
    pub index_naming: String,
}

/// All blueprints of a schema, in migration order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlueprintSet {
    pub total_tables: usize,
    pub execution_order: Vec<String>,
    pub circular_dependencies: Vec<TablePair>,
    pub blueprints: Vec<TableBlueprint>,
}

impl BlueprintSet {
    /// Build blueprints from a schema and its graph
    ///
    /// Call after [`super::CircularFkSet::mark_deferred`] so the FKs carry their deferral flag.
    pub fn build(schema: &SchemaModel, graph: &DependencyGraph) -> Self {
        let execution_order = graph.table_order();
        let blueprints = execution_order
            .iter()
            .filter_map(|name| schema.table(name))
            .map(|table| blueprint(table, schema, graph))
            .collect::<Vec<_>>();

        Self {
            total_tables: blueprints.len(),
            execution_order,
            circular_dependencies: graph.circular.pairs().cloned().collect(),
            blueprints,
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableBlueprint> {
        self.blueprints.iter().find(|b| b.table.name == table)
    }
}

fn blueprint(table: &Table, schema: &SchemaModel, graph: &DependencyGraph) -> TableBlueprint {
    let (references, referenced_by) = graph.fk_neighbours(&table.name);
    let table_id = NodeType::Table.node_id(&table.name);
    let view_prefix = format!("{}:", NodeType::View.prefix());

    let related_views = graph
        .edges
        .iter()
        .filter(|e| e.edge_type == EdgeType::Reference && e.to_id == table_id)
        .filter_map(|e| e.from_id.strip_prefix(view_prefix.as_str()))
        .map(str::to_string)
        .collect();
    let related_triggers = schema
        .triggers
        .iter()
        .filter(|t| t.table == table.name)
        .map(|t| t.name.clone())
        .collect();
    let needle = table.name.to_lowercase();
    let related_procedures = schema
        .procedures
        .iter()
        .filter(|p| p.source.to_lowercase().contains(&needle))
        .map(|p| p.name.clone())
        .collect();

    TableBlueprint {
        table: table.clone(),
        depends_on: distinct_others(references, &table.name),
        depended_by: distinct_others(referenced_by, &table.name),
        has_circular_fk: table.foreign_keys.iter().any(|fk| fk.is_deferred),
        related_views,
        related_triggers,
        related_procedures,
        index_naming: format!("idx_{}_{{column}}", table.name),
    }
}

fn distinct_others(names: Vec<String>, table: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if name != table && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}
