//! Dependency graph construction and migration ordering
//!
//! This module provides functionality to:
//! - Build a graph of object references (FK, view → table, trigger → table)
//! - Classify migration complexity per object
//! - Topologically sort objects into a migration order that tolerates cycles
//! - Report FK references to tables that do not exist in the schema

use crate::graph::circular::CircularFkSet;
use crate::schema::{SchemaModel, Table};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Kind of schema object a node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Table,
    View,
    Procedure,
    Trigger,
}

impl NodeType {
    /// Prefix used in node ids
    pub fn prefix(&self) -> &'static str {
        match self {
            NodeType::Table => "table",
            NodeType::View => "view",
            NodeType::Procedure => "procedure",
            NodeType::Trigger => "trigger",
        }
    }

    /// Node id for an object of this type
    pub fn node_id(&self, name: &str) -> String {
        format!("{}:{}", self.prefix(), name)
    }
}

/// Migration complexity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Procedures whose source exceeds this many characters are classified high
const LARGE_ROUTINE_CHARS: usize = 500;

impl Complexity {
    /// Score a table by column count, FK count and row count
    pub fn for_table(table: &Table) -> Self {
        let mut score = 0;

        let columns = table.columns.len();
        if columns > 20 {
            score += 2;
        } else if columns > 10 {
            score += 1;
        }

        let fks = table.foreign_keys.len();
        if fks > 3 {
            score += 2;
        } else if fks > 0 {
            score += 1;
        }

        match table.row_count {
            Some(rows) if rows > 100_000 => score += 2,
            Some(rows) if rows > 10_000 => score += 1,
            _ => {}
        }

        if score >= 4 {
            Complexity::High
        } else if score >= 2 {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }

    pub fn for_routine(source: &str) -> Self {
        if source.chars().count() > LARGE_ROUTINE_CHARS {
            Complexity::High
        } else {
            Complexity::Medium
        }
    }
}

/// A schema object in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// `"{type}:{name}"`
    pub id: String,
    pub name: String,
    pub node_type: NodeType,
    pub complexity: Complexity,
}

impl DependencyNode {
    pub fn new(node_type: NodeType, name: &str, complexity: Complexity) -> Self {
        Self {
            id: node_type.node_id(name),
            name: name.to_string(),
            node_type,
            complexity,
        }
    }
}

/// Edge kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    ForeignKey,
    Reference,
}

/// `from_id` depends on `to_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from_id: String,
    pub to_id: String,
    pub edge_type: EdgeType,
}

impl DependencyEdge {
    pub fn new(from_id: String, to_id: String, edge_type: EdgeType) -> Self {
        Self {
            from_id,
            to_id,
            edge_type,
        }
    }
}

/// Objects, their references and the computed migration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<DependencyNode>,
    pub edges: Vec<DependencyEdge>,
    /// Total order over every node id
    pub migration_order: Vec<String>,
    /// Circular table pairs whose FK edges were excluded from ordering
    pub circular: CircularFkSet,
}

impl DependencyGraph {
    /// Build the graph for a schema and compute its migration order
    ///
    /// Nodes are added in the order tables, views, procedures, triggers, each in
    /// introspection order, so the resulting order is reproducible for a fixed input.
    pub fn build(schema: &SchemaModel) -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        for table in &schema.tables {
            nodes.push(DependencyNode::new(
                NodeType::Table,
                &table.name,
                Complexity::for_table(table),
            ));
        }
        for view in &schema.views {
            nodes.push(DependencyNode::new(NodeType::View, &view.name, Complexity::Medium));
        }
        for procedure in &schema.procedures {
            nodes.push(DependencyNode::new(
                NodeType::Procedure,
                &procedure.name,
                Complexity::for_routine(&procedure.source),
            ));
        }
        for trigger in &schema.triggers {
            nodes.push(DependencyNode::new(NodeType::Trigger, &trigger.name, Complexity::Medium));
        }

        for table in &schema.tables {
            for fk in &table.foreign_keys {
                edges.push(DependencyEdge::new(
                    NodeType::Table.node_id(&table.name),
                    NodeType::Table.node_id(&fk.referenced_table),
                    EdgeType::ForeignKey,
                ));
            }
        }

        // Substring match on the lower-cased definition; a table whose name occurs inside
        // another identifier produces a false edge.
        for view in &schema.views {
            let definition = view.definition.to_lowercase();
            for table in &schema.tables {
                if definition.contains(&table.name.to_lowercase()) {
                    edges.push(DependencyEdge::new(
                        NodeType::View.node_id(&view.name),
                        NodeType::Table.node_id(&table.name),
                        EdgeType::Reference,
                    ));
                }
            }
        }

        for trigger in &schema.triggers {
            edges.push(DependencyEdge::new(
                NodeType::Trigger.node_id(&trigger.name),
                NodeType::Table.node_id(&trigger.table),
                EdgeType::Reference,
            ));
        }

        let circular = CircularFkSet::detect(&schema.tables);
        let migration_order = topological_sort(&nodes, &edges, |edge| {
            edge.edge_type == EdgeType::ForeignKey && is_cycle_edge(edge, &circular)
        });

        log::info!(
            "Built dependency graph with {} nodes, {} edges",
            nodes.len(),
            edges.len()
        );

        Self {
            nodes,
            edges,
            migration_order,
            circular,
        }
    }

    /// Position of a node id in the migration order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.migration_order.iter().position(|n| n == id)
    }

    /// Table names in migration order
    pub fn table_order(&self) -> Vec<String> {
        self.migration_order
            .iter()
            .filter_map(|id| id.strip_prefix("table:"))
            .map(str::to_string)
            .collect()
    }

    /// Tables `table` references through FKs, and tables that reference it
    pub fn fk_neighbours(&self, table: &str) -> (Vec<String>, Vec<String>) {
        let id = NodeType::Table.node_id(table);
        let mut references = Vec::new();
        let mut referenced_by = Vec::new();
        for edge in self.edges.iter().filter(|e| e.edge_type == EdgeType::ForeignKey) {
            if edge.from_id == id {
                if let Some(name) = edge.to_id.strip_prefix("table:") {
                    references.push(name.to_string());
                }
            }
            if edge.to_id == id {
                if let Some(name) = edge.from_id.strip_prefix("table:") {
                    referenced_by.push(name.to_string());
                }
            }
        }
        (references, referenced_by)
    }

    /// One-paragraph FK context for a table, handed to the semantic repair collaborator
    pub fn fk_context(&self, table: &str) -> String {
        let (references, referenced_by) = self.fk_neighbours(table);
        let join = |names: &[String]| {
            if names.is_empty() {
                "None".to_string()
            } else {
                names.join(", ")
            }
        };
        let mut context = format!(
            "Table '{}' FK dependencies:\n  - References (FK to): {}\n  - Referenced by: {}\n",
            table,
            join(&references),
            join(&referenced_by)
        );
        if self.circular.involves(table) {
            context.push_str("  - Part of a circular FK pair; its FKs are applied via ALTER TABLE\n");
        }
        context
    }
}

fn is_cycle_edge(edge: &DependencyEdge, circular: &CircularFkSet) -> bool {
    match (
        edge.from_id.strip_prefix("table:"),
        edge.to_id.strip_prefix("table:"),
    ) {
        (Some(from), Some(to)) => from == to || circular.is_circular(from, to),
        _ => false,
    }
}

/// Kahn's algorithm with FIFO tie-breaking and cycle tolerance
///
/// In-degree counts every edge whose both endpoints are known nodes, except edges for
/// which `excluded` returns true. Nodes that never reach zero in-degree are appended in
/// their original relative order instead of failing.
pub fn topological_sort<F>(
    nodes: &[DependencyNode],
    edges: &[DependencyEdge],
    excluded: F,
) -> Vec<String>
where
    F: Fn(&DependencyEdge) -> bool,
{
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();

    for edge in edges {
        if excluded(edge) {
            continue;
        }
        let (from, to) = (edge.from_id.as_str(), edge.to_id.as_str());
        if !known.contains(from) || !known.contains(to) {
            continue;
        }
        dependents.entry(to).or_default().push(from);
        if let Some(degree) = in_degree.get_mut(from) {
            *degree += 1;
        }
    }

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id).copied() == Some(0))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(nodes.len());
    let mut placed: HashSet<&str> = HashSet::new();

    while let Some(current) = queue.pop_front() {
        if !placed.insert(current) {
            continue;
        }
        order.push(current.to_string());
        if let Some(children) = dependents.get(current) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let remaining: Vec<&str> = nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !placed.contains(id))
            .collect();
        log::warn!(
            "Unresolved dependency cycle among {} object(s); appending in original order",
            remaining.len()
        );
        for id in remaining {
            if placed.insert(id) {
                order.push(id.to_string());
            }
        }
    }

    order
}

/// Report FK references to tables that are not part of the schema
pub fn validate_references(schema: &SchemaModel) -> Result<(), Vec<String>> {
    let names: HashSet<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
    let mut errors = Vec::new();

    for table in &schema.tables {
        for fk in &table.foreign_keys {
            if !names.contains(fk.referenced_table.as_str()) {
                errors.push(format!(
                    "Table '{}' has foreign key reference to '{}' which does not exist in the source schema",
                    table.name, fk.referenced_table
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ForeignKey, Procedure, ProcedureKind, Trigger, View};

    fn chain_schema() -> SchemaModel {
        SchemaModel::new("sakila")
            .with_table(
                Table::new("city").foreign_key(ForeignKey::new("country_id", "country", "country_id")),
            )
            .with_table(Table::new("country"))
            .with_table(
                Table::new("address").foreign_key(ForeignKey::new("city_id", "city", "city_id")),
            )
    }

    #[test]
    fn test_topological_sort_simple_chain() {
        let graph = DependencyGraph::build(&chain_schema());
        assert_eq!(
            graph.table_order(),
            vec!["country".to_string(), "city".to_string(), "address".to_string()]
        );
    }

    #[test]
    fn test_fifo_tie_break_keeps_input_order() {
        let schema = SchemaModel::new("db")
            .with_table(Table::new("b"))
            .with_table(Table::new("a"))
            .with_table(Table::new("c"));
        let graph = DependencyGraph::build(&schema);
        assert_eq!(graph.table_order(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_cycle_is_appended_not_rejected() {
        let nodes = vec![
            DependencyNode::new(NodeType::Table, "x", Complexity::Low),
            DependencyNode::new(NodeType::Table, "y", Complexity::Low),
            DependencyNode::new(NodeType::Table, "z", Complexity::Low),
            DependencyNode::new(NodeType::Table, "free", Complexity::Low),
        ];
        let edge = |a: &str, b: &str| {
            DependencyEdge::new(
                NodeType::Table.node_id(a),
                NodeType::Table.node_id(b),
                EdgeType::ForeignKey,
            )
        };
        // three-table cycle is not a circular pair, so nothing excludes it
        let edges = vec![edge("x", "y"), edge("y", "z"), edge("z", "x")];
        let order = topological_sort(&nodes, &edges, |_| false);
        assert_eq!(order, vec!["table:free", "table:x", "table:y", "table:z"]);
    }

    #[test]
    fn test_circular_pair_does_not_block_dependents() {
        let schema = SchemaModel::new("sakila")
            .with_table(
                Table::new("payment").foreign_key(ForeignKey::new("staff_id", "staff", "staff_id")),
            )
            .with_table(
                Table::new("staff").foreign_key(ForeignKey::new("store_id", "store", "store_id")),
            )
            .with_table(
                Table::new("store")
                    .foreign_key(ForeignKey::new("manager_staff_id", "staff", "staff_id")),
            );
        let graph = DependencyGraph::build(&schema);
        let staff = graph.position("table:staff").unwrap();
        let payment = graph.position("table:payment").unwrap();
        assert!(staff < payment);
        assert_eq!(graph.migration_order.len(), 3);
        assert!(graph.circular.is_circular("store", "staff"));
    }

    #[test]
    fn test_view_and_trigger_edges() {
        let mut schema = chain_schema().with_view(View {
            name: "address_list".into(),
            definition: "select a.address, c.City from ADDRESS a join city c".into(),
        });
        schema.triggers.push(Trigger {
            name: "upd_address".into(),
            table: "address".into(),
            timing: "AFTER".into(),
            event: "UPDATE".into(),
            source: "BEGIN END".into(),
        });
        let graph = DependencyGraph::build(&schema);

        let view_targets: Vec<&str> = graph
            .edges
            .iter()
            .filter(|e| e.from_id == "view:address_list")
            .map(|e| e.to_id.as_str())
            .collect();
        assert_eq!(view_targets, vec!["table:city", "table:address"]);

        let view = graph.position("view:address_list").unwrap();
        let trigger = graph.position("trigger:upd_address").unwrap();
        let address = graph.position("table:address").unwrap();
        assert!(address < view);
        assert!(address < trigger);
    }

    #[test]
    fn test_complexity_thresholds() {
        let mut wide = Table::new("wide");
        for i in 0..21 {
            wide = wide.column(Column::new(format!("c{i}"), "int"));
        }
        assert_eq!(Complexity::for_table(&wide), Complexity::Medium);
        let wide = wide.rows(200_000);
        assert_eq!(Complexity::for_table(&wide), Complexity::High);
        assert_eq!(Complexity::for_table(&Table::new("t").rows(20_000)), Complexity::Low);

        let fk_heavy = (0..4).fold(Table::new("f"), |t, i| {
            t.foreign_key(ForeignKey::new(format!("c{i}"), format!("r{i}"), "id"))
        });
        assert_eq!(Complexity::for_table(&fk_heavy), Complexity::Medium);
    }

    #[test]
    fn test_routine_complexity() {
        assert_eq!(Complexity::for_routine("BEGIN END"), Complexity::Medium);
        assert_eq!(Complexity::for_routine(&"x".repeat(501)), Complexity::High);

        let mut schema = SchemaModel::new("db");
        schema.procedures.push(Procedure {
            name: "rewards_report".into(),
            kind: ProcedureKind::Procedure,
            parameters: vec![],
            return_type: None,
            source: "x".repeat(600),
        });
        let graph = DependencyGraph::build(&schema);
        assert_eq!(graph.nodes[0].id, "procedure:rewards_report");
        assert_eq!(graph.nodes[0].complexity, Complexity::High);
    }

    #[test]
    fn test_validate_references() {
        let schema = SchemaModel::new("db").with_table(
            Table::new("bank_accounts").foreign_key(ForeignKey::new("bank_id", "banks", "id")),
        );
        let errors = validate_references(&schema).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("banks"));

        assert!(validate_references(&chain_schema()).is_ok());
    }

    #[test]
    fn test_fk_context_mentions_neighbours() {
        let graph = DependencyGraph::build(&chain_schema());
        let context = graph.fk_context("city");
        assert!(context.contains("References (FK to): country"));
        assert!(context.contains("Referenced by: address"));
    }
}
