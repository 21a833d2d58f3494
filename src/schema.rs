//! Source schema model
//!
//! In-memory representation of everything the introspector reads from the source database:
//! tables (columns, primary key, indexes, foreign keys, check constraints), views, stored
//! procedures/functions and triggers.
//!
//! The model is populated once per run and then only read. The single exception is
//! [`ForeignKey::is_deferred`], which dependency analysis sets on FKs participating in a
//! circular pair (see [`crate::graph::circular`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A table column as captured from the source catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Full source type string, e.g. `int unsigned`, `tinyint(1)`, `enum('a','b')`
    pub source_type: String,

    /// Whether the column accepts NULL
    pub nullable: bool,

    /// Default expression as reported by the source (unquoted literal or expression)
    pub default: Option<String>,

    /// Whether the column is AUTO_INCREMENT
    pub auto_increment: bool,
}

impl Column {
    /// Create a nullable column with no default
    #[must_use]
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            nullable: true,
            default: None,
            auto_increment: false,
        }
    }

    /// Mark the column NOT NULL
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the default expression
    #[must_use]
    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Mark the column AUTO_INCREMENT (implies NOT NULL)
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    /// Lower-cased source type with surrounding whitespace removed
    pub fn type_lower(&self) -> String {
        self.source_type.trim().to_lowercase()
    }

    /// True for spatial types (and the unknown-geometry placeholder some drivers report)
    pub fn is_spatial(&self) -> bool {
        is_spatial_type(&self.source_type)
    }
}

/// Returns true when a source type string denotes a spatial column.
///
/// Some drivers report GEOMETRY columns as `NULL` or leave the type empty; both are treated
/// as spatial so index generation falls back to a GiST-capable method.
pub fn is_spatial_type(source_type: &str) -> bool {
    let base = base_type_name(source_type);
    matches!(
        base.as_str(),
        "geometry"
            | "point"
            | "linestring"
            | "polygon"
            | "multipoint"
            | "multilinestring"
            | "multipolygon"
            | "geometrycollection"
            | "null"
            | ""
    )
}

/// Lower-cased type name without length/precision arguments or modifiers.
///
/// `int(11) unsigned` becomes `int`, `enum('a','b')` becomes `enum`.
pub fn base_type_name(source_type: &str) -> String {
    let lower = source_type.trim().to_lowercase();
    let end = lower
        .find(|c: char| c == '(' || c.is_whitespace())
        .unwrap_or(lower.len());
    lower[..end].to_string()
}

/// Secondary index on a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Source index name (scoped per table in the source dialect)
    pub name: String,

    /// Indexed columns, in key order
    pub columns: Vec<String>,

    /// Whether the index enforces uniqueness
    pub unique: bool,
}

/// Foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name; generated as `fk_{table}_{referenced}` when the source reports none
    pub name: Option<String>,

    /// Local columns, in order
    pub columns: Vec<String>,

    /// Referenced table
    pub referenced_table: String,

    /// Referenced columns, in the same order as `columns`
    pub referenced_columns: Vec<String>,

    /// True iff this FK participates in a detected circular pair
    #[serde(default)]
    pub is_deferred: bool,
}

impl ForeignKey {
    /// Create a single-column foreign key
    #[must_use]
    pub fn new(
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            columns: vec![column.into()],
            referenced_table: referenced_table.into(),
            referenced_columns: vec![referenced_column.into()],
            is_deferred: false,
        }
    }

    /// Set the constraint name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Constraint name used in generated DDL
    pub fn constraint_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("fk_{}_{}", table, self.referenced_table),
        }
    }
}

/// Table-level CHECK constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraint {
    pub name: String,
    pub expression: String,
}

/// Base table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name (unique within the schema)
    pub name: String,

    /// Columns in ordinal order
    pub columns: Vec<Column>,

    /// Primary key columns in key order (empty when the table has no primary key)
    pub primary_key: Vec<String>,

    /// Secondary indexes (the primary key index is not listed)
    pub indexes: Vec<Index>,

    /// Foreign keys declared on this table
    pub foreign_keys: Vec<ForeignKey>,

    /// CHECK constraints
    #[serde(default)]
    pub checks: Vec<CheckConstraint>,

    /// Row count at introspection time (informational)
    pub row_count: Option<u64>,
}

impl Table {
    /// Create an empty table definition
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            checks: Vec::new(),
            row_count: None,
        }
    }

    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    #[must_use]
    pub fn rows(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }

    /// Look up a column by name (case-insensitive)
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Tables referenced by this table's foreign keys, excluding self-references,
    /// in declaration order without duplicates
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for fk in &self.foreign_keys {
            let target = fk.referenced_table.as_str();
            if target != self.name && !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }
}

/// View definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    /// SELECT text as reported by the source catalog
    pub definition: String,
}

/// Routine kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureKind {
    Procedure,
    Function,
}

impl ProcedureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureKind::Procedure => "procedure",
            ProcedureKind::Function => "function",
        }
    }
}

/// Routine parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub data_type: String,
    /// IN, OUT or INOUT
    pub mode: String,
}

/// Stored procedure or function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub kind: ProcedureKind,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    /// Full `CREATE ...` source text
    pub source: String,
}

/// Trigger definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub table: String,
    /// BEFORE or AFTER
    pub timing: String,
    /// INSERT, UPDATE or DELETE
    pub event: String,
    /// Trigger body (ACTION_STATEMENT)
    pub source: String,
}

/// Complete source schema for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    /// Source database (schema) name
    pub database: String,

    /// Introspection timestamp
    pub extracted_at: DateTime<Utc>,

    /// Tables in introspection order
    pub tables: Vec<Table>,

    pub views: Vec<View>,
    pub procedures: Vec<Procedure>,
    pub triggers: Vec<Trigger>,
}

impl SchemaModel {
    /// Create an empty model for `database`
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            extracted_at: Utc::now(),
            tables: Vec::new(),
            views: Vec::new(),
            procedures: Vec::new(),
            triggers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    #[must_use]
    pub fn with_view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Total number of foreign keys across all tables
    pub fn foreign_key_count(&self) -> usize {
        self.tables.iter().map(|t| t.foreign_keys.len()).sum()
    }

    /// Total number of secondary indexes across all tables
    pub fn index_count(&self) -> usize {
        self.tables.iter().map(|t| t.indexes.len()).sum()
    }
}
