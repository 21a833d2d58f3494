//! Target DDL generation
//!
//! Turns the source [`SchemaModel`](crate::schema::SchemaModel) into PostgreSQL statements in two
//! passes: table bodies first (no foreign keys, no indexes), then one batch of `CREATE INDEX`
//! statements and one batch of `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY` statements.
//! Views, procedures, functions and triggers are converted separately and executed last.

pub mod dialect;
pub mod generator;
pub mod routines;
pub mod split;
pub mod type_mapping;

pub use generator::{DdlGenerator, GeneratedDdl, DEFERRED_FKS_OBJECT, INDEXES_OBJECT};
pub use routines::{RoutineConverter, SqlTranslator, TranslationRequest};
pub use split::{join_statements, split_statements};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of schema object a DDL artifact creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Table,
    Index,
    Constraint,
    View,
    Procedure,
    Function,
    Trigger,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::Index => "index",
            ObjectType::Constraint => "constraint",
            ObjectType::View => "view",
            ObjectType::Procedure => "procedure",
            ObjectType::Function => "function",
            ObjectType::Trigger => "trigger",
        }
    }

    /// Execution stage; lower stages run first in a sandbox pass
    pub fn stage(&self) -> u8 {
        match self {
            ObjectType::Table => 0,
            ObjectType::Index => 1,
            ObjectType::Constraint => 2,
            ObjectType::View => 3,
            ObjectType::Procedure | ObjectType::Function => 4,
            ObjectType::Trigger => 5,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of executing an artifact against a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DdlStatus {
    Pending,
    Success,
    Failed,
}

/// One emitted DDL artifact
///
/// The index and constraint artifacts bundle many statements (one per line, each ending in
/// `;`) under a single logical object name; the sandbox splits them back into individually
/// retriable statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedDdl {
    pub object_name: String,
    pub object_type: ObjectType,
    /// Source-dialect text the artifact was derived from (audit and repair context)
    pub source_ddl: String,
    /// Target statement or semicolon-delimited statement batch
    pub target_ddl: String,
    pub status: DdlStatus,
}

impl TransformedDdl {
    #[must_use]
    pub fn new(
        object_name: impl Into<String>,
        object_type: ObjectType,
        source_ddl: impl Into<String>,
        target_ddl: impl Into<String>,
    ) -> Self {
        Self {
            object_name: object_name.into(),
            object_type,
            source_ddl: source_ddl.into(),
            target_ddl: target_ddl.into(),
            status: DdlStatus::Pending,
        }
    }

    /// Individual statements of this artifact
    pub fn statements(&self) -> Vec<String> {
        split_statements(&self.target_ddl)
    }
}
