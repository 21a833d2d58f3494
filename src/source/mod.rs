//! Source database seam
//!
//! [`Introspector`] reads the schema; [`SourceReader`] streams rows. `MySqlSource` (feature
//! `mysql`) implements both against a live server; [`memory::MemorySource`] implements both over
//! in-memory tables for tests and dry runs.

pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;

use crate::data::sql::BatchRequest;
use crate::data::value::SqlValue;
use crate::schema::{Column, Procedure, SchemaModel, Table, Trigger, View};
use std::fmt;

/// Source introspection / streaming error
#[derive(Debug)]
pub enum SourceError {
    /// Could not reach or authenticate to the source
    Connection(String),
    /// A catalog or data query failed
    Query(String),
    /// A returned value could not be decoded
    Decode(String),
    /// The table has no columns in the source catalog
    NoColumns(String),
}

impl SourceError {
    pub fn is_connection(&self) -> bool {
        matches!(self, SourceError::Connection(_))
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Connection(s) => write!(f, "Source connection error: {s}"),
            SourceError::Query(s) => write!(f, "Source query error: {s}"),
            SourceError::Decode(s) => write!(f, "Source decode error: {s}"),
            SourceError::NoColumns(t) => write!(f, "No columns found for table {t}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Reads the source schema
pub trait Introspector {
    /// Source database (schema) name
    fn database(&self) -> &str;

    /// Tables with columns, primary key, indexes, foreign keys, checks and row counts
    fn list_tables(&self) -> Result<Vec<Table>, SourceError>;

    fn list_views(&self) -> Result<Vec<View>, SourceError>;

    /// Procedures and functions with parameters, return type and source text
    fn list_procedures(&self) -> Result<Vec<Procedure>, SourceError>;

    fn list_triggers(&self) -> Result<Vec<Trigger>, SourceError>;

    /// Full schema model
    fn introspect(&self) -> Result<SchemaModel, SourceError> {
        let mut model = SchemaModel::new(self.database());
        model.tables = self.list_tables()?;
        model.views = self.list_views()?;
        model.procedures = self.list_procedures()?;
        model.triggers = self.list_triggers()?;
        log::info!(
            "Introspected {}: {} tables, {} views, {} routines, {} triggers",
            model.database,
            model.tables.len(),
            model.views.len(),
            model.procedures.len(),
            model.triggers.len()
        );
        Ok(model)
    }
}

/// Streams rows out of source tables
pub trait SourceReader {
    /// Columns of `table` in ordinal order
    fn columns(&self, table: &str) -> Result<Vec<Column>, SourceError>;

    /// One page of rows, values in `request.columns` order
    fn fetch_batch(&self, request: &BatchRequest<'_>) -> Result<Vec<Vec<SqlValue>>, SourceError>;

    /// `COUNT(*)` of `table`
    fn count_rows(&self, table: &str) -> Result<u64, SourceError>;
}
