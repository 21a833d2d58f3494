//! Target executor
//!
//! Provides the [`TargetExecutor`] trait that abstracts statement execution against the
//! PostgreSQL target (sandbox or production) over `may_postgres`.
//!
//! Every component that touches a target goes through this trait, so the sandbox runner,
//! the data mover and the validator can be exercised with an in-memory executor in tests.

use may_postgres::{Client, Error as PostgresError};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Error type for target execution
#[derive(Debug)]
pub enum ExecutorError {
    /// PostgreSQL database error
    PostgresError(PostgresError),

    /// Query execution error (driver-independent, e.g. from test executors)
    QueryError(String),

    /// Result cell could not be read as the expected type
    ParseError(String),

    /// Other execution errors
    Other(String),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::PostgresError(e) => {
                write!(f, "PostgreSQL error: {}", postgres_message(e))
            }
            ExecutorError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            ExecutorError::ParseError(s) => {
                write!(f, "Parse error: {s}")
            }
            ExecutorError::Other(s) => {
                write!(f, "Execution error: {s}")
            }
        }
    }
}

impl std::error::Error for ExecutorError {}

impl From<PostgresError> for ExecutorError {
    fn from(err: PostgresError) -> Self {
        ExecutorError::PostgresError(err)
    }
}

impl ExecutorError {
    /// Server message without the driver's wrapper text
    ///
    /// This is the text the error classifier and repair collaborator see.
    pub fn message(&self) -> String {
        match self {
            ExecutorError::PostgresError(e) => postgres_message(e),
            ExecutorError::QueryError(s) | ExecutorError::ParseError(s) | ExecutorError::Other(s) => {
                s.clone()
            }
        }
    }
}

/// Database error message (`relation "x" already exists`) when the server sent one
fn postgres_message(err: &PostgresError) -> String {
    match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    }
}

/// Statement execution against a PostgreSQL target
///
/// Result rows are returned as text cells; queries that read catalog or data values cast
/// non-text columns with `::text` so one row shape serves every caller.
pub trait TargetExecutor {
    /// Execute a single statement
    ///
    /// # Arguments
    ///
    /// * `statement` - One SQL statement (no batches)
    ///
    /// # Returns
    ///
    /// Returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError` if the statement fails.
    fn execute(&self, statement: &str) -> Result<u64, ExecutorError>;

    /// Run a query and return every row as text cells (`None` for NULL)
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError` if the query fails or a cell is not text.
    fn query_rows(&self, query: &str) -> Result<Vec<Vec<Option<String>>>, ExecutorError>;

    /// Run a query returning a single integer (e.g. `SELECT COUNT(*) ...`)
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError` if the query fails or returns no parsable integer.
    fn query_count(&self, query: &str) -> Result<i64, ExecutorError> {
        let rows = self.query_rows(query)?;
        let cell = rows
            .first()
            .and_then(|r| r.first())
            .cloned()
            .flatten()
            .ok_or_else(|| ExecutorError::ParseError(format!("No value returned by: {query}")))?;
        cell.trim()
            .parse::<i64>()
            .map_err(|e| ExecutorError::ParseError(format!("Expected integer, got '{cell}': {e}")))
    }
}

/// `may_postgres` implementation of [`TargetExecutor`]
///
/// Each call is timed; with the `metrics` feature durations and failures are recorded, with the
/// `tracing` feature each statement runs inside a span.
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn observe<T>(
        &self,
        statement: &str,
        run: impl FnOnce(&Client) -> Result<T, PostgresError>,
    ) -> Result<T, ExecutorError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_statement_span(statement).entered();

        let start = Instant::now();
        let result = run(&self.client).map_err(|e| {
            #[cfg(feature = "metrics")]
            METRICS.record_statement_error();
            ExecutorError::PostgresError(e)
        });

        let duration = start.elapsed();
        #[cfg(feature = "metrics")]
        METRICS.record_statement(duration);
        log::debug!("{:.1}ms {}", duration.as_secs_f64() * 1000.0, statement);

        result
    }
}

impl TargetExecutor for MayPostgresExecutor {
    fn execute(&self, statement: &str) -> Result<u64, ExecutorError> {
        self.observe(statement, |client| client.execute(statement, &[]))
    }

    fn query_rows(&self, query: &str) -> Result<Vec<Vec<Option<String>>>, ExecutorError> {
        let rows = self.observe(query, |client| client.query(query, &[]))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                let cell: Option<String> = row
                    .try_get(i)
                    .map_err(|e| ExecutorError::ParseError(format!("Column {i}: {e}")))?;
                cells.push(cell);
            }
            out.push(cells);
        }
        Ok(out)
    }

    fn query_count(&self, query: &str) -> Result<i64, ExecutorError> {
        let row = self.observe(query, |client| client.query_one(query, &[]))?;
        row.try_get::<_, i64>(0)
            .map_err(|e| ExecutorError::ParseError(format!("Expected bigint: {e}")))
    }
}
