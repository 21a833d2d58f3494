//! In-memory target for tests
//!
//! [`MemoryTarget`] implements [`TargetExecutor`] well enough to drive the sandbox runner, the
//! data mover and the validator without a database: it tracks table names and row counts,
//! records every statement, and can be told to fail statements or answer catalog queries.

use crate::executor::{ExecutorError, TargetExecutor};
use std::cell::RefCell;
use std::collections::BTreeMap;

struct Failure {
    pattern: String,
    error: String,
    /// `None` fails forever
    remaining: Option<u32>,
}

/// Scriptable [`TargetExecutor`]
#[derive(Default)]
pub struct MemoryTarget {
    tables: RefCell<BTreeMap<String, u64>>,
    statements: RefCell<Vec<String>>,
    failures: RefCell<Vec<Failure>>,
    responses: Vec<(String, Vec<Vec<Option<String>>>)>,
}

impl MemoryTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create empty tables
    #[must_use]
    pub fn with_tables<I, S>(self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut map = self.tables.borrow_mut();
            for table in tables {
                map.insert(table.into(), 0);
            }
        }
        self
    }

    /// Every statement containing `pattern` fails with `error`
    #[must_use]
    pub fn fail_when(self, pattern: &str, error: &str) -> Self {
        self.failures.borrow_mut().push(Failure {
            pattern: pattern.to_string(),
            error: error.to_string(),
            remaining: None,
        });
        self
    }

    /// The first `times` statements containing `pattern` fail with `error`
    #[must_use]
    pub fn fail_times(self, pattern: &str, error: &str, times: u32) -> Self {
        self.failures.borrow_mut().push(Failure {
            pattern: pattern.to_string(),
            error: error.to_string(),
            remaining: Some(times),
        });
        self
    }

    /// Queries containing `pattern` return `rows`
    #[must_use]
    pub fn respond(mut self, pattern: &str, rows: Vec<Vec<Option<String>>>) -> Self {
        self.responses.push((pattern.to_string(), rows));
        self
    }

    /// Every statement and query seen, in order
    pub fn statements(&self) -> Vec<String> {
        self.statements.borrow().clone()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.borrow().keys().cloned().collect()
    }

    pub fn row_count(&self, table: &str) -> Option<u64> {
        self.tables.borrow().get(table).copied()
    }

    fn check(&self, sql: &str) -> Result<(), ExecutorError> {
        self.statements.borrow_mut().push(sql.to_string());
        let mut failures = self.failures.borrow_mut();
        for failure in failures.iter_mut() {
            if !sql.contains(&failure.pattern) {
                continue;
            }
            match &mut failure.remaining {
                None => return Err(ExecutorError::QueryError(failure.error.clone())),
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    return Err(ExecutorError::QueryError(failure.error.clone()));
                }
            }
        }
        Ok(())
    }
}

/// First double-quoted identifier following `keyword`
fn quoted_after(sql: &str, keyword: &str) -> Option<String> {
    let rest = &sql[sql.find(keyword)? + keyword.len()..];
    let start = rest.find('"')? + 1;
    let end = rest[start..].find('"')? + start;
    Some(rest[start..end].to_string())
}

impl TargetExecutor for MemoryTarget {
    fn execute(&self, statement: &str) -> Result<u64, ExecutorError> {
        self.check(statement)?;
        let mut tables = self.tables.borrow_mut();

        if statement.starts_with("CREATE TABLE") {
            if let Some(name) = quoted_after(statement, "CREATE TABLE") {
                if tables.contains_key(&name) {
                    return Err(ExecutorError::QueryError(format!(
                        "relation \"{name}\" already exists"
                    )));
                }
                tables.insert(name, 0);
            }
        } else if statement.starts_with("DROP TABLE") {
            if let Some(name) = quoted_after(statement, "DROP TABLE") {
                tables.remove(&name);
            }
        } else if statement.starts_with("DELETE FROM") {
            if let Some(name) = quoted_after(statement, "DELETE FROM") {
                return match tables.get_mut(&name) {
                    Some(count) => Ok(std::mem::take(count)),
                    None => Err(ExecutorError::QueryError(format!(
                        "relation \"{name}\" does not exist"
                    ))),
                };
            }
        } else if statement.starts_with("INSERT INTO") {
            if let Some(name) = quoted_after(statement, "INSERT INTO") {
                let rows = statement.matches("), (").count() as u64 + 1;
                return match tables.get_mut(&name) {
                    Some(count) => {
                        *count += rows;
                        Ok(rows)
                    }
                    None => Err(ExecutorError::QueryError(format!(
                        "relation \"{name}\" does not exist"
                    ))),
                };
            }
        }
        Ok(0)
    }

    fn query_rows(&self, query: &str) -> Result<Vec<Vec<Option<String>>>, ExecutorError> {
        self.check(query)?;
        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| query.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn query_count(&self, query: &str) -> Result<i64, ExecutorError> {
        self.check(query)?;
        let name = quoted_after(query, "FROM")
            .ok_or_else(|| ExecutorError::ParseError(format!("No table in: {query}")))?;
        self.tables
            .borrow()
            .get(&name)
            .map(|n| *n as i64)
            .ok_or_else(|| ExecutorError::QueryError(format!("relation \"{name}\" does not exist")))
    }
}
