//! Inline deterministic fixer
//!
//! Tried once, inline, when a statement fails: strips source schema prefixes, `UNSIGNED`,
//! storage-engine clauses and translates backtick quoting. Most cross-dialect failures are
//! one of these and never need to reach the repair loop.

use crate::ddl::dialect::{backticks_to_double_quotes, strip_engine, strip_unsigned, SchemaPrefix};

#[derive(Debug, Clone)]
pub struct DeterministicFixer {
    prefix: SchemaPrefix,
}

impl DeterministicFixer {
    #[must_use]
    pub fn new(source_database: &str) -> Self {
        Self {
            prefix: SchemaPrefix::new(source_database),
        }
    }

    /// Cleaned statement, or `None` when there was nothing to clean
    pub fn fix(&self, statement: &str) -> Option<String> {
        let fixed = self.prefix.strip(statement);
        let fixed = strip_unsigned(&fixed);
        let fixed = backticks_to_double_quotes(&fixed);
        let fixed = strip_engine(&fixed);
        (fixed != statement).then_some(fixed)
    }
}
