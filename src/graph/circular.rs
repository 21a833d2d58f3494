//! Circular foreign key detection
//!
//! A pair of tables is circular when each one declares a foreign key referencing the other
//! (e.g. `staff.store_id → store` and `store.manager_staff_id → staff`). Such pairs cannot be
//! created with inline constraints in any order, so their FKs are flagged as deferred.
//! Self-references are not pairs and are ignored here.

use crate::schema::Table;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Unordered pair of table names, stored in sorted order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TablePair(pub String, pub String);

impl TablePair {
    /// Build the canonical (sorted) pair for two table names
    #[must_use]
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            TablePair(a.to_string(), b.to_string())
        } else {
            TablePair(b.to_string(), a.to_string())
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.0 == table || self.1 == table
    }
}

/// Set of circular table pairs with symmetric lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularFkSet {
    pairs: BTreeSet<TablePair>,
}

impl CircularFkSet {
    /// Detect all mutually-referencing table pairs
    pub fn detect(tables: &[Table]) -> Self {
        let mut adjacency: HashMap<&str, HashSet<&str>> = HashMap::new();
        for table in tables {
            let refs = adjacency.entry(table.name.as_str()).or_default();
            for fk in &table.foreign_keys {
                if fk.referenced_table != table.name {
                    refs.insert(fk.referenced_table.as_str());
                }
            }
        }

        let mut pairs = BTreeSet::new();
        for (from, targets) in &adjacency {
            for to in targets {
                let reverse = adjacency
                    .get(to)
                    .map(|back| back.contains(from))
                    .unwrap_or(false);
                if reverse {
                    pairs.insert(TablePair::new(from, to));
                }
            }
        }

        if !pairs.is_empty() {
            log::info!("Detected {} circular foreign key pair(s)", pairs.len());
        }

        Self { pairs }
    }

    /// True when `a` and `b` reference each other; order of arguments does not matter
    pub fn is_circular(&self, a: &str, b: &str) -> bool {
        self.pairs.contains(&TablePair::new(a, b))
    }

    /// True when `table` is part of any circular pair
    pub fn involves(&self, table: &str) -> bool {
        self.pairs.iter().any(|p| p.contains(table))
    }

    /// Pairs in canonical sorted order
    pub fn pairs(&self) -> impl Iterator<Item = &TablePair> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Flag every FK that participates in a circular pair as deferred
    ///
    /// Returns the number of FKs flagged.
    pub fn mark_deferred(&self, tables: &mut [Table]) -> usize {
        let mut flagged = 0;
        for table in tables.iter_mut() {
            let name = table.name.clone();
            for fk in &mut table.foreign_keys {
                if self.is_circular(&name, &fk.referenced_table) {
                    fk.is_deferred = true;
                    flagged += 1;
                }
            }
        }
        flagged
    }
}
