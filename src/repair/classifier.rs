//! Error classification
//!
//! Maps a PostgreSQL error message (plus the statement that produced it) to a [`FixAction`].
//! The set of mechanically fixable errors is small and known; everything else is handed to the
//! semantic repair collaborator.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

static ALREADY_EXISTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)relation "?([\w.$]+)"? already exists"#).expect("static regex")
});
static GROUP_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)column "?([\w.$]+)"? must appear in the GROUP BY clause"#)
        .expect("static regex")
});
static MISSING_RELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)relation "?([\w.$]+)"? does not exist"#).expect("static regex")
});
static NO_BTREE_OPCLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)has no default operator class for access method "?btree"?"#)
        .expect("static regex")
});
static UNSIGNED_SYNTAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)at or near "(UNSIGNED|ZEROFILL)""#).expect("static regex"));
static CREATE_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*CREATE\s+(UNIQUE\s+)?INDEX\b").expect("static regex"));
static CREATE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*CREATE\s+TABLE\b").expect("static regex"));

/// What to do about a failed statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixAction {
    /// Index name collides with another relation; rename to `idx_{table}_{column}`
    RenameDuplicateIndex { index: String },
    AddMissingGroupByColumn { column: String },
    /// Plural or misspelled relation name with a known singular table
    FixTableNameTypo { wrong: String, correct: String },
    /// B-tree cannot index the column type; use GiST
    SwitchIndexMethodToSpatial,
    /// Inline FK to a relation that does not exist yet; the ALTER pass adds it later
    RemoveCircularFkInline { relation: String },
    StripUnsigned,
    RequiresSemanticRewrite,
}

impl FixAction {
    pub fn name(&self) -> &'static str {
        match self {
            FixAction::RenameDuplicateIndex { .. } => "rename_duplicate_index",
            FixAction::AddMissingGroupByColumn { .. } => "add_missing_group_by_column",
            FixAction::FixTableNameTypo { .. } => "fix_table_name_typo",
            FixAction::SwitchIndexMethodToSpatial => "switch_index_method_to_spatial",
            FixAction::RemoveCircularFkInline { .. } => "remove_circular_fk_inline",
            FixAction::StripUnsigned => "strip_unsigned",
            FixAction::RequiresSemanticRewrite => "requires_semantic_rewrite",
        }
    }

    pub fn is_deterministic(&self) -> bool {
        !matches!(self, FixAction::RequiresSemanticRewrite)
    }
}

impl fmt::Display for FixAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classifies errors against the set of known target tables
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    known_tables: HashSet<String>,
}

impl ErrorClassifier {
    pub fn new<I, S>(known_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            known_tables: known_tables
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn classify(&self, error: &str, statement: &str) -> FixAction {
        if let Some(c) = ALREADY_EXISTS.captures(error) {
            if CREATE_INDEX.is_match(statement) {
                return FixAction::RenameDuplicateIndex {
                    index: c[1].to_string(),
                };
            }
        }
        if let Some(c) = GROUP_BY.captures(error) {
            return FixAction::AddMissingGroupByColumn {
                column: c[1].to_string(),
            };
        }
        if NO_BTREE_OPCLASS.is_match(error) && CREATE_INDEX.is_match(statement) {
            return FixAction::SwitchIndexMethodToSpatial;
        }
        if UNSIGNED_SYNTAX.is_match(error) {
            return FixAction::StripUnsigned;
        }
        if let Some(c) = MISSING_RELATION.captures(error) {
            let relation = c[1].to_string();
            if let Some(correct) = self.singular_table(&relation) {
                return FixAction::FixTableNameTypo {
                    wrong: relation,
                    correct,
                };
            }
            if CREATE_TABLE.is_match(statement) && statement.to_uppercase().contains("REFERENCES") {
                return FixAction::RemoveCircularFkInline { relation };
            }
        }
        FixAction::RequiresSemanticRewrite
    }

    /// Known table `name` most likely meant, if `name` itself is unknown
    fn singular_table(&self, name: &str) -> Option<String> {
        let lower = name.to_lowercase();
        if self.known_tables.contains(&lower) {
            return None;
        }
        singular_candidates(&lower)
            .into_iter()
            .find(|c| self.known_tables.contains(c))
    }
}

fn singular_candidates(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(stem) = name.strip_suffix("ies") {
        out.push(format!("{stem}y"));
    }
    if let Some(stem) = name.strip_suffix("es") {
        out.push(stem.to_string());
    }
    if let Some(stem) = name.strip_suffix('s') {
        out.push(stem.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(["staff", "payment", "customer", "rental", "inventory", "address"])
    }

    #[test]
    fn test_duplicate_index() {
        let action = classifier().classify(
            "relation \"idx_fk_customer_id\" already exists",
            "CREATE INDEX \"idx_fk_customer_id\" ON \"rental\" (\"customer_id\")",
        );
        assert_eq!(
            action,
            FixAction::RenameDuplicateIndex {
                index: "idx_fk_customer_id".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_table_is_not_an_index_fix() {
        let action = classifier().classify(
            "relation \"staff\" already exists",
            "CREATE TABLE \"staff\" (\"id\" INTEGER)",
        );
        assert_eq!(action, FixAction::RequiresSemanticRewrite);
    }

    #[test]
    fn test_group_by() {
        let action = classifier().classify(
            "column \"m.first_name\" must appear in the GROUP BY clause or be used in an aggregate function",
            "CREATE VIEW v AS SELECT m.first_name, COUNT(*) FROM staff m GROUP BY m.staff_id",
        );
        assert_eq!(
            action,
            FixAction::AddMissingGroupByColumn {
                column: "m.first_name".to_string()
            }
        );
    }

    #[test]
    fn test_plural_table_names() {
        let c = classifier();
        for (wrong, correct) in [
            ("staffs", "staff"),
            ("payments", "payment"),
            ("customers", "customer"),
            ("rentals", "rental"),
            ("inventories", "inventory"),
            ("addresses", "address"),
        ] {
            assert_eq!(
                c.classify(&format!("relation \"{wrong}\" does not exist"), "SELECT 1"),
                FixAction::FixTableNameTypo {
                    wrong: wrong.to_string(),
                    correct: correct.to_string()
                }
            );
        }
    }

    #[test]
    fn test_missing_fk_target_in_create_table() {
        let action = classifier().classify(
            "relation \"store\" does not exist",
            "CREATE TABLE \"staff\" (\"store_id\" INTEGER REFERENCES \"store\" (\"store_id\"))",
        );
        assert_eq!(
            action,
            FixAction::RemoveCircularFkInline {
                relation: "store".to_string()
            }
        );
    }

    #[test]
    fn test_spatial_and_unsigned() {
        let c = classifier();
        assert_eq!(
            c.classify(
                "data type point has no default operator class for access method \"btree\"",
                "CREATE INDEX \"idx_address_location\" ON \"address\" (\"location\")"
            ),
            FixAction::SwitchIndexMethodToSpatial
        );
        assert_eq!(
            c.classify("syntax error at or near \"UNSIGNED\"", "CREATE TABLE t (a INTEGER UNSIGNED)"),
            FixAction::StripUnsigned
        );
    }

    #[test]
    fn test_unknown_error_is_semantic() {
        let action = classifier().classify(
            "function result type must be integer because of OUT parameters",
            "CREATE FUNCTION f() RETURNS void AS $$ BEGIN END $$ LANGUAGE plpgsql",
        );
        assert_eq!(action, FixAction::RequiresSemanticRewrite);
        assert!(!action.is_deterministic());
    }
}
