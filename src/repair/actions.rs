//! Deterministic statement rewrites, one per [`FixAction`]
//!
//! Each returns `None` when the rewrite does not apply or would leave the statement unchanged,
//! which escalates the failure to the semantic collaborator.

use super::classifier::FixAction;
use crate::ddl::dialect::strip_unsigned;
use crate::ddl::generator::index_name;
use crate::ddl::type_mapping::quote_ident;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static INDEX_PARTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^(\s*CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?)("[^"]+"|\S+)(\s+ON\s+)("[^"]+"|[^\s(]+)(\s*(?:USING\s+\w+\s*)?\(\s*)("[^"]+"|[^\s,)]+)"#,
    )
    .expect("static regex")
});
static GROUP_BY_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(\bGROUP\s+BY\s+)(.+?)(\s+HAVING\b|\s+ORDER\s+BY\b|\s+LIMIT\b|\s*\)|\s*;|\s*$)")
        .expect("static regex")
});
static INDEX_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)(\bON\s+(?:"[^"]+"|[^\s(]+)\s*)(?:USING\s+\w+\s*)?\("#).expect("static regex")
});
static UNIQUE_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\s*CREATE\s+)UNIQUE\s+").expect("static regex"));
const FK_ACTIONS: &str =
    r"(?:\s+ON\s+(?:DELETE|UPDATE)\s+(?:CASCADE|RESTRICT|SET\s+NULL|SET\s+DEFAULT|NO\s+ACTION))*";

fn unquote(ident: &str) -> &str {
    ident.trim_matches('"')
}

/// Apply `action` to `statement`
///
/// `taken_names` are index and relation names already used in the target (for renames).
pub fn apply(action: &FixAction, statement: &str, taken_names: &HashSet<String>) -> Option<String> {
    let fixed = match action {
        FixAction::RenameDuplicateIndex { index } => {
            rename_duplicate_index(statement, index, taken_names)
        }
        FixAction::AddMissingGroupByColumn { column } => add_group_by_column(statement, column),
        FixAction::FixTableNameTypo { wrong, correct } => {
            Some(replace_relation(statement, wrong, correct))
        }
        FixAction::SwitchIndexMethodToSpatial => switch_to_gist(statement),
        FixAction::RemoveCircularFkInline { relation } => remove_inline_fk(statement, relation),
        FixAction::StripUnsigned => Some(strip_unsigned(statement)),
        FixAction::RequiresSemanticRewrite => None,
    }?;
    (fixed != statement).then_some(fixed)
}

/// Rename to `idx_{table}_{firstcolumn}`, suffixed when that is taken too
pub fn rename_duplicate_index(
    statement: &str,
    current: &str,
    taken_names: &HashSet<String>,
) -> Option<String> {
    let caps = INDEX_PARTS.captures(statement)?;
    let table = unquote(&caps[4]);
    let column = unquote(&caps[6]);
    let mut taken = taken_names.clone();
    taken.insert(current.to_string());
    taken.insert(unquote(&caps[2]).to_string());
    let name = index_name(table, column, &taken);

    let whole = caps.get(2)?;
    Some(format!(
        "{}{}{}",
        &statement[..whole.start()],
        quote_ident(&name),
        &statement[whole.end()..]
    ))
}

/// Append `column` to the first `GROUP BY` list
pub fn add_group_by_column(statement: &str, column: &str) -> Option<String> {
    let caps = GROUP_BY_LIST.captures(statement)?;
    let list = caps.get(2)?;
    let already = list
        .as_str()
        .split(',')
        .any(|c| c.trim().eq_ignore_ascii_case(column));
    if already {
        return None;
    }
    Some(format!(
        "{}, {}{}",
        &statement[..list.end()],
        column,
        &statement[list.end()..]
    ))
}

/// Replace every whole-word occurrence of relation `wrong` with `correct`
pub fn replace_relation(statement: &str, wrong: &str, correct: &str) -> String {
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(wrong))) {
        Ok(re) => re.replace_all(statement, correct).into_owned(),
        Err(_) => statement.to_string(),
    }
}

/// `CREATE INDEX ... ON t USING GIST (...)`; GiST indexes are never UNIQUE
pub fn switch_to_gist(statement: &str) -> Option<String> {
    if !INDEX_TARGET.is_match(statement) {
        return None;
    }
    let gist = INDEX_TARGET.replace(statement, "${1}USING GIST (");
    Some(UNIQUE_INDEX.replace(&gist, "${1}").into_owned())
}

/// Strip inline `FOREIGN KEY ... REFERENCES relation` and column-level `REFERENCES relation`
pub fn remove_inline_fk(statement: &str, relation: &str) -> Option<String> {
    let rel = format!(r#"(?:"{0}"|\b{0}\b)"#, regex::escape(relation));
    let table_level = Regex::new(&format!(
        r"(?is),\s*(?:CONSTRAINT\s+(?:\x22[^\x22]+\x22|\w+)\s+)?FOREIGN\s+KEY\s*\([^)]*\)\s*REFERENCES\s+{rel}\s*(?:\([^)]*\))?{FK_ACTIONS}"
    ))
    .ok()?;
    let column_level = Regex::new(&format!(
        r"(?is)\s+REFERENCES\s+{rel}\s*(?:\([^)]*\))?{FK_ACTIONS}"
    ))
    .ok()?;
    let without_table_level = table_level.replace_all(statement, "");
    Some(column_level.replace_all(&without_table_level, "").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_duplicate_index() {
        let taken = HashSet::new();
        let fixed = apply(
            &FixAction::RenameDuplicateIndex {
                index: "idx_fk_customer_id".to_string(),
            },
            "CREATE INDEX \"idx_fk_customer_id\" ON \"rental\" (\"customer_id\")",
            &taken,
        );
        assert_eq!(
            fixed.as_deref(),
            Some("CREATE INDEX \"idx_rental_customer_id\" ON \"rental\" (\"customer_id\")")
        );
    }

    #[test]
    fn test_rename_suffixes_when_canonical_name_taken() {
        let taken: HashSet<String> = ["idx_rental_customer_id".to_string()].into();
        let fixed = rename_duplicate_index(
            "CREATE UNIQUE INDEX \"idx_rental_customer_id\" ON \"rental\" (\"customer_id\", \"rental_date\")",
            "idx_rental_customer_id",
            &taken,
        );
        assert_eq!(
            fixed.as_deref(),
            Some("CREATE UNIQUE INDEX \"idx_rental_customer_id_2\" ON \"rental\" (\"customer_id\", \"rental_date\")")
        );
    }

    #[test]
    fn test_add_group_by_column() {
        assert_eq!(
            add_group_by_column(
                "SELECT m.staff_id, m.first_name, COUNT(*) FROM staff m GROUP BY m.staff_id ORDER BY 1",
                "m.first_name"
            )
            .as_deref(),
            Some("SELECT m.staff_id, m.first_name, COUNT(*) FROM staff m GROUP BY m.staff_id, m.first_name ORDER BY 1")
        );
        assert_eq!(
            add_group_by_column("SELECT a, COUNT(*) FROM t GROUP BY a;", "b").as_deref(),
            Some("SELECT a, COUNT(*) FROM t GROUP BY a, b;")
        );
        assert_eq!(add_group_by_column("SELECT a FROM t GROUP BY a", "a"), None);
        assert_eq!(add_group_by_column("SELECT 1", "a"), None);
    }

    #[test]
    fn test_fix_table_name_typo() {
        let fixed = apply(
            &FixAction::FixTableNameTypo {
                wrong: "staffs".to_string(),
                correct: "staff".to_string(),
            },
            "SELECT s.* FROM \"staffs\" s JOIN staffs_extra e ON TRUE",
            &HashSet::new(),
        );
        assert_eq!(
            fixed.as_deref(),
            Some("SELECT s.* FROM \"staff\" s JOIN staffs_extra e ON TRUE")
        );
    }

    #[test]
    fn test_switch_to_gist() {
        assert_eq!(
            switch_to_gist("CREATE UNIQUE INDEX \"idx_address_location\" ON \"address\" (\"location\")")
                .as_deref(),
            Some("CREATE INDEX \"idx_address_location\" ON \"address\" USING GIST (\"location\")")
        );
        assert_eq!(
            switch_to_gist("CREATE INDEX \"i\" ON \"a\" USING btree (\"p\")").as_deref(),
            Some("CREATE INDEX \"i\" ON \"a\" USING GIST (\"p\")")
        );
    }

    #[test]
    fn test_remove_inline_fk() {
        let fixed = remove_inline_fk(
            "CREATE TABLE \"staff\" (\n    \"id\" INTEGER,\n    \"store_id\" INTEGER REFERENCES \"store\" (\"store_id\") ON DELETE CASCADE,\n    \"address_id\" INTEGER,\n    CONSTRAINT \"fk_staff_store\" FOREIGN KEY (\"store_id\") REFERENCES \"store\" (\"store_id\") ON UPDATE CASCADE\n);",
            "store",
        );
        assert_eq!(
            fixed.as_deref(),
            Some("CREATE TABLE \"staff\" (\n    \"id\" INTEGER,\n    \"store_id\" INTEGER,\n    \"address_id\" INTEGER\n);")
        );
    }

    #[test]
    fn test_unchanged_is_none() {
        assert_eq!(
            apply(&FixAction::StripUnsigned, "CREATE TABLE t (a INTEGER)", &HashSet::new()),
            None
        );
        assert_eq!(
            apply(&FixAction::RequiresSemanticRewrite, "SELECT 1", &HashSet::new()),
            None
        );
    }
}
