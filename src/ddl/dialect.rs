//! Mechanical MySQL → PostgreSQL text cleanups
//!
//! Pure string rewrites shared by view/routine conversion and the sandbox's fast fixer.
//! None of these parse SQL; they only remove or translate tokens that have no meaning in the
//! target dialect.

use once_cell::sync::Lazy;
use regex::Regex;

static UNSIGNED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(UNSIGNED|ZEROFILL)\b").expect("static regex")
});

static ENGINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*ENGINE\s*=\s*\w+").expect("static regex")
});

static DEFINER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*DEFINER\s*=\s*(`[^`]*`|'[^']*'|\S+?)@(`[^`]*`|'[^']*'|\S+)")
        .expect("static regex")
});

static TABLE_OPTIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(DEFAULT\s+)?(CHARSET|CHARACTER\s+SET|COLLATE)\s*=?\s*\w+")
        .expect("static regex")
});

/// Replace MySQL backtick quoting with standard double quotes
pub fn backticks_to_double_quotes(sql: &str) -> String {
    sql.replace('`', "\"")
}

/// Remove `UNSIGNED` / `ZEROFILL` qualifiers
pub fn strip_unsigned(sql: &str) -> String {
    UNSIGNED.replace_all(sql, "").into_owned()
}

/// Remove `ENGINE=...` storage-engine clauses
pub fn strip_engine(sql: &str) -> String {
    ENGINE.replace_all(sql, "").into_owned()
}

/// Remove `DEFINER=user@host` clauses from routine/view/trigger sources
pub fn strip_definer(sql: &str) -> String {
    DEFINER.replace_all(sql, "").into_owned()
}

/// Remove `DEFAULT CHARSET=...`, `CHARACTER SET ...` and `COLLATE=...` table options
pub fn strip_table_options(sql: &str) -> String {
    TABLE_OPTIONS.replace_all(sql, "").into_owned()
}

/// Strips `db.` qualifiers (bare, backticked or double-quoted) for one source database
#[derive(Debug, Clone)]
pub struct SchemaPrefix {
    pattern: Option<Regex>,
}

impl SchemaPrefix {
    /// Build a stripper for `database`; an empty name strips nothing
    pub fn new(database: &str) -> Self {
        if database.is_empty() {
            return Self { pattern: None };
        }
        let escaped = regex::escape(database);
        let pattern = Regex::new(&format!(r#"(?i)(`{escaped}`|"{escaped}"|\b{escaped}\b)\."#)).ok();
        Self { pattern }
    }

    pub fn strip(&self, sql: &str) -> String {
        match &self.pattern {
            Some(re) => re.replace_all(sql, "").into_owned(),
            None => sql.to_string(),
        }
    }
}
