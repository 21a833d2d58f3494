//! MySQL to PostgreSQL column type mapping
//!
//! The mapping is a finite table keyed on the lower-cased base type name:
//!
//! - `tinyint(1)`, `bool`, `boolean`, `bit(1)` → `BOOLEAN`
//! - `tinyint` → `SMALLINT`
//! - `smallint` → `SMALLINT` (`UNSIGNED` → `INTEGER`)
//! - `mediumint` → `INTEGER`
//! - `int`, `integer` → `INTEGER` (`UNSIGNED` → `BIGINT`)
//! - `bigint` → `BIGINT` (`UNSIGNED` → `NUMERIC(20)`)
//! - `float` → `REAL`, `double`, `real` → `DOUBLE PRECISION`
//! - `decimal(p,s)`, `numeric(p,s)` → `NUMERIC(p,s)`
//! - `char(n)`, `varchar(n)` → kept
//! - `tinytext`, `text`, `mediumtext`, `longtext` → `TEXT`
//! - blob family, `binary`, `varbinary` → `BYTEA`
//! - `date` → `DATE`, `datetime`, `timestamp` → `TIMESTAMP`, `time` → `TIME`
//! - `year` → `SMALLINT`
//! - `json` → `JSONB`
//! - `enum(...)` → `TEXT` plus `CHECK (col IN (...))`
//! - `set(...)` → `TEXT[]`
//! - `bit(n)` → `BIT(n)`
//! - spatial types → `POINT`
//!
//! Anything else passes through upper-cased with `UNSIGNED`/`ZEROFILL` removed.
//! AUTO_INCREMENT integer columns become `SERIAL` (`BIGSERIAL` when the mapped type is 64-bit).

use crate::schema::{base_type_name, Column};

/// Result of mapping a single column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedColumn {
    /// Target type, e.g. `INTEGER`, `VARCHAR(45)`, `SERIAL`
    pub sql_type: String,

    /// Column-level CHECK expression (ENUM emulation)
    pub check: Option<String>,

    /// Normalized default expression in target syntax
    pub default: Option<String>,
}

/// Map a source column to its target type, check and default
pub fn map_column(column: &Column) -> MappedColumn {
    let base_sql = map_type(&column.source_type);
    let sql_type = if column.auto_increment {
        serial_for(&base_sql).unwrap_or_else(|| base_sql.clone())
    } else {
        base_sql.clone()
    };

    let check = if base_type_name(&column.source_type) == "enum" {
        let values = type_arguments(&column.source_type)
            .map(parse_quoted_list)
            .unwrap_or_default();
        enum_check(&column.name, &values)
    } else {
        None
    };

    let default = if column.auto_increment {
        None
    } else {
        column
            .default
            .as_deref()
            .and_then(|raw| normalize_default(raw, &base_sql))
    };

    MappedColumn {
        sql_type,
        check,
        default,
    }
}

/// Map a source type string to the target type
///
/// # Examples
///
/// ```
/// use lifeport::ddl::type_mapping::map_type;
///
/// assert_eq!(map_type("tinyint(1)"), "BOOLEAN");
/// assert_eq!(map_type("int(10) unsigned"), "BIGINT");
/// assert_eq!(map_type("varchar(45)"), "VARCHAR(45)");
/// ```
pub fn map_type(source_type: &str) -> String {
    let lower = source_type.trim().to_lowercase();
    let base = base_type_name(&lower);
    let unsigned = lower.contains("unsigned");
    let args = type_arguments(&lower);

    match base.as_str() {
        "tinyint" => {
            if args == Some("1") {
                "BOOLEAN".to_string()
            } else {
                "SMALLINT".to_string()
            }
        }
        "bool" | "boolean" => "BOOLEAN".to_string(),
        "smallint" => {
            if unsigned {
                "INTEGER".to_string()
            } else {
                "SMALLINT".to_string()
            }
        }
        "mediumint" => "INTEGER".to_string(),
        "int" | "integer" => {
            if unsigned {
                "BIGINT".to_string()
            } else {
                "INTEGER".to_string()
            }
        }
        "bigint" => {
            if unsigned {
                "NUMERIC(20)".to_string()
            } else {
                "BIGINT".to_string()
            }
        }
        "float" => "REAL".to_string(),
        "double" | "real" => "DOUBLE PRECISION".to_string(),
        "decimal" | "numeric" | "dec" | "fixed" => match args {
            Some(a) => format!("NUMERIC({})", a.replace(' ', "")),
            None => "NUMERIC".to_string(),
        },
        "char" => match args {
            Some(n) => format!("CHAR({n})"),
            None => "CHAR(1)".to_string(),
        },
        "varchar" => match args {
            Some(n) => format!("VARCHAR({n})"),
            None => "VARCHAR".to_string(),
        },
        "tinytext" | "text" | "mediumtext" | "longtext" => "TEXT".to_string(),
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            "BYTEA".to_string()
        }
        "date" => "DATE".to_string(),
        "datetime" | "timestamp" => "TIMESTAMP".to_string(),
        "time" => "TIME".to_string(),
        "year" => "SMALLINT".to_string(),
        "json" => "JSONB".to_string(),
        "enum" => "TEXT".to_string(),
        "set" => "TEXT[]".to_string(),
        "bit" => match args {
            None | Some("1") => "BOOLEAN".to_string(),
            Some(n) => format!("BIT({n})"),
        },
        _ if crate::schema::is_spatial_type(&lower) => "POINT".to_string(),
        _ => passthrough(source_type),
    }
}

/// Serial pseudo-type for an auto-increment column of the given mapped type
fn serial_for(mapped: &str) -> Option<String> {
    match mapped {
        "SMALLINT" | "INTEGER" => Some("SERIAL".to_string()),
        "BIGINT" | "NUMERIC(20)" => Some("BIGSERIAL".to_string()),
        _ => None,
    }
}

fn passthrough(source_type: &str) -> String {
    source_type
        .to_uppercase()
        .replace(" UNSIGNED", "")
        .replace(" ZEROFILL", "")
        .trim()
        .to_string()
}

/// Text between the first `(` and its matching `)`, if any
fn type_arguments(source_type: &str) -> Option<&str> {
    let open = source_type.find('(')?;
    let close = source_type.rfind(')')?;
    if close <= open {
        return None;
    }
    Some(source_type[open + 1..close].trim())
}

/// Parse `'a','b c','it''s'` into its unquoted values
pub fn parse_quoted_list(list: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = list.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if in_quote => {
                if chars.peek() == Some(&'\'') {
                    current.push('\'');
                    chars.next();
                } else {
                    in_quote = false;
                    values.push(std::mem::take(&mut current));
                }
            }
            '\'' => in_quote = true,
            '\\' if in_quote => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            _ if in_quote => current.push(c),
            _ => {}
        }
    }
    values
}

fn enum_check(column: &str, values: &[String]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let list = values
        .iter()
        .map(|v| quote_literal(v))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("{} IN ({})", quote_ident(column), list))
}

/// Normalize a source default into target syntax for a column of `mapped_type`
///
/// Returns `None` when the default should be dropped (explicit NULL, zero dates).
pub fn normalize_default(raw: &str, mapped_type: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() && mapped_type != "TEXT" && !mapped_type.starts_with("VARCHAR") {
        return None;
    }

    let upper = trimmed.to_uppercase();
    if upper == "NULL" {
        return None;
    }

    // CURRENT_TIMESTAMP, CURRENT_TIMESTAMP(6), NOW(), with or without ON UPDATE ...
    let without_on_update = match upper.find("ON UPDATE") {
        Some(pos) => upper[..pos].trim(),
        None => upper.as_str(),
    };
    if without_on_update.starts_with("CURRENT_TIMESTAMP") || without_on_update == "NOW()" {
        return Some("CURRENT_TIMESTAMP".to_string());
    }
    if without_on_update == "CURRENT_DATE" || without_on_update == "CURDATE()" {
        return Some("CURRENT_DATE".to_string());
    }

    let literal = unquote(trimmed);
    if literal.starts_with("0000-00-00") {
        return None;
    }

    match mapped_type {
        "BOOLEAN" => match literal.as_str() {
            "0" | "b'0'" | "false" | "FALSE" => Some("FALSE".to_string()),
            "1" | "b'1'" | "true" | "TRUE" => Some("TRUE".to_string()),
            _ => None,
        },
        "SMALLINT" | "INTEGER" | "BIGINT" | "REAL" | "DOUBLE PRECISION" => {
            if literal.parse::<f64>().is_ok() {
                Some(literal)
            } else {
                None
            }
        }
        t if t.starts_with("NUMERIC") => {
            if literal.parse::<f64>().is_ok() {
                Some(literal)
            } else {
                None
            }
        }
        t if t.starts_with("BIT(") => {
            let bits = literal
                .trim_start_matches("b'")
                .trim_start_matches("B'")
                .trim_end_matches('\'');
            Some(format!("B'{bits}'"))
        }
        "TEXT[]" => {
            let items: Vec<&str> = literal.split(',').filter(|s| !s.is_empty()).collect();
            Some(format!("'{{{}}}'", items.join(",").replace('\'', "''")))
        }
        _ => Some(quote_literal(&literal)),
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        value[1..value.len() - 1].replace("''", "'")
    } else {
        value.to_string()
    }
}

/// Quote an identifier for the target dialect
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for the target dialect
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Sanitize a name for use inside a generated constraint or index identifier
pub fn sanitize_identifier(name: &str) -> String {
    name.replace(['-', '.', ' '], "_").to_lowercase()
}
