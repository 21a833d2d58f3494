//! Row values and per-column type transforms
//!
//! Source rows arrive as [`SqlValue`]s. Before insertion each value passes through the
//! [`ColumnTransform`] chosen for its column's source type:
//!
//! | source type                         | transform                                   |
//! |-------------------------------------|---------------------------------------------|
//! | `tinyint(1)`, `bit(1)`, `bool`      | integer/byte → boolean                      |
//! | `bit(n)`                            | bytes → big-endian integer (bit string)     |
//! | blob family, `binary`, `varbinary`  | raw bytes                                   |
//! | `set(...)`                          | comma-separated string → text array         |
//! | spatial                             | WKB → `(x, y)` point literal, else NULL     |
//! | `date`, `datetime`, `timestamp`     | zero date → NULL                            |
//! | `decimal`, `numeric`                | text → exact decimal                        |
//! | character types, `json`             | bytes → UTF-8 text, NUL characters removed  |
//!
//! Conversions that have to discard a value substitute NULL and report a warning; they never
//! fail the batch.

use super::wkb::decode_point;
use crate::schema::{base_type_name, is_spatial_type, Column};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    TextArray(Vec<String>),
    /// Fixed-width bit string
    Bits { value: u64, width: u32 },
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// Value transform selected once per column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTransform {
    Boolean,
    Bits(u32),
    Binary,
    Set,
    Spatial,
    Temporal,
    Decimal,
    Text,
    Passthrough,
}

/// Transformed value plus an optional conversion warning
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub value: SqlValue,
    pub warning: Option<String>,
}

impl Transformed {
    fn ok(value: SqlValue) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    fn null_with(warning: impl Into<String>) -> Self {
        Self {
            value: SqlValue::Null,
            warning: Some(warning.into()),
        }
    }
}

impl ColumnTransform {
    /// Choose the transform for a source column
    pub fn for_column(column: &Column) -> Self {
        let lower = column.type_lower();
        let base = base_type_name(&lower);
        let width = lower
            .find('(')
            .and_then(|open| lower[open + 1..].split(')').next())
            .and_then(|n| n.trim().parse::<u32>().ok());

        match base.as_str() {
            "tinyint" if width == Some(1) => ColumnTransform::Boolean,
            "bool" | "boolean" => ColumnTransform::Boolean,
            "bit" => match width {
                None | Some(1) => ColumnTransform::Boolean,
                Some(n) => ColumnTransform::Bits(n),
            },
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                ColumnTransform::Binary
            }
            "set" => ColumnTransform::Set,
            "date" | "datetime" | "timestamp" => ColumnTransform::Temporal,
            "decimal" | "numeric" | "dec" | "fixed" => ColumnTransform::Decimal,
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "enum"
            | "json" => ColumnTransform::Text,
            _ if is_spatial_type(&lower) => ColumnTransform::Spatial,
            _ => ColumnTransform::Passthrough,
        }
    }

    /// Apply the transform to one value
    pub fn apply(&self, value: SqlValue) -> Transformed {
        if value.is_null() {
            return Transformed::ok(SqlValue::Null);
        }
        match self {
            ColumnTransform::Boolean => to_bool(value),
            ColumnTransform::Bits(width) => to_bits(value, *width),
            ColumnTransform::Binary => Transformed::ok(match value {
                SqlValue::Text(s) => SqlValue::Bytes(s.into_bytes()),
                other => other,
            }),
            ColumnTransform::Set => Transformed::ok(match value {
                SqlValue::Text(s) => SqlValue::TextArray(split_set(&s)),
                SqlValue::Bytes(b) => SqlValue::TextArray(split_set(&String::from_utf8_lossy(&b))),
                other => other,
            }),
            ColumnTransform::Spatial => match value {
                SqlValue::Bytes(b) => match decode_point(&b) {
                    Some(point) => Transformed::ok(SqlValue::Text(point)),
                    None => Transformed::null_with(format!(
                        "Malformed geometry value ({} bytes) replaced with NULL",
                        b.len()
                    )),
                },
                SqlValue::Text(s) if s.starts_with('(') => Transformed::ok(SqlValue::Text(s)),
                SqlValue::Text(s) => match decode_point(s.as_bytes()) {
                    Some(point) => Transformed::ok(SqlValue::Text(point)),
                    None => Transformed::null_with("Malformed geometry value replaced with NULL"),
                },
                _ => Transformed::null_with("Unsupported geometry value replaced with NULL"),
            },
            ColumnTransform::Temporal => match value {
                SqlValue::Text(s) if s.starts_with("0000-00-00") => {
                    Transformed::null_with(format!("Zero date '{s}' replaced with NULL"))
                }
                SqlValue::Bytes(b) if b.starts_with(b"0000-00-00") => Transformed::null_with(
                    format!("Zero date '{}' replaced with NULL", String::from_utf8_lossy(&b)),
                ),
                SqlValue::Bytes(b) => Transformed::ok(SqlValue::Text(
                    String::from_utf8_lossy(&b).into_owned(),
                )),
                other => Transformed::ok(other),
            },
            ColumnTransform::Decimal => match value {
                SqlValue::Text(s) => match Decimal::from_str(s.trim()) {
                    Ok(d) => Transformed::ok(SqlValue::Decimal(d)),
                    Err(_) => Transformed::ok(SqlValue::Text(s)),
                },
                SqlValue::Bytes(b) => {
                    let s = String::from_utf8_lossy(&b).into_owned();
                    match Decimal::from_str(s.trim()) {
                        Ok(d) => Transformed::ok(SqlValue::Decimal(d)),
                        Err(_) => Transformed::ok(SqlValue::Text(s)),
                    }
                }
                other => Transformed::ok(other),
            },
            ColumnTransform::Text => match value {
                SqlValue::Text(s) => Transformed::ok(SqlValue::Text(strip_nul(s))),
                SqlValue::Bytes(b) => Transformed::ok(SqlValue::Text(strip_nul(
                    String::from_utf8_lossy(&b).into_owned(),
                ))),
                other => Transformed::ok(other),
            },
            ColumnTransform::Passthrough => match value {
                SqlValue::Text(s) => Transformed::ok(SqlValue::Text(strip_nul(s))),
                other => Transformed::ok(other),
            },
        }
    }
}

fn to_bool(value: SqlValue) -> Transformed {
    match value {
        SqlValue::Bool(b) => Transformed::ok(SqlValue::Bool(b)),
        SqlValue::Int(i) => Transformed::ok(SqlValue::Bool(i != 0)),
        SqlValue::UInt(u) => Transformed::ok(SqlValue::Bool(u != 0)),
        SqlValue::Bytes(b) => Transformed::ok(SqlValue::Bool(b.iter().any(|&x| x != 0))),
        SqlValue::Text(s) => match s.trim() {
            "0" | "false" | "FALSE" => Transformed::ok(SqlValue::Bool(false)),
            "1" | "true" | "TRUE" => Transformed::ok(SqlValue::Bool(true)),
            other => match other.parse::<i64>() {
                Ok(i) => Transformed::ok(SqlValue::Bool(i != 0)),
                Err(_) => Transformed::null_with(format!("Non-boolean value '{other}' replaced with NULL")),
            },
        },
        other => Transformed::null_with(format!("Non-boolean value {other:?} replaced with NULL")),
    }
}

fn to_bits(value: SqlValue, width: u32) -> Transformed {
    let bits = match value {
        SqlValue::Bytes(b) => {
            if b.len() > 8 {
                return Transformed::null_with(format!("BIT value of {} bytes replaced with NULL", b.len()));
            }
            bytes_to_u64(&b)
        }
        SqlValue::UInt(u) => u,
        SqlValue::Int(i) => i as u64,
        SqlValue::Bits { value, .. } => value,
        other => {
            return Transformed::null_with(format!("Non-bit value {other:?} replaced with NULL"));
        }
    };
    Transformed::ok(SqlValue::Bits { value: bits, width })
}

/// Big-endian unsigned integer from up to 8 bytes
pub fn bytes_to_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// MySQL SET value (`a,b,c`) to its members; an empty string is the empty set
pub fn split_set(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(',').map(str::to_string).collect()
}

fn strip_nul(s: String) -> String {
    if s.contains('\0') {
        s.replace('\0', "")
    } else {
        s
    }
}
