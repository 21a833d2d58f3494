//! Statement builders for data transfer
//!
//! Built with sea-query and rendered inline (values embedded) because target statements go
//! through [`TargetExecutor::execute`](crate::executor::TargetExecutor::execute) as plain text.

use super::value::SqlValue;
use crate::ddl::type_mapping::quote_literal;
use sea_query::{
    Alias, Expr, MysqlQueryBuilder, Order, PostgresQueryBuilder, Query,
};

/// One page of a source table
#[derive(Debug, Clone)]
pub struct BatchRequest<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    /// Stable ordering for offset pagination (primary key); empty for none
    pub order_by: &'a [String],
    pub limit: usize,
    pub offset: u64,
}

/// `SELECT cols FROM `t` [ORDER BY pk] LIMIT n OFFSET o` in MySQL syntax
pub fn select_batch_sql(request: &BatchRequest<'_>) -> String {
    let mut query = Query::select();
    query
        .columns(request.columns.iter().map(Alias::new))
        .from(Alias::new(request.table));
    for column in request.order_by {
        query.order_by(Alias::new(column), Order::Asc);
    }
    query
        .limit(request.limit as u64)
        .offset(request.offset)
        .to_string(MysqlQueryBuilder)
}

/// `SELECT COUNT(*) FROM `t`` in MySQL syntax
pub fn source_count_sql(table: &str) -> String {
    Query::select()
        .expr(Expr::cust("COUNT(*)"))
        .from(Alias::new(table))
        .to_string(MysqlQueryBuilder)
}

/// `SELECT COUNT(*) FROM "t"` in PostgreSQL syntax
pub fn target_count_sql(table: &str) -> String {
    Query::select()
        .expr(Expr::cust("COUNT(*)"))
        .from(Alias::new(table))
        .to_string(PostgresQueryBuilder)
}

/// `DELETE FROM "t"`
///
/// Deliberately not `TRUNCATE ... CASCADE`: with FK enforcement disabled a cascading truncate
/// would empty tables migrated earlier in the run.
pub fn delete_all_sql(table: &str) -> String {
    Query::delete()
        .from_table(Alias::new(table))
        .to_string(PostgresQueryBuilder)
}

/// Multi-row `INSERT INTO "t" (cols) VALUES (...), (...)`
///
/// # Errors
///
/// Returns an error string when a row's width does not match `columns`.
pub fn insert_batch_sql(
    table: &str,
    columns: &[String],
    rows: &[Vec<SqlValue>],
) -> Result<String, String> {
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table))
        .columns(columns.iter().map(Alias::new));

    for (i, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(format!(
                "Row {} has {} values for {} columns",
                i,
                row.len(),
                columns.len()
            ));
        }
        let exprs: Vec<Expr> = row.iter().map(value_expr).collect();
        stmt.values(exprs)
            .map_err(|e| format!("Failed to build insert for {}: {}", table, e))?;
    }

    Ok(stmt.to_string(PostgresQueryBuilder))
}

fn value_expr(value: &SqlValue) -> Expr {
    match value {
        SqlValue::Null => Expr::cust("NULL"),
        SqlValue::Bool(b) => Expr::val(*b),
        SqlValue::Int(i) => Expr::val(*i),
        SqlValue::UInt(u) => Expr::val(*u),
        SqlValue::Float(f) if f.is_nan() => Expr::cust("'NaN'::float8"),
        SqlValue::Float(f) if f.is_infinite() => Expr::cust(if *f > 0.0 {
            "'Infinity'::float8"
        } else {
            "'-Infinity'::float8"
        }),
        SqlValue::Float(f) => Expr::val(*f),
        SqlValue::Decimal(d) => Expr::val(*d),
        SqlValue::Text(s) => Expr::val(s.clone()),
        SqlValue::Bytes(b) => Expr::val(b.clone()),
        SqlValue::Date(d) => Expr::val(*d),
        SqlValue::DateTime(dt) => Expr::val(*dt),
        SqlValue::TextArray(items) => {
            if items.is_empty() {
                Expr::cust("'{}'::text[]")
            } else {
                let list = items
                    .iter()
                    .map(|s| quote_literal(s))
                    .collect::<Vec<_>>()
                    .join(", ");
                Expr::cust(format!("ARRAY[{list}]::text[]"))
            }
        }
        SqlValue::Bits { value, width } => {
            let width = (*width).max(1) as usize;
            Expr::cust(format!("B'{:0width$b}'", value, width = width))
        }
    }
}

/// `SELECT setval(...)` statements realigning serial sequences with the migrated data
pub fn sequence_columns_sql(table: &str) -> String {
    format!(
        "SELECT column_name::text, pg_get_serial_sequence({}, column_name::text)::text \
         FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = {} AND column_default LIKE 'nextval%'",
        quote_literal(&crate::ddl::type_mapping::quote_ident(table)),
        quote_literal(table)
    )
}

/// `SELECT setval('seq', COALESCE((SELECT MAX("col") FROM "t"), 1))`
pub fn setval_sql(sequence: &str, table: &str, column: &str) -> String {
    format!(
        "SELECT setval({}, COALESCE((SELECT MAX({}) FROM {}), 1))::text",
        quote_literal(sequence),
        crate::ddl::type_mapping::quote_ident(column),
        crate::ddl::type_mapping::quote_ident(table)
    )
}
