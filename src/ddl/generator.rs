//! Two-pass DDL generator
//!
//! Pass 1 emits one `CREATE TABLE` per table with columns, primary key and CHECK constraints.
//! It never emits `FOREIGN KEY` clauses or `CREATE INDEX` statements.
//!
//! Pass 2 emits two batch artifacts:
//! - [`INDEXES_OBJECT`]: one `CREATE [UNIQUE] INDEX` per source index, renamed to
//!   `idx_{table}_{firstcolumn}` because index names are schema-global in PostgreSQL
//!   and per-table in MySQL. Spatial columns force `USING GIST`.
//! - [`DEFERRED_FKS_OBJECT`]: one `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY` for every
//!   foreign key in the schema, circular or not.
//!
//! A pass with nothing to emit produces no artifact. Output depends only on the schema model and
//! the supplied table order, so regenerating from an unchanged model is byte-identical.

use super::dialect::{backticks_to_double_quotes, SchemaPrefix};
use super::routines::{RoutineConverter, SqlTranslator};
use super::split::join_statements;
use super::type_mapping::{map_column, quote_ident, sanitize_identifier};
use super::{ObjectType, TransformedDdl};
use crate::schema::{Column, SchemaModel, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write;

/// Object name of the index batch artifact
pub const INDEXES_OBJECT: &str = "_indexes";

/// Object name of the foreign key batch artifact
pub const DEFERRED_FKS_OBJECT: &str = "_deferred_fks";

/// Everything generated for one schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDdl {
    /// One `CREATE TABLE` per table, in the order supplied to the generator
    pub tables: Vec<TransformedDdl>,

    /// Index batch (absent when no table has indexes)
    pub indexes: Option<TransformedDdl>,

    /// Foreign key batch (absent when no table has foreign keys)
    pub foreign_keys: Option<TransformedDdl>,

    pub views: Vec<TransformedDdl>,

    /// Procedures, functions and triggers
    pub routines: Vec<TransformedDdl>,
}

impl GeneratedDdl {
    /// All artifacts in execution order: tables, indexes, foreign keys, views, routines
    pub fn artifacts(&self) -> Vec<&TransformedDdl> {
        let mut out: Vec<&TransformedDdl> = self.tables.iter().collect();
        out.extend(self.indexes.iter());
        out.extend(self.foreign_keys.iter());
        out.extend(self.views.iter());
        let mut routines: Vec<&TransformedDdl> = self.routines.iter().collect();
        routines.sort_by_key(|r| r.object_type.stage());
        out.extend(routines);
        out
    }

    /// Table, index, constraint and view artifacts
    pub fn schema_artifacts(&self) -> Vec<&TransformedDdl> {
        self.artifacts()
            .into_iter()
            .filter(|a| a.object_type.stage() <= ObjectType::View.stage())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generates target DDL from a source schema
pub struct DdlGenerator<'a> {
    schema: &'a SchemaModel,
    prefix: SchemaPrefix,
    translator: Option<&'a dyn SqlTranslator>,
}

impl<'a> DdlGenerator<'a> {
    #[must_use]
    pub fn new(schema: &'a SchemaModel) -> Self {
        Self {
            schema,
            prefix: SchemaPrefix::new(&schema.database),
            translator: None,
        }
    }

    /// Use `translator` for procedures, functions and triggers
    #[must_use]
    pub fn with_translator(mut self, translator: &'a dyn SqlTranslator) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Generate every artifact
    ///
    /// # Arguments
    ///
    /// * `table_order` - Table names in migration order. Tables missing from the list are
    ///   appended in introspection order.
    ///
    /// # Errors
    ///
    /// Returns an error string if writing SQL text fails.
    pub fn generate(&self, table_order: &[String]) -> Result<GeneratedDdl, String> {
        let tables = self.ordered_tables(table_order);

        let mut out = GeneratedDdl::default();
        for table in &tables {
            out.tables.push(TransformedDdl::new(
                table.name.clone(),
                ObjectType::Table,
                source_create_table(table)?,
                create_table_sql(table)?,
            ));
        }
        out.indexes = index_batch(&tables)?;
        out.foreign_keys = foreign_key_batch(&tables)?;

        let converter = RoutineConverter::new(&self.prefix, self.translator);
        out.views = self
            .schema
            .views
            .iter()
            .map(|v| converter.convert_view(v))
            .collect();
        for procedure in &self.schema.procedures {
            out.routines.push(converter.convert_procedure(procedure));
        }
        for trigger in &self.schema.triggers {
            out.routines.push(converter.convert_trigger(trigger));
        }

        log::info!(
            "Generated DDL: {} tables, {} index statements, {} foreign keys, {} views, {} routines",
            out.tables.len(),
            out.indexes.as_ref().map(|b| b.statements().len()).unwrap_or(0),
            out.foreign_keys.as_ref().map(|b| b.statements().len()).unwrap_or(0),
            out.views.len(),
            out.routines.len()
        );

        Ok(out)
    }

    fn ordered_tables(&self, table_order: &[String]) -> Vec<&'a Table> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out = Vec::with_capacity(self.schema.tables.len());
        for name in table_order {
            if let Some(table) = self.schema.table(name) {
                if seen.insert(table.name.as_str()) {
                    out.push(table);
                }
            }
        }
        for table in &self.schema.tables {
            if seen.insert(table.name.as_str()) {
                out.push(table);
            }
        }
        out
    }
}

/// Pass-1 `CREATE TABLE` statement
///
/// # Errors
///
/// Returns an error string if writing SQL text fails.
pub fn create_table_sql(table: &Table) -> Result<String, String> {
    let mut sql = String::new();
    let table_key = sanitize_identifier(&table.name);
    let mut lines: Vec<String> = Vec::new();
    let mut checks: Vec<String> = Vec::new();

    for column in &table.columns {
        lines.push(column_definition(column));
        let mapped = map_column(column);
        if let Some(check) = mapped.check {
            checks.push(format!(
                "    CONSTRAINT {} CHECK ({})",
                quote_ident(&format!("chk_{}_{}", table_key, sanitize_identifier(&column.name))),
                check
            ));
        }
    }

    if !table.primary_key.is_empty() {
        lines.push(format!("    PRIMARY KEY ({})", quoted_list(&table.primary_key)));
    }

    lines.extend(checks);
    for check in &table.checks {
        lines.push(format!(
            "    CONSTRAINT {} CHECK ({})",
            quote_ident(&check.name),
            backticks_to_double_quotes(&check.expression)
        ));
    }

    writeln!(sql, "CREATE TABLE {} (", quote_ident(&table.name))
        .map_err(|e| format!("Failed to write SQL: {}", e))?;
    writeln!(sql, "{}", lines.join(",\n")).map_err(|e| format!("Failed to write SQL: {}", e))?;
    write!(sql, ");").map_err(|e| format!("Failed to write SQL: {}", e))?;

    Ok(sql)
}

fn column_definition(column: &Column) -> String {
    let mapped = map_column(column);
    let mut def = format!("    {} {}", quote_ident(&column.name), mapped.sql_type);
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = mapped.default {
        def.push_str(" DEFAULT ");
        def.push_str(&default);
    }
    def
}

/// Index name for a table's index: `idx_{table}_{firstcolumn}`, suffixed `_n` when taken
///
/// Table and column names are embedded as-is; the name is always quoted, so case and
/// punctuation keep distinct tables apart.
pub fn index_name(table: &str, first_column: &str, taken: &HashSet<String>) -> String {
    let base = format!("idx_{}_{}", table, first_column);
    if !taken.contains(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn index_batch(tables: &[&Table]) -> Result<Option<TransformedDdl>, String> {
    let mut statements = Vec::new();
    let mut source = String::new();
    let mut taken: HashSet<String> = HashSet::new();

    for table in tables {
        for index in &table.indexes {
            let Some(first) = index.columns.first() else {
                log::warn!("Skipping index {} on {}: no columns", index.name, table.name);
                continue;
            };
            let spatial = index
                .columns
                .iter()
                .filter_map(|c| table.find_column(c))
                .any(Column::is_spatial);
            let name = index_name(&table.name, first, &taken);
            taken.insert(name.clone());

            // GiST has no uniqueness support; spatial unique indexes become plain GiST.
            let unique = if index.unique && !spatial { "UNIQUE " } else { "" };
            let method = if spatial { "USING GIST " } else { "" };
            statements.push(format!(
                "CREATE {}INDEX {} ON {} {}({})",
                unique,
                quote_ident(&name),
                quote_ident(&table.name),
                method,
                quoted_list(&index.columns)
            ));
            writeln!(
                source,
                "{}.{} ({}){}",
                table.name,
                index.name,
                index.columns.join(", "),
                if index.unique { " UNIQUE" } else { "" }
            )
            .map_err(|e| format!("Failed to write SQL: {}", e))?;
        }
    }

    if statements.is_empty() {
        return Ok(None);
    }
    Ok(Some(TransformedDdl::new(
        INDEXES_OBJECT,
        ObjectType::Index,
        source.trim_end(),
        join_statements(&statements),
    )))
}

fn foreign_key_batch(tables: &[&Table]) -> Result<Option<TransformedDdl>, String> {
    let mut statements = Vec::new();
    let mut source = String::new();

    for table in tables {
        let mut taken: HashSet<String> = HashSet::new();
        for fk in &table.foreign_keys {
            let base = sanitize_identifier(&fk.constraint_name(&table.name));
            let mut name = base.clone();
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{base}_{n}");
                n += 1;
            }

            statements.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&table.name),
                quote_ident(&name),
                quoted_list(&fk.columns),
                quote_ident(&fk.referenced_table),
                quoted_list(&fk.referenced_columns)
            ));
            writeln!(
                source,
                "{}({}) -> {}({}){}",
                table.name,
                fk.columns.join(", "),
                fk.referenced_table,
                fk.referenced_columns.join(", "),
                if fk.is_deferred { " [circular]" } else { "" }
            )
            .map_err(|e| format!("Failed to write SQL: {}", e))?;
        }
    }

    if statements.is_empty() {
        return Ok(None);
    }
    Ok(Some(TransformedDdl::new(
        DEFERRED_FKS_OBJECT,
        ObjectType::Constraint,
        source.trim_end(),
        join_statements(&statements),
    )))
}

/// Source-dialect `CREATE TABLE` reconstructed from the model (audit and repair context)
///
/// # Errors
///
/// Returns an error string if writing SQL text fails.
pub fn source_create_table(table: &Table) -> Result<String, String> {
    let mut lines: Vec<String> = Vec::new();
    for column in &table.columns {
        let mut def = format!("  `{}` {}", column.name, column.source_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            def.push_str(&format!(" DEFAULT {default}"));
        }
        if column.auto_increment {
            def.push_str(" AUTO_INCREMENT");
        }
        lines.push(def);
    }
    if !table.primary_key.is_empty() {
        lines.push(format!("  PRIMARY KEY ({})", backtick_list(&table.primary_key)));
    }
    for index in &table.indexes {
        lines.push(format!(
            "  {}KEY `{}` ({})",
            if index.unique { "UNIQUE " } else { "" },
            index.name,
            backtick_list(&index.columns)
        ));
    }
    for fk in &table.foreign_keys {
        lines.push(format!(
            "  CONSTRAINT `{}` FOREIGN KEY ({}) REFERENCES `{}` ({})",
            fk.constraint_name(&table.name),
            backtick_list(&fk.columns),
            fk.referenced_table,
            backtick_list(&fk.referenced_columns)
        ));
    }

    let mut sql = String::new();
    writeln!(sql, "CREATE TABLE `{}` (", table.name)
        .map_err(|e| format!("Failed to write SQL: {}", e))?;
    writeln!(sql, "{}", lines.join(",\n")).map_err(|e| format!("Failed to write SQL: {}", e))?;
    write!(sql, ")").map_err(|e| format!("Failed to write SQL: {}", e))?;
    Ok(sql)
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn backtick_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("`{n}`"))
        .collect::<Vec<_>>()
        .join(", ")
}
