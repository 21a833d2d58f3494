//! View, procedure, function and trigger conversion
//!
//! Views are converted mechanically. Routines go through an optional [`SqlTranslator`] first;
//! when none is configured (or it has nothing to offer) a mechanical converter wraps the MySQL
//! body in a PL/pgSQL shell. Either way the result is only advisory: the sandbox executes it
//! and failures enter the repair loop like any other object.

use super::dialect::{backticks_to_double_quotes, strip_definer, SchemaPrefix};
use super::type_mapping::{map_type, quote_ident};
use super::{ObjectType, TransformedDdl};
use crate::repair::semantic::strip_code_fences;
use crate::schema::{Procedure, ProcedureKind, Trigger, View};
use once_cell::sync::Lazy;
use regex::Regex;

/// Request sent to an SQL translation collaborator
#[derive(Debug, Clone, Copy)]
pub struct TranslationRequest<'a> {
    pub object_type: ObjectType,
    pub object_name: &'a str,
    /// MySQL source text
    pub source_sql: &'a str,
}

/// Optional MySQL → PostgreSQL text translation collaborator
///
/// Implementations return PostgreSQL text, or `None` when they cannot translate. Responses may
/// be wrapped in code fences; the caller strips them.
pub trait SqlTranslator {
    fn translate(&self, request: &TranslationRequest<'_>) -> Option<String>;
}

static BEGIN_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bBEGIN\b").expect("static regex"));

static CHARACTERISTICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(RETURNS\s+\w+(\s*\([^)]*\))?(\s+(UNSIGNED|CHARSET\s+\w+))*|NOT\s+DETERMINISTIC|DETERMINISTIC|READS\s+SQL\s+DATA|MODIFIES\s+SQL\s+DATA|NO\s+SQL|CONTAINS\s+SQL|SQL\s+SECURITY\s+\w+|COMMENT\s+'[^']*')",
    )
    .expect("static regex")
});

static DECLARE_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*DECLARE\s+(\w+)\s+([^;]+);[ \t]*\n?").expect("static regex")
});

static SET_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^(\s*)SET\s+((?:NEW\.|OLD\.)?\w+)\s*=").expect("static regex")
});

static IFNULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bIFNULL\s*\(").expect("static regex"));

static CHARSET_INTRODUCER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)_(utf8mb4|utf8mb3|utf8|latin1|binary)'").expect("static regex")
});

/// Converts views and routines for one source database
pub struct RoutineConverter<'a> {
    prefix: &'a SchemaPrefix,
    translator: Option<&'a dyn SqlTranslator>,
}

impl<'a> RoutineConverter<'a> {
    #[must_use]
    pub fn new(prefix: &'a SchemaPrefix, translator: Option<&'a dyn SqlTranslator>) -> Self {
        Self { prefix, translator }
    }

    /// Common cleanup applied to every source text
    fn clean(&self, sql: &str) -> String {
        let stripped = strip_definer(&self.prefix.strip(sql));
        let quoted = backticks_to_double_quotes(&stripped);
        CHARSET_INTRODUCER.replace_all(&quoted, "'").into_owned()
    }

    /// `CREATE OR REPLACE VIEW "name" AS <definition>;`
    pub fn convert_view(&self, view: &View) -> TransformedDdl {
        let definition = self.clean(&view.definition);
        let definition = definition.trim().trim_end_matches(';');
        TransformedDdl::new(
            view.name.clone(),
            ObjectType::View,
            view.definition.clone(),
            format!(
                "CREATE OR REPLACE VIEW {} AS {};",
                quote_ident(&view.name),
                definition
            ),
        )
    }

    pub fn convert_procedure(&self, procedure: &Procedure) -> TransformedDdl {
        let object_type = match procedure.kind {
            ProcedureKind::Procedure => ObjectType::Procedure,
            ProcedureKind::Function => ObjectType::Function,
        };
        let target = self
            .translate(object_type, &procedure.name, &procedure.source)
            .unwrap_or_else(|| self.mechanical_procedure(procedure));
        TransformedDdl::new(
            procedure.name.clone(),
            object_type,
            procedure.source.clone(),
            target,
        )
    }

    pub fn convert_trigger(&self, trigger: &Trigger) -> TransformedDdl {
        let target = self
            .translate(ObjectType::Trigger, &trigger.name, &trigger.source)
            .unwrap_or_else(|| self.mechanical_trigger(trigger));
        TransformedDdl::new(
            trigger.name.clone(),
            ObjectType::Trigger,
            trigger.source.clone(),
            target,
        )
    }

    fn translate(&self, object_type: ObjectType, name: &str, source: &str) -> Option<String> {
        let translator = self.translator?;
        let request = TranslationRequest {
            object_type,
            object_name: name,
            source_sql: source,
        };
        match translator.translate(&request) {
            Some(text) => {
                let cleaned = strip_code_fences(&text);
                if cleaned.trim().is_empty() {
                    log::warn!("Translator returned empty text for {object_type} {name}");
                    None
                } else {
                    log::debug!("Translated {object_type} {name}");
                    Some(cleaned)
                }
            }
            None => {
                log::debug!("Translator declined {object_type} {name}, using mechanical conversion");
                None
            }
        }
    }

    fn mechanical_procedure(&self, procedure: &Procedure) -> String {
        let source = self.clean(&procedure.source);
        let (declarations, body) = split_declarations(&routine_body(&source));

        let params = procedure
            .parameters
            .iter()
            .map(|p| {
                let mode = p.mode.trim().to_uppercase();
                let mode = if procedure.kind == ProcedureKind::Function || mode.is_empty() {
                    String::new()
                } else {
                    format!("{mode} ")
                };
                format!("{}{} {}", mode, p.name, map_type(&p.data_type))
            })
            .collect::<Vec<_>>()
            .join(", ");

        let header = match procedure.kind {
            ProcedureKind::Procedure => format!(
                "CREATE OR REPLACE PROCEDURE {}({})",
                quote_ident(&procedure.name),
                params
            ),
            ProcedureKind::Function => format!(
                "CREATE OR REPLACE FUNCTION {}({}) RETURNS {}",
                quote_ident(&procedure.name),
                params,
                procedure
                    .return_type
                    .as_deref()
                    .map(map_type)
                    .unwrap_or_else(|| "VOID".to_string())
            ),
        };

        let mut sql = format!("{header}\nLANGUAGE plpgsql\nAS $$\n");
        if !declarations.is_empty() {
            sql.push_str("DECLARE\n");
            for line in &declarations {
                sql.push_str("    ");
                sql.push_str(line);
                sql.push('\n');
            }
        }
        sql.push_str(&body);
        sql.push_str("\n$$;");
        sql
    }

    fn mechanical_trigger(&self, trigger: &Trigger) -> String {
        let source = self.clean(&trigger.source);
        let inner = strip_begin_end(source.trim());
        let inner = convert_statements(inner.trim());
        let returned = if trigger.event.eq_ignore_ascii_case("DELETE") {
            "OLD"
        } else {
            "NEW"
        };
        let function = format!("{}_fn", trigger.name);

        let mut body = String::new();
        for line in inner.lines() {
            body.push_str("    ");
            body.push_str(line.trim_end());
            body.push('\n');
        }
        let body = body.trim_end();
        let terminator = if body.ends_with(';') { "" } else { ";" };

        format!(
            "CREATE OR REPLACE FUNCTION {}() RETURNS trigger\nLANGUAGE plpgsql\nAS $$\nBEGIN\n{}{}\n    RETURN {};\nEND;\n$$;\nCREATE TRIGGER {} {} {} ON {} FOR EACH ROW EXECUTE FUNCTION {}();",
            quote_ident(&function),
            body,
            terminator,
            returned,
            quote_ident(&trigger.name),
            trigger.timing.to_uppercase(),
            trigger.event.to_uppercase(),
            quote_ident(&trigger.table),
            quote_ident(&function)
        )
    }
}

/// `BEGIN ... END;` block of a routine source, or a synthesized one for single-statement bodies
fn routine_body(source: &str) -> String {
    if let Some(m) = BEGIN_KEYWORD.find(source) {
        let body = source[m.start()..].trim();
        let body = body
            .trim_end_matches(|c: char| c == ';' || c == '$' || c == '/' || c.is_whitespace());
        return format!("{};", convert_statements(body));
    }

    // No BEGIN: strip the header through the parameter list and any characteristics.
    let after_params = match matching_paren_end(source) {
        Some(end) => &source[end..],
        None => source,
    };
    let mut rest = after_params.trim().to_string();
    loop {
        let next = CHARACTERISTICS.replace(&rest, "").into_owned();
        if next == rest {
            break;
        }
        rest = next;
    }
    let statement = rest.trim().trim_end_matches(';');
    format!("BEGIN\n    {};\nEND;", convert_statements(statement))
}

/// Byte offset just past the `)` closing the first parenthesised group
fn matching_paren_end(source: &str) -> Option<usize> {
    let open = source.find('(')?;
    let mut depth = 0usize;
    for (i, c) in source[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Move `DECLARE name type [DEFAULT x];` lines out of the body into a PL/pgSQL DECLARE section
///
/// Cursor, handler and condition declarations stay where they are.
fn split_declarations(body: &str) -> (Vec<String>, String) {
    let mut declarations = Vec::new();
    let remaining = DECLARE_VAR
        .replace_all(body, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let rest = caps[2].trim();
            let upper = rest.to_ascii_uppercase();
            if upper.starts_with("CURSOR")
                || upper.contains("HANDLER")
                || upper.starts_with("CONDITION")
            {
                return caps[0].to_string();
            }
            let (ty, default) = match upper.find(" DEFAULT ") {
                Some(pos) => (&rest[..pos], Some(rest[pos + 9..].trim())),
                None => (rest, None),
            };
            let mut decl = format!("{} {}", name, map_type(ty.trim()));
            if let Some(default) = default {
                decl.push_str(" := ");
                decl.push_str(default);
            }
            decl.push(';');
            declarations.push(decl);
            String::new()
        })
        .into_owned();
    (declarations, remaining)
}

/// Body statements with `SET x = ...` turned into `x := ...` and IFNULL into COALESCE
fn convert_statements(body: &str) -> String {
    let assigned = SET_ASSIGN.replace_all(body, "$1$2 :=");
    IFNULL.replace_all(&assigned, "COALESCE(").into_owned()
}

fn strip_begin_end(source: &str) -> &str {
    if source.to_ascii_uppercase().starts_with("BEGIN") {
        let trimmed = source.trim_end().trim_end_matches(';').trim_end();
        if trimmed.len() >= 8 && trimmed.to_ascii_uppercase().ends_with("END") {
            return trimmed[5..trimmed.len() - 3].trim();
        }
    }
    source
}
