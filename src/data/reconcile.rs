//! Row-count reconciliation

use super::sql::target_count_sql;
use crate::executor::TargetExecutor;
use crate::source::SourceReader;
use serde::{Deserialize, Serialize};

/// Source vs target `COUNT(*)` for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountCheck {
    pub table: String,
    pub source_count: Option<u64>,
    pub target_count: Option<u64>,
    pub matched: bool,
    /// Why a count could not be taken
    pub error: Option<String>,
}

/// Compare row counts for every table in `tables`
///
/// Counting failures are recorded on the check (never matched), not returned.
pub fn reconcile(
    source: &dyn SourceReader,
    target: &dyn TargetExecutor,
    tables: &[String],
) -> Vec<RowCountCheck> {
    tables
        .iter()
        .map(|table| {
            let source_count = source.count_rows(table);
            let target_count = target
                .query_count(&target_count_sql(table))
                .map(|n| n.max(0) as u64);

            let error = match (&source_count, &target_count) {
                (Err(e), _) => Some(e.to_string()),
                (_, Err(e)) => Some(e.to_string()),
                _ => None,
            };
            let source_count = source_count.ok();
            let target_count = target_count.ok();
            let matched = error.is_none() && source_count == target_count;

            if matched {
                log::info!("✓ {}: {} rows", table, source_count.unwrap_or(0));
            } else {
                log::warn!(
                    "✗ {}: source={:?} target={:?}{}",
                    table,
                    source_count,
                    target_count,
                    error.as_deref().map(|e| format!(" ({e})")).unwrap_or_default()
                );
            }

            RowCountCheck {
                table: table.clone(),
                source_count,
                target_count,
                matched,
                error,
            }
        })
        .collect()
}

/// Reconciliation as CSV (`table,source_count,target_count,matched,error`)
///
/// # Errors
///
/// Returns an error string if a record cannot be written.
pub fn reconciliation_csv(checks: &[RowCountCheck]) -> Result<String, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for check in checks {
        writer
            .serialize(check)
            .map_err(|e| format!("Failed to write reconciliation row: {}", e))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| format!("Failed to flush reconciliation CSV: {}", e))?;
    String::from_utf8(bytes).map_err(|e| format!("Reconciliation CSV is not UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciliation_csv() {
        let checks = vec![
            RowCountCheck {
                table: "actor".to_string(),
                source_count: Some(200),
                target_count: Some(200),
                matched: true,
                error: None,
            },
            RowCountCheck {
                table: "film".to_string(),
                source_count: Some(1000),
                target_count: None,
                matched: false,
                error: Some("relation \"film\" does not exist".to_string()),
            },
        ];
        let csv = reconciliation_csv(&checks).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("table,source_count,target_count,matched,error")
        );
        assert_eq!(lines.next(), Some("actor,200,200,true,"));
        assert_eq!(
            lines.next(),
            Some("film,1000,,false,\"relation \"\"film\"\" does not exist\"")
        );
    }
}
