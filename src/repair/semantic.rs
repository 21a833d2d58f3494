//! Semantic repair collaborator seam
//!
//! A [`SemanticRepair`] implementation (typically backed by a language model) receives the
//! failing statement, the error, the object and its foreign-key context, and answers with a
//! replacement statement or nothing. Its answer is never trusted: the repair loop re-runs the
//! sandbox with it.

use crate::ddl::ObjectType;
use std::fmt;
use std::time::Duration;

/// Input to the collaborator
#[derive(Debug, Clone, Copy)]
pub struct RepairRequest<'a> {
    pub statement: &'a str,
    pub error: &'a str,
    pub object_type: ObjectType,
    pub object_name: &'a str,
    /// Summary of the FK relationships around the object's table
    pub fk_context: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairError {
    /// Worth retrying (rate limit, timeout)
    Transient(String),
    Fatal(String),
}

impl fmt::Display for RepairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairError::Transient(s) => write!(f, "Transient repair error: {s}"),
            RepairError::Fatal(s) => write!(f, "Repair error: {s}"),
        }
    }
}

impl std::error::Error for RepairError {}

pub trait SemanticRepair {
    /// Replacement statement, or `Ok(None)` for "no change possible"
    ///
    /// # Errors
    ///
    /// Returns `RepairError::Transient` for failures the caller may retry.
    fn repair(&self, request: &RepairRequest<'_>) -> Result<Option<String>, RepairError>;
}

/// Collaborator that never proposes a change
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRepair;

impl SemanticRepair for NoopRepair {
    fn repair(&self, _request: &RepairRequest<'_>) -> Result<Option<String>, RepairError> {
        Ok(None)
    }
}

/// Retry/backoff for transient collaborator failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

/// Ask `collaborator`, retrying transient failures, and clean the answer
///
/// Returns `None` for "no change", an empty answer, an answer identical to the input, or when
/// retries run out.
pub fn request_repair(
    collaborator: &dyn SemanticRepair,
    request: &RepairRequest<'_>,
    policy: RetryPolicy,
) -> Option<String> {
    let mut backoff = policy.initial_backoff;
    for attempt in 1..=policy.max_attempts.max(1) {
        match collaborator.repair(request) {
            Ok(Some(text)) => {
                let cleaned = strip_code_fences(&text);
                let unchanged = cleaned.trim_end_matches(';').trim()
                    == request.statement.trim().trim_end_matches(';').trim();
                if cleaned.trim_end_matches(';').trim().is_empty() || unchanged {
                    return None;
                }
                return Some(cleaned);
            }
            Ok(None) => return None,
            Err(RepairError::Transient(e)) if attempt < policy.max_attempts => {
                log::warn!(
                    "Semantic repair of {} failed (attempt {}/{}): {}; retrying in {:?}",
                    request.object_name,
                    attempt,
                    policy.max_attempts,
                    e,
                    backoff
                );
                std::thread::sleep(backoff);
                backoff *= policy.multiplier;
            }
            Err(e) => {
                log::error!("Semantic repair of {} failed: {}", request.object_name, e);
                return None;
            }
        }
    }
    None
}

/// Strip surrounding Markdown code fences and ensure a trailing `;`
pub fn strip_code_fences(text: &str) -> String {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop the info string (```sql)
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    let body = body.trim();
    if body.is_empty() || body.ends_with(';') {
        body.to_string()
    } else {
        format!("{body};")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Flaky {
        failures: Cell<u32>,
        answer: &'static str,
    }

    impl SemanticRepair for Flaky {
        fn repair(&self, _request: &RepairRequest<'_>) -> Result<Option<String>, RepairError> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(RepairError::Transient("429 rate limited".to_string()));
            }
            Ok(Some(self.answer.to_string()))
        }
    }

    fn request() -> RepairRequest<'static> {
        RepairRequest {
            statement: "CREATE VIEW v AS SELECT 1",
            error: "boom",
            object_type: ObjectType::View,
            object_name: "v",
            fk_context: "",
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            multiplier: 2,
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```sql\nCREATE TRIGGER x;\n```"),
            "CREATE TRIGGER x;"
        );
        assert_eq!(strip_code_fences("  SELECT 1  "), "SELECT 1;");
        assert_eq!(strip_code_fences("```\nSELECT 2\n```\n"), "SELECT 2;");
        assert_eq!(strip_code_fences(""), "");
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let collaborator = Flaky {
            failures: Cell::new(2),
            answer: "```sql\nCREATE VIEW v AS SELECT 2\n```",
        };
        assert_eq!(
            request_repair(&collaborator, &request(), fast()).as_deref(),
            Some("CREATE VIEW v AS SELECT 2;")
        );
    }

    #[test]
    fn test_retries_exhausted() {
        let collaborator = Flaky {
            failures: Cell::new(5),
            answer: "SELECT 2",
        };
        assert_eq!(request_repair(&collaborator, &request(), fast()), None);
        assert_eq!(collaborator.failures.get(), 2);
    }

    #[test]
    fn test_unchanged_answer_is_no_change() {
        let collaborator = Flaky {
            failures: Cell::new(0),
            answer: "CREATE VIEW v AS SELECT 1;",
        };
        assert_eq!(request_repair(&collaborator, &request(), fast()), None);
        assert_eq!(request_repair(&NoopRepair, &request(), fast()), None);
    }
}
