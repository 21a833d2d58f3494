//! Per-object execution state

use crate::ddl::ObjectType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of one sandbox object
///
/// ```text
/// pending ──▶ running ──▶ success
///                │
///                ▼
///             failed ──▶ retrying ──▶ running
/// ```
///
/// Every pass starts from a freshly reset target, so `success` and `failed` objects return to
/// `pending` at the start of the next pass unless they were repaired (`retrying`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Pending,
    Running,
    Success,
    Failed,
    Retrying,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Pending => "pending",
            ObjectState::Running => "running",
            ObjectState::Success => "success",
            ObjectState::Failed => "failed",
            ObjectState::Retrying => "retrying",
        }
    }

    pub fn can_transition(self, to: ObjectState) -> bool {
        use ObjectState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Success)
                | (Running, Failed)
                | (Failed, Retrying)
                | (Retrying, Running)
                | (Success, Pending)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one object in one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectOutcome {
    pub name: String,
    pub object_type: ObjectType,
    pub state: ObjectState,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Succeeded only after the inline deterministic fix
    pub fixed_inline: bool,
}

/// Outcome of one sandbox pass
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SandboxResult {
    /// 1-based pass number
    pub pass: u32,
    pub objects_dropped: usize,
    pub outcomes: Vec<ObjectOutcome>,
    pub duration_ms: u64,
}

impl SandboxResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == ObjectState::Success)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ObjectOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == ObjectState::Failed)
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }
}
