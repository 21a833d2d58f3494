//! Pipeline errors and the run-scoped error list
//!
//! Stage-level failures are [`PipelineError`]s. Anything a stage recovers from (or decides to
//! carry forward) is recorded as a [`RunError`] tagged with the [`Phase`] it happened in, so the
//! final report can list errors per phase and category.

use crate::artifacts::ArtifactError;
use crate::connection::ConnectionError;
use crate::executor::ExecutorError;
use crate::source::SourceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialized,
    Introspection,
    DependencyAnalysis,
    SchemaTransformation,
    LogicConversion,
    SandboxTesting,
    Validation,
    DataMigration,
    ProductionDeploy,
    Reporting,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialized => "initialized",
            Phase::Introspection => "introspection",
            Phase::DependencyAnalysis => "dependency_analysis",
            Phase::SchemaTransformation => "schema_transformation",
            Phase::LogicConversion => "logic_conversion",
            Phase::SandboxTesting => "sandbox_testing",
            Phase::Validation => "validation",
            Phase::DataMigration => "data_migration",
            Phase::ProductionDeploy => "production_deploy",
            Phase::Reporting => "reporting",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Fatal to the current stage
    Connection,
    /// Duplicate identifier, wrong index method, missing relation, type mismatch
    StructuralDdl,
    /// Resolved structurally by deferral; informational
    CircularDependency,
    /// Value replaced by NULL during transfer
    TypeConversion,
    RowCountMismatch,
    /// Objects still failing after the last repair cycle
    RepairExhausted,
    Validation,
    Artifact,
    Data,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::StructuralDdl => "structural_ddl",
            ErrorKind::CircularDependency => "circular_dependency",
            ErrorKind::TypeConversion => "type_conversion",
            ErrorKind::RowCountMismatch => "row_count_mismatch",
            ErrorKind::RepairExhausted => "repair_exhausted",
            ErrorKind::Validation => "validation",
            ErrorKind::Artifact => "artifact",
            ErrorKind::Data => "data",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub phase: Phase,
    pub error_type: ErrorKind,
    pub message: String,
    /// Object the error concerns (table, index, view...), if any
    pub object: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RunError {
    #[must_use]
    pub fn new(phase: Phase, error_type: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            phase,
            error_type,
            message: message.into(),
            object: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn for_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.object {
            Some(object) => write!(
                f,
                "[{}/{}] {}: {}",
                self.phase, self.error_type, object, self.message
            ),
            None => write!(f, "[{}/{}] {}", self.phase, self.error_type, self.message),
        }
    }
}

/// Stage-level error
#[derive(Debug)]
pub enum PipelineError {
    Connection { phase: Phase, source: ConnectionError },
    Executor { phase: Phase, source: ExecutorError },
    Source { phase: Phase, source: SourceError },
    Artifact(ArtifactError),
    /// Generation or precondition failure with a message
    Stage { phase: Phase, message: String },
}

impl PipelineError {
    pub fn phase(&self) -> Phase {
        match self {
            PipelineError::Connection { phase, .. }
            | PipelineError::Executor { phase, .. }
            | PipelineError::Source { phase, .. }
            | PipelineError::Stage { phase, .. } => *phase,
            PipelineError::Artifact(_) => Phase::Reporting,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Connection { .. } => ErrorKind::Connection,
            PipelineError::Source { source, .. } if source.is_connection() => ErrorKind::Connection,
            PipelineError::Artifact(_) => ErrorKind::Artifact,
            PipelineError::Executor { .. } | PipelineError::Source { .. } => ErrorKind::Data,
            PipelineError::Stage { .. } => ErrorKind::StructuralDdl,
        }
    }

    pub fn stage(phase: Phase, message: impl Into<String>) -> Self {
        PipelineError::Stage {
            phase,
            message: message.into(),
        }
    }

    /// Record form of this error
    pub fn to_run_error(&self) -> RunError {
        RunError::new(self.phase(), self.kind(), self.to_string())
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Connection { phase, source } => {
                write!(f, "{} failed: {}", phase, source)
            }
            PipelineError::Executor { phase, source } => write!(f, "{} failed: {}", phase, source),
            PipelineError::Source { phase, source } => write!(f, "{} failed: {}", phase, source),
            PipelineError::Artifact(e) => write!(f, "Artifact error: {}", e),
            PipelineError::Stage { phase, message } => write!(f, "{} failed: {}", phase, message),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Connection { source, .. } => Some(source),
            PipelineError::Executor { source, .. } => Some(source),
            PipelineError::Source { source, .. } => Some(source),
            PipelineError::Artifact(e) => Some(e),
            PipelineError::Stage { .. } => None,
        }
    }
}

impl From<ArtifactError> for PipelineError {
    fn from(err: ArtifactError) -> Self {
        PipelineError::Artifact(err)
    }
}
