//! Run-scoped state: identifier, timing, recorded errors and progress reporting

use crate::ddl::ObjectType;
use crate::error::{ErrorKind, Phase, RunError};
use crate::sandbox::ObjectState;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use uuid::Uuid;

/// Progress notification published while a run executes
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PhaseStarted(Phase),
    PhaseFinished { phase: Phase, ok: bool },
    ObjectExecuted {
        name: String,
        object_type: ObjectType,
        state: ObjectState,
    },
    TableMigrated { table: String, rows: u64, ok: bool },
    RepairCycle { attempt: u32, failures: usize },
}

/// Optional progress publisher
///
/// Sending never blocks the pipeline: a disconnected receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    sender: Option<Sender<ProgressEvent>>,
}

impl Progress {
    /// Progress reporting switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Publish on `sender`
    #[must_use]
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Unbounded channel; the receiver end is for the observer
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

/// State owned by one pipeline run
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub phase: Phase,
    errors: Vec<RunError>,
    progress: Progress,
}

impl RunContext {
    #[must_use]
    pub fn new(progress: Progress) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            phase: Phase::Initialized,
            errors: Vec::new(),
            progress,
        }
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn enter(&mut self, phase: Phase) {
        log::info!("━━ {} ━━", phase);
        self.phase = phase;
        self.progress.emit(ProgressEvent::PhaseStarted(phase));
    }

    pub fn finish(&self, phase: Phase, ok: bool) {
        self.progress.emit(ProgressEvent::PhaseFinished { phase, ok });
    }

    /// Record an error against the current phase
    pub fn record(&mut self, error: RunError) {
        match error.error_type {
            ErrorKind::TypeConversion => log::warn!("{}", error),
            _ => log::error!("{}", error),
        }
        self.errors.push(error);
    }

    pub fn record_kind(&mut self, kind: ErrorKind, message: impl Into<String>, object: Option<&str>) {
        let mut error = RunError::new(self.phase, kind, message);
        if let Some(object) = object {
            error = error.for_object(object);
        }
        self.record(error);
    }

    pub fn errors(&self) -> &[RunError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
