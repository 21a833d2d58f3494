//! Sandbox validation
//!
//! Generated DDL is executed against a disposable PostgreSQL database before anything touches
//! production. See [`runner`] for the pass protocol and [`state`] for the per-object state
//! machine.

pub mod fixer;
pub mod lock;
pub mod plan;
pub mod runner;
pub mod state;

pub use fixer::DeterministicFixer;
pub use lock::SandboxLock;
pub use plan::{ExecutionPlan, ExecutionUnit};
pub use runner::SandboxRunner;
pub use state::{ObjectOutcome, ObjectState, SandboxResult};
