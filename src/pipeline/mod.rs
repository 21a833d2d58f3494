//! Migration pipeline
//!
//! - [`orchestrator`]: the [`Pipeline`] and its entry points
//! - [`context`]: run identifier, recorded errors and progress events
//! - [`deploy`]: production schema replay and the deployment summary
//! - [`report`]: the end-of-run [`RunReport`]

pub mod context;
pub mod deploy;
pub mod orchestrator;
pub mod report;

pub use context::{Progress, ProgressEvent, RunContext};
pub use deploy::{replay, DeployResult, DeploymentStatus, DeploymentSummary};
pub use orchestrator::Pipeline;
pub use report::{FinalStatus, RunReport};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Destination of a data-only run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataTarget {
    Sandbox,
    Production,
}

impl fmt::Display for DataTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataTarget::Sandbox => "sandbox",
            DataTarget::Production => "production",
        })
    }
}

impl FromStr for DataTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(DataTarget::Sandbox),
            "production" | "prod" => Ok(DataTarget::Production),
            other => Err(format!(
                "Unknown data target '{other}' (expected sandbox or production)"
            )),
        }
    }
}
