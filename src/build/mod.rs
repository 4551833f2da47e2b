//! Per-case build pipeline
//!
//! Every discovered case becomes one [`BuildUnit`] with its own build
//! directory. Units are built concurrently by [`BuildPipeline`]; a failure
//! in one case is recorded in its [`CaseBuildReport`] and never stops the
//! others.

mod pool;
mod unit;

pub use pool::{default_jobs, BuildPipeline};
pub use unit::{build_dir_name, plan_units, to_unix, BuildContext, BuildUnit, ToolchainArtifacts, TS_CONFIG};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::discovery::TestCase;
use crate::manifest::ManifestFragment;

/// Errors that abort the build phase as a whole
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("cases {first_case} and {second_case} map to the same build directory {dir}")]
    DirectoryCollision {
        dir: PathBuf,
        first_case: String,
        second_case: String,
    },

    #[error("toolchain package {0} is not part of the resolved graph")]
    MissingToolchainPackage(String),
}

/// What happened to one case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Built {
        fragment: ManifestFragment,
        duration_ms: u64,
    },
    BuildFailed {
        diagnostic: String,
        duration_ms: u64,
    },
    /// Not attempted (or interrupted) after cancellation
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseBuildReport {
    pub case: TestCase,
    pub build_dir: PathBuf,
    pub outcome: CaseOutcome,
}

impl CaseBuildReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CaseOutcome::BuildFailed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, CaseOutcome::Cancelled)
    }

    pub fn fragment(&self) -> Option<&ManifestFragment> {
        match &self.outcome {
            CaseOutcome::Built { fragment, .. } => Some(fragment),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match &self.outcome {
            CaseOutcome::BuildFailed { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}
