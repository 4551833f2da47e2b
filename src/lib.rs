//! tsnative test matrix
//!
//! Builds every case of the tsnative compiler test corpus in isolation,
//! merges the per-case test manifests into one suite and executes it,
//! tolerating per-case failures and reporting them in one summary.

pub mod build;
pub mod cancel;
pub mod config;
pub mod discovery;
pub mod manifest;
pub mod orchestrator;
pub mod runner;
pub mod summary;
pub mod target;
pub mod telemetry;
pub mod toolchain;

pub use build::{BuildPipeline, CaseBuildReport, CaseOutcome};
pub use config::{EffectiveConfig, MatrixSettings, RunMode};
pub use discovery::{discover, TestCase};
pub use manifest::{ManifestAggregator, UnifiedManifest};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorError};
pub use summary::{ExitCode, MatrixSummary};
pub use target::TargetConfiguration;
