//! Run summary and failure taxonomy

mod failure;
mod matrix_summary;

pub use failure::{ExitCode, ExitCodeAggregator, FailureKind, Status};
pub use matrix_summary::{
    FailedCase, FailedTest, MatrixSummary, PhaseResult, TargetSummary, PHASE_DECLARATOR, PHASE_DECLARATOR_TESTS,
    PHASE_RUNTIME, SUMMARY_FILE, SUMMARY_SCHEMA_ID, SUMMARY_SCHEMA_VERSION,
};
