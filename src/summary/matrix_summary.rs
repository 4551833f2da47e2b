//! Matrix summary (matrix_summary.json)

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::{ExitCode, ExitCodeAggregator, FailureKind, Status};
use crate::build::{CaseBuildReport, CaseOutcome};
use crate::config::RunMode;
use crate::manifest::StagingFailure;
use crate::runner::{TestOutcome, TestRunReport};
use crate::target::TargetConfiguration;

/// Schema version for matrix_summary.json
pub const SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for matrix_summary.json
pub const SUMMARY_SCHEMA_ID: &str = "tsnative-matrix/summary@1";

/// File name of the persisted summary
pub const SUMMARY_FILE: &str = "matrix_summary.json";

/// Phase names recorded in [`PhaseResult::phase`]
pub const PHASE_RUNTIME: &str = "runtime";
pub const PHASE_DECLARATOR: &str = "declarator";
pub const PHASE_DECLARATOR_TESTS: &str = "declarator-tests";

/// Phases whose failure is a test failure rather than a build failure
const TEST_PHASES: &[&str] = &[PHASE_RUNTIME, PHASE_DECLARATOR_TESTS];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub os: String,
    pub arch: String,
    pub target_abi: String,
    pub build_type: String,
}

impl From<&TargetConfiguration> for TargetSummary {
    fn from(target: &TargetConfiguration) -> Self {
        Self {
            os: target.os().to_string(),
            arch: target.arch().to_string(),
            target_abi: target.target_abi().to_string(),
            build_type: target.build_type().to_string(),
        }
    }
}

/// Outcome of a non-matrix phase (runtime suite, declarator unit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub duration_ms: u64,
}

impl PhaseResult {
    pub fn success(phase: &str, duration_ms: u64) -> Self {
        Self {
            phase: phase.to_string(),
            status: Status::Success,
            diagnostic: None,
            duration_ms,
        }
    }

    pub fn failed(phase: &str, diagnostic: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            phase: phase.to_string(),
            status: Status::Failed,
            diagnostic: Some(diagnostic.into()),
            duration_ms,
        }
    }

    pub fn cancelled(phase: &str, duration_ms: u64) -> Self {
        Self {
            phase: phase.to_string(),
            status: Status::Cancelled,
            diagnostic: None,
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCase {
    pub case: String,
    pub diagnostic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTest {
    pub name: String,
    pub outcome: TestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Aggregate result of one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub schema_version: u32,
    pub schema_id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub run_mode: RunMode,
    pub target: TargetSummary,

    pub status: Status,
    pub exit_code: i32,

    #[serde(default)]
    pub phases: Vec<PhaseResult>,

    pub cases_total: usize,
    pub cases_built: usize,
    pub cases_failed: usize,
    pub cases_cancelled: usize,
    pub cases_excluded: usize,
    #[serde(default)]
    pub failed_cases: Vec<FailedCase>,

    pub tests_total: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub tests_not_run: usize,
    #[serde(default)]
    pub failed_tests: Vec<FailedTest>,

    /// Why test execution was skipped, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_skipped_reason: Option<String>,

    pub build_duration_ms: u64,
    pub test_duration_ms: u64,
    pub duration_ms: u64,

    pub human_summary: String,
}

impl MatrixSummary {
    pub fn new(run_id: impl Into<String>, run_mode: RunMode, target: &TargetConfiguration) -> Self {
        Self {
            schema_version: SUMMARY_SCHEMA_VERSION,
            schema_id: SUMMARY_SCHEMA_ID.to_string(),
            run_id: run_id.into(),
            created_at: Utc::now(),
            run_mode,
            target: TargetSummary::from(target),
            status: Status::Success,
            exit_code: ExitCode::Success.as_i32(),
            phases: Vec::new(),
            cases_total: 0,
            cases_built: 0,
            cases_failed: 0,
            cases_cancelled: 0,
            cases_excluded: 0,
            failed_cases: Vec::new(),
            tests_total: 0,
            tests_passed: 0,
            tests_failed: 0,
            tests_not_run: 0,
            failed_tests: Vec::new(),
            tests_skipped_reason: None,
            build_duration_ms: 0,
            test_duration_ms: 0,
            duration_ms: 0,
            human_summary: String::new(),
        }
    }

    pub fn record_phase(&mut self, phase: PhaseResult) {
        self.phases.push(phase);
    }

    pub fn record_builds(&mut self, reports: &[CaseBuildReport], excluded: usize, duration_ms: u64) {
        self.cases_total = reports.len();
        self.cases_excluded = excluded;
        self.build_duration_ms = duration_ms;
        for report in reports {
            match &report.outcome {
                CaseOutcome::Built { .. } => self.cases_built += 1,
                CaseOutcome::BuildFailed { diagnostic, .. } => {
                    self.cases_failed += 1;
                    self.failed_cases.push(FailedCase {
                        case: report.case.relative_path.clone(),
                        diagnostic: diagnostic.clone(),
                    });
                }
                CaseOutcome::Cancelled => self.cases_cancelled += 1,
            }
        }
    }

    /// A built case whose binary could not be staged counts as a failed build.
    pub fn record_staging_failures(&mut self, failures: &[StagingFailure]) {
        for failure in failures {
            let line = format!("test '{}' could not be staged: {}", failure.name, failure.diagnostic);
            if let Some(existing) = self.failed_cases.iter_mut().find(|c| c.case == failure.case) {
                existing.diagnostic.push('\n');
                existing.diagnostic.push_str(&line);
                continue;
            }
            self.cases_built = self.cases_built.saturating_sub(1);
            self.cases_failed += 1;
            self.failed_cases.push(FailedCase {
                case: failure.case.clone(),
                diagnostic: line,
            });
        }
    }

    pub fn record_tests(&mut self, report: &TestRunReport) {
        self.tests_total = report.total();
        self.tests_passed = report.passed();
        self.tests_failed = report.failed();
        self.tests_not_run = report.not_run.len();
        self.test_duration_ms = report.duration_ms;
        self.failed_tests = report
            .failures()
            .map(|r| FailedTest {
                name: r.name.clone(),
                outcome: r.outcome,
                diagnostic: r.diagnostic.clone(),
            })
            .collect();
    }

    pub fn skip_tests(&mut self, reason: impl Into<String>) {
        self.tests_skipped_reason = Some(reason.into());
    }

    /// Compute status, exit code and the one-line summary.
    pub fn finalize(&mut self, duration_ms: u64, cancelled: bool) {
        let mut agg = ExitCodeAggregator::new();
        for phase in &self.phases {
            match phase.status {
                Status::Cancelled => agg.add(FailureKind::Cancelled),
                Status::Failed if TEST_PHASES.contains(&phase.phase.as_str()) => agg.add(FailureKind::Test),
                Status::Failed => agg.add(FailureKind::Build),
                Status::Success => {}
            }
        }
        if self.cases_failed > 0 {
            agg.add(FailureKind::Build);
        }
        if self.tests_failed > 0 {
            agg.add(FailureKind::Test);
        }
        if cancelled || self.cases_cancelled > 0 || self.tests_not_run > 0 {
            agg.add(FailureKind::Cancelled);
        }

        self.status = agg.status();
        self.exit_code = agg.exit_code().as_i32();
        self.duration_ms = duration_ms;
        self.human_summary = self.generate_human_summary();
    }

    fn generate_human_summary(&self) -> String {
        let verdict = match self.status {
            Status::Success => "Run succeeded",
            Status::Failed => "Run failed",
            Status::Cancelled => "Run cancelled",
        };
        let mut line = format!(
            "{}: {}/{} cases built, {}/{} tests passed",
            verdict, self.cases_built, self.cases_total, self.tests_passed, self.tests_total
        );
        if self.cases_failed > 0 {
            let _ = write!(line, ", {} case build(s) failed", self.cases_failed);
        }
        if self.tests_failed > 0 {
            let _ = write!(line, ", {} test(s) failed", self.tests_failed);
        }
        let failed_phases = self.phases.iter().filter(|p| p.status.is_failure()).count();
        if failed_phases > 0 {
            let _ = write!(line, ", {failed_phases} phase(s) failed");
        }
        line
    }

    /// Multi-line report naming every failed case, test and phase
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== tsnative test matrix ({}) ===", self.run_mode);
        let _ = writeln!(
            out,
            "target: {} {} ({}, {})",
            self.target.os, self.target.arch, self.target.target_abi, self.target.build_type
        );

        for phase in &self.phases {
            let _ = writeln!(out, "phase {}: {:?}", phase.phase, phase.status);
            if let Some(diag) = &phase.diagnostic {
                let _ = writeln!(out, "    {}", diag.lines().next().unwrap_or_default());
            }
        }

        if self.cases_excluded > 0 {
            let _ = writeln!(out, "excluded cases: {}", self.cases_excluded);
        }
        if !self.failed_cases.is_empty() {
            let _ = writeln!(out, "failed case builds:");
            for failed in &self.failed_cases {
                let _ = writeln!(out, "  - {}", failed.case);
                for line in failed.diagnostic.lines().take(5) {
                    let _ = writeln!(out, "      {line}");
                }
            }
        }
        if !self.failed_tests.is_empty() {
            let _ = writeln!(out, "failed tests:");
            for failed in &self.failed_tests {
                let _ = writeln!(out, "  - {} ({:?})", failed.name, failed.outcome);
            }
        }
        if let Some(reason) = &self.tests_skipped_reason {
            let _ = writeln!(out, "tests not executed: {reason}");
        }

        let _ = writeln!(out, "{}", self.human_summary);
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;
        fs::write(path, json)
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }

    pub fn exit_code_enum(&self) -> Option<ExitCode> {
        ExitCode::from_i32(self.exit_code)
    }
}
