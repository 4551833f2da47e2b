//! Test run coordination
//!
//! Runs every entry of the unified manifest exactly once, in manifest order.
//! A failing or erroring test never stops the remaining ones; cancellation
//! stops before the next test starts.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::manifest::UnifiedManifest;
use crate::toolchain::TestRunner;

/// Result of one test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    /// Ran and reported failure
    Fail,
    /// Could not be run (missing binary, spawn failure, cancelled)
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub name: String,
    pub outcome: TestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub duration_ms: u64,
}

impl TestRunResult {
    pub fn pass(name: &str, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            outcome: TestOutcome::Pass,
            diagnostic: None,
            duration_ms,
        }
    }

    pub fn fail(name: &str, diagnostic: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            outcome: TestOutcome::Fail,
            diagnostic: Some(diagnostic.into()),
            duration_ms,
        }
    }

    pub fn error(name: &str, diagnostic: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            outcome: TestOutcome::Error,
            diagnostic: Some(diagnostic.into()),
            duration_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == TestOutcome::Pass
    }
}

/// Results of one pass over the unified manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunReport {
    pub results: Vec<TestRunResult>,

    /// Manifest entries not started because of cancellation
    #[serde(default)]
    pub not_run: Vec<String>,

    pub duration_ms: u64,
}

impl TestRunReport {
    pub fn total(&self) -> usize {
        self.results.len() + self.not_run.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestRunResult> {
        self.results.iter().filter(|r| !r.passed())
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0 && self.not_run.is_empty()
    }
}

/// Drives a [`TestRunner`] over a manifest
pub struct TestRunCoordinator<'a> {
    runner: &'a dyn TestRunner,
    cancel: &'a CancellationToken,
}

impl<'a> TestRunCoordinator<'a> {
    pub fn new(runner: &'a dyn TestRunner, cancel: &'a CancellationToken) -> Self {
        Self { runner, cancel }
    }

    /// Run every entry from `work_dir` (the directory holding `bin/`).
    pub fn run(&self, manifest: &UnifiedManifest, work_dir: &Path) -> TestRunReport {
        let start = Instant::now();
        let mut report = TestRunReport::default();

        for (index, entry) in manifest.entries().iter().enumerate() {
            if self.cancel.is_cancelled() {
                report
                    .not_run
                    .extend(manifest.entries()[index..].iter().map(|e| e.name.clone()));
                warn!(skipped = report.not_run.len(), "test run cancelled");
                break;
            }

            let result = self.runner.run_test(entry, work_dir);
            match result.outcome {
                TestOutcome::Pass => info!(test = %entry.name, duration_ms = result.duration_ms, "passed"),
                outcome => warn!(test = %entry.name, case = %entry.case, ?outcome, "test did not pass"),
            }
            report.results.push(result);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            total = report.total(),
            passed = report.passed(),
            failed = report.failed(),
            "test run complete"
        );
        report
    }
}

/// Run a manifest through `runner` (free-function form of the coordinator).
pub fn run_suite(
    manifest: &UnifiedManifest,
    work_dir: &Path,
    runner: &dyn TestRunner,
    cancel: &CancellationToken,
) -> TestRunReport {
    TestRunCoordinator::new(runner, cancel).run(manifest, work_dir)
}
