//! Bounded worker pool over build units

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::unit::{plan_units, BuildContext, BuildUnit};
use super::{BuildError, CaseBuildReport, CaseOutcome};
use crate::cancel::CancellationToken;
use crate::discovery::TestCase;
use crate::manifest::{ManifestFragment, FRAGMENT_FILE};
use crate::toolchain::{BuildDriver, DriverError};

/// Worker count when none is configured
pub fn default_jobs() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Builds every case in isolation with at most `jobs` concurrent builds.
pub struct BuildPipeline<'a> {
    ctx: &'a BuildContext<'a>,
    driver: &'a dyn BuildDriver,
    cancel: &'a CancellationToken,
    jobs: usize,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(ctx: &'a BuildContext<'a>, driver: &'a dyn BuildDriver, cancel: &'a CancellationToken) -> Self {
        Self {
            ctx,
            driver,
            cancel,
            jobs: default_jobs(),
        }
    }

    /// `0` means one job per available core
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = if jobs == 0 { default_jobs() } else { jobs };
        self
    }

    /// Build every case; reports come back in input order.
    ///
    /// Only planning errors abort the run. A failed case is recorded and the
    /// remaining cases still build.
    pub fn run(&self, cases: &[TestCase]) -> Result<Vec<CaseBuildReport>, BuildError> {
        let units = plan_units(cases, self.ctx)?;
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.jobs.clamp(1, units.len());
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<CaseBuildReport>>> = Mutex::new((0..units.len()).map(|_| None).collect());

        info!(cases = units.len(), workers, "building test cases");
        let start = Instant::now();

        thread::scope(|scope| {
            for worker in 0..workers {
                let units = &units;
                let next = &next;
                let slots = &slots;
                scope.spawn(move || loop {
                    if self.cancel.is_cancelled() {
                        debug!(worker, "worker stopping after cancellation");
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(unit) = units.get(index) else {
                        break;
                    };

                    store(slots, index, self.build_one(unit));
                });
            }
        });

        let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
        let reports: Vec<CaseBuildReport> = slots
            .into_iter()
            .zip(units)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| CaseBuildReport {
                    case: unit.case,
                    build_dir: unit.build_dir,
                    outcome: CaseOutcome::Cancelled,
                })
            })
            .collect();

        let failed = reports.iter().filter(|r| r.is_failed()).count();
        info!(
            cases = reports.len(),
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "build phase complete"
        );
        Ok(reports)
    }

    fn build_one(&self, unit: &BuildUnit) -> CaseBuildReport {
        let case = &unit.case.relative_path;
        info!(case = %case, build_dir = %unit.build_dir.display(), "compiling");

        // a fragment left by an earlier run must not stand in for this build
        let _ = fs::remove_file(unit.build_dir.join(FRAGMENT_FILE));

        let start = Instant::now();
        let outcome = match self.driver.configure_and_build(&unit.to_spec(self.ctx)) {
            Ok(_) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                match ManifestFragment::from_build_dir(case, &unit.build_dir) {
                    Ok(fragment) => {
                        if fragment.is_empty() {
                            warn!(case = %case, "build registered no tests");
                        }
                        CaseOutcome::Built { fragment, duration_ms }
                    }
                    Err(e) => CaseOutcome::BuildFailed {
                        diagnostic: e.to_string(),
                        duration_ms,
                    },
                }
            }
            Err(DriverError::Cancelled) => CaseOutcome::Cancelled,
            Err(e) => CaseOutcome::BuildFailed {
                diagnostic: e.diagnostic(),
                duration_ms: start.elapsed().as_millis() as u64,
            },
        };

        if let CaseOutcome::BuildFailed { diagnostic, .. } = &outcome {
            error!(case = %case, "case build failed: {}", diagnostic.lines().next().unwrap_or_default());
        }

        CaseBuildReport {
            case: unit.case.clone(),
            build_dir: unit.build_dir.clone(),
            outcome,
        }
    }
}

/// Slot a finished report; a poisoned lock still accepts it.
fn store<T>(slots: &Mutex<Vec<Option<T>>>, index: usize, report: T) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    slots[index] = Some(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ToolchainArtifacts;
    use crate::discovery::CaseCategory;
    use crate::target::{TargetConfiguration, TargetOs};
    use crate::toolchain::{BuildOutput, BuildStep, UnitSpec};
    use std::collections::HashSet;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tsn_packages::PackageHandle;

    /// Writes a one-test fragment per unit, failing listed cases
    struct FakeDriver {
        failing: HashSet<String>,
        no_fragment: HashSet<String>,
        seen: Mutex<Vec<String>>,
        cancel_on: Option<(String, CancellationToken)>,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                failing: HashSet::new(),
                no_fragment: HashSet::new(),
                seen: Mutex::new(Vec::new()),
                cancel_on: None,
            }
        }
    }

    impl BuildDriver for FakeDriver {
        fn configure_and_build(&self, unit: &UnitSpec) -> Result<BuildOutput, DriverError> {
            self.seen.lock().unwrap().push(unit.label.clone());
            if let Some((label, token)) = &self.cancel_on {
                if *label == unit.label {
                    token.cancel();
                }
            }
            if self.failing.contains(&unit.label) {
                return Err(DriverError::StepFailed {
                    step: BuildStep::Build,
                    exit_code: Some(1),
                    output: format!("{}: error TS2322", unit.label),
                });
            }
            fs::create_dir_all(&unit.build_dir)?;
            if !self.no_fragment.contains(&unit.label) {
                let name = unit.label.trim_end_matches(".ts").replace('/', "_");
                fs::write(
                    unit.build_dir.join(FRAGMENT_FILE),
                    format!("add_test({name} \"{}\")\n", unit.build_dir.join(&name).display()),
                )?;
            }
            Ok(BuildOutput::default())
        }
    }

    struct Fixture {
        out: TempDir,
        target: TargetConfiguration,
        artifacts: ToolchainArtifacts,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                out: TempDir::new().unwrap(),
                target: TargetConfiguration::builder()
                    .os(TargetOs::Linux)
                    .target_abi("x86_64-pc-linux-gnu")
                    .build()
                    .unwrap(),
                artifacts: ToolchainArtifacts::new(
                    PackageHandle::new("tsnative-compiler", "0.3", "/pkg/compiler"),
                    PackageHandle::new("tsnative-std", "0.3", "/pkg/std"),
                    PackageHandle::new("tsnative-declarator", "0.3", "/pkg/declarator"),
                ),
            }
        }

        fn ctx(&self) -> BuildContext<'_> {
            BuildContext::new(&self.target, &self.artifacts, self.out.path().join("build"))
        }
    }

    fn cases(paths: &[&str]) -> Vec<TestCase> {
        paths
            .iter()
            .map(|p| TestCase::new(PathBuf::from("/cases").join(p), *p, CaseCategory::PlainSource))
            .collect()
    }

    #[test]
    fn test_k_failures_of_n_all_attempted() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let mut driver = FakeDriver::new();
        driver.failing.insert("b.ts".to_string());
        driver.failing.insert("d.ts".to_string());
        let token = CancellationToken::new();

        let input = cases(&["a.ts", "b.ts", "c.ts", "d.ts", "e.ts"]);
        let reports = BuildPipeline::new(&ctx, &driver, &token).with_jobs(3).run(&input).unwrap();

        assert_eq!(driver.seen.lock().unwrap().len(), 5);
        let order: Vec<&str> = reports.iter().map(|r| r.case.relative_path.as_str()).collect();
        assert_eq!(order, vec!["a.ts", "b.ts", "c.ts", "d.ts", "e.ts"]);
        assert_eq!(reports.iter().filter(|r| r.is_failed()).count(), 2);
        assert_eq!(reports.iter().filter(|r| r.fragment().is_some()).count(), 3);
        match &reports[1].outcome {
            CaseOutcome::BuildFailed { diagnostic, .. } => assert!(diagnostic.contains("error TS2322")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_missing_fragment_is_build_failure() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let mut driver = FakeDriver::new();
        driver.no_fragment.insert("a.ts".to_string());
        let token = CancellationToken::new();

        let reports = BuildPipeline::new(&ctx, &driver, &token).run(&cases(&["a.ts"])).unwrap();
        match &reports[0].outcome {
            CaseOutcome::BuildFailed { diagnostic, .. } => assert!(diagnostic.contains("produced no manifest")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_marks_unattempted_cases() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let token = CancellationToken::new();
        let mut driver = FakeDriver::new();
        driver.cancel_on = Some(("b.ts".to_string(), token.clone()));

        let reports = BuildPipeline::new(&ctx, &driver, &token)
            .with_jobs(1)
            .run(&cases(&["a.ts", "b.ts", "c.ts", "d.ts"]))
            .unwrap();

        assert_eq!(driver.seen.lock().unwrap().len(), 2);
        assert!(reports[0].fragment().is_some());
        assert!(reports[1].fragment().is_some());
        assert!(matches!(reports[2].outcome, CaseOutcome::Cancelled));
        assert!(matches!(reports[3].outcome, CaseOutcome::Cancelled));
    }

    #[test]
    fn test_empty_case_list() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let driver = FakeDriver::new();
        let token = CancellationToken::new();

        let reports = BuildPipeline::new(&ctx, &driver, &token).run(&[]).unwrap();
        assert!(reports.is_empty());
        assert!(driver.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_report_kept_after_lock_poisoned() {
        let slots: Mutex<Vec<Option<&str>>> = Mutex::new(vec![None, None]);
        let _ = std::panic::catch_unwind(|| {
            let _guard = slots.lock().unwrap();
            panic!("worker panicked while holding the slots");
        });
        assert!(slots.is_poisoned());

        store(&slots, 1, "built");

        let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(slots, vec![None, Some("built")]);
    }
}
