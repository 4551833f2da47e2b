//! End-to-end runs of the orchestrator over a scratch corpus
//!
//! The build driver, test runner and command runner are in-memory fakes:
//! the driver writes a binary and a `CTestTestfile.cmake` into each build
//! directory, the runner checks the staged binary exists and passes or fails
//! by test name.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::TempDir;
use tsn_packages::{ArtifactLayout, PackageHandle, PackageRegistry, COMPILER_PACKAGE, DECLARATOR_PACKAGE, STD_PACKAGE};
use tsnative_matrix::cancel::CancellationToken;
use tsnative_matrix::config::{HostEnvironment, MatrixSettings, RunMode};
use tsnative_matrix::manifest::{ManifestError, UnifiedEntry, FRAGMENT_FILE};
use tsnative_matrix::orchestrator::{Collaborators, Orchestrator, OrchestratorError};
use tsnative_matrix::runner::TestRunResult;
use tsnative_matrix::summary::{ExitCode, Status, SUMMARY_FILE};
use tsnative_matrix::toolchain::{
    BuildDriver, BuildOutput, BuildStep, CommandOutput, CommandRunner, DriverError, Invocation, TestRunner, UnitSpec,
};

// === Fakes ===

#[derive(Default)]
struct FakeDriver {
    /// Case label -> test names it registers (default: file stem)
    tests: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    /// Cases whose fragment names a binary that was never written
    without_binary: HashSet<String>,
    cancel_after_first: Option<CancellationToken>,
    specs: Mutex<Vec<UnitSpec>>,
}

impl FakeDriver {
    fn failing(mut self, label: &str) -> Self {
        self.failing.insert(label.to_string());
        self
    }

    fn without_binary(mut self, label: &str) -> Self {
        self.without_binary.insert(label.to_string());
        self
    }

    fn registering(mut self, label: &str, names: &[&str]) -> Self {
        self.tests
            .insert(label.to_string(), names.iter().map(|n| n.to_string()).collect());
        self
    }

    fn labels(&self) -> Vec<String> {
        self.specs.lock().unwrap().iter().map(|s| s.label.clone()).collect()
    }

    fn spec(&self, label: &str) -> UnitSpec {
        self.specs
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.label == label)
            .cloned()
            .unwrap()
    }
}

impl BuildDriver for FakeDriver {
    fn configure_and_build(&self, unit: &UnitSpec) -> Result<BuildOutput, DriverError> {
        self.specs.lock().unwrap().push(unit.clone());
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        if self.failing.contains(&unit.label) {
            return Err(DriverError::StepFailed {
                step: BuildStep::Build,
                exit_code: Some(2),
                output: format!("error TS2304: cannot find name in {}", unit.label),
            });
        }

        let names = self.tests.get(&unit.label).cloned().unwrap_or_else(|| {
            let stem = Path::new(&unit.label)
                .file_stem()
                .map(|s| s.to_string_lossy().replace('.', "_"))
                .unwrap_or_default();
            vec![stem]
        });

        fs::create_dir_all(&unit.build_dir)?;
        let mut fragment = String::from("# generated\n");
        for name in &names {
            if !self.without_binary.contains(&unit.label) {
                fs::write(unit.build_dir.join(name), "#!/bin/sh\n")?;
            }
            fragment.push_str(&format!("add_test({} \"{}\")\n", name, name));
        }
        fs::write(unit.build_dir.join(FRAGMENT_FILE), fragment)?;
        Ok(BuildOutput::default())
    }
}

#[derive(Default)]
struct FakeRunner {
    failing: HashSet<String>,
    ran: Mutex<Vec<String>>,
}

impl TestRunner for FakeRunner {
    fn run_test(&self, entry: &UnifiedEntry, work_dir: &Path) -> TestRunResult {
        self.ran.lock().unwrap().push(entry.name.clone());
        if !work_dir.join(&entry.packaged_path).is_file() {
            return TestRunResult::error(&entry.name, "binary not staged", 0);
        }
        if self.failing.contains(&entry.name) {
            TestRunResult::fail(&entry.name, "assertion failed", 1)
        } else {
            TestRunResult::pass(&entry.name, 1)
        }
    }
}

#[derive(Default)]
struct FakeCommands {
    calls: Mutex<Vec<String>>,
}

impl CommandRunner for FakeCommands {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DriverError> {
        self.calls.lock().unwrap().push(invocation.display());
        Ok(CommandOutput::success(""))
    }
}

// === Fixture ===

struct Fixture {
    dir: TempDir,
    registry: PackageRegistry,
    settings: MatrixSettings,
    host: HostEnvironment,
    cancel: CancellationToken,
}

impl Fixture {
    fn new(cases: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let corpus = root.join("repo/src/compiler/cases");
        for case in cases {
            let path = corpus.join(case);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            if case.ends_with(".ts") {
                fs::write(&path, "export {}\n").unwrap();
            } else {
                fs::create_dir_all(&path).unwrap();
                fs::write(path.join("CMakeLists.txt"), "project(native)\n").unwrap();
            }
        }

        let std_dir = root.join("packages/std");
        fs::create_dir_all(std_dir.join("declarations/tsnative/std")).unwrap();
        fs::write(std_dir.join("declarations/tsnative/std/array.ts"), "export {}\n").unwrap();

        let registry = PackageRegistry::new()
            .with(PackageHandle::new(COMPILER_PACKAGE, "0.3.0", root.join("packages/compiler")))
            .unwrap()
            .with(PackageHandle::new(DECLARATOR_PACKAGE, "0.3.0", root.join("packages/declarator")))
            .unwrap()
            .with(
                PackageHandle::new(STD_PACKAGE, "0.3.0", &std_dir)
                    .build_requires(DECLARATOR_PACKAGE)
                    .with_artifacts(ArtifactLayout::new(&std_dir).with_build_dir("."))
                    .with_user_info("NODE_PATH", "/opt/tsnative/node_modules"),
            )
            .unwrap();

        let mut settings = MatrixSettings {
            run_mode: RunMode::Compile,
            jobs: Some(2),
            source_root: root.join("repo"),
            out_dir: root.join("out"),
            ..Default::default()
        };
        settings.target.target_abi = Some("x86_64-pc-linux-gnu".into());
        settings.target.os = Some("linux".into());

        Self {
            dir,
            registry,
            settings,
            host: HostEnvironment::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn out(&self) -> PathBuf {
        self.settings.out_dir.clone()
    }

    fn run(
        &self,
        driver: &FakeDriver,
        runner: &FakeRunner,
    ) -> Result<tsnative_matrix::MatrixSummary, OrchestratorError> {
        let commands = FakeCommands::default();
        self.run_with(driver, runner, &commands)
    }

    fn run_with(
        &self,
        driver: &FakeDriver,
        runner: &FakeRunner,
        commands: &FakeCommands,
    ) -> Result<tsnative_matrix::MatrixSummary, OrchestratorError> {
        let tools = Collaborators {
            packages: &self.registry,
            commands,
            driver,
            tests: runner,
        };
        Orchestrator::new(&self.settings, &self.host, tools, &self.cancel)
            .with_run_id("01test")
            .run()
    }
}

// === Scenarios ===

#[test]
fn test_three_cases_one_build_failure() {
    let fixture = Fixture::new(&["a.ts", "b.ts", "c.ts"]);
    let driver = FakeDriver::default().failing("b.ts");
    let runner = FakeRunner::default();

    let summary = fixture.run(&driver, &runner).unwrap();

    let mut attempted = driver.labels();
    attempted.sort();
    assert_eq!(attempted, vec!["a.ts", "b.ts", "c.ts"]);
    assert_eq!(*runner.ran.lock().unwrap(), vec!["a", "c"]);

    assert_eq!(summary.cases_total, 3);
    assert_eq!(summary.cases_built, 2);
    assert_eq!(summary.cases_failed, 1);
    assert_eq!(summary.failed_cases[0].case, "b.ts");
    assert!(summary.failed_cases[0].diagnostic.contains("error TS2304"));
    assert_eq!(summary.tests_passed, 2);
    assert_eq!(summary.status, Status::Failed);
    assert_eq!(summary.exit_code_enum(), Some(ExitCode::BuildFailed));
    assert!(summary.render_report().contains("  - b.ts"));

    let manifest = fs::read_to_string(fixture.out().join(FRAGMENT_FILE)).unwrap();
    assert_eq!(manifest, "add_test(a \"bin/a\")\nadd_test(c \"bin/c\")\n");
    assert!(fixture.out().join(SUMMARY_FILE).is_file());
}

#[test]
fn test_unstaged_binary_fails_its_case_and_rest_still_run() {
    let fixture = Fixture::new(&["a.ts", "b.ts", "c.ts"]);
    let driver = FakeDriver::default().without_binary("b.ts");
    let runner = FakeRunner::default();

    let summary = fixture.run(&driver, &runner).unwrap();

    assert_eq!(*runner.ran.lock().unwrap(), vec!["a", "c"]);
    assert_eq!(summary.cases_built, 2);
    assert_eq!(summary.cases_failed, 1);
    assert_eq!(summary.failed_cases[0].case, "b.ts");
    assert!(summary.failed_cases[0].diagnostic.contains("could not be staged"));
    assert_eq!(summary.tests_passed, 2);
    assert_eq!(summary.exit_code_enum(), Some(ExitCode::BuildFailed));

    let manifest = fs::read_to_string(fixture.out().join(FRAGMENT_FILE)).unwrap();
    assert_eq!(manifest, "add_test(a \"bin/a\")\nadd_test(c \"bin/c\")\n");
    assert!(fixture.out().join("bin/a").is_file());
    assert!(!fixture.out().join("bin/b").exists());
    assert!(fixture.out().join(SUMMARY_FILE).is_file());
}

#[test]
fn test_path_like_test_name_fails_only_its_case() {
    let fixture = Fixture::new(&["a.ts", "b.ts"]);
    let driver = FakeDriver::default().registering("b.ts", &["../escape"]);
    let runner = FakeRunner::default();

    let summary = fixture.run(&driver, &runner).unwrap();

    assert_eq!(*runner.ran.lock().unwrap(), vec!["a"]);
    assert_eq!(summary.cases_failed, 1);
    assert_eq!(summary.failed_cases[0].case, "b.ts");
    assert!(summary.failed_cases[0].diagnostic.contains("not a plain file name"));
    assert_eq!(summary.exit_code_enum(), Some(ExitCode::BuildFailed));
    assert!(!fixture.out().join("escape").exists());
}

#[test]
fn test_k_of_n_failures_never_stop_the_rest() {
    let cases: Vec<String> = (0..8).map(|i| format!("suite/case{i}.ts")).collect();
    let refs: Vec<&str> = cases.iter().map(String::as_str).collect();
    let fixture = Fixture::new(&refs);
    let driver = FakeDriver::default()
        .failing("suite/case1.ts")
        .failing("suite/case4.ts")
        .failing("suite/case6.ts");
    let runner = FakeRunner::default();

    let summary = fixture.run(&driver, &runner).unwrap();

    assert_eq!(driver.labels().len(), 8);
    assert_eq!(summary.cases_failed, 3);
    assert_eq!(summary.cases_built, 5);
    assert_eq!(summary.tests_total, 5);
    assert_eq!(
        *runner.ran.lock().unwrap(),
        vec!["case0", "case2", "case3", "case5", "case7"]
    );
}

#[test]
fn test_exceptions_case_excluded_on_windows_only() {
    let mut fixture = Fixture::new(&["basic/exceptions.ts", "basic/math.ts"]);
    fixture.settings.target.os = Some("windows".into());
    let driver = FakeDriver::default();
    let summary = fixture.run(&driver, &FakeRunner::default()).unwrap();

    assert_eq!(driver.labels(), vec!["basic/math.ts"]);
    assert_eq!(summary.cases_excluded, 1);
    assert_eq!(summary.target.os, "Windows");

    let mut fixture = Fixture::new(&["basic/exceptions.ts", "basic/math.ts"]);
    fixture.settings.target.os = Some("linux".into());
    let driver = FakeDriver::default();
    let summary = fixture.run(&driver, &FakeRunner::default()).unwrap();

    let mut labels = driver.labels();
    labels.sort();
    assert_eq!(labels, vec!["basic/exceptions.ts", "basic/math.ts"]);
    assert_eq!(summary.cases_excluded, 0);
    assert_eq!(summary.exit_code, 0);
}

#[test]
fn test_duplicate_test_names_abort_before_execution() {
    let fixture = Fixture::new(&["a.ts", "b.ts"]);
    let driver = FakeDriver::default()
        .registering("a.ts", &["shared"])
        .registering("b.ts", &["shared"]);
    let runner = FakeRunner::default();

    let err = fixture.run(&driver, &runner).unwrap_err();

    match &err {
        OrchestratorError::Manifest(ManifestError::DuplicateTestName {
            name,
            first_case,
            second_case,
        }) => {
            assert_eq!(name, "shared");
            assert_eq!(first_case, "a.ts");
            assert_eq!(second_case, "b.ts");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_code(), ExitCode::DuplicateTest);
    assert!(runner.ran.lock().unwrap().is_empty());
}

#[test]
fn test_missing_abi_aborts_before_discovery() {
    let mut fixture = Fixture::new(&["a.ts"]);
    fixture.settings.target.target_abi = None;
    let driver = FakeDriver::default();

    let err = fixture.run(&driver, &FakeRunner::default()).unwrap_err();

    assert!(matches!(err, OrchestratorError::Target(_)));
    assert_eq!(err.exit_code(), ExitCode::Configuration);
    assert!(driver.labels().is_empty());
    assert!(!fixture.out().exists());
}

#[test]
fn test_failing_test_sets_exit_50() {
    let fixture = Fixture::new(&["a.ts", "b.ts"]);
    let runner = FakeRunner {
        failing: HashSet::from(["b".to_string()]),
        ..Default::default()
    };

    let summary = fixture.run(&FakeDriver::default(), &runner).unwrap();

    assert_eq!(summary.tests_total, 2);
    assert_eq!(summary.tests_failed, 1);
    assert_eq!(summary.failed_tests[0].name, "b");
    assert_eq!(summary.exit_code_enum(), Some(ExitCode::TestFailed));
}

#[test]
fn test_filter_selects_subset() {
    let mut fixture = Fixture::new(&["basic/math.ts", "basic/strings.ts", "math/pow.ts"]);
    fixture.settings.test_filter = "math".into();
    let driver = FakeDriver::default();

    fixture.run(&driver, &FakeRunner::default()).unwrap();

    let mut labels = driver.labels();
    labels.sort();
    assert_eq!(labels, vec!["basic/math.ts", "math/pow.ts"]);
}

#[test]
fn test_unit_specs_carry_shared_context() {
    let mut fixture = Fixture::new(&["a.ts", "cpp_integration"]);
    fixture.host = HostEnvironment::from_vars(vec![
        ("CI".to_string(), "1".to_string()),
        ("WORKSPACE".to_string(), "/ws".to_string()),
    ]);
    let driver = FakeDriver::default().registering("cpp_integration", &["native_bridge"]);

    fixture.run(&driver, &FakeRunner::default()).unwrap();

    let plain = driver.spec("a.ts");
    let out = fixture.out();
    assert_eq!(
        plain.variables["PROJECT_BASE_URL"],
        out.join("imports/declarations").display().to_string()
    );
    assert_eq!(plain.variables["TS_CONFIG"], "tsconfig.json");
    assert_eq!(plain.variables["CMAKE_CXX_COMPILER_TARGET"], "x86_64-pc-linux-gnu");
    assert_eq!(plain.env.get("NODE_PATH"), Some("/opt/tsnative/node_modules"));
    assert_eq!(plain.env.get("NPM_CONFIG_CACHE"), Some("/ws/.npm"));
    assert!(plain.build_tool_args.is_empty());

    let native = driver.spec("cpp_integration");
    assert_eq!(native.build_tool_args, vec!["-j1"]);
    assert!(!native.variables.contains_key("PROJECT_ENTRY_NAME"));
    assert_ne!(plain.build_dir, native.build_dir);

    assert!(out.join("imports/declarations/tsnative/std/array.ts").is_file());
}

#[test]
fn test_android_builds_but_skips_execution() {
    let mut fixture = Fixture::new(&["a.ts"]);
    fixture.settings.target.os = Some("android".into());
    fixture.settings.target.target_abi = Some("aarch64-linux-android".into());
    let runner = FakeRunner::default();

    let summary = fixture.run(&FakeDriver::default(), &runner).unwrap();

    assert_eq!(summary.cases_built, 1);
    assert!(runner.ran.lock().unwrap().is_empty());
    assert!(summary.tests_skipped_reason.as_deref().unwrap().contains("Android"));
    assert_eq!(summary.exit_code, 0);
    assert!(fixture.out().join("bin/a").is_file());
}

#[test]
fn test_cancellation_marks_remaining_cases() {
    let mut fixture = Fixture::new(&["a.ts", "b.ts", "c.ts"]);
    fixture.settings.jobs = Some(1);
    let driver = FakeDriver {
        cancel_after_first: Some(fixture.cancel.clone()),
        ..Default::default()
    };
    let runner = FakeRunner::default();

    let summary = fixture.run(&driver, &runner).unwrap();

    assert_eq!(driver.labels(), vec!["a.ts"]);
    assert_eq!(summary.cases_cancelled, 2);
    assert!(runner.ran.lock().unwrap().is_empty());
    assert_eq!(summary.status, Status::Cancelled);
    assert_eq!(summary.exit_code_enum(), Some(ExitCode::Cancelled));
}

#[test]
fn test_all_mode_runs_every_phase_and_packages() {
    let mut fixture = Fixture::new(&["a.ts"]);
    fixture.settings.run_mode = RunMode::All;
    fixture.settings.package_dir = Some(fixture.dir.path().join("package"));
    let driver = FakeDriver::default().registering("declarator", &["declarator_unit"]);
    let runner = FakeRunner::default();
    let commands = FakeCommands::default();

    let summary = fixture.run_with(&driver, &runner, &commands).unwrap();

    assert_eq!(
        *commands.calls.lock().unwrap(),
        vec!["npm install", "npx ts-node src/compiler/runtime_test.ts"]
    );
    let phases: Vec<&str> = summary.phases.iter().map(|p| p.phase.as_str()).collect();
    assert_eq!(phases, vec!["runtime", "declarator", "declarator-tests"]);
    assert_eq!(*runner.ran.lock().unwrap(), vec!["declarator_unit", "a"]);

    let declarator = driver.spec("declarator");
    assert_eq!(declarator.script_root, fixture.settings.source_root.join("src/declarator"));

    let package = fixture.dir.path().join("package");
    assert!(package.join("bin/a").is_file());
    assert!(package.join(FRAGMENT_FILE).is_file());
    assert_eq!(summary.exit_code, 0);
}
