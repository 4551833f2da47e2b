//! Run orchestration
//!
//! Wires the components together for one run:
//! - freeze the target (a missing ABI stops here, before anything touches disk)
//! - resolve the package graph and pick out the toolchain packages
//! - stage the std declarations and assemble the child-tool environment
//! - runtime suite, declarator unit, then the compiled matrix, per run mode
//! - aggregate manifests, execute, package and write the summary
//!
//! Fatal errors (configuration, packages, duplicate test names) come back as
//! [`OrchestratorError`]; per-case and per-test failures are recorded in the
//! returned [`MatrixSummary`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use tsn_packages::{DependencyGraph, PackageError, PackageRegistry, PackageSource, ResolvedGraph};
use walkdir::WalkDir;

use crate::build::{BuildContext, BuildError, BuildPipeline, ToolchainArtifacts};
use crate::cancel::CancellationToken;
use crate::config::{ConfigError, HostEnvironment, MatrixSettings, RunMode};
use crate::discovery::{discover, Discovery, DiscoveryError, DiscoveryOptions, FilterPattern, CASE_EXTENSION};
use crate::manifest::{ManifestAggregator, ManifestError, ManifestFragment};
use crate::runner::run_suite;
use crate::summary::{
    ExitCode, FailureKind, MatrixSummary, PhaseResult, PHASE_DECLARATOR, PHASE_DECLARATOR_TESTS, PHASE_RUNTIME,
    SUMMARY_FILE,
};
use crate::target::{ConfigurationError, TargetConfiguration, TargetOs};
use crate::toolchain::{
    tail_lines, BuildDriver, CommandRunner, DriverError, Invocation, TestRunner, ToolEnv, UnitSpec,
    DIAGNOSTIC_TAIL_LINES,
};

/// Subdirectories of the output directory
const CASES_DIR: &str = "cases";
const DECLARATOR_DIR: &str = "declarator";
const IMPORTS_DIR: &str = "imports";
const DECLARATIONS_DIR: &str = "declarations";

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("configuration error: {0}")]
    Target(#[from] ConfigurationError),

    #[error("package error: {0}")]
    Packages(#[from] PackageError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OrchestratorError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            OrchestratorError::Config(_) | OrchestratorError::Target(_) => FailureKind::Configuration,
            OrchestratorError::Packages(PackageError::Io { .. }) => FailureKind::Io,
            OrchestratorError::Packages(PackageError::Parse(_)) => FailureKind::Configuration,
            OrchestratorError::Packages(_) => FailureKind::Dependency,
            OrchestratorError::Discovery(DiscoveryError::RootMissing(_)) => FailureKind::Configuration,
            OrchestratorError::Discovery(DiscoveryError::Walk(_)) => FailureKind::Io,
            OrchestratorError::Build(BuildError::MissingToolchainPackage(_)) => FailureKind::Dependency,
            OrchestratorError::Build(BuildError::DirectoryCollision { .. }) => FailureKind::Build,
            OrchestratorError::Manifest(ManifestError::DuplicateTestName { .. }) => FailureKind::DuplicateTest,
            OrchestratorError::Manifest(ManifestError::Io { .. }) => FailureKind::Io,
            OrchestratorError::Manifest(_) => FailureKind::Build,
            OrchestratorError::Io { .. } => FailureKind::Io,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        self.failure_kind().exit_code()
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> OrchestratorError + '_ {
    move |source| OrchestratorError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// External collaborators of a run
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub packages: &'a dyn PackageSource,
    /// Runs the runtime-suite commands
    pub commands: &'a dyn CommandRunner,
    pub driver: &'a dyn BuildDriver,
    pub tests: &'a dyn TestRunner,
}

/// Load the package registry named by the settings.
pub fn load_registry(settings: &MatrixSettings) -> OrchestratorResult<PackageRegistry> {
    Ok(PackageRegistry::from_file(&settings.packages.registry)?)
}

/// Resolve the package graph rooted at the configured test package.
pub fn resolve_packages(settings: &MatrixSettings, source: &dyn PackageSource) -> OrchestratorResult<ResolvedGraph> {
    let root = settings.packages.root_requirements();
    let graph = DependencyGraph::resolve(&root, source)?;
    debug!(
        root = %root.name,
        packages = graph.len(),
        build_only = graph.build_only().len(),
        "resolved package graph"
    );
    Ok(graph)
}

/// Discover the cases the settings select for `os`.
pub fn discover_cases(settings: &MatrixSettings, os: TargetOs) -> OrchestratorResult<Discovery> {
    let options = DiscoveryOptions::new(os)
        .with_filter(settings.filter()?)
        .with_native_dirs(settings.discovery.native_integration_dirs.clone());
    Ok(discover(&settings.corpus_dir(), &options)?)
}

/// Environment handed to every child tool of a run.
pub fn tool_env(settings: &MatrixSettings, host: &HostEnvironment, artifacts: &ToolchainArtifacts) -> ToolEnv {
    let mut env = settings.env.policy().apply(host.vars.clone());

    if let Some(node_path) = artifacts.node_path() {
        env.set("NODE_PATH", node_path);
    }

    if host.ci {
        match &host.workspace {
            Some(workspace) => {
                env.set("NPM_CONFIG_CACHE", workspace.join(".npm").display().to_string());
                if TargetOs::host() == TargetOs::Linux {
                    env.set("HOME", workspace.display().to_string());
                }
            }
            None => error!("running under CI but WORKSPACE is not set; npm cache left at its default"),
        }
    }

    if !env.dropped_keys().is_empty() {
        debug!(dropped = ?env.dropped_keys(), "filtered ambient environment");
    }
    env
}

/// Copy every `.ts` file under `from` into `to`, keeping relative paths.
pub fn stage_std_imports(from: &Path, to: &Path) -> OrchestratorResult<usize> {
    if !from.is_dir() {
        warn!(dir = %from.display(), "std package has no declarations to stage");
        return Ok(0);
    }

    let mut copied = 0;
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(|e| OrchestratorError::Discovery(DiscoveryError::Walk(e)))?;
        let is_ts = entry.path().extension().map_or(false, |ext| ext == CASE_EXTENSION);
        if !entry.file_type().is_file() || !is_ts {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = to.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        fs::copy(entry.path(), &dest).map_err(io_err(entry.path()))?;
        copied += 1;
    }

    info!(count = copied, dir = %to.display(), "staged std imports");
    Ok(copied)
}

/// One orchestrator run
pub struct Orchestrator<'a> {
    settings: &'a MatrixSettings,
    host: &'a HostEnvironment,
    tools: Collaborators<'a>,
    cancel: &'a CancellationToken,
    run_id: String,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        settings: &'a MatrixSettings,
        host: &'a HostEnvironment,
        tools: Collaborators<'a>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            settings,
            host,
            tools,
            cancel,
            run_id: ulid::Ulid::new().to_string().to_lowercase(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn out_dir(&self) -> &Path {
        &self.settings.out_dir
    }

    /// Execute the configured run mode and write `matrix_summary.json`.
    pub fn run(&self) -> OrchestratorResult<MatrixSummary> {
        let start = Instant::now();
        let settings = self.settings;
        let mode = settings.run_mode;

        let target = settings.target_configuration()?;
        let filter = settings.filter()?;
        info!(run_id = %self.run_id, mode = %mode, target = %target, "starting run");

        let graph = resolve_packages(settings, self.tools.packages)?;
        let artifacts = ToolchainArtifacts::from_graph(&graph)?;
        let env = tool_env(settings, self.host, &artifacts);

        fs::create_dir_all(self.out_dir()).map_err(io_err(self.out_dir()))?;
        let imports = self.out_dir().join(IMPORTS_DIR);
        if mode.runs_declarator() || mode.runs_compile() {
            stage_std_imports(&artifacts.std_declarations_dir(), &imports)?;
        }

        let ctx = BuildContext::new(&target, &artifacts, self.out_dir().join(CASES_DIR))
            .with_project_base_url(imports.join(DECLARATIONS_DIR))
            .with_source_dir(&settings.source_root)
            .with_env(env.clone())
            .with_ci(self.host.ci);

        let mut summary = MatrixSummary::new(&self.run_id, mode, &target);

        if mode.runs_runtime() && !self.cancel.is_cancelled() {
            summary.record_phase(self.run_runtime_suite(&filter, &env));
        }

        if mode.runs_declarator() && !self.cancel.is_cancelled() {
            for phase in self.run_declarator(&ctx, &target) {
                summary.record_phase(phase);
            }
        }

        if mode.runs_compile() && !self.cancel.is_cancelled() {
            self.run_matrix(&ctx, &target, &mut summary)?;
        }

        summary.finalize(start.elapsed().as_millis() as u64, self.cancel.is_cancelled());

        let summary_path = self.out_dir().join(SUMMARY_FILE);
        summary.write_to_file(&summary_path).map_err(io_err(&summary_path))?;
        info!(
            run_id = %self.run_id,
            status = ?summary.status,
            exit_code = summary.exit_code,
            "{}",
            summary.human_summary
        );
        Ok(summary)
    }

    /// Runtime-suite command line with filter and exclude flags appended;
    /// `None` when no command is configured.
    pub fn runtime_invocation(&self, filter: &FilterPattern, env: &ToolEnv) -> Option<Invocation> {
        let runtime = &self.settings.runtime;
        let (program, args) = runtime.command.split_first()?;

        let mut invocation = Invocation::new(program)
            .args(args.iter().cloned())
            .current_dir(&self.settings.source_root)
            .env(env.clone());

        if !filter.is_match_all() {
            invocation = invocation.arg("--test_filter").arg(filter.as_str());
        }
        if !runtime.excludes.is_empty() {
            invocation = invocation.arg("--exclude").arg(runtime.excludes.join(":"));
        }
        Some(invocation)
    }

    fn run_runtime_suite(&self, filter: &FilterPattern, env: &ToolEnv) -> PhaseResult {
        let start = Instant::now();
        let elapsed = || start.elapsed().as_millis() as u64;
        let runtime = &self.settings.runtime;

        if let Some((program, args)) = runtime.setup.split_first() {
            let setup = Invocation::new(program)
                .args(args.iter().cloned())
                .current_dir(&self.settings.source_root)
                .env(env.clone());
            info!(command = %setup.display(), "runtime suite setup");
            if let Some(failure) = self.phase_command(PHASE_RUNTIME, &setup, elapsed) {
                return failure;
            }
        }

        let Some(invocation) = self.runtime_invocation(filter, env) else {
            return PhaseResult::failed(PHASE_RUNTIME, "runtime.command is empty", elapsed());
        };
        info!(command = %invocation.display(), "running runtime suite");
        if let Some(failure) = self.phase_command(PHASE_RUNTIME, &invocation, elapsed) {
            return failure;
        }

        info!(duration_ms = elapsed(), "runtime suite passed");
        PhaseResult::success(PHASE_RUNTIME, elapsed())
    }

    /// Run one phase command; `Some` carries the failed phase result.
    fn phase_command(&self, phase: &str, invocation: &Invocation, elapsed: impl Fn() -> u64) -> Option<PhaseResult> {
        match self.tools.commands.run(invocation) {
            Ok(output) if output.success => None,
            Ok(output) => {
                warn!(phase, command = %invocation.display(), exit_code = ?output.exit_code, "phase command failed");
                Some(PhaseResult::failed(
                    phase,
                    format!(
                        "{} exited with {:?}\n{}",
                        invocation.display(),
                        output.exit_code,
                        tail_lines(&output.combined(), DIAGNOSTIC_TAIL_LINES)
                    ),
                    elapsed(),
                ))
            }
            Err(DriverError::Cancelled) => Some(PhaseResult::cancelled(phase, elapsed())),
            Err(e) => {
                error!(phase, error = %e, "phase command could not run");
                Some(PhaseResult::failed(phase, e.diagnostic(), elapsed()))
            }
        }
    }

    /// Build the declarator unit, then run its tests when the target allows.
    fn run_declarator(&self, ctx: &BuildContext<'_>, target: &TargetConfiguration) -> Vec<PhaseResult> {
        let start = Instant::now();
        let build_dir = self.out_dir().join(DECLARATOR_DIR);
        let spec = UnitSpec::new(PHASE_DECLARATOR, self.settings.declarator_script_root(), &build_dir)
            .variables(&ctx.shared_variables())
            .env(ctx.env.clone());

        info!(build_dir = %build_dir.display(), "building declarator");
        if let Err(e) = self.tools.driver.configure_and_build(&spec) {
            let elapsed = start.elapsed().as_millis() as u64;
            return match e {
                DriverError::Cancelled => vec![PhaseResult::cancelled(PHASE_DECLARATOR, elapsed)],
                e => {
                    error!(error = %e, "declarator build failed");
                    vec![PhaseResult::failed(PHASE_DECLARATOR, e.diagnostic(), elapsed)]
                }
            };
        }
        let mut phases = vec![PhaseResult::success(PHASE_DECLARATOR, start.elapsed().as_millis() as u64)];

        if !target.os().can_execute_tests() {
            info!(os = %target.os(), "skipping declarator tests; binaries cannot run on this host");
            return phases;
        }
        if self.cancel.is_cancelled() {
            return phases;
        }

        let test_start = Instant::now();
        let elapsed = || test_start.elapsed().as_millis() as u64;
        let staged = ManifestFragment::from_build_dir(PHASE_DECLARATOR, &build_dir).and_then(|fragment| {
            let mut manifest = ManifestAggregator::aggregate_fragments([&fragment])?;
            let unstaged = manifest.stage_binaries(&build_dir)?;
            Ok((manifest, unstaged))
        });
        let (manifest, unstaged) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                phases.push(PhaseResult::failed(PHASE_DECLARATOR_TESTS, e.to_string(), elapsed()));
                return phases;
            }
        };

        let report = run_suite(&manifest, &build_dir, self.tools.tests, self.cancel);
        let phase = if !report.not_run.is_empty() {
            PhaseResult::cancelled(PHASE_DECLARATOR_TESTS, elapsed())
        } else if report.all_passed() && unstaged.is_empty() {
            PhaseResult::success(PHASE_DECLARATOR_TESTS, elapsed())
        } else {
            let mut lines = Vec::new();
            let failed: Vec<&str> = report.failures().map(|r| r.name.as_str()).collect();
            if !failed.is_empty() {
                lines.push(format!("{} of {} tests failed: {}", failed.len(), report.total(), failed.join(", ")));
            }
            for failure in &unstaged {
                lines.push(format!("test '{}' could not be staged: {}", failure.name, failure.diagnostic));
            }
            PhaseResult::failed(PHASE_DECLARATOR_TESTS, lines.join("\n"), elapsed())
        };
        phases.push(phase);
        phases
    }

    /// Discover, build, aggregate, execute and package the compiled matrix.
    fn run_matrix(
        &self,
        ctx: &BuildContext<'_>,
        target: &TargetConfiguration,
        summary: &mut MatrixSummary,
    ) -> OrchestratorResult<()> {
        let discovery = discover_cases(self.settings, target.os())?;
        info!(
            selected = discovery.cases.len(),
            excluded = discovery.excluded.len(),
            filtered_out = discovery.filtered_out,
            "test cases selected"
        );

        let build_start = Instant::now();
        let mut pipeline = BuildPipeline::new(ctx, self.tools.driver, self.cancel);
        if let Some(jobs) = self.settings.jobs {
            pipeline = pipeline.with_jobs(jobs);
        }
        let reports = pipeline.run(&discovery.cases)?;
        let build_ms = build_start.elapsed().as_millis() as u64;
        info!(duration_ms = build_ms, "test cases compiled");
        summary.record_builds(&reports, discovery.excluded.len(), build_ms);

        // duplicate names abort here, before anything executes
        let mut manifest = ManifestAggregator::aggregate(&reports)?;

        if self.cancel.is_cancelled() {
            warn!("run cancelled; not executing tests");
            return Ok(());
        }

        let unstaged = manifest.stage_binaries(self.out_dir())?;
        summary.record_staging_failures(&unstaged);
        manifest.write_to(self.out_dir())?;

        if target.os().can_execute_tests() {
            let report = run_suite(&manifest, self.out_dir(), self.tools.tests, self.cancel);
            summary.record_tests(&report);
        } else {
            let reason = format!("{} binaries cannot run on the build host", target.os());
            info!(tests = manifest.len(), "{}", reason);
            summary.skip_tests(reason);
        }

        match (&self.settings.package_dir, self.settings.run_mode) {
            (Some(dir), RunMode::All) => manifest.package(self.out_dir(), dir)?,
            (None, RunMode::All) => warn!("no package directory configured; test suite not packaged"),
            _ => debug!("packaging only happens when every suite runs"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::CommandOutput;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tsn_packages::{ArtifactLayout, PackageHandle, COMPILER_PACKAGE, DECLARATOR_PACKAGE, STD_PACKAGE};

    #[derive(Default)]
    struct RecordingCommands {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl CommandRunner for RecordingCommands {
        fn run(&self, invocation: &Invocation) -> Result<CommandOutput, DriverError> {
            let line = invocation.display();
            self.calls.lock().unwrap().push(line.clone());
            match self.fail_on {
                Some(needle) if line.contains(needle) => Ok(CommandOutput::failure(1, "1 runtime test failed")),
                _ => Ok(CommandOutput::success("ok")),
            }
        }
    }

    struct NoDriver;

    impl BuildDriver for NoDriver {
        fn configure_and_build(&self, _unit: &UnitSpec) -> Result<crate::toolchain::BuildOutput, DriverError> {
            Err(DriverError::Cancelled)
        }
    }

    struct NoTests;

    impl TestRunner for NoTests {
        fn run_test(&self, entry: &crate::manifest::UnifiedEntry, _work_dir: &Path) -> crate::runner::TestRunResult {
            crate::runner::TestRunResult::pass(&entry.name, 0)
        }
    }

    fn registry(root: &Path) -> PackageRegistry {
        let std_dir = root.join("std");
        PackageRegistry::new()
            .with(PackageHandle::new(COMPILER_PACKAGE, "1.0.0", root.join("compiler")))
            .unwrap()
            .with(PackageHandle::new(DECLARATOR_PACKAGE, "1.0.0", root.join("declarator")))
            .unwrap()
            .with(
                PackageHandle::new(STD_PACKAGE, "1.0.0", &std_dir)
                    .with_artifacts(ArtifactLayout::new(&std_dir).with_build_dir(&std_dir))
                    .with_user_info("NODE_PATH", "/opt/std/node"),
            )
            .unwrap()
    }

    fn settings(dir: &Path) -> MatrixSettings {
        let mut settings = MatrixSettings {
            run_mode: RunMode::Runtime,
            out_dir: dir.join("out"),
            source_root: dir.to_path_buf(),
            ..Default::default()
        };
        settings.target.target_abi = Some("x86_64-linux-gnu".into());
        settings.target.os = Some("linux".into());
        settings
    }

    #[test]
    fn test_exit_codes() {
        let err = OrchestratorError::Target(ConfigurationError::MissingTargetAbi);
        assert_eq!(err.exit_code(), ExitCode::Configuration);

        let err = OrchestratorError::Packages(PackageError::CyclicDependency {
            cycle: vec!["a".into(), "a".into()],
        });
        assert_eq!(err.exit_code(), ExitCode::Dependency);

        let err = OrchestratorError::Manifest(ManifestError::DuplicateTestName {
            name: "t".into(),
            first_case: "a.ts".into(),
            second_case: "b.ts".into(),
        });
        assert_eq!(err.exit_code(), ExitCode::DuplicateTest);
    }

    #[test]
    fn test_tool_env_under_ci() {
        let dir = TempDir::new().unwrap();
        let registry = registry(dir.path());
        let graph = resolve_packages(&settings(dir.path()), &registry).unwrap();
        let artifacts = ToolchainArtifacts::from_graph(&graph).unwrap();

        let host = HostEnvironment::from_vars(vec![
            ("CI".to_string(), "true".to_string()),
            ("WORKSPACE".to_string(), "/ws".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("GITHUB_TOKEN".to_string(), "s3cret".to_string()),
        ]);
        let env = tool_env(&settings(dir.path()), &host, &artifacts);

        assert_eq!(env.get("NODE_PATH"), Some("/opt/std/node"));
        assert_eq!(env.get("NPM_CONFIG_CACHE"), Some("/ws/.npm"));
        assert_eq!(env.get("PATH"), Some("/usr/bin"));
        assert_eq!(env.get("GITHUB_TOKEN"), None);
    }

    #[test]
    fn test_stage_std_imports_copies_only_ts() {
        let dir = TempDir::new().unwrap();
        let std_dir = dir.path().join("std");
        fs::create_dir_all(std_dir.join("declarations/tsnative/std")).unwrap();
        fs::write(std_dir.join("declarations/tsnative/std/array.ts"), "export {}").unwrap();
        fs::write(std_dir.join("declarations/README.md"), "docs").unwrap();
        fs::write(std_dir.join("lib.ts"), "export {}").unwrap();

        let out = dir.path().join("imports");
        assert_eq!(stage_std_imports(&std_dir, &out).unwrap(), 2);
        assert!(out.join("declarations/tsnative/std/array.ts").is_file());
        assert!(!out.join("declarations/README.md").exists());

        assert_eq!(stage_std_imports(&dir.path().join("missing"), &out).unwrap(), 0);
    }

    #[test]
    fn test_runtime_invocation_flags() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path());
        let host = HostEnvironment::default();
        let registry = registry(dir.path());
        let cancel = CancellationToken::new();
        let commands = RecordingCommands::default();
        let tools = Collaborators {
            packages: &registry,
            commands: &commands,
            driver: &NoDriver,
            tests: &NoTests,
        };

        let orchestrator = Orchestrator::new(&settings, &host, tools, &cancel);
        let plain = orchestrator
            .runtime_invocation(&FilterPattern::match_all(), &ToolEnv::default())
            .unwrap();
        assert_eq!(plain.display(), "npx ts-node src/compiler/runtime_test.ts");

        settings.test_filter = "timers".into();
        settings.runtime.excludes = vec!["promises".into(), "date".into()];
        let orchestrator = Orchestrator::new(&settings, &host, tools, &cancel);
        let filter = settings.filter().unwrap();
        let filtered = orchestrator.runtime_invocation(&filter, &ToolEnv::default()).unwrap();
        assert_eq!(
            filtered.display(),
            "npx ts-node src/compiler/runtime_test.ts --test_filter timers --exclude promises:date"
        );
    }

    #[test]
    fn test_runtime_mode_runs_setup_then_suite() {
        let dir = TempDir::new().unwrap();
        let settings = settings(dir.path());
        let host = HostEnvironment::default();
        let registry = registry(dir.path());
        let cancel = CancellationToken::new();
        let commands = RecordingCommands {
            fail_on: Some("runtime_test.ts"),
            ..Default::default()
        };
        let tools = Collaborators {
            packages: &registry,
            commands: &commands,
            driver: &NoDriver,
            tests: &NoTests,
        };

        let summary = Orchestrator::new(&settings, &host, tools, &cancel)
            .with_run_id("run-1")
            .run()
            .unwrap();

        let calls = commands.calls.lock().unwrap().clone();
        assert_eq!(calls[0], "npm install");
        assert!(calls[1].starts_with("npx ts-node"));
        assert_eq!(summary.phases.len(), 1);
        assert_eq!(summary.exit_code_enum(), Some(ExitCode::TestFailed));
        assert!(settings.out_dir.join(SUMMARY_FILE).is_file());
    }

    #[test]
    fn test_invalid_filter_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(dir.path());
        settings.test_filter = "(".into();
        let host = HostEnvironment::default();
        let registry = registry(dir.path());
        let cancel = CancellationToken::new();
        let commands = RecordingCommands::default();
        let tools = Collaborators {
            packages: &registry,
            commands: &commands,
            driver: &NoDriver,
            tests: &NoTests,
        };

        let err = Orchestrator::new(&settings, &host, tools, &cancel).run().unwrap_err();

        assert!(matches!(err, OrchestratorError::Config(_)));
        assert_eq!(err.exit_code(), ExitCode::Configuration);
        assert!(commands.calls.lock().unwrap().is_empty());
        assert!(!settings.out_dir.exists());
    }
}
