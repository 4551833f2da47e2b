//! tsnative test-matrix CLI
//!
//! Entry point for the `tsnative-matrix` command-line tool.

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::PathBuf;
use std::process;
use tracing::{error, warn};

use tsnative_matrix::cancel::{CancellationToken, SignalHandler};
use tsnative_matrix::config::{EffectiveConfig, HostEnvironment, MatrixSettings, EFFECTIVE_CONFIG_FILE, REPO_CONFIG_FILE};
use tsnative_matrix::orchestrator::{
    discover_cases, load_registry, resolve_packages, Collaborators, Orchestrator, OrchestratorError,
};
use tsnative_matrix::summary::ExitCode;
use tsnative_matrix::target::TargetOs;
use tsnative_matrix::telemetry::{init_tracing, level_for};
use tsnative_matrix::toolchain::{CmakeDriver, ProcessRunner, ProcessTestRunner};

#[derive(Parser)]
#[command(name = "tsnative-matrix")]
#[command(about = "Build and run the tsnative compiled test matrix", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured suites
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Print matrix_summary.json instead of the human report
        #[arg(long)]
        json: bool,
    },

    /// List the cases the current filter selects
    Discover {
        #[command(flatten)]
        common: CommonArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved package build order
    Packages {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Validate configuration and print the effective config
    Verify {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug, Default)]
struct CommonArgs {
    /// Repo config file (default: tsnative-matrix.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// runtime, declarator, compile or all
    #[arg(long)]
    mode: Option<String>,

    /// Regular expression selecting case paths
    #[arg(long, short = 'f')]
    filter: Option<String>,

    /// Concurrent case builds
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    #[arg(long)]
    target_abi: Option<String>,

    #[arg(long)]
    os: Option<String>,

    #[arg(long)]
    arch: Option<String>,

    #[arg(long)]
    build_type: Option<String>,

    /// Output directory
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl CommonArgs {
    /// CLI layer: only flags that were given
    fn overrides(&self) -> Value {
        let mut root = Map::new();
        let mut target = Map::new();

        if let Some(mode) = &self.mode {
            root.insert("run_mode".into(), json!(mode));
        }
        if let Some(filter) = &self.filter {
            root.insert("test_filter".into(), json!(filter));
        }
        if let Some(jobs) = self.jobs {
            root.insert("jobs".into(), json!(jobs));
        }
        if let Some(out_dir) = &self.out_dir {
            root.insert("out_dir".into(), json!(out_dir.display().to_string()));
        }
        for (key, value) in [
            ("target_abi", &self.target_abi),
            ("os", &self.os),
            ("arch", &self.arch),
            ("build_type", &self.build_type),
        ] {
            if let Some(value) = value {
                target.insert(key.into(), json!(value));
            }
        }
        if !target.is_empty() {
            root.insert("target".into(), Value::Object(target));
        }
        Value::Object(root)
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { common, json } => run_matrix(&common, json),
        Commands::Discover { common, json } => run_discover(&common, json),
        Commands::Packages { common } => run_packages(&common),
        Commands::Verify { common } => run_verify(&common),
    }
}

fn fail(err: &OrchestratorError) -> ! {
    error!(error = %err, "run aborted");
    eprintln!("Error: {}", err);
    process::exit(err.exit_code().as_i32());
}

/// Initialise logging and build the layered configuration.
fn load(common: &CommonArgs) -> (EffectiveConfig, MatrixSettings, HostEnvironment) {
    init_tracing(common.log_json, level_for(common.verbose));

    let host = HostEnvironment::from_process();
    let repo_config = common.config.clone().unwrap_or_else(|| PathBuf::from(REPO_CONFIG_FILE));
    if common.config.is_some() && !repo_config.exists() {
        eprintln!("Configuration error: {} not found", repo_config.display());
        process::exit(ExitCode::Configuration.as_i32());
    }

    let host_config = host.host_config_path();
    let effective = match EffectiveConfig::build(host_config.as_deref(), Some(&repo_config), Some(common.overrides())) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(ExitCode::Configuration.as_i32());
        }
    };

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error reading working directory: {}", e);
            process::exit(ExitCode::Io.as_i32());
        }
    };
    let mut settings = effective.settings().clone();
    settings.anchor_paths(&cwd);

    (effective, settings, host)
}

fn run_matrix(common: &CommonArgs, json_output: bool) {
    let (effective, settings, host) = load(common);

    let cancel = CancellationToken::new();
    if let Err(e) = SignalHandler::new(cancel.clone()).install() {
        warn!(error = %e, "could not install interrupt handler");
    }

    let registry = load_registry(&settings).unwrap_or_else(|e| fail(&e));

    let runner = ProcessRunner::new(cancel.clone());
    let driver = CmakeDriver::new(runner.clone())
        .with_program(settings.toolchain.cmake.clone())
        .with_generator(settings.toolchain.generator.clone());
    let tests = ProcessTestRunner::new(runner.clone(), settings.env.policy().apply(host.vars.clone()));
    let tools = Collaborators {
        packages: &registry,
        commands: &runner,
        driver: &driver,
        tests: &tests,
    };

    let orchestrator = Orchestrator::new(&settings, &host, tools, &cancel);

    let effective = effective.with_run_id(orchestrator.run_id().to_string());
    let config_path = settings.out_dir.join(EFFECTIVE_CONFIG_FILE);
    if let Err(e) = fs::create_dir_all(&settings.out_dir).and_then(|_| effective.write_to_file(&config_path)) {
        warn!(path = %config_path.display(), error = %e, "could not write effective config");
    }

    let summary = orchestrator.run().unwrap_or_else(|e| fail(&e));

    if json_output {
        match summary.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing summary: {}", e);
                process::exit(ExitCode::Io.as_i32());
            }
        }
    } else {
        print!("{}", summary.render_report());
    }

    process::exit(summary.exit_code);
}

fn run_discover(common: &CommonArgs, json_output: bool) {
    let (_, settings, _) = load(common);

    let os = match settings.target.os.as_deref().map(str::parse::<TargetOs>) {
        Some(Ok(os)) => os,
        Some(Err(e)) => fail(&OrchestratorError::Target(e)),
        None => TargetOs::host(),
    };
    let discovery = discover_cases(&settings, os).unwrap_or_else(|e| fail(&e));

    if json_output {
        let output = json!({
            "os": os.to_string(),
            "filter": settings.test_filter,
            "cases": discovery.cases.iter().map(|c| &c.relative_path).collect::<Vec<_>>(),
            "excluded": discovery.excluded.iter().map(|c| &c.relative_path).collect::<Vec<_>>(),
            "filtered_out": discovery.filtered_out,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(ExitCode::Io.as_i32());
            }
        }
        return;
    }

    for case in &discovery.cases {
        println!("{}", case.relative_path);
    }
    eprintln!(
        "{} selected, {} excluded, {} filtered out",
        discovery.cases.len(),
        discovery.excluded.len(),
        discovery.filtered_out
    );
}

fn run_packages(common: &CommonArgs) {
    let (_, settings, _) = load(common);

    let registry = load_registry(&settings).unwrap_or_else(|e| fail(&e));
    let graph = resolve_packages(&settings, &registry).unwrap_or_else(|e| fail(&e));

    for handle in graph.order() {
        let scope = if graph.is_build_only(&handle.name) { "build" } else { "runtime" };
        println!("{:<8} {}  {}", scope, handle.reference(), handle.package_folder().display());
    }
}

fn run_verify(common: &CommonArgs) {
    let (effective, settings, _) = load(common);

    match effective.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(ExitCode::Io.as_i32());
        }
    }

    match settings.target_configuration() {
        Ok(target) => eprintln!("Configuration valid: {}", target),
        Err(e) => fail(&OrchestratorError::Target(e)),
    }
}
