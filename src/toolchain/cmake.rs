//! CMake-backed build driver

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info};

use super::process::{CommandRunner, Invocation, ProcessRunner};
use super::{BuildDriver, BuildOutput, BuildStep, DriverError, UnitSpec};

/// Generator used by the toolchain's build scripts
pub const DEFAULT_GENERATOR: &str = "Unix Makefiles";

/// Runs `cmake -S <script_root> -B <build_dir>` then `cmake --build`.
pub struct CmakeDriver<R: CommandRunner = ProcessRunner> {
    runner: R,
    program: PathBuf,
    generator: Option<String>,
}

impl<R: CommandRunner> CmakeDriver<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            program: PathBuf::from("cmake"),
            generator: Some(DEFAULT_GENERATOR.to_string()),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// `None` lets CMake pick its platform default
    pub fn with_generator(mut self, generator: Option<String>) -> Self {
        self.generator = generator;
        self
    }

    pub fn configure_invocation(&self, unit: &UnitSpec) -> Invocation {
        let mut inv = Invocation::new(&self.program)
            .arg("-S")
            .arg(unit.script_root.display().to_string())
            .arg("-B")
            .arg(unit.build_dir.display().to_string());
        if let Some(generator) = &self.generator {
            inv = inv.arg("-G").arg(generator.clone());
        }
        inv.args(unit.variables.iter().map(|(k, v)| format!("-D{k}={v}")))
            .current_dir(&unit.build_dir)
            .env(unit.env.clone())
    }

    pub fn build_invocation(&self, unit: &UnitSpec) -> Invocation {
        let mut inv = Invocation::new(&self.program)
            .arg("--build")
            .arg(unit.build_dir.display().to_string());
        if !unit.build_tool_args.is_empty() {
            inv = inv.arg("--").args(unit.build_tool_args.iter().cloned());
        }
        inv.current_dir(&unit.build_dir).env(unit.env.clone())
    }

    fn step(&self, step: BuildStep, invocation: &Invocation, log: &mut String) -> Result<(), DriverError> {
        debug!(%step, command = %invocation.display(), "running build step");
        let out = self.runner.run(invocation)?;
        let output = out.combined();
        log.push_str(&output);

        if out.success {
            Ok(())
        } else {
            Err(DriverError::StepFailed {
                step,
                exit_code: out.exit_code,
                output,
            })
        }
    }
}

impl<R: CommandRunner> BuildDriver for CmakeDriver<R> {
    fn configure_and_build(&self, unit: &UnitSpec) -> Result<BuildOutput, DriverError> {
        let start = Instant::now();
        fs::create_dir_all(&unit.build_dir)?;

        let mut log = String::new();
        self.step(BuildStep::Configure, &self.configure_invocation(unit), &mut log)?;
        self.step(BuildStep::Build, &self.build_invocation(unit), &mut log)?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(unit = %unit.label, duration_ms, "built");
        Ok(BuildOutput { log, duration_ms })
    }
}
