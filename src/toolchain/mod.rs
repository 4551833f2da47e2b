//! External toolchain seams
//!
//! Everything the orchestrator asks of the outside world goes through two
//! traits: [`BuildDriver`] configures and builds one unit, [`TestRunner`]
//! executes one test binary. The process-backed implementations drive CMake
//! and the built binaries through [`CommandRunner`]; tests plug in fakes.

mod cmake;
mod env;
mod process;

pub use cmake::{CmakeDriver, DEFAULT_GENERATOR};
pub use env::{EnvPolicy, ToolEnv};
pub use process::{
    tail_lines, CommandOutput, CommandRunner, Invocation, ProcessRunner, ProcessTestRunner, DIAGNOSTIC_TAIL_LINES,
};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::manifest::UnifiedEntry;
use crate::runner::TestRunResult;

/// Step of a configure-and-build invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStep {
    Configure,
    Build,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Configure => write!(f, "configure"),
            BuildStep::Build => write!(f, "build"),
        }
    }
}

/// Errors from driving an external tool
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} step failed (exit code {exit_code:?})")]
    StepFailed {
        step: BuildStep,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Human-readable failure text including captured tool output
    pub fn diagnostic(&self) -> String {
        match self {
            DriverError::StepFailed { output, .. } if !output.trim().is_empty() => {
                format!("{}\n{}", self, tail_lines(output, DIAGNOSTIC_TAIL_LINES))
            }
            _ => self.to_string(),
        }
    }
}

/// Everything needed to configure and build one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// Label used in logs (case path or phase name)
    pub label: String,

    /// Directory holding the build script
    pub script_root: PathBuf,

    /// Isolated output directory
    pub build_dir: PathBuf,

    /// Cache variables passed at configure time
    pub variables: BTreeMap<String, String>,

    /// Extra arguments for the native build tool (e.g. `-j1`)
    pub build_tool_args: Vec<String>,

    pub env: ToolEnv,
}

impl UnitSpec {
    pub fn new(label: impl Into<String>, script_root: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            script_root: script_root.into(),
            build_dir: build_dir.into(),
            variables: BTreeMap::new(),
            build_tool_args: Vec::new(),
            env: ToolEnv::default(),
        }
    }

    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn variables(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.variables.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn build_tool_arg(mut self, arg: impl Into<String>) -> Self {
        self.build_tool_args.push(arg.into());
        self
    }

    pub fn env(mut self, env: ToolEnv) -> Self {
        self.env = env;
        self
    }
}

/// Successful build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Captured tool output
    pub log: String,
    pub duration_ms: u64,
}

/// Configures and builds one unit in its build directory.
pub trait BuildDriver: Send + Sync {
    fn configure_and_build(&self, unit: &UnitSpec) -> Result<BuildOutput, DriverError>;
}

/// Executes one entry of the unified manifest from `work_dir`.
pub trait TestRunner: Send + Sync {
    fn run_test(&self, entry: &UnifiedEntry, work_dir: &Path) -> TestRunResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_spec_variables_merge() {
        let mut shared = BTreeMap::new();
        shared.insert("IS_TEST".to_string(), "ON".to_string());
        shared.insert("OPT_LEVEL".to_string(), "-O2".to_string());

        let unit = UnitSpec::new("basic/for.ts", "/pkg/compiler", "/out/build/basic_for_ts")
            .variables(&shared)
            .variable("OPT_LEVEL", "-O0")
            .build_tool_arg("-j1");

        assert_eq!(unit.variables["IS_TEST"], "ON");
        assert_eq!(unit.variables["OPT_LEVEL"], "-O0");
        assert_eq!(unit.build_tool_args, vec!["-j1"]);
    }

    #[test]
    fn test_diagnostic_includes_output_tail() {
        let output = (1..=60).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let err = DriverError::StepFailed {
            step: BuildStep::Build,
            exit_code: Some(2),
            output,
        };

        let diag = err.diagnostic();
        assert!(diag.starts_with("build step failed (exit code Some(2))"));
        assert!(diag.contains("line 60"));
        assert!(!diag.contains("line 20\n"));
    }
}
