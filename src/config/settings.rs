//! Typed view of the merged configuration

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tsn_packages::RootRequirements;

use super::effective::ConfigError;
use crate::discovery::{FilterPattern, DEFAULT_NATIVE_DIRS, MATCH_ALL};
use crate::target::{BuildType, ConfigurationError, TargetConfiguration, TargetOs, ToolchainOptions};
use crate::toolchain::{EnvPolicy, DEFAULT_GENERATOR};

/// Which test suites a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Runtime suite driven by the configured command
    Runtime,
    /// Declarator unit tests
    Declarator,
    /// Compiled test matrix
    Compile,
    #[default]
    All,
}

impl RunMode {
    pub fn runs_runtime(&self) -> bool {
        matches!(self, RunMode::Runtime | RunMode::All)
    }

    pub fn runs_declarator(&self) -> bool {
        matches!(self, RunMode::Declarator | RunMode::All)
    }

    pub fn runs_compile(&self) -> bool {
        matches!(self, RunMode::Compile | RunMode::All)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Runtime => write!(f, "runtime"),
            RunMode::Declarator => write!(f, "declarator"),
            RunMode::Compile => write!(f, "compile"),
            RunMode::All => write!(f, "all"),
        }
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "runtime" => Ok(RunMode::Runtime),
            "declarator" => Ok(RunMode::Declarator),
            "compile" => Ok(RunMode::Compile),
            "all" => Ok(RunMode::All),
            other => Err(ConfigError::ValidationError(format!(
                "run_mode must be one of runtime, declarator, compile, all (got '{other}')"
            ))),
        }
    }
}

/// `[target]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    /// Defaults to the host OS
    pub os: Option<String>,
    /// Defaults to the host architecture
    pub arch: Option<String>,
    pub target_abi: Option<String>,
    pub build_type: String,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            os: None,
            arch: None,
            target_abi: None,
            build_type: BuildType::default().to_string(),
        }
    }
}

/// `[packages]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSettings {
    /// Registry file describing installed packages
    pub registry: PathBuf,
    /// Name of the consuming package
    pub root: String,
    pub requires: Vec<String>,
    pub build_requires: Vec<String>,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            registry: PathBuf::from("packages.toml"),
            root: "tsnative-tests".to_string(),
            requires: vec![tsn_packages::STD_PACKAGE.to_string()],
            build_requires: vec![
                tsn_packages::DECLARATOR_PACKAGE.to_string(),
                tsn_packages::COMPILER_PACKAGE.to_string(),
            ],
        }
    }
}

impl PackageSettings {
    pub fn root_requirements(&self) -> RootRequirements {
        RootRequirements {
            name: self.root.clone(),
            requires: self.requires.clone(),
            build_requires: self.build_requires.clone(),
        }
    }
}

/// `[discovery]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Directory names built as one native-integration case each
    pub native_integration_dirs: Vec<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            native_integration_dirs: DEFAULT_NATIVE_DIRS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// `[runtime]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Run once before the suite (empty to skip)
    pub setup: Vec<String>,
    /// Suite command; filter and exclude flags are appended
    pub command: Vec<String>,
    /// Runtime cases passed as `--exclude a:b`
    pub excludes: Vec<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            setup: vec!["npm".into(), "install".into()],
            command: vec!["npx".into(), "ts-node".into(), "src/compiler/runtime_test.ts".into()],
            excludes: Vec::new(),
        }
    }
}

/// `[declarator]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclaratorSettings {
    /// Build script root, relative to `source_root`
    pub script_root: PathBuf,
}

impl Default for DeclaratorSettings {
    fn default() -> Self {
        Self {
            script_root: PathBuf::from("src/declarator"),
        }
    }
}

/// `[toolchain]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub cmake: PathBuf,
    pub generator: Option<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            cmake: PathBuf::from("cmake"),
            generator: Some(DEFAULT_GENERATOR.to_string()),
        }
    }
}

/// `[env]` table: what child tools inherit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    /// Pass only allowlisted variables
    pub strict: bool,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl EnvSettings {
    pub fn policy(&self) -> EnvPolicy {
        let base = if self.strict { EnvPolicy::strict() } else { EnvPolicy::new() };
        let base = self.allow.iter().fold(base, |p, k| p.allow(k.clone()));
        self.deny.iter().fold(base, |p, k| p.deny(k.clone()))
    }
}

/// Typed orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixSettings {
    pub run_mode: RunMode,
    pub test_filter: String,

    /// Concurrent case builds; `None` uses every core
    pub jobs: Option<usize>,

    /// Root of the test package sources (`SOURCE_DIR`)
    pub source_root: PathBuf,
    /// Case corpus, relative to `source_root`
    pub corpus_root: PathBuf,
    pub out_dir: PathBuf,
    /// Receives `bin/` and the manifest when `run_mode` is `all`
    pub package_dir: Option<PathBuf>,

    pub target: TargetSettings,
    pub options: ToolchainOptions,
    /// Extra configure variables; win over derived ones
    pub overrides: BTreeMap<String, String>,

    pub packages: PackageSettings,
    pub discovery: DiscoverySettings,
    pub runtime: RuntimeSettings,
    pub declarator: DeclaratorSettings,
    pub toolchain: ToolSettings,
    pub env: EnvSettings,
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            run_mode: RunMode::All,
            test_filter: MATCH_ALL.to_string(),
            jobs: None,
            source_root: PathBuf::from("."),
            corpus_root: PathBuf::from("src/compiler/cases"),
            out_dir: PathBuf::from("build/compiler_tests"),
            package_dir: None,
            target: TargetSettings::default(),
            options: ToolchainOptions::default(),
            overrides: BTreeMap::new(),
            packages: PackageSettings::default(),
            discovery: DiscoverySettings::default(),
            runtime: RuntimeSettings::default(),
            declarator: DeclaratorSettings::default(),
            toolchain: ToolSettings::default(),
            env: EnvSettings::default(),
        }
    }
}

impl MatrixSettings {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == Some(0) {
            return Err(ConfigError::ValidationError("jobs must be greater than 0".to_string()));
        }
        if self.options.opt_level > 3 {
            return Err(ConfigError::ValidationError(format!(
                "options.opt_level must be in 0..=3 (got {})",
                self.options.opt_level
            )));
        }
        self.filter()?;
        if self.run_mode.runs_runtime() && self.runtime.command.is_empty() {
            return Err(ConfigError::ValidationError(
                "runtime.command must not be empty when the runtime suite runs".to_string(),
            ));
        }
        if self.discovery.native_integration_dirs.iter().any(|d| d.is_empty() || d.contains('/')) {
            return Err(ConfigError::ValidationError(
                "discovery.native_integration_dirs entries must be plain directory names".to_string(),
            ));
        }
        Ok(())
    }

    pub fn filter(&self) -> Result<FilterPattern, ConfigError> {
        Ok(FilterPattern::new(&self.test_filter)?)
    }

    /// Freeze the `[target]` and `[options]` tables.
    pub fn target_configuration(&self) -> Result<TargetConfiguration, ConfigurationError> {
        let mut builder = TargetConfiguration::builder()
            .maybe_target_abi(self.target.target_abi.clone())
            .build_type(self.target.build_type.parse()?)
            .options(self.options.clone())
            .option_overrides(self.overrides.clone());
        if let Some(os) = &self.target.os {
            builder = builder.os(os.parse::<TargetOs>()?);
        }
        if let Some(arch) = &self.target.arch {
            builder = builder.arch(arch.clone());
        }
        builder.build()
    }

    /// Make every relative path absolute against `base`.
    pub fn anchor_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        anchor(&mut self.source_root);
        anchor(&mut self.out_dir);
        anchor(&mut self.packages.registry);
        if let Some(dir) = self.package_dir.as_mut() {
            anchor(dir);
        }
    }

    /// Case corpus location
    pub fn corpus_dir(&self) -> PathBuf {
        self.source_root.join(&self.corpus_root)
    }

    pub fn declarator_script_root(&self) -> PathBuf {
        self.source_root.join(&self.declarator.script_root)
    }
}

/// Process facts read once at startup and passed down explicitly
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    /// `CI` is set to a truthy value
    pub ci: bool,
    /// CI workspace root (`WORKSPACE`)
    pub workspace: Option<PathBuf>,
    pub home: Option<PathBuf>,
    /// The ambient environment, filtered per invocation later
    pub vars: BTreeMap<String, String>,
}

impl HostEnvironment {
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: BTreeMap<String, String> = vars.into_iter().collect();
        let ci = vars
            .get("CI")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            ci,
            workspace: vars.get("WORKSPACE").filter(|v| !v.is_empty()).map(PathBuf::from),
            home: vars.get("HOME").or_else(|| vars.get("USERPROFILE")).map(PathBuf::from),
            vars,
        }
    }

    /// `~/.config/tsnative/matrix.toml`
    pub fn host_config_path(&self) -> Option<PathBuf> {
        self.home
            .as_ref()
            .map(|h| h.join(".config").join("tsnative").join("matrix.toml"))
    }
}
