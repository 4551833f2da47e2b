//! Target configuration context
//!
//! The immutable bag of build settings (OS, architecture, target ABI, build
//! type, option overrides) shared by every build unit. Derived settings are
//! computed once when the context is built.
//!
//! A missing target ABI is a configuration error raised by
//! [`TargetConfigurationBuilder::build`], before any case is discovered.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operating system of the build target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetOs {
    Linux,
    Windows,
    Macos,
    Android,
    Ios,
}

impl TargetOs {
    /// OS of the machine running the orchestrator
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else if cfg!(target_os = "macos") {
            TargetOs::Macos
        } else if cfg!(target_os = "android") {
            TargetOs::Android
        } else if cfg!(target_os = "ios") {
            TargetOs::Ios
        } else {
            TargetOs::Linux
        }
    }

    /// Whether test binaries built for this OS can run on the build host
    pub fn can_execute_tests(&self) -> bool {
        !matches!(self, TargetOs::Android | TargetOs::Ios)
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOs::Linux => write!(f, "Linux"),
            TargetOs::Windows => write!(f, "Windows"),
            TargetOs::Macos => write!(f, "Macos"),
            TargetOs::Android => write!(f, "Android"),
            TargetOs::Ios => write!(f, "iOS"),
        }
    }
}

impl FromStr for TargetOs {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(TargetOs::Linux),
            "windows" => Ok(TargetOs::Windows),
            "macos" | "darwin" => Ok(TargetOs::Macos),
            "android" => Ok(TargetOs::Android),
            "ios" => Ok(TargetOs::Ios),
            _ => Err(ConfigurationError::UnknownOs(s.to_string())),
        }
    }
}

/// Build type of the native build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BuildType {
    Debug,
    #[default]
    Release,
    RelWithDebInfo,
    MinSizeRel,
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildType::Debug => write!(f, "Debug"),
            BuildType::Release => write!(f, "Release"),
            BuildType::RelWithDebInfo => write!(f, "RelWithDebInfo"),
            BuildType::MinSizeRel => write!(f, "MinSizeRel"),
        }
    }
}

impl FromStr for BuildType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(BuildType::Debug),
            "release" => Ok(BuildType::Release),
            "relwithdebinfo" => Ok(BuildType::RelWithDebInfo),
            "minsizerel" => Ok(BuildType::MinSizeRel),
            _ => Err(ConfigurationError::UnknownBuildType(s.to_string())),
        }
    }
}

/// Compiler switches forwarded to every build unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainOptions {
    /// Optimization level, 0-3
    pub opt_level: u8,

    /// Verbose native build output
    pub verbose: bool,

    /// Print generated IR
    pub print_ir: bool,

    /// Trace module imports during compilation
    pub trace_import: bool,

    /// Collect compiler build-time profile
    pub profile_build: bool,
}

impl Default for ToolchainOptions {
    fn default() -> Self {
        Self {
            opt_level: 2,
            verbose: false,
            print_ir: false,
            trace_import: false,
            profile_build: false,
        }
    }
}

/// Errors raised while constructing the target context
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("target ABI is not specified; provide target.target_abi (e.g. x86_64-linux-gnu)")]
    MissingTargetAbi,

    #[error("unknown target OS: {0}")]
    UnknownOs(String),

    #[error("unknown build type: {0}")]
    UnknownBuildType(String),

    #[error("opt_level must be in 0..=3, got {0}")]
    InvalidOptLevel(u8),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Settings derived from the target once at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedSettings {
    /// Debug info and source maps are generated
    pub debug_info: bool,

    /// Variables passed to every native configure step
    pub toolchain_variables: BTreeMap<String, String>,
}

/// Immutable target configuration shared by all build units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfiguration {
    os: TargetOs,
    arch: String,
    target_abi: String,
    build_type: BuildType,
    options: ToolchainOptions,
    option_overrides: BTreeMap<String, String>,
    derived: DerivedSettings,
}

impl TargetConfiguration {
    pub fn builder() -> TargetConfigurationBuilder {
        TargetConfigurationBuilder::default()
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn target_abi(&self) -> &str {
        &self.target_abi
    }

    pub fn build_type(&self) -> BuildType {
        self.build_type
    }

    pub fn options(&self) -> &ToolchainOptions {
        &self.options
    }

    pub fn option_overrides(&self) -> &BTreeMap<String, String> {
        &self.option_overrides
    }

    /// Source maps and `TS_DEBUG` are enabled for debug builds only
    pub fn debug_info(&self) -> bool {
        self.derived.debug_info
    }

    pub fn toolchain_variables(&self) -> &BTreeMap<String, String> {
        &self.derived.toolchain_variables
    }

    pub fn derived(&self) -> &DerivedSettings {
        &self.derived
    }
}

impl fmt::Display for TargetConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({}, {})", self.os, self.arch, self.target_abi, self.build_type)
    }
}

/// Builder for [`TargetConfiguration`]
#[derive(Debug, Clone, Default)]
pub struct TargetConfigurationBuilder {
    os: Option<TargetOs>,
    arch: Option<String>,
    target_abi: Option<String>,
    build_type: BuildType,
    options: ToolchainOptions,
    option_overrides: BTreeMap<String, String>,
}

impl TargetConfigurationBuilder {
    pub fn os(mut self, os: TargetOs) -> Self {
        self.os = Some(os);
        self
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn target_abi(mut self, abi: impl Into<String>) -> Self {
        self.target_abi = Some(abi.into());
        self
    }

    pub fn maybe_target_abi(mut self, abi: Option<String>) -> Self {
        self.target_abi = abi;
        self
    }

    pub fn build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self
    }

    pub fn options(mut self, options: ToolchainOptions) -> Self {
        self.options = options;
        self
    }

    pub fn option_override(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.option_overrides.insert(name.into(), value.into());
        self
    }

    pub fn option_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.option_overrides.extend(overrides);
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<TargetConfiguration, ConfigurationError> {
        let target_abi = match self.target_abi {
            Some(abi) if !abi.trim().is_empty() => abi.trim().to_string(),
            _ => return Err(ConfigurationError::MissingTargetAbi),
        };

        if self.options.opt_level > 3 {
            return Err(ConfigurationError::InvalidOptLevel(self.options.opt_level));
        }

        let os = self.os.unwrap_or_else(TargetOs::host);
        let arch = self
            .arch
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| std::env::consts::ARCH.to_string());

        let derived = derive_settings(&target_abi, self.build_type, &self.options, &self.option_overrides);

        Ok(TargetConfiguration {
            os,
            arch,
            target_abi,
            build_type: self.build_type,
            options: self.options,
            option_overrides: self.option_overrides,
            derived,
        })
    }
}

fn on_off(flag: bool) -> String {
    let value = if flag { "ON" } else { "OFF" };
    value.to_string()
}

fn derive_settings(
    target_abi: &str,
    build_type: BuildType,
    options: &ToolchainOptions,
    overrides: &BTreeMap<String, String>,
) -> DerivedSettings {
    let debug_info = build_type == BuildType::Debug;

    let mut vars = BTreeMap::new();
    vars.insert("CMAKE_CXX_COMPILER_TARGET".to_string(), target_abi.to_string());
    vars.insert("CMAKE_BUILD_TYPE".to_string(), build_type.to_string());
    vars.insert("IS_TEST".to_string(), on_off(true));
    vars.insert("RUN_EVENT_LOOP".to_string(), "oneshot".to_string());
    vars.insert("OPT_LEVEL".to_string(), format!("-O{}", options.opt_level));
    vars.insert("PRINT_IR".to_string(), on_off(options.print_ir));
    vars.insert("TRACE_IMPORT".to_string(), on_off(options.trace_import));
    vars.insert("TS_PROFILE_BUILD".to_string(), on_off(options.profile_build));
    if options.verbose {
        vars.insert("CMAKE_VERBOSE_MAKEFILE".to_string(), on_off(true));
    }
    if debug_info {
        vars.insert("TS_DEBUG".to_string(), on_off(true));
    }

    // explicit overrides win over everything derived above
    for (k, v) in overrides {
        vars.insert(k.clone(), v.clone());
    }

    DerivedSettings {
        debug_info,
        toolchain_variables: vars,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TargetConfigurationBuilder {
        TargetConfiguration::builder()
            .os(TargetOs::Linux)
            .arch("x86_64")
            .target_abi("x86_64-linux-gnu")
    }

    #[test]
    fn test_missing_abi_is_error() {
        let err = TargetConfiguration::builder().os(TargetOs::Linux).build().unwrap_err();
        assert_eq!(err, ConfigurationError::MissingTargetAbi);
    }

    #[test]
    fn test_blank_abi_is_error() {
        let err = TargetConfiguration::builder().target_abi("   ").build().unwrap_err();
        assert_eq!(err, ConfigurationError::MissingTargetAbi);
    }

    #[test]
    fn test_release_has_no_debug_settings() {
        let target = base().build().unwrap();

        assert!(!target.debug_info());
        assert!(!target.toolchain_variables().contains_key("TS_DEBUG"));
        assert_eq!(target.toolchain_variables()["CMAKE_CXX_COMPILER_TARGET"], "x86_64-linux-gnu");
        assert_eq!(target.toolchain_variables()["OPT_LEVEL"], "-O2");
        assert_eq!(target.toolchain_variables()["RUN_EVENT_LOOP"], "oneshot");
    }

    #[test]
    fn test_debug_enables_source_maps() {
        let target = base().build_type(BuildType::Debug).build().unwrap();

        assert!(target.debug_info());
        assert_eq!(target.toolchain_variables()["TS_DEBUG"], "ON");
    }

    #[test]
    fn test_options_and_overrides() {
        let target = base()
            .options(ToolchainOptions {
                opt_level: 0,
                verbose: true,
                print_ir: true,
                ..ToolchainOptions::default()
            })
            .option_override("OPT_LEVEL", "-O1")
            .option_override("EXTRA", "yes")
            .build()
            .unwrap();

        let vars = target.toolchain_variables();
        assert_eq!(vars["OPT_LEVEL"], "-O1");
        assert_eq!(vars["PRINT_IR"], "ON");
        assert_eq!(vars["CMAKE_VERBOSE_MAKEFILE"], "ON");
        assert_eq!(vars["EXTRA"], "yes");
        assert_eq!(target.option_overrides().len(), 2);
    }

    #[test]
    fn test_invalid_opt_level() {
        let err = base()
            .options(ToolchainOptions {
                opt_level: 4,
                ..ToolchainOptions::default()
            })
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidOptLevel(4));
    }

    #[test]
    fn test_os_parsing() {
        assert_eq!("windows".parse::<TargetOs>().unwrap(), TargetOs::Windows);
        assert_eq!("Macos".parse::<TargetOs>().unwrap(), TargetOs::Macos);
        assert!("plan9".parse::<TargetOs>().is_err());
        assert!(!TargetOs::Android.can_execute_tests());
        assert!(TargetOs::Linux.can_execute_tests());
    }

    #[test]
    fn test_build_type_parsing() {
        assert_eq!("debug".parse::<BuildType>().unwrap(), BuildType::Debug);
        assert_eq!("RelWithDebInfo".parse::<BuildType>().unwrap(), BuildType::RelWithDebInfo);
        assert!("fast".parse::<BuildType>().is_err());
    }
}
