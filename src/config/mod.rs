//! Layered configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host config (~/.config/tsnative/matrix.toml)
//! 3. Repo config (tsnative-matrix.toml)
//! 4. CLI flags
//!
//! The merged value is deserialized once into [`MatrixSettings`] and passed
//! down explicitly; nothing reads configuration from globals after startup.

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, EFFECTIVE_CONFIG_FILE};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    DeclaratorSettings, DiscoverySettings, EnvSettings, HostEnvironment, MatrixSettings, PackageSettings,
    RunMode, RuntimeSettings, TargetSettings, ToolSettings,
};

/// Repo config file name, looked up in the working directory
pub const REPO_CONFIG_FILE: &str = "tsnative-matrix.toml";
