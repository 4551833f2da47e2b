//! Error types for package resolution.

use std::path::PathBuf;

/// Errors raised while loading packages or resolving the graph.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// A named package could not be located by the package source.
    #[error("unresolved dependency '{name}' (required by {required_by})")]
    UnresolvedDependency { name: String, required_by: String },

    /// The requires graph loops back on itself.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Two registry entries declare the same package name.
    #[error("package '{0}' is registered more than once")]
    DuplicatePackage(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

impl PackageError {
    /// Name of the package the error is about, when there is one.
    pub fn package_name(&self) -> Option<&str> {
        match self {
            PackageError::UnresolvedDependency { name, .. } => Some(name),
            PackageError::CyclicDependency { cycle } => cycle.first().map(String::as_str),
            PackageError::DuplicatePackage(name) => Some(name),
            PackageError::Io { .. } | PackageError::Parse(_) => None,
        }
    }
}
