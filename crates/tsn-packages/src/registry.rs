//! Package sources.
//!
//! A [`PackageSource`] answers `resolve(name)` with an installed
//! [`PackageHandle`]. [`PackageRegistry`] is the in-memory source, loadable
//! from a `packages.toml` file:
//!
//! ```toml
//! [[package]]
//! name = "tsnative-std"
//! version = "0.3.0"
//! package_folder = "std"
//! build_requires = ["tsnative-declarator"]
//! build_dirs = ["."]
//!
//! [package.user_info]
//! NODE_PATH = "/opt/tsnative/std/declarations/tsnative"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::PackageError;
use crate::handle::PackageHandle;

/// Locates installed packages by name.
pub trait PackageSource: Send + Sync {
    /// Look up a package; `None` when the source does not know it.
    fn resolve(&self, name: &str) -> Option<PackageHandle>;
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "package")]
    packages: Vec<PackageHandle>,
}

/// In-memory package registry
#[derive(Debug, Clone, Default)]
pub struct PackageRegistry {
    packages: BTreeMap<String, PackageHandle>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package, rejecting duplicate names.
    pub fn insert(&mut self, handle: PackageHandle) -> Result<(), PackageError> {
        if self.packages.contains_key(&handle.name) {
            return Err(PackageError::DuplicatePackage(handle.name));
        }
        self.packages.insert(handle.name.clone(), handle);
        Ok(())
    }

    /// Builder-style insert for tests and fixtures.
    pub fn with(mut self, handle: PackageHandle) -> Result<Self, PackageError> {
        self.insert(handle)?;
        Ok(self)
    }

    /// Parse a registry document.
    pub fn from_toml_str(contents: &str) -> Result<Self, PackageError> {
        let file: RegistryFile = toml::from_str(contents)?;
        let mut registry = Self::new();
        for handle in file.packages {
            registry.insert(handle)?;
        }
        Ok(registry)
    }

    /// Load a registry file; relative package folders are taken relative
    /// to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, PackageError> {
        let contents = fs::read_to_string(path).map_err(|source| PackageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut registry = Self::from_toml_str(&contents)?;

        if let Some(base) = path.parent() {
            for handle in registry.packages.values_mut() {
                if handle.artifacts.package_folder.is_relative() {
                    handle.artifacts.package_folder = base.join(&handle.artifacts.package_folder);
                }
            }
        }

        debug!(path = %path.display(), packages = registry.len(), "loaded package registry");
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Registered package names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }
}

impl PackageSource for PackageRegistry {
    fn resolve(&self, name: &str) -> Option<PackageHandle> {
        self.packages.get(name).cloned()
    }
}
