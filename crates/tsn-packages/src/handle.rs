//! Resolved package handles.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk layout of an installed package.
///
/// Directory lists are stored relative to `package_folder` and resolved on
/// access, mirroring how package managers describe `cpp_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    /// Root folder of the installed package
    pub package_folder: PathBuf,

    #[serde(default = "default_include_dirs")]
    pub include_dirs: Vec<PathBuf>,

    #[serde(default = "default_lib_dirs")]
    pub lib_dirs: Vec<PathBuf>,

    #[serde(default = "default_bin_dirs")]
    pub bin_dirs: Vec<PathBuf>,

    /// Build-script directories (CMake modules, shipped declarations)
    #[serde(default)]
    pub build_dirs: Vec<PathBuf>,
}

fn default_include_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("include")]
}

fn default_lib_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("lib")]
}

fn default_bin_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("bin")]
}

impl ArtifactLayout {
    /// Layout with the conventional include/lib/bin directories.
    pub fn new(package_folder: impl Into<PathBuf>) -> Self {
        Self {
            package_folder: package_folder.into(),
            include_dirs: default_include_dirs(),
            lib_dirs: default_lib_dirs(),
            bin_dirs: default_bin_dirs(),
            build_dirs: Vec::new(),
        }
    }

    /// Add a build directory (relative to the package folder)
    pub fn with_build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_dirs.push(dir.into());
        self
    }

    fn absolute(&self, dirs: &[PathBuf]) -> Vec<PathBuf> {
        dirs.iter().map(|d| self.package_folder.join(d)).collect()
    }

    pub fn include_paths(&self) -> Vec<PathBuf> {
        self.absolute(&self.include_dirs)
    }

    pub fn lib_paths(&self) -> Vec<PathBuf> {
        self.absolute(&self.lib_dirs)
    }

    pub fn bin_paths(&self) -> Vec<PathBuf> {
        self.absolute(&self.bin_dirs)
    }

    /// Build directories; an empty list means the package folder itself.
    pub fn build_paths(&self) -> Vec<PathBuf> {
        if self.build_dirs.is_empty() {
            vec![self.package_folder.clone()]
        } else {
            self.absolute(&self.build_dirs)
        }
    }
}

/// A resolved, immutable build package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHandle {
    pub name: String,
    pub version: String,

    /// Runtime dependencies, in declaration order
    #[serde(default)]
    pub requires: Vec<String>,

    /// Dependencies needed only while building
    #[serde(default)]
    pub build_requires: Vec<String>,

    #[serde(flatten)]
    pub artifacts: ArtifactLayout,

    /// Values the package exports to its consumers (e.g. `NODE_PATH`)
    #[serde(default)]
    pub user_info: BTreeMap<String, String>,
}

impl PackageHandle {
    pub fn new(name: impl Into<String>, version: impl Into<String>, package_folder: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            requires: Vec::new(),
            build_requires: Vec::new(),
            artifacts: ArtifactLayout::new(package_folder),
            user_info: BTreeMap::new(),
        }
    }

    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.requires.push(name.into());
        self
    }

    pub fn build_requires(mut self, name: impl Into<String>) -> Self {
        self.build_requires.push(name.into());
        self
    }

    pub fn with_user_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_info.insert(key.into(), value.into());
        self
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactLayout) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Root folder of the installed package
    pub fn package_folder(&self) -> &Path {
        &self.artifacts.package_folder
    }

    /// `name/version` reference string
    pub fn reference(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}
