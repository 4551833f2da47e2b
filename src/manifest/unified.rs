//! Unified test manifest

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fragment::{check_test_name, ManifestFragment, FRAGMENT_FILE};
use super::ManifestError;
use crate::build::{CaseBuildReport, CaseOutcome};

/// Directory (relative to the output dir) holding staged test binaries
pub const BIN_DIR: &str = "bin";

/// One test of the aggregate suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedEntry {
    pub name: String,

    /// Case that produced the test
    pub case: String,

    /// Binary inside the case's build directory
    pub source_binary: PathBuf,

    /// `bin/<name>` relative to the output directory
    pub packaged_path: String,
}

impl UnifiedEntry {
    pub fn new(name: impl Into<String>, case: impl Into<String>, source_binary: PathBuf) -> Self {
        let name = name.into();
        Self {
            packaged_path: format!("{BIN_DIR}/{name}"),
            name,
            case: case.into(),
            source_binary,
        }
    }
}

/// A test whose binary could not be copied into `bin/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingFailure {
    pub name: String,
    pub case: String,
    pub diagnostic: String,
}

/// The aggregate suite, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedManifest {
    entries: Vec<UnifiedEntry>,
}

impl UnifiedManifest {
    pub fn entries(&self) -> &[UnifiedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// CTest text: one `add_test(<name> "bin/<name>")` per entry
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("add_test({} \"{}\")\n", e.name, e.packaged_path))
            .collect()
    }

    /// Write `CTestTestfile.cmake` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ManifestError> {
        fs::create_dir_all(dir).map_err(|source| ManifestError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(FRAGMENT_FILE);
        fs::write(&path, self.render()).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), tests = self.len(), "wrote unified manifest");
        Ok(path)
    }

    /// Copy every test binary to `<out_dir>/bin/`.
    ///
    /// An entry whose binary cannot be copied is dropped from the manifest
    /// and returned; the rest are still staged. Only failing to create
    /// `bin/` itself is an error.
    pub fn stage_binaries(&mut self, out_dir: &Path) -> Result<Vec<StagingFailure>, ManifestError> {
        let bin = out_dir.join(BIN_DIR);
        fs::create_dir_all(&bin).map_err(|source| ManifestError::Io {
            path: bin.clone(),
            source,
        })?;

        let mut failures = Vec::new();
        self.entries.retain(|entry| {
            match fs::copy(&entry.source_binary, out_dir.join(&entry.packaged_path)) {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        test = %entry.name,
                        case = %entry.case,
                        binary = %entry.source_binary.display(),
                        error = %e,
                        "could not stage test binary"
                    );
                    failures.push(StagingFailure {
                        name: entry.name.clone(),
                        case: entry.case.clone(),
                        diagnostic: format!("{}: {}", entry.source_binary.display(), e),
                    });
                    false
                }
            }
        });

        info!(count = self.len(), failed = failures.len(), dir = %bin.display(), "staged test binaries");
        Ok(failures)
    }

    /// Copy staged binaries and the manifest from `out_dir` into `package_dir`.
    pub fn package(&self, out_dir: &Path, package_dir: &Path) -> Result<(), ManifestError> {
        let bin = package_dir.join(BIN_DIR);
        fs::create_dir_all(&bin).map_err(|source| ManifestError::Io {
            path: bin.clone(),
            source,
        })?;

        for entry in &self.entries {
            let src = out_dir.join(&entry.packaged_path);
            fs::copy(&src, package_dir.join(&entry.packaged_path))
                .map_err(|source| ManifestError::Io { path: src, source })?;
        }
        self.write_to(package_dir)?;

        info!(dir = %package_dir.display(), tests = self.len(), "packaged test suite");
        Ok(())
    }
}

/// Merges per-case fragments into one manifest.
pub struct ManifestAggregator;

impl ManifestAggregator {
    /// Aggregate the fragments of successfully built cases.
    pub fn aggregate(reports: &[CaseBuildReport]) -> Result<UnifiedManifest, ManifestError> {
        Self::aggregate_fragments(reports.iter().filter_map(|r| match &r.outcome {
            CaseOutcome::Built { fragment, .. } => Some(fragment),
            _ => None,
        }))
    }

    /// Fragments must arrive in discovery order.
    pub fn aggregate_fragments<'a, I>(fragments: I) -> Result<UnifiedManifest, ManifestError>
    where
        I: IntoIterator<Item = &'a ManifestFragment>,
    {
        let mut by_name: HashMap<String, String> = HashMap::new();
        let mut entries = Vec::new();

        for fragment in fragments {
            for entry in &fragment.entries {
                check_test_name(&fragment.case, &entry.name)?;
                if let Some(first) = by_name.get(&entry.name) {
                    return Err(ManifestError::DuplicateTestName {
                        name: entry.name.clone(),
                        first_case: first.clone(),
                        second_case: fragment.case.clone(),
                    });
                }

                by_name.insert(entry.name.clone(), fragment.case.clone());
                entries.push(UnifiedEntry::new(&entry.name, &fragment.case, entry.binary_path.clone()));
            }
        }

        Ok(UnifiedManifest { entries })
    }
}
