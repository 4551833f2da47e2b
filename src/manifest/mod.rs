//! Test manifests: per-case fragments and the unified suite

mod fragment;
mod unified;

pub use fragment::{check_test_name, parse_add_test, parse_subdirs, ManifestEntry, ManifestFragment, FRAGMENT_FILE};
pub use unified::{ManifestAggregator, StagingFailure, UnifiedEntry, UnifiedManifest, BIN_DIR};

use std::path::PathBuf;

/// Manifest errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("case {case} produced no manifest at {path}")]
    MissingFragment { case: String, path: PathBuf },

    #[error("malformed add_test at {path}:{line}: {content}")]
    MalformedFragment { path: PathBuf, line: usize, content: String },

    #[error("test name '{name}' registered by {case} is not a plain file name")]
    InvalidTestName { name: String, case: String },

    #[error("duplicate test name '{name}' (registered by {first_case} and {second_case})")]
    DuplicateTestName {
        name: String,
        first_case: String,
        second_case: String,
    },

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
