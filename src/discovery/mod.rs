//! Test case discovery and filtering
//!
//! Walks the case corpus in lexical path order, applies the static exclusion
//! table first and then the user filter. Plain-source cases are `*.ts` files;
//! every native-integration directory (default `cpp_integration`) is one case
//! of its own and is not searched for plain cases.

mod exclude;
mod filter;

pub use exclude::{ExclusionRule, ExclusionRules, DEFAULT_EXCLUSIONS};
pub use filter::{FilterError, FilterPattern, MATCH_ALL};

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::target::TargetOs;

/// Source extension of plain-source cases
pub const CASE_EXTENSION: &str = "ts";

/// Default directory names holding native-integration cases
pub const DEFAULT_NATIVE_DIRS: &[&str] = &["cpp_integration"];

/// How a case is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseCategory {
    /// Compiled standalone through the compiler package's build script
    PlainSource,
    /// Links native fixtures; carries its own build script
    NativeIntegration,
}

impl fmt::Display for CaseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseCategory::PlainSource => write!(f, "plain-source"),
            CaseCategory::NativeIntegration => write!(f, "native-integration"),
        }
    }
}

/// A discovered test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Path on disk (file for plain cases, directory for native ones)
    pub source_path: PathBuf,

    /// Corpus-relative path with `/` separators; the case identity
    pub relative_path: String,

    pub category: CaseCategory,

    pub excluded: bool,
}

impl TestCase {
    pub fn new(source_path: PathBuf, relative_path: impl Into<String>, category: CaseCategory) -> Self {
        Self {
            source_path,
            relative_path: relative_path.into(),
            category,
            excluded: false,
        }
    }

    /// Short display name (last path segment)
    pub fn name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path)
    }
}

/// Errors raised while walking the corpus
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("case corpus not found: {0}")]
    RootMissing(PathBuf),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Discovery inputs
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub rules: ExclusionRules,
    pub filter: FilterPattern,
    pub os: TargetOs,
    pub native_integration_dirs: Vec<String>,
}

impl DiscoveryOptions {
    pub fn new(os: TargetOs) -> Self {
        Self {
            rules: ExclusionRules::default(),
            filter: FilterPattern::default(),
            os,
            native_integration_dirs: DEFAULT_NATIVE_DIRS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_rules(mut self, rules: ExclusionRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_filter(mut self, filter: FilterPattern) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_native_dirs(mut self, dirs: Vec<String>) -> Self {
        self.native_integration_dirs = dirs;
        self
    }
}

/// Outcome of a discovery pass
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Runnable cases in lexical path order
    pub cases: Vec<TestCase>,

    /// Cases dropped by an exclusion rule (with `excluded` set)
    pub excluded: Vec<TestCase>,

    /// Number of non-excluded cases the filter did not select
    pub filtered_out: usize,
}

/// Enumerate every candidate under `root`, sorted by relative path.
pub fn enumerate_candidates(root: &Path, native_dirs: &[String]) -> Result<Vec<TestCase>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootMissing(root.to_path_buf()));
    }

    let mut candidates = Vec::new();
    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = normalize(rel);

        if entry.file_type().is_dir() {
            let name = entry.file_name().to_string_lossy();
            if native_dirs.iter().any(|d| d.as_str() == name) {
                candidates.push(TestCase::new(
                    entry.path().to_path_buf(),
                    relative,
                    CaseCategory::NativeIntegration,
                ));
                walker.skip_current_dir();
            }
            continue;
        }

        let is_case = entry
            .path()
            .extension()
            .map_or(false, |ext| ext == CASE_EXTENSION);
        if entry.file_type().is_file() && is_case {
            candidates.push(TestCase::new(
                entry.path().to_path_buf(),
                relative,
                CaseCategory::PlainSource,
            ));
        }
    }

    candidates.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(candidates)
}

/// Keep only the cases whose path the filter matches.
pub fn apply_filter(cases: Vec<TestCase>, filter: &FilterPattern) -> Vec<TestCase> {
    cases
        .into_iter()
        .filter(|case| filter.is_match(&case.relative_path))
        .collect()
}

/// Split candidates into (kept, excluded) using the rule table.
pub fn apply_exclusions(cases: Vec<TestCase>, rules: &ExclusionRules, os: TargetOs) -> (Vec<TestCase>, Vec<TestCase>) {
    let mut kept = Vec::with_capacity(cases.len());
    let mut excluded = Vec::new();

    for mut case in cases {
        match rules.excluding_rule(&case.relative_path, os) {
            Some(rule) => {
                warn!(case = %case.relative_path, rule = %rule.pattern, "excluding test case");
                case.excluded = true;
                excluded.push(case);
            }
            None => kept.push(case),
        }
    }

    (kept, excluded)
}

/// Discover runnable cases under `root`.
pub fn discover(root: &Path, options: &DiscoveryOptions) -> Result<Discovery, DiscoveryError> {
    let candidates = enumerate_candidates(root, &options.native_integration_dirs)?;
    let (kept, excluded) = apply_exclusions(candidates, &options.rules, options.os);

    let before = kept.len();
    let cases = apply_filter(kept, &options.filter);
    let filtered_out = before - cases.len();

    debug!(
        root = %root.display(),
        selected = cases.len(),
        excluded = excluded.len(),
        filtered_out,
        filter = %options.filter,
        "discovered test cases"
    );

    Ok(Discovery {
        cases,
        excluded,
        filtered_out,
    })
}

fn normalize(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
