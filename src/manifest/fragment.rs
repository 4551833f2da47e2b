//! Per-case CTest fragments
//!
//! Each successfully built unit leaves a `CTestTestfile.cmake` in its build
//! directory. `add_test(<name> <path> ...)` registers a test and
//! `subdirs(...)` points at nested fragments left by `add_subdirectory`;
//! comments and property commands are skipped.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ManifestError;

/// File name of a CTest manifest
pub const FRAGMENT_FILE: &str = "CTestTestfile.cmake";

/// One registered test of a fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    /// Absolute path of the built test binary
    pub binary_path: PathBuf,
}

/// Tests registered by one case build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFragment {
    /// Relative path of the owning case
    pub case: String,
    pub entries: Vec<ManifestEntry>,

    /// Nested fragment directories named by `subdirs(...)`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdirs: Vec<PathBuf>,
}

impl ManifestFragment {
    pub fn new(case: impl Into<String>, entries: Vec<ManifestEntry>) -> Self {
        Self {
            case: case.into(),
            entries,
            subdirs: Vec::new(),
        }
    }

    /// Parse fragment text; relative binary and subdirectory paths resolve
    /// against `base_dir`. Nested fragments are not read.
    pub fn parse(case: &str, contents: &str, base_dir: &Path, origin: &Path) -> Result<Self, ManifestError> {
        let mut fragment = Self::new(case, Vec::new());
        let malformed = |index: usize, line: &str| ManifestError::MalformedFragment {
            path: origin.to_path_buf(),
            line: index + 1,
            content: line.to_string(),
        };

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.starts_with("subdirs(") {
                let dirs = parse_subdirs(line).ok_or_else(|| malformed(index, line))?;
                fragment.subdirs.extend(dirs.into_iter().map(|d| resolve(base_dir, d)));
                continue;
            }
            if !line.starts_with("add_test(") {
                continue;
            }

            let (name, path) = parse_add_test(line).ok_or_else(|| malformed(index, line))?;
            check_test_name(case, &name)?;
            fragment.entries.push(ManifestEntry {
                name,
                binary_path: resolve(base_dir, path),
            });
        }

        Ok(fragment)
    }

    /// Read `<build_dir>/CTestTestfile.cmake` and every fragment it reaches
    /// through `subdirs(...)`, depth first.
    pub fn from_build_dir(case: &str, build_dir: &Path) -> Result<Self, ManifestError> {
        let mut fragment = Self::new(case, Vec::new());
        let mut visited = HashSet::new();
        collect(case, build_dir, &mut visited, &mut fragment)?;
        debug!(
            case,
            tests = fragment.entries.len(),
            nested = fragment.subdirs.len(),
            "parsed manifest fragment"
        );
        Ok(fragment)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn collect(
    case: &str,
    dir: &Path,
    visited: &mut HashSet<PathBuf>,
    into: &mut ManifestFragment,
) -> Result<(), ManifestError> {
    let key = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if !visited.insert(key) {
        return Ok(());
    }

    let path = dir.join(FRAGMENT_FILE);
    if !path.is_file() {
        return Err(ManifestError::MissingFragment {
            case: case.to_string(),
            path,
        });
    }
    let contents = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
        path: path.clone(),
        source,
    })?;

    let parsed = ManifestFragment::parse(case, &contents, dir, &path)?;
    into.entries.extend(parsed.entries);
    for sub in parsed.subdirs {
        into.subdirs.push(sub.clone());
        collect(case, &sub, visited, into)?;
    }
    Ok(())
}

fn resolve(base_dir: &Path, path: String) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Test names become file names under `bin/`, so they must be one plain
/// path component.
pub fn check_test_name(case: &str, name: &str) -> Result<(), ManifestError> {
    let plain = !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\']);
    if plain {
        Ok(())
    } else {
        Err(ManifestError::InvalidTestName {
            name: name.to_string(),
            case: case.to_string(),
        })
    }
}

/// Extract the directories of a `subdirs(...)` command line.
pub fn parse_subdirs(line: &str) -> Option<Vec<String>> {
    let body = line.trim().strip_prefix("subdirs(")?;
    let body = &body[..body.rfind(')')?];
    let dirs: Vec<String> = Arguments { rest: body }.collect();
    if dirs.iter().any(String::is_empty) {
        return None;
    }
    Some(dirs)
}

/// Extract `(name, path)` from an `add_test(...)` command line.
///
/// Arguments may be bare, double-quoted, or CMake bracket arguments
/// (`[=[name]=]`).
pub fn parse_add_test(line: &str) -> Option<(String, String)> {
    let body = line.trim().strip_prefix("add_test(")?;
    let body = &body[..body.rfind(')')?];

    let mut args = Arguments { rest: body };
    let name = args.next()?;
    let path = args.next()?;
    if name.is_empty() || path.is_empty() {
        return None;
    }
    Some((name, path))
}

struct Arguments<'a> {
    rest: &'a str,
}

impl Iterator for Arguments<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let s = self.rest.trim_start();
        if s.is_empty() {
            return None;
        }

        if let Some(quoted) = s.strip_prefix('"') {
            let end = quoted.find('"')?;
            self.rest = &quoted[end + 1..];
            return Some(quoted[..end].to_string());
        }

        if let Some(open) = s.strip_prefix('[') {
            let equals = open.chars().take_while(|&c| c == '=').count();
            let inner = open[equals..].strip_prefix('[')?;
            let close = format!("]{}]", "=".repeat(equals));
            let end = inner.find(&close)?;
            self.rest = &inner[end + close.len()..];
            return Some(inner[..end].to_string());
        }

        let end = s.find(char::is_whitespace).unwrap_or(s.len());
        self.rest = &s[end..];
        Some(s[..end].to_string())
    }
}
