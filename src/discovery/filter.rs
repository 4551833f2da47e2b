//! User filter pattern for case selection

use std::fmt;

use regex_lite::Regex;

/// Pattern that selects every case
pub const MATCH_ALL: &str = ".*";

/// Errors for filter patterns
#[derive(Debug, thiserror::Error)]
#[error("invalid test filter '{pattern}': {source}")]
pub struct FilterError {
    pub pattern: String,
    #[source]
    pub source: regex_lite::Error,
}

/// A single regular expression searched (not fully matched) in case paths
#[derive(Debug, Clone)]
pub struct FilterPattern {
    source: String,
    /// `None` for the match-all default
    regex: Option<Regex>,
}

impl FilterPattern {
    pub fn new(pattern: &str) -> Result<Self, FilterError> {
        if pattern == MATCH_ALL {
            return Ok(Self::match_all());
        }
        let regex = Regex::new(pattern).map_err(|source| FilterError {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex: Some(regex),
        })
    }

    pub fn match_all() -> Self {
        Self {
            source: MATCH_ALL.to_string(),
            regex: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the user left the filter at its default
    pub fn is_match_all(&self) -> bool {
        self.source == MATCH_ALL
    }

    pub fn is_match(&self, case_path: &str) -> bool {
        self.regex.as_ref().map_or(true, |r| r.is_match(case_path))
    }
}

impl Default for FilterPattern {
    fn default() -> Self {
        Self::match_all()
    }
}

impl fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for FilterPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
