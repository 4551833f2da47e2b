//! Static exclusion rules for compiled test cases
//!
//! Rules match by substring against the corpus-relative case path and may be
//! restricted to one target OS.

use serde::{Deserialize, Serialize};

use crate::target::TargetOs;

/// Built-in exclusion table: (pattern, OS the rule is limited to)
pub const DEFAULT_EXCLUSIONS: &[(&str, Option<TargetOs>)] = &[
    // declaration files are inputs, not cases
    (".d.ts", None),
    ("exceptions.ts", Some(TargetOs::Windows)),
    ("date.ts", Some(TargetOs::Windows)),
    ("inher.ts", Some(TargetOs::Windows)),
    ("runtime.ts", Some(TargetOs::Windows)),
    ("promises.ts", Some(TargetOs::Windows)),
];

/// A single exclusion rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    /// Substring matched against the case path
    pub pattern: String,

    /// Only applies when building for this OS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicable_os: Option<TargetOs>,
}

impl ExclusionRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            applicable_os: None,
        }
    }

    pub fn on_os(pattern: impl Into<String>, os: TargetOs) -> Self {
        Self {
            pattern: pattern.into(),
            applicable_os: Some(os),
        }
    }

    /// Whether the rule is active for `os`
    pub fn applies_to(&self, os: TargetOs) -> bool {
        self.applicable_os.map_or(true, |only| only == os)
    }

    pub fn matches(&self, case_path: &str) -> bool {
        !self.pattern.is_empty() && case_path.contains(&self.pattern)
    }
}

/// Ordered rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRules {
    rules: Vec<ExclusionRule>,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self::new(
            DEFAULT_EXCLUSIONS
                .iter()
                .map(|(pattern, os)| ExclusionRule {
                    pattern: pattern.to_string(),
                    applicable_os: *os,
                })
                .collect(),
        )
    }
}

impl ExclusionRules {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    /// The first active rule matching `case_path`, if any
    pub fn excluding_rule(&self, case_path: &str, os: TargetOs) -> Option<&ExclusionRule> {
        self.rules
            .iter()
            .find(|rule| rule.applies_to(os) && rule.matches(case_path))
    }

    pub fn is_excluded(&self, case_path: &str, os: TargetOs) -> bool {
        self.excluding_rule(case_path, os).is_some()
    }
}
