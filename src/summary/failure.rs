//! Failure taxonomy and stable exit codes

use serde::{Deserialize, Serialize};

/// Run or phase status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Status::Success)
    }
}

/// Cause of a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Invalid or incomplete configuration
    Configuration,
    /// Package graph could not be resolved
    Dependency,
    /// Two cases registered the same test
    DuplicateTest,
    /// A case (or the declarator unit) failed to build
    Build,
    /// A test failed, errored, or the runtime suite failed
    Test,
    Cancelled,
    Io,
}

impl FailureKind {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Configuration => ExitCode::Configuration,
            FailureKind::Dependency => ExitCode::Dependency,
            FailureKind::DuplicateTest => ExitCode::DuplicateTest,
            FailureKind::Build => ExitCode::BuildFailed,
            FailureKind::Test => ExitCode::TestFailed,
            FailureKind::Cancelled => ExitCode::Cancelled,
            FailureKind::Io => ExitCode::Io,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "Configuration error",
            FailureKind::Dependency => "Package resolution failed",
            FailureKind::DuplicateTest => "Duplicate test name",
            FailureKind::Build => "Case build failed",
            FailureKind::Test => "Test failed",
            FailureKind::Cancelled => "Run cancelled",
            FailureKind::Io => "IO error",
        }
    }
}

/// Stable process exit codes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    #[default]
    Success = 0,
    Io = 1,
    Configuration = 10,
    Dependency = 20,
    DuplicateTest = 30,
    BuildFailed = 40,
    TestFailed = 50,
    Cancelled = 80,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Io),
            10 => Some(ExitCode::Configuration),
            20 => Some(ExitCode::Dependency),
            30 => Some(ExitCode::DuplicateTest),
            40 => Some(ExitCode::BuildFailed),
            50 => Some(ExitCode::TestFailed),
            80 => Some(ExitCode::Cancelled),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

/// Folds recorded failures into one status and exit code.
///
/// Cancellation wins; otherwise a test failure outranks a build failure.
#[derive(Debug, Default)]
pub struct ExitCodeAggregator {
    has_cancelled: bool,
    has_test_failure: bool,
    has_build_failure: bool,
}

impl ExitCodeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Cancelled => self.has_cancelled = true,
            FailureKind::Test => self.has_test_failure = true,
            _ => self.has_build_failure = true,
        }
    }

    pub fn status(&self) -> Status {
        if self.has_cancelled {
            Status::Cancelled
        } else if self.has_test_failure || self.has_build_failure {
            Status::Failed
        } else {
            Status::Success
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.has_cancelled {
            ExitCode::Cancelled
        } else if self.has_test_failure {
            ExitCode::TestFailed
        } else if self.has_build_failure {
            ExitCode::BuildFailed
        } else {
            ExitCode::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&Status::Success).unwrap(), r#""success""#);
        assert_eq!(serde_json::to_string(&Status::Cancelled).unwrap(), r#""cancelled""#);
    }

    #[test]
    fn test_failure_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&FailureKind::DuplicateTest).unwrap(),
            r#""DUPLICATE_TEST""#
        );
    }

    #[test]
    fn test_exit_code_round_trip() {
        for code in [0, 1, 10, 20, 30, 40, 50, 80] {
            assert_eq!(ExitCode::from_i32(code).unwrap().as_i32(), code);
        }
        assert_eq!(ExitCode::from_i32(999), None);
        assert_eq!(FailureKind::Configuration.exit_code().as_i32(), 10);
    }

    #[test]
    fn test_aggregator_all_success() {
        let agg = ExitCodeAggregator::new();
        assert_eq!(agg.status(), Status::Success);
        assert!(agg.exit_code().is_success());
    }

    #[test]
    fn test_aggregator_test_failure_outranks_build_failure() {
        let mut agg = ExitCodeAggregator::new();
        agg.add(FailureKind::Build);
        assert_eq!(agg.exit_code(), ExitCode::BuildFailed);

        agg.add(FailureKind::Test);
        assert_eq!(agg.status(), Status::Failed);
        assert_eq!(agg.exit_code(), ExitCode::TestFailed);
    }

    #[test]
    fn test_aggregator_cancelled_wins() {
        let mut agg = ExitCodeAggregator::new();
        agg.add(FailureKind::Test);
        agg.add(FailureKind::Cancelled);

        assert_eq!(agg.status(), Status::Cancelled);
        assert_eq!(agg.exit_code(), ExitCode::Cancelled);
    }
}
