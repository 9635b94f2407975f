//! Process exit codes reported by the operator executor.

use serde::{Deserialize, Serialize};

/// Exit code of an operator execution.
///
/// `Success` on a clean kill; otherwise the code identifies the first
/// failing phase. The numeric values follow the usual shell conventions for
/// the generic codes and a 110..=116 band for phase-specific failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    #[default]
    Success,
    ServiceStartError,
    ServiceShutdownError,
    ResourceCreationError,
    ResourceDeletionError,
    OperationInitError,
    OperationRunningError,
    OperationShutdownError,
    Fatal,
    Interrupted,
}

impl ExitCode {
    /// Numeric process exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::ServiceStartError => 110,
            Self::ServiceShutdownError => 111,
            Self::ResourceCreationError => 112,
            Self::ResourceDeletionError => 113,
            Self::OperationInitError => 114,
            Self::OperationRunningError => 115,
            Self::OperationShutdownError => 116,
            Self::Fatal => 129,
            Self::Interrupted => 130,
        }
    }

    /// True when the code reports a failure.
    #[must_use]
    pub fn is_error(self) -> bool {
        self != Self::Success
    }
}
