//! Signals driving the operator state machine.

use std::fmt;

/// Transition trigger produced by phase execution, error conversion, or an
/// external interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stay in the current state and re-execute its phase.
    NoOp,
    ServiceStart,
    ResourcesCreation,
    ResourcesDeletion,
    Error,
    Shutdown,
    OperationInit,
    OperationStart,
    OperationStop,
    ServicesStop,
    Kill,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "NoOp",
            Self::ServiceStart => "ServiceStart",
            Self::ResourcesCreation => "ResourcesCreation",
            Self::ResourcesDeletion => "ResourcesDeletion",
            Self::Error => "Error",
            Self::Shutdown => "Shutdown",
            Self::OperationInit => "OperationInit",
            Self::OperationStart => "OperationStart",
            Self::OperationStop => "OperationStop",
            Self::ServicesStop => "ServicesStop",
            Self::Kill => "Kill",
        };
        f.write_str(s)
    }
}
