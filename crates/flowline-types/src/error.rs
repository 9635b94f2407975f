//! Structured error model for the pipeline core.
//!
//! [`CoreError`] carries classification and retry metadata. Construct via
//! category-specific factory methods. Every failure in the core eventually
//! becomes a state-machine signal; nothing is silently swallowed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a core error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing required parameter or dependency cycle. Fatal, detected
    /// before any resource is touched.
    Configuration,
    /// Transport unreachable or open timeout exceeded.
    Connectivity,
    /// Resource create/delete failure.
    Resource,
    /// Failure raised by a business-logic or plugin callback.
    Runtime,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Connectivity => "connectivity",
            Self::Resource => "resource",
            Self::Runtime => "runtime",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Minute-scale retry.
    Slow,
}

/// Structured error from a core operation.
///
/// Carries classification and retry metadata. Construct via the
/// category-specific factories (e.g. [`CoreError::connectivity`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct CoreError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CoreError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            backoff_class,
            details: None,
        }
    }

    /// Configuration error (fatal, not retryable).
    #[must_use]
    pub fn configuration(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Configuration, false, BackoffClass::Normal, code, message)
    }

    /// Connectivity error (retryable, normal backoff).
    #[must_use]
    pub fn connectivity(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Connectivity, true, BackoffClass::Normal, code, message)
    }

    /// Resource create/delete error (retryable, normal backoff).
    #[must_use]
    pub fn resource(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Resource, true, BackoffClass::Normal, code, message)
    }

    /// Runtime error from a callback (not retryable).
    #[must_use]
    pub fn runtime(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Runtime, false, BackoffClass::Normal, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the default backoff class.
    #[must_use]
    pub fn with_backoff(mut self, backoff_class: BackoffClass) -> Self {
        self.backoff_class = backoff_class;
        self
    }
}

/// Convenience alias used throughout the core crates.
pub type CoreResult<T> = Result<T, CoreError>;
