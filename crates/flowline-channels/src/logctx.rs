//! Context-path logging on top of `tracing`.
//!
//! A logging call carries the structured record plus an explicit context
//! path (ancestor names joined with `/`); sinks are whatever subscribers
//! the host process installed. Channel-scoped log levels (`logLevel` in
//! `channelConfig`) filter here before the event reaches `tracing`.

use std::str::FromStr;

use tracing::Level;

/// A logger bound to one context path and level.
#[derive(Debug, Clone)]
pub struct ContextLogger {
    path: String,
    level: Level,
}

impl ContextLogger {
    /// Create a root logger. Unknown level strings fall back to `DEBUG`.
    #[must_use]
    pub fn new(root: impl Into<String>, level: &str) -> Self {
        let parsed = Level::from_str(level).unwrap_or_else(|_| {
            tracing::warn!(level, "unknown log level, falling back to DEBUG");
            Level::DEBUG
        });
        Self { path: root.into(), level: parsed }
    }

    /// Derive a child logger with `segment` appended to the context path.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        Self { path: format!("{}/{segment}", self.path), level: self.level }
    }

    /// The context path of this logger.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn enabled(&self, level: Level) -> bool {
        // tracing orders severities ERROR < WARN < INFO < DEBUG < TRACE.
        level <= self.level
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        if self.enabled(Level::DEBUG) {
            tracing::debug!(path = %self.path, "{}", msg.as_ref());
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if self.enabled(Level::INFO) {
            tracing::info!(path = %self.path, "{}", msg.as_ref());
        }
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        if self.enabled(Level::WARN) {
            tracing::warn!(path = %self.path, "{}", msg.as_ref());
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        if self.enabled(Level::ERROR) {
            tracing::error!(path = %self.path, "{}", msg.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_extends_the_path() {
        let root = ContextLogger::new("op1", "DEBUG");
        let child = root.child("input").child("channel-a");
        assert_eq!(child.path(), "op1/input/channel-a");
    }

    #[test]
    fn level_filter_follows_tracing_ordering() {
        let info = ContextLogger::new("x", "INFO");
        assert!(info.enabled(Level::ERROR));
        assert!(info.enabled(Level::INFO));
        assert!(!info.enabled(Level::DEBUG));
    }

    #[test]
    fn unknown_level_falls_back_to_debug() {
        let log = ContextLogger::new("x", "CHATTY");
        assert!(log.enabled(Level::DEBUG));
    }
}
