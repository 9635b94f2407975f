//! Recognized endpoint and operator configuration.
//!
//! Field names follow the external camelCase parameter keys
//! (`channelLocation`, `portOpenTimeoutMs`, ...). All optional keys carry
//! their documented defaults; `channelLocation` is the only required one and
//! stays an `Option` so the engine can report it missing before execution.

use serde::{Deserialize, Serialize};

/// Per-channel tuning passed under the `channelConfig` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelTuning {
    /// Enables per-channel I/O metric aggregation in heartbeat payloads.
    pub metrics_enabled: bool,
    /// Log level for channel-scoped logging.
    pub log_level: String,
    /// Interval between heartbeat control messages.
    pub heartbeat_interval_ms: u64,
    /// Maximum heartbeat age before a peer counts as unhealthy.
    pub liveness_timeout_ms: u64,
}

impl ChannelTuning {
    pub const DEFAULT_LOG_LEVEL: &'static str = "DEBUG";
    pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2_000;
    pub const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 120_000;
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            log_level: Self::DEFAULT_LOG_LEVEL.to_string(),
            heartbeat_interval_ms: Self::DEFAULT_HEARTBEAT_INTERVAL_MS,
            liveness_timeout_ms: Self::DEFAULT_LIVENESS_TIMEOUT_MS,
        }
    }
}

/// Configuration of an input port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputPortConfig {
    /// Transport address of the channel resource. Required.
    pub channel_location: Option<String>,
    /// Per-channel tuning map.
    pub channel_config: ChannelTuning,
    /// Delay record availability until every connected output channel has
    /// finished (strict staged processing instead of concurrent streaming).
    pub sequential_mode_enabled: bool,
    /// Upper bound for blocking in port open, milliseconds. 0 = unbounded.
    pub port_open_timeout_ms: u64,
    /// Wait until every expected output connection has reached `Opened`
    /// before the port open completes.
    pub sync_connections_open: bool,
}

/// Configuration of an output port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputPortConfig {
    /// Transport address of the channel resource. Required.
    pub channel_location: Option<String>,
    /// Per-channel tuning map.
    pub channel_config: ChannelTuning,
    /// Upper bound for blocking in port open, milliseconds. 0 = unbounded.
    pub port_open_timeout_ms: u64,
}

/// Operator-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Container image used by deployment backends. No default.
    pub operator_image_name: Option<String>,
    /// Number of duplicate processing workers sharing this operator's
    /// configuration. 0 = no replicas.
    pub replication_factor: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults() {
        let t = ChannelTuning::default();
        assert!(!t.metrics_enabled);
        assert_eq!(t.log_level, "DEBUG");
        assert_eq!(t.heartbeat_interval_ms, 2_000);
        assert_eq!(t.liveness_timeout_ms, 120_000);
    }

    #[test]
    fn input_port_config_defaults_from_empty_map() {
        let cfg: InputPortConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.channel_location.is_none());
        assert!(!cfg.sequential_mode_enabled);
        assert_eq!(cfg.port_open_timeout_ms, 0);
        assert!(!cfg.sync_connections_open);
    }

    #[test]
    fn input_port_config_uses_camel_case_keys() {
        let cfg: InputPortConfig = serde_json::from_value(serde_json::json!({
            "channelLocation": "mem://local",
            "channelConfig": {"metricsEnabled": true, "logLevel": "INFO"},
            "sequentialModeEnabled": true,
            "portOpenTimeoutMs": 1500,
            "syncConnectionsOpen": true,
        }))
        .unwrap();
        assert_eq!(cfg.channel_location.as_deref(), Some("mem://local"));
        assert!(cfg.channel_config.metrics_enabled);
        assert_eq!(cfg.channel_config.log_level, "INFO");
        assert!(cfg.sequential_mode_enabled);
        assert_eq!(cfg.port_open_timeout_ms, 1500);
        assert!(cfg.sync_connections_open);
    }

    #[test]
    fn operator_config_defaults() {
        let cfg: OperatorConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.operator_image_name.is_none());
        assert_eq!(cfg.replication_factor, 0);
    }

    #[test]
    fn output_port_config_roundtrip() {
        let cfg = OutputPortConfig {
            channel_location: Some("mem://local".into()),
            channel_config: ChannelTuning::default(),
            port_open_timeout_ms: 250,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("portOpenTimeoutMs"));
        let back: OutputPortConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
