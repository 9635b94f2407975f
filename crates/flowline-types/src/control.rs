//! Control-plane message exchanged between channel endpoints.

use serde::{Deserialize, Serialize};

use crate::endpoint::EndpointRole;
use crate::state::ChannelState;
use crate::time::now_millis;

/// Out-of-band state announcement from one channel endpoint.
///
/// Heartbeats are plain `ControlMessage`s re-publishing the sender's current
/// state; liveness is judged from message age, not from a dedicated
/// heartbeat type. The optional `payload` carries endpoint metrics when
/// metrics are enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub sender_id: String,
    pub role: EndpointRole,
    pub group_index: u32,
    pub state: ChannelState,
    /// Epoch milliseconds at creation time.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ControlMessage {
    /// Build a message stamped with the current time.
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        role: EndpointRole,
        group_index: u32,
        state: ChannelState,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            role,
            group_index,
            state,
            timestamp: now_millis(),
            payload: None,
        }
    }

    /// Attach a metrics payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error if serialization fails (payloads with
    /// non-string map keys).
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse from the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json` error on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
