//! Peer status tracking from control messages.

use std::collections::BTreeMap;

use flowline_types::control::ControlMessage;
use flowline_types::endpoint::EndpointRole;
use flowline_types::state::ChannelState;
use flowline_types::time::now_millis;

use crate::logctx::ContextLogger;

/// Tracks one remote endpoint from the control messages it publishes.
///
/// No state machine is enforced on the remote side (missed messages must
/// not wedge the monitor), with one exception: a remembered `Errored` is
/// only replaced by `Opened` or `Started`, so error information survives
/// until the peer demonstrably restarted.
#[derive(Debug)]
pub struct StatusMonitor {
    sender_id: String,
    role: EndpointRole,
    group_index: u32,
    state: Option<ChannelState>,
    last_seen_ms: i64,
    last_change_ms: i64,
}

impl StatusMonitor {
    fn new(msg: &ControlMessage) -> Self {
        Self {
            sender_id: msg.sender_id.clone(),
            role: msg.role,
            group_index: msg.group_index,
            state: None,
            last_seen_ms: 0,
            last_change_ms: 0,
        }
    }

    #[must_use]
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    #[must_use]
    pub fn role(&self) -> EndpointRole {
        self.role
    }

    #[must_use]
    pub fn group_index(&self) -> u32 {
        self.group_index
    }

    #[must_use]
    pub fn state(&self) -> Option<ChannelState> {
        self.state
    }

    /// Heartbeat age below the liveness threshold?
    #[must_use]
    pub fn is_healthy(&self, liveness_timeout_ms: u64) -> bool {
        let age = now_millis() - self.last_seen_ms;
        age < i64::try_from(liveness_timeout_ms).unwrap_or(i64::MAX)
    }

    /// Ready to take part in data transfer: `Opened` or `Started`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_some_and(ChannelState::is_ready)
    }

    /// No further data expected: `Stopped`, `Closed`, or `Errored`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_some_and(ChannelState::is_finished)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == Some(ChannelState::Closed)
    }

    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.state == Some(ChannelState::Errored)
    }

    fn update(&mut self, msg: &ControlMessage, log: &ContextLogger) {
        if msg.timestamp < self.last_seen_ms {
            log.warn(format!(
                "status message from {} has older timestamp ({}) than the last received ({})",
                msg.sender_id, msg.timestamp, self.last_seen_ms
            ));
        } else {
            self.last_seen_ms = msg.timestamp;
        }

        if msg.timestamp < self.last_change_ms {
            return;
        }

        let accept = match self.state {
            Some(ChannelState::Errored) => msg.state.is_ready(),
            _ => true,
        };
        if accept && self.state != Some(msg.state) {
            log.debug(format!(
                "{}: {} -> {} @ {}",
                msg.sender_id,
                self.state.map_or_else(|| "None".to_string(), |s| s.to_string()),
                msg.state,
                msg.timestamp
            ));
            self.state = Some(msg.state);
            self.last_change_ms = msg.timestamp;
        }
    }
}

/// All peers of one endpoint, keyed by sender id.
#[derive(Debug)]
pub struct StatusBoard {
    own_id: String,
    liveness_timeout_ms: u64,
    monitors: BTreeMap<String, StatusMonitor>,
    log: ContextLogger,
}

impl StatusBoard {
    #[must_use]
    pub fn new(own_id: impl Into<String>, liveness_timeout_ms: u64, log: ContextLogger) -> Self {
        Self { own_id: own_id.into(), liveness_timeout_ms, monitors: BTreeMap::new(), log }
    }

    /// Feed one received control message; messages from the owning endpoint
    /// itself are dropped.
    pub fn observe(&mut self, msg: &ControlMessage) {
        if msg.sender_id == self.own_id {
            return;
        }
        self.monitors
            .entry(msg.sender_id.clone())
            .or_insert_with(|| StatusMonitor::new(msg))
            .update(msg, &self.log);
    }

    fn with_role(&self, role: EndpointRole) -> impl Iterator<Item = &StatusMonitor> + '_ {
        self.monitors.values().filter(move |m| m.role() == role)
    }

    /// Total peers ever observed with the given role.
    #[must_use]
    pub fn connected_count(&self, role: EndpointRole) -> usize {
        self.with_role(role).count()
    }

    /// Peers that are healthy and in a ready state.
    #[must_use]
    pub fn ready_count(&self, role: EndpointRole) -> usize {
        self.with_role(role)
            .filter(|m| m.is_healthy(self.liveness_timeout_ms) && m.is_ready())
            .count()
    }

    /// Peers that will not produce further data: unhealthy, stopped,
    /// closed, or errored.
    #[must_use]
    pub fn finished_count(&self, role: EndpointRole) -> usize {
        self.with_role(role)
            .filter(|m| !m.is_healthy(self.liveness_timeout_ms) || m.is_finished())
            .count()
    }

    /// Is any peer still healthy and not yet finished? The strict inverse
    /// of "all finished", except it answers `false` for an empty board.
    #[must_use]
    pub fn any_active(&self, role: EndpointRole) -> bool {
        self.with_role(role)
            .any(|m| m.is_healthy(self.liveness_timeout_ms) && !m.is_finished())
    }

    /// Is any peer healthy but not closed yet?
    #[must_use]
    pub fn any_healthy_not_closed(&self, role: EndpointRole) -> bool {
        self.with_role(role)
            .any(|m| m.is_healthy(self.liveness_timeout_ms) && !m.is_closed())
    }

    /// Has any peer reported `Errored`?
    #[must_use]
    pub fn any_errored(&self, role: EndpointRole) -> bool {
        self.with_role(role).any(StatusMonitor::is_errored)
    }

    /// Has any healthy peer's heartbeat gone stale?
    #[must_use]
    pub fn any_unhealthy(&self, role: EndpointRole) -> bool {
        self.with_role(role).any(|m| !m.is_healthy(self.liveness_timeout_ms))
    }

    #[must_use]
    pub fn monitor(&self, sender_id: &str) -> Option<&StatusMonitor> {
        self.monitors.get(sender_id)
    }
}
