//! Channel lifecycle states and the transition rules shared by both
//! endpoints of a channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one channel endpoint.
///
/// States advance monotonically (`Unopened` → `Opened` → `Started` →
/// `Stopped` → `Closed`), with two exceptions: `Errored` is reachable from
/// every state except `Closed`, and no transition ever leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    Unopened,
    Opened,
    Started,
    Stopped,
    Closed,
    Errored,
}

impl ChannelState {
    /// Ordering rank along the forward path. `Errored` sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Unopened => Some(0),
            Self::Opened => Some(1),
            Self::Started => Some(2),
            Self::Stopped => Some(3),
            Self::Closed => Some(4),
            Self::Errored => None,
        }
    }

    /// Whether a transition from `self` to `to` is legal.
    #[must_use]
    pub fn can_transition(self, to: ChannelState) -> bool {
        if self == Self::Closed {
            return false;
        }
        if to == Self::Errored {
            return self != Self::Errored;
        }
        // A channel that never opened has nothing to start, stop, or close.
        if self == Self::Unopened {
            return to == Self::Opened;
        }
        match (self.rank(), to.rank()) {
            (Some(from), Some(dest)) => dest > from,
            // Errored is terminal for the endpoint itself; a peer monitor
            // may still observe a restart (see the channels crate).
            _ => false,
        }
    }

    /// True for `Stopped`, `Closed`, and `Errored`: the endpoint will not
    /// produce or consume further data records.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Stopped | Self::Closed | Self::Errored)
    }

    /// True once the endpoint has reached `Opened` or any later live state.
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Opened | Self::Started)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unopened => "Unopened",
            Self::Opened => "Opened",
            Self::Started => "Started",
            Self::Stopped => "Stopped",
            Self::Closed => "Closed",
            Self::Errored => "Errored",
        };
        f.write_str(s)
    }
}
