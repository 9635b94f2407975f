//! Channel endpoint identity and replication groups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a channel an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointRole {
    Reader,
    Writer,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        })
    }
}

/// Identity of one channel endpoint.
///
/// `group_index` is the endpoint's position inside its replication group;
/// index 0 is the principal. `group_size` is the total member count
/// (principal included), never 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub instance_id: String,
    pub role: EndpointRole,
    pub group_index: u32,
    pub group_size: u32,
}

impl EndpointDescriptor {
    /// Descriptor for a non-replicated endpoint (group of one).
    #[must_use]
    pub fn solo(instance_id: impl Into<String>, role: EndpointRole) -> Self {
        Self { instance_id: instance_id.into(), role, group_index: 0, group_size: 1 }
    }

    /// Descriptor for a member of a replication group.
    #[must_use]
    pub fn replica(
        instance_id: impl Into<String>,
        role: EndpointRole,
        group_index: u32,
        group_size: u32,
    ) -> Self {
        Self { instance_id: instance_id.into(), role, group_index, group_size: group_size.max(1) }
    }

    /// The principal is the group member responsible for resource lifecycle.
    #[must_use]
    pub fn is_principal(&self) -> bool {
        self.group_index == 0
    }
}

/// A principal operator instance plus its replicas, sharing configuration
/// and splitting load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationGroup {
    pub principal_id: String,
    pub replica_ids: Vec<String>,
    pub size: u32,
}

impl ReplicationGroup {
    /// Build a group from a principal id and a `replicationFactor`.
    ///
    /// A factor of 0 means no replication: a group of one. Otherwise the
    /// group has `factor` members in total, the principal at index 0 and
    /// replicas named `<principal>-<index>`.
    #[must_use]
    pub fn from_factor(principal_id: impl Into<String>, replication_factor: u32) -> Self {
        let principal_id = principal_id.into();
        let size = replication_factor.max(1);
        let replica_ids =
            (1..size).map(|i| format!("{principal_id}-{i}")).collect();
        Self { principal_id, replica_ids, size }
    }

    /// Descriptor of the member at `group_index` (0 = principal).
    #[must_use]
    pub fn member(&self, group_index: u32, role: EndpointRole) -> EndpointDescriptor {
        let instance_id = if group_index == 0 {
            self.principal_id.clone()
        } else {
            format!("{}-{}", self.principal_id, group_index)
        };
        EndpointDescriptor { instance_id, role, group_index, group_size: self.size }
    }
}
