//! Data-plane record type.

use serde::{Deserialize, Serialize};

/// A single transmitted record: an opaque payload plus the position the
/// transport assigned to it. Immutable once transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Transport-assigned position within the partition or queue.
    pub position: u64,
}

impl Record {
    /// Create a record at the given position.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>, position: u64) -> Self {
        Self { payload: payload.into(), position }
    }
}
