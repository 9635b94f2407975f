//! The transport capability trait.

use flowline_types::record::Record;

use crate::error::Result;

/// Ordering discipline of a transport backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Log-ordered: partitioned, offset-addressed, records retained and
    /// re-readable. Consumers track and commit their own positions.
    Log,
    /// Queue-ordered: one shared destructive head per resource; every
    /// consumer pull removes records, giving true load sharing.
    Queue,
}

/// Storage contract between channel endpoints and the medium they
/// coordinate over.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn Transport>`.
/// Control-plane traffic always uses the offset-addressed calls
/// (`append`/`read_from`), so queue backends must retain records for
/// non-destructive reads even though their data plane pops.
pub trait Transport: Send + Sync {
    /// Ordering discipline of this backend.
    fn kind(&self) -> TransportKind;

    /// Create a resource with the given partition count. Idempotent: calling
    /// it again with the same partition count is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) on storage failure.
    fn create_resource(&self, name: &str, partitions: u32) -> Result<()>;

    /// Delete a resource and all retained records. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) on storage failure.
    fn delete_resource(&self, name: &str) -> Result<()>;

    /// Whether the resource currently exists.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) on storage failure.
    fn resource_exists(&self, name: &str) -> Result<bool>;

    /// Partition count of an existing resource.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) if the resource
    /// does not exist.
    fn partition_count(&self, name: &str) -> Result<u32>;

    /// Append a record, returning its assigned position.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) if the resource or
    /// partition does not exist.
    fn append(&self, name: &str, partition: u32, payload: Vec<u8>) -> Result<u64>;

    /// Non-destructive read of up to `max` records starting at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) if the resource or
    /// partition does not exist.
    fn read_from(&self, name: &str, partition: u32, position: u64, max: usize)
        -> Result<Vec<Record>>;

    /// Position one past the last appended record.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) if the resource or
    /// partition does not exist.
    fn end_position(&self, name: &str, partition: u32) -> Result<u64>;

    /// Last committed consumer position for `(group, partition)`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) if the resource
    /// does not exist.
    fn committed(&self, name: &str, group: &str, partition: u32) -> Result<Option<u64>>;

    /// Persist a consumer position for `(group, partition)`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`](crate::TransportError) if the resource
    /// does not exist.
    fn commit(&self, name: &str, group: &str, partition: u32, position: u64) -> Result<()>;

    /// Destructively pull up to `max` records from the shared head.
    /// Queue-kind data plane only.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`](crate::TransportError) on
    /// log-kind backends.
    fn pop(&self, name: &str, max: usize) -> Result<Vec<Record>>;

    /// Records behind the shared head. Queue-kind data plane only.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`](crate::TransportError) on
    /// log-kind backends.
    fn backlog(&self, name: &str) -> Result<u64>;
}
