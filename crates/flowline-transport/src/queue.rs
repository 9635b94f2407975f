//! In-process queue-ordered transport backend.

use std::collections::HashMap;
use std::sync::Mutex;

use flowline_types::record::Record;

use crate::error::{Result, TransportError};
use crate::medium::{Transport, TransportKind};

#[derive(Debug, Default)]
struct QueueResource {
    /// Records are retained for offset reads (the control plane needs them);
    /// `head` is the shared destructive cursor used by `pop`.
    records: Vec<Vec<u8>>,
    head: u64,
}

/// Shared-queue in-process transport.
///
/// Every resource has exactly one partition and one head shared by all
/// consumers: replicas pulling from the same queue split the load instead
/// of sharding it, so no partition pre-assignment is needed. Offset reads
/// stay available for control-plane traffic.
#[derive(Debug, Default)]
pub struct MemoryQueueTransport {
    resources: Mutex<HashMap<String, QueueResource>>,
}

impl MemoryQueueTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_resources<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, QueueResource>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.resources.lock().map_err(|_| TransportError::LockPoisoned)?;
        f(&mut guard)
    }
}

fn check_partition(name: &str, partition: u32) -> Result<()> {
    if partition == 0 {
        Ok(())
    } else {
        Err(TransportError::PartitionOutOfRange {
            resource: name.to_string(),
            partition,
            count: 1,
        })
    }
}

impl Transport for MemoryQueueTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Queue
    }

    fn create_resource(&self, name: &str, partitions: u32) -> Result<()> {
        if partitions > 1 {
            tracing::debug!(resource = name, partitions, "queue resources are single-partition");
        }
        self.with_resources(|map| {
            map.entry(name.to_string()).or_default();
            Ok(())
        })
    }

    fn delete_resource(&self, name: &str) -> Result<()> {
        self.with_resources(|map| {
            map.remove(name);
            Ok(())
        })
    }

    fn resource_exists(&self, name: &str) -> Result<bool> {
        self.with_resources(|map| Ok(map.contains_key(name)))
    }

    fn partition_count(&self, name: &str) -> Result<u32> {
        self.with_resources(|map| {
            map.get(name)
                .map(|_| 1)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))
        })
    }

    fn append(&self, name: &str, partition: u32, payload: Vec<u8>) -> Result<u64> {
        check_partition(name, partition)?;
        self.with_resources(|map| {
            let res = map
                .get_mut(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            res.records.push(payload);
            Ok(res.records.len() as u64 - 1)
        })
    }

    fn read_from(
        &self,
        name: &str,
        partition: u32,
        position: u64,
        max: usize,
    ) -> Result<Vec<Record>> {
        check_partition(name, partition)?;
        self.with_resources(|map| {
            let res = map
                .get(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            let start = usize::try_from(position).unwrap_or(usize::MAX).min(res.records.len());
            let end = start.saturating_add(max).min(res.records.len());
            Ok(res.records[start..end]
                .iter()
                .enumerate()
                .map(|(i, payload)| Record::new(payload.clone(), (start + i) as u64))
                .collect())
        })
    }

    fn end_position(&self, name: &str, partition: u32) -> Result<u64> {
        check_partition(name, partition)?;
        self.with_resources(|map| {
            map.get(name)
                .map(|res| res.records.len() as u64)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))
        })
    }

    fn committed(&self, name: &str, _group: &str, partition: u32) -> Result<Option<u64>> {
        check_partition(name, partition)?;
        // Queue consumption is acknowledged by the pop itself; there is no
        // consumer-side position to restore.
        self.with_resources(|map| {
            map.get(name)
                .map(|_| None)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))
        })
    }

    fn commit(&self, name: &str, _group: &str, partition: u32, _position: u64) -> Result<()> {
        check_partition(name, partition)?;
        self.with_resources(|map| {
            map.get(name)
                .map(|_| ())
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))
        })
    }

    fn pop(&self, name: &str, max: usize) -> Result<Vec<Record>> {
        self.with_resources(|map| {
            let res = map
                .get_mut(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            let start = usize::try_from(res.head).unwrap_or(usize::MAX).min(res.records.len());
            let end = start.saturating_add(max).min(res.records.len());
            let out: Vec<Record> = res.records[start..end]
                .iter()
                .enumerate()
                .map(|(i, payload)| Record::new(payload.clone(), (start + i) as u64))
                .collect();
            res.head = end as u64;
            Ok(out)
        })
    }

    fn backlog(&self, name: &str) -> Result<u64> {
        self.with_resources(|map| {
            let res = map
                .get(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            Ok(res.records.len() as u64 - res.head)
        })
    }
}
