//! In-process log-ordered transport backend.

use std::collections::HashMap;
use std::sync::Mutex;

use flowline_types::record::Record;

use crate::error::{Result, TransportError};
use crate::medium::{Transport, TransportKind};

/// One consumer-group commit entry.
#[derive(Debug, Clone)]
struct CommitEntry {
    position: u64,
    updated_at: String,
}

#[derive(Debug, Default)]
struct LogResource {
    partitions: Vec<Vec<Vec<u8>>>,
    /// Keyed by `(group, partition)`.
    commits: HashMap<(String, u32), CommitEntry>,
}

/// Partitioned, offset-addressed in-process transport.
///
/// Records are retained until the resource is deleted, so any position can
/// be re-read; per-group consumer positions persist across endpoint
/// restarts within the process, which is what the crash/resume tests lean
/// on.
#[derive(Debug, Default)]
pub struct MemoryLogTransport {
    resources: Mutex<HashMap<String, LogResource>>,
}

impl MemoryLogTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_resources<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, LogResource>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.resources.lock().map_err(|_| TransportError::LockPoisoned)?;
        f(&mut guard)
    }
}

fn partition_of<'a>(
    res: &'a mut LogResource,
    name: &str,
    partition: u32,
) -> Result<&'a mut Vec<Vec<u8>>> {
    let count = u32::try_from(res.partitions.len()).unwrap_or(u32::MAX);
    res.partitions.get_mut(partition as usize).ok_or_else(|| {
        TransportError::PartitionOutOfRange { resource: name.to_string(), partition, count }
    })
}

impl Transport for MemoryLogTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Log
    }

    fn create_resource(&self, name: &str, partitions: u32) -> Result<()> {
        let partitions = partitions.max(1);
        self.with_resources(|map| {
            if let Some(existing) = map.get(name) {
                if existing.partitions.len() == partitions as usize {
                    return Ok(());
                }
                // Partition layout changed: start over, commits included.
                tracing::debug!(resource = name, partitions, "recreating resource");
                map.remove(name);
            }
            let res = LogResource {
                partitions: vec![Vec::new(); partitions as usize],
                commits: HashMap::new(),
            };
            map.insert(name.to_string(), res);
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
            let res = map
                .get(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            Ok(u32::try_from(res.partitions.len()).unwrap_or(u32::MAX))
        })
    }

    fn append(&self, name: &str, partition: u32, payload: Vec<u8>) -> Result<u64> {
        self.with_resources(|map| {
            let res = map
                .get_mut(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            let log = partition_of(res, name, partition)?;
            log.push(payload);
            Ok(log.len() as u64 - 1)
        })
    }

    fn read_from(
        &self,
        name: &str,
        partition: u32,
        position: u64,
        max: usize,
    ) -> Result<Vec<Record>> {
        self.with_resources(|map| {
            let res = map
                .get_mut(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            let log = partition_of(res, name, partition)?;
            let start = usize::try_from(position).unwrap_or(usize::MAX).min(log.len());
            let end = start.saturating_add(max).min(log.len());
            Ok(log[start..end]
                .iter()
                .enumerate()
                .map(|(i, payload)| Record::new(payload.clone(), (start + i) as u64))
                .collect())
        })
    }

    fn end_position(&self, name: &str, partition: u32) -> Result<u64> {
        self.with_resources(|map| {
            let res = map
                .get_mut(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            Ok(partition_of(res, name, partition)?.len() as u64)
        })
    }

    fn committed(&self, name: &str, group: &str, partition: u32) -> Result<Option<u64>> {
        self.with_resources(|map| {
            let res = map
                .get(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            Ok(res.commits.get(&(group.to_string(), partition)).map(|e| e.position))
        })
    }

    fn commit(&self, name: &str, group: &str, partition: u32, position: u64) -> Result<()> {
        self.with_resources(|map| {
            let res = map
                .get_mut(name)
                .ok_or_else(|| TransportError::UnknownResource(name.to_string()))?;
            let entry = CommitEntry { position, updated_at: chrono::Utc::now().to_rfc3339() };
            if let Some(prev) = res.commits.insert((group.to_string(), partition), entry) {
                tracing::trace!(
                    resource = name,
                    group,
                    partition,
                    prev_position = prev.position,
                    prev_updated_at = %prev.updated_at,
                    position,
                    "advanced committed position"
                );
            }
            Ok(())
        })
    }

    fn pop(&self, _name: &str, _max: usize) -> Result<Vec<Record>> {
        Err(TransportError::Unsupported("pop"))
    }

    fn backlog(&self, _name: &str) -> Result<u64> {
        Err(TransportError::Unsupported("backlog"))
    }
}
