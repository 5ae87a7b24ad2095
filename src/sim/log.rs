use crate::sim::part::PartInfo;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// A part announced by the replica that wrote it.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub source: String,
    pub part: PartInfo,
    pub published: Instant,
}

impl LogEntry {
    /// Whether other replicas may fetch this part at `now`.
    pub fn is_due(&self, now: Instant, lag: Duration) -> bool {
        now >= self.published + lag
    }
}

/// Shared per-table replication log: the registered replicas, the block
/// number allocator, and the ordered list of published parts.
#[derive(Debug, Default)]
pub struct ReplicationLog {
    entries: Vec<LogEntry>,
    replicas: BTreeSet<String>,
    next_block: u64,
}

impl ReplicationLog {
    /// Returns false if `replica` is already registered.
    pub fn register(&mut self, replica: &str) -> bool {
        self.replicas.insert(replica.to_string())
    }

    /// Returns true once no replicas remain.
    pub fn unregister(&mut self, replica: &str) -> bool {
        self.replicas.remove(replica);
        self.replicas.is_empty()
    }

    pub fn allocate_block(&mut self) -> u64 {
        let block = self.next_block;
        self.next_block += 1;
        block
    }

    pub fn publish(&mut self, source: &str, part: PartInfo, now: Instant) {
        self.entries.push(LogEntry {
            source: source.to_string(),
            part,
            published: now,
        });
    }

    pub fn entry(&self, cursor: usize) -> Option<&LogEntry> {
        self.entries.get(cursor)
    }
}
