//! Observable scenario state for predicate checks.
//!
//! Predicates check a snapshot rather than the live scenario, so a check
//! sees one consistent point in time and can be unit tested without
//! running a protocol.

use faultline_core::{CommitLog, LogEntry, NodeId};

/// Scenario state at one point in time.
#[derive(Debug, Clone, Default)]
pub struct ScenarioSnapshot {
    /// One entry per replica instance, in id order.
    pub replicas: Vec<ReplicaSnapshot>,
    /// Events still QUEUED
    pub queued: usize,
    /// Events DELIVERED
    pub delivered: usize,
    /// Events DROPPED
    pub dropped: usize,
    /// Schedule entries so far
    pub schedule_len: usize,
    /// Whether GST has been raised
    pub gst: bool,
}

impl ScenarioSnapshot {
    /// Snapshot with no replicas and no events.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a replica.
    #[must_use]
    pub fn with_replica(mut self, replica: ReplicaSnapshot) -> Self {
        self.replicas.push(replica);
        self
    }

    /// Set event counts.
    #[must_use]
    pub fn with_events(mut self, queued: usize, delivered: usize, dropped: usize) -> Self {
        self.queued = queued;
        self.delivered = delivered;
        self.dropped = dropped;
        self
    }

    /// Set the schedule length.
    #[must_use]
    pub fn with_schedule_len(mut self, len: usize) -> Self {
        self.schedule_len = len;
        self
    }

    /// Non-faulty replicas.
    pub fn correct_replicas(&self) -> impl Iterator<Item = &ReplicaSnapshot> {
        self.replicas.iter().filter(|r| !r.faulty)
    }
}

/// One replica's commit log.
#[derive(Debug, Clone, Default)]
pub struct ReplicaSnapshot {
    /// Instance id (differs from the public id for twins)
    pub id: NodeId,
    /// Excluded from safety checks
    pub faulty: bool,
    /// Committed entries
    pub log: CommitLog,
}

impl ReplicaSnapshot {
    /// Correct replica with an empty log.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    /// Mark faulty.
    #[must_use]
    pub fn faulty(mut self) -> Self {
        self.faulty = true;
        self
    }

    /// Add a committed entry.
    #[must_use]
    pub fn with_entry(mut self, sequence: u64, entry: impl Into<LogEntry>) -> Self {
        let entry = entry.into();
        self.log = self
            .log
            .iter()
            .filter(|(s, _)| *s != sequence)
            .map(|(s, e)| (s, e.clone()))
            .chain([(sequence, entry)])
            .collect();
        self
    }
}
