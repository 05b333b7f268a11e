//! Per-replica commit log.
//!
//! Ordered map from sequence number to committed entry. Only the owning
//! replica appends to it, through
//! [`NodeContext::commit_operation`](crate::NodeContext::commit_operation);
//! predicates read it.

use std::{collections::BTreeMap, fmt};

use serde::Serialize;
use thiserror::Error;

/// Opaque committed value. Compared by equality only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct LogEntry(pub String);

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<&str> for LogEntry {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for LogEntry {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Commit log errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitLogError {
    /// Sequence number already holds an entry.
    #[error("sequence {sequence} already holds {existing}")]
    Occupied {
        /// Sequence that was written twice
        sequence: u64,
        /// Entry already stored there
        existing: LogEntry,
    },
}

/// Sequence number → committed entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitLog {
    entries: BTreeMap<u64, LogEntry>,
}

impl CommitLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `entry` at `sequence`.
    pub fn insert(&mut self, sequence: u64, entry: LogEntry) -> Result<(), CommitLogError> {
        if let Some(existing) = self.entries.get(&sequence) {
            return Err(CommitLogError::Occupied { sequence, existing: existing.clone() });
        }
        self.entries.insert(sequence, entry);
        Ok(())
    }

    /// Record `entry` right after the highest sequence (1 for an empty log).
    ///
    /// Returns the sequence used.
    pub fn append(&mut self, entry: LogEntry) -> u64 {
        let sequence = self.highest_sequence().map_or(1, |highest| highest + 1);
        self.entries.insert(sequence, entry);
        sequence
    }

    /// Entry at `sequence`.
    pub fn get(&self, sequence: u64) -> Option<&LogEntry> {
        self.entries.get(&sequence)
    }

    /// Lowest committed sequence.
    pub fn lowest_sequence(&self) -> Option<u64> {
        self.entries.keys().next().copied()
    }

    /// Highest committed sequence.
    pub fn highest_sequence(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been committed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &LogEntry)> {
        self.entries.iter().map(|(seq, entry)| (*seq, entry))
    }
}

impl<E: Into<LogEntry>> FromIterator<(u64, E)> for CommitLog {
    fn from_iter<T: IntoIterator<Item = (u64, E)>>(iter: T) -> Self {
        Self { entries: iter.into_iter().map(|(seq, entry)| (seq, entry.into())).collect() }
    }
}
