//! Realized schedule.
//!
//! The ordered record of every scheduling decision a scenario executed.
//! Together with the seed and configuration it is enough to replay the
//! run, and it is what a counterexample reports.

use faultline_core::{EventId, FaultId, MutatorId};
use serde::Serialize;

use crate::predicates::Violation;

/// One executed decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScheduleEntry {
    /// Message or client request handed to its recipient.
    Deliver {
        /// Delivered event
        event: EventId,
    },
    /// Timer fired.
    Timeout {
        /// Timeout event
        event: EventId,
    },
    /// Message discarded by the scheduler, a fault, or a partition found at
    /// delivery time.
    Drop {
        /// Dropped event
        event: EventId,
    },
    /// Payload of a queued message replaced.
    Mutation {
        /// Mutated event
        event: EventId,
        /// Mutator applied
        mutator: MutatorId,
    },
    /// Fault behavior fired.
    Fault {
        /// Fault that fired
        fault: FaultId,
        /// Event it targeted
        event: Option<EventId>,
    },
}

impl ScheduleEntry {
    /// Event the entry acted on.
    pub fn event(&self) -> Option<EventId> {
        match self {
            Self::Deliver { event }
            | Self::Timeout { event }
            | Self::Drop { event }
            | Self::Mutation { event, .. } => Some(*event),
            Self::Fault { event, .. } => *event,
        }
    }
}

/// Decisions of one scenario plus the predicates it broke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    seed: u64,
    entries: Vec<ScheduleEntry>,
    violations: Vec<Violation>,
}

impl Schedule {
    /// Empty schedule for `seed`.
    pub fn new(seed: u64) -> Self {
        Self { seed, entries: Vec::new(), violations: Vec::new() }
    }

    /// Seed of the scenario.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Append a decision.
    pub fn push(&mut self, entry: ScheduleEntry) {
        self.entries.push(entry);
    }

    /// Decisions in execution order.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Number of decisions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was executed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Events that reached a handler, in delivery order.
    pub fn delivered(&self) -> Vec<EventId> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                ScheduleEntry::Deliver { event } | ScheduleEntry::Timeout { event } => Some(*event),
                _ => None,
            })
            .collect()
    }

    /// Record the predicates that failed. The schedule is complete after
    /// this.
    pub fn finalize(&mut self, violations: Vec<Violation>) {
        self.violations = violations;
    }

    /// Predicates that failed.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Whether the schedule is a counterexample.
    pub fn is_buggy(&self) -> bool {
        !self.violations.is_empty()
    }
}
