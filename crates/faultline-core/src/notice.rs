//! Notifications emitted by the kernel.
//!
//! The transport buffers these in emission order. The orchestrator drains
//! them after every step and fans them out to its subscriber list, so
//! observers never hold references into the store.

use serde::Serialize;

use crate::{
    event::{DroppedReason, EventId, NodeId},
    fault::{FaultId, MutatorId},
};

/// Something observable happened in the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Event created (any kind).
    EventAdded {
        /// New event
        event: EventId,
    },
    /// A node sent one payload to a set of recipients.
    ///
    /// Emitted after the per-recipient `EventAdded` notifications, listing
    /// the events in recipient order.
    Multicast {
        /// Sending node
        sender: NodeId,
        /// Recipients in send order
        recipients: Vec<NodeId>,
        /// One event per recipient
        events: Vec<EventId>,
    },
    /// Event handed to its recipient.
    EventDelivered {
        /// Delivered event
        event: EventId,
    },
    /// Event discarded.
    EventDropped {
        /// Dropped event
        event: EventId,
        /// Why it was dropped
        reason: DroppedReason,
    },
    /// Payload of a queued message was replaced.
    MessageMutated {
        /// Mutated event
        event: EventId,
        /// Mutator applied
        mutator: MutatorId,
    },
    /// A fault behavior fired.
    FaultApplied {
        /// Fault that fired
        fault: FaultId,
        /// Event it targeted, if any
        event: Option<EventId>,
    },
    /// A timer fired on a node.
    Timeout {
        /// Node owning the timer
        node: NodeId,
        /// Timeout event
        event: EventId,
    },
    /// A replica committed an entry.
    LocalCommit {
        /// Committing replica
        replica: NodeId,
        /// Sequence committed
        sequence: u64,
    },
    /// A replica reported a new leader.
    LeaderChange {
        /// Reporting replica
        replica: NodeId,
        /// New leader
        leader: NodeId,
    },
    /// Global stabilization time was raised.
    GlobalStabilization,
}
