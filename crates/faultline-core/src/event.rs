//! Events and their lifecycle.
//!
//! Every message, client request and timeout is an [`Event`] owned by the
//! [`Transport`](crate::Transport). Events are never removed; the full table
//! is kept for inspection and replay.

use std::fmt;

use serde::Serialize;

use crate::message::Message;

/// Event identifier. Allocated from 1, strictly increasing, never reused.
pub type EventId = u64;

/// Node identifier shared by replicas and clients.
pub type NodeId = String;

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting for the scheduler.
    Queued,
    /// Handed to the recipient. Terminal.
    Delivered,
    /// Discarded without reaching the recipient. Terminal.
    Dropped,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Delivered => write!(f, "delivered"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

/// Why a DROPPED event never reached its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DroppedReason {
    /// Sender and recipient were in different partitions, either when the
    /// event was created or when delivery was attempted.
    Network,
    /// The scheduler chose to drop it.
    Explicit,
    /// A fault behavior dropped it.
    Fault,
    /// The owning node cancelled the timeout.
    TimeoutCleared,
}

/// What an event carries.
#[derive(Debug, Clone)]
pub enum EventKind<M> {
    /// Protocol message between nodes.
    Message {
        /// Message payload
        payload: M,
    },
    /// Request from a client to a replica.
    ClientRequest {
        /// Request payload
        payload: M,
    },
    /// Logical timer owned by a node.
    Timeout {
        /// Human-readable timer label
        description: String,
        /// Logical time at which the timer is due
        expires_at: u64,
        /// Internal id of the node instance that armed the timer. Equals the
        /// recipient except for twin replicas, which share a public id.
        owner: NodeId,
    },
}

/// A message, client request or timeout tracked by the store.
#[derive(Debug, Clone)]
pub struct Event<M> {
    /// Unique id
    pub id: EventId,
    /// Node that created the event
    pub sender: NodeId,
    /// Node the event is addressed to
    pub recipient: NodeId,
    /// Logical time of creation
    pub created_at: u64,
    /// Logical time of delivery, set once
    pub delivered_at: Option<u64>,
    /// Lifecycle state
    pub status: EventStatus,
    /// Set when `status` is DROPPED
    pub dropped_reason: Option<DroppedReason>,
    /// Payload or timer details
    pub kind: EventKind<M>,
}

impl<M: Message> Event<M> {
    /// Whether the event is still waiting for a decision.
    pub fn is_queued(&self) -> bool {
        self.status == EventStatus::Queued
    }

    /// Protocol message between nodes.
    pub fn is_message(&self) -> bool {
        matches!(self.kind, EventKind::Message { .. })
    }

    /// Client request.
    pub fn is_client_request(&self) -> bool {
        matches!(self.kind, EventKind::ClientRequest { .. })
    }

    /// Timer.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, EventKind::Timeout { .. })
    }

    /// Payload of a message or client request.
    pub fn payload(&self) -> Option<&M> {
        match &self.kind {
            EventKind::Message { payload } | EventKind::ClientRequest { payload } => Some(payload),
            EventKind::Timeout { .. } => None,
        }
    }

    /// Payload variant tag, if the event carries a payload.
    pub fn tag(&self) -> Option<&'static str> {
        self.payload().map(Message::tag)
    }

    /// Logical expiry of a timeout.
    pub fn expires_at(&self) -> Option<u64> {
        match &self.kind {
            EventKind::Timeout { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }
}

impl<M: Message> fmt::Display for Event<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::Message { payload } => write!(
                f,
                "#{} {} {}→{} [{}]",
                self.id,
                payload.tag(),
                self.sender,
                self.recipient,
                self.status
            ),
            EventKind::ClientRequest { payload } => write!(
                f,
                "#{} request {} {}→{} [{}]",
                self.id,
                payload.tag(),
                self.sender,
                self.recipient,
                self.status
            ),
            EventKind::Timeout { description, expires_at, .. } => write!(
                f,
                "#{} timeout '{}' for {} at {} [{}]",
                self.id, description, self.recipient, expires_at, self.status
            ),
        }
    }
}
