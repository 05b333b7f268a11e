//! Operations for model-based testing.
//!
//! Operations are generated by proptest or `arbitrary` and applied to both
//! the reference model and the real event store.

use arbitrary::Arbitrary;
use faultline_core::NodeId;

use crate::protocol::replica_id;

/// Node index (0-based, mapped to `A`, `B`, ...).
pub type ModelNodeId = u8;

/// Number of nodes operations address.
pub const MODEL_NODES: u8 = 4;

/// Operations on the event store and router.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Send one message.
    Send {
        /// Sending node
        sender: ModelNodeId,
        /// Receiving node
        recipient: ModelNodeId,
        /// Payload
        value: u8,
    },

    /// Send one message to every other node.
    Broadcast {
        /// Sending node
        sender: ModelNodeId,
        /// Payload
        value: u8,
    },

    /// Arm a timer on a node.
    ScheduleTimeout {
        /// Owning node
        node: ModelNodeId,
        /// Delay in ticks
        delay: u8,
    },

    /// Deliver the queued event at `index` (modulo the queue length).
    Deliver {
        /// Position among queued events, in id order
        index: u8,
    },

    /// Drop the queued event at `index` (modulo the queue length).
    Drop {
        /// Position among queued events, in id order
        index: u8,
    },

    /// Cancel every pending timer of a node.
    ClearTimeouts {
        /// Owning node
        node: ModelNodeId,
    },

    /// Move a node into a fresh partition.
    Isolate {
        /// Node to isolate
        node: ModelNodeId,
    },

    /// Return a node to the default partition.
    Heal {
        /// Node to heal
        node: ModelNodeId,
    },

    /// Return every node to the default partition.
    HealAll,

    /// Raise GST.
    Gst,
}

impl Operation {
    /// Same operation with node indices wrapped into `0..MODEL_NODES`.
    #[must_use]
    pub fn clamp(self) -> Self {
        let wrap = |node: ModelNodeId| node % MODEL_NODES;
        match self {
            Self::Send { sender, recipient, value } => {
                Self::Send { sender: wrap(sender), recipient: wrap(recipient), value }
            },
            Self::Broadcast { sender, value } => Self::Broadcast { sender: wrap(sender), value },
            Self::ScheduleTimeout { node, delay } => {
                Self::ScheduleTimeout { node: wrap(node), delay }
            },
            Self::ClearTimeouts { node } => Self::ClearTimeouts { node: wrap(node) },
            Self::Isolate { node } => Self::Isolate { node: wrap(node) },
            Self::Heal { node } => Self::Heal { node: wrap(node) },
            other @ (Self::Deliver { .. } | Self::Drop { .. } | Self::HealAll | Self::Gst) => other,
        }
    }

    /// Public id of a model node.
    pub fn node_id(node: ModelNodeId) -> NodeId {
        replica_id(usize::from(node))
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation failed with an expected error.
    Error(OperationError),
}

impl OperationResult {
    /// Whether the operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Expected operation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Deliver or drop with nothing queued.
    NothingQueued,
}
