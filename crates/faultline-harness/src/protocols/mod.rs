//! Reference protocols.
//!
//! Small protocols for exercising the harness end to end:
//!
//! - [`Consensus`]: a fixed-leader propose/ack/commit protocol with 2f+1
//!   quorums and retransmission. Safe under up to f faulty replicas.
//! - [`UnsafeOrder`]: every replica commits client requests in its own
//!   arrival order. Breaks agreement as soon as two requests race.

mod consensus;
mod unsafe_order;

pub use consensus::{Consensus, ConsensusMessage, Request};
pub use unsafe_order::UnsafeOrder;

use crate::config::ConfigError;

/// Names accepted by [`ProtocolKind::from_name`].
pub const PROTOCOL_NAMES: [&str; 2] = ["consensus", "unsafe-order"];

/// Built-in protocol selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// [`Consensus`]
    Consensus,
    /// [`UnsafeOrder`]
    UnsafeOrder,
}

impl ProtocolKind {
    /// Look up a built-in protocol.
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "consensus" => Ok(Self::Consensus),
            "unsafe-order" => Ok(Self::UnsafeOrder),
            other => Err(ConfigError::UnknownProtocol(other.to_owned())),
        }
    }
}
