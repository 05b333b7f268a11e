//! Protocol payload contract.

use std::fmt;

use serde::Serialize;

/// Position of a message in a protocol's round structure.
///
/// `verb` is the index of the message kind within one request's happy path
/// (for example pre-prepare = 1, prepare = 2). A verb of zero marks messages
/// that are not part of the round structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct RoundInfo {
    /// View (leader epoch)
    pub view: u64,
    /// Sequence number the message is about
    pub sequence: u64,
    /// Index of the message kind within a request's rounds
    pub verb: u32,
}

impl RoundInfo {
    /// Create round info.
    pub fn new(view: u64, sequence: u64, verb: u32) -> Self {
        Self { view, sequence, verb }
    }

    /// Round the payload claims to belong to.
    pub fn round(&self) -> u64 {
        self.sequence
    }

    /// View number the payload was sent in.
    pub fn view_number(&self) -> u64 {
        self.view
    }
}

/// A protocol's message set.
///
/// Implemented by a closed enum per protocol. Fault predicates and mutators
/// key on [`Message::tag`], never on runtime type identity.
pub trait Message: Clone + fmt::Debug + Send + 'static {
    /// Stable name of the payload variant.
    fn tag(&self) -> &'static str;

    /// Round position, for payloads that carry one.
    fn round_info(&self) -> Option<RoundInfo> {
        None
    }
}
