//! Simulation error types.
//!
//! Errors here are the fatal half of the taxonomy: acting on an event in the
//! wrong state, misconfigured mutations, and protocol handler faults. A
//! predicate violation is never an error; it is a value recorded by the
//! orchestrator.

use thiserror::Error;

use crate::event::{EventId, EventStatus, NodeId};

/// Errors returned by protocol handlers.
///
/// The store wraps these in [`SimError::HandlerFault`] so the scenario can
/// report that the protocol crashed rather than violated a property.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Handler received a payload it has no case for.
    #[error("unexpected {tag} message from {sender}")]
    UnexpectedMessage {
        /// Variant tag of the payload
        tag: &'static str,
        /// Sender of the payload
        sender: NodeId,
    },

    /// Handler tried to commit twice at the same sequence number.
    #[error("sequence {0} already committed")]
    AlreadyCommitted(u64),

    /// Any other protocol-level failure.
    #[error("{0}")]
    Protocol(String),
}

/// Errors raised by the event store, router and fault model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// No event with this id was ever created.
    #[error("event {0} not found")]
    NoSuchEvent(EventId),

    /// Event exists but is not QUEUED.
    #[error("event {event} is {status}, expected queued")]
    InvalidTransition {
        /// Event the action targeted
        event: EventId,
        /// Status the event was actually in
        status: EventStatus,
    },

    /// Operation requires a message event.
    #[error("event {0} is not a message")]
    NotAMessage(EventId),

    /// Operation requires a timeout event.
    #[error("event {0} is not a timeout")]
    NotATimeout(EventId),

    /// Mutator does not accept the payload variant of the target event.
    #[error("mutator {mutator} does not accept {tag} payloads")]
    UnsupportedMutation {
        /// Mutator that was asked to run
        mutator: String,
        /// Variant tag of the rejected payload
        tag: &'static str,
    },

    /// No mutator with this id is registered.
    #[error("no mutator named {0}")]
    UnknownMutator(String),

    /// No registered mutator accepts the payload of this event.
    #[error("no mutator accepts event {0}")]
    NoApplicableMutator(EventId),

    /// No fault with this id is registered.
    #[error("fault {0} not found")]
    UnknownFault(String),

    /// Fault behavior acts on a message but no event was supplied.
    #[error("fault {0} requires a target event")]
    MissingEvent(String),

    /// No node with this id exists in the scenario.
    #[error("node {0} not found")]
    UnknownNode(NodeId),

    /// Recipient handler failed during delivery.
    #[error("handler fault on {node}: {source}")]
    HandlerFault {
        /// Node whose handler failed
        node: NodeId,
        /// What the handler reported
        #[source]
        source: HandlerError,
    },
}

impl SimError {
    /// The protocol under test crashed, as opposed to the harness being
    /// driven incorrectly.
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::HandlerFault { .. })
    }

    /// The scenario was configured with a fault or mutator that cannot apply.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMutation { .. }
                | Self::UnknownMutator(_)
                | Self::NoApplicableMutator(_)
                | Self::UnknownFault(_)
                | Self::MissingEvent(_)
                | Self::UnknownNode(_)
        )
    }
}
