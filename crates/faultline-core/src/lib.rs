//! Simulation kernel for testing Byzantine-fault-tolerant protocols.
//!
//! Everything a scenario needs below the scheduler lives here: the event
//! store, the partition router, replica commit logs, the contract protocol
//! implementations program against, and the fault model.
//!
//! # Architecture
//!
//! ```text
//!  Node handlers ──send/broadcast/timeout──▶ Transport (event store)
//!        ▲                                      │  ▲
//!        └──────────── deliver(event) ──────────┘  │ drop / mutate
//!                                                   │
//!                                  Fault model ─────┘ (predicate + behavior)
//! ```
//!
//! The kernel performs no I/O and reads no clock. Time is a logical counter
//! advanced by deliveries, and every state change is recorded as a
//! [`Notification`] so the orchestrator can fan it out to observers.
//!
//! # Event lifecycle
//!
//! Events move `Queued → Delivered` or `Queued → Dropped`, exactly once.
//! Acting on an event in any other state fails with
//! [`SimError::InvalidTransition`]; acting on an unknown id fails with
//! [`SimError::NoSuchEvent`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commit_log;
pub mod error;
pub mod event;
pub mod fault;
pub mod message;
pub mod node;
pub mod notice;
pub mod router;
pub mod transport;

pub use commit_log::{CommitLog, CommitLogError, LogEntry};
pub use error::{HandlerError, SimError};
pub use event::{DroppedReason, Event, EventId, EventKind, EventStatus, NodeId};
pub use fault::{
    Fault, FaultBehavior, FaultContext, FaultId, FaultOutcome, FaultPredicate, FaultRegistry,
    FiringKey, Mutator, MutatorId, MutatorRegistry,
};
pub use message::{Message, RoundInfo};
pub use node::{Node, NodeContext, SendFilter};
pub use notice::Notification;
pub use router::{DEFAULT_PARTITION, Router};
pub use transport::{Delivery, Dispatch, Transport};
