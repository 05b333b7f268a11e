//! Round oracle.
//!
//! Infers how far each replica has progressed through the protocol's round
//! structure from the `(view, sequence, verb)` of the messages it sends and
//! receives, and tags every round-bearing message with its sender's round at
//! send time. ByzzFuzz faults key on these tags through
//! [`FaultPredicate::InferredRound`](faultline_core::FaultPredicate::InferredRound).
//!
//! A replica's round advances when it sends to other replicas or receives a
//! message from a later position:
//!
//! - higher view: +1
//! - same view, higher sequence: `verb + rounds_per_request - previous verb`
//! - same view and sequence, higher verb: the verb difference
//! - first round-bearing message seen: its verb
//!
//! A reply to clients closes the request: +1, and the verb jumps to
//! `rounds_per_request`. Messages with verb 0 are outside the round structure
//! and never advance anything.

use std::collections::{BTreeMap, BTreeSet};

use faultline_core::{Event, EventId, Message, NodeId, Notification, RoundInfo, Transport};

use crate::subscriber::{Observation, Subscriber};

/// Per-replica round tracking and per-message round tags.
#[derive(Debug, Clone)]
pub struct RoundOracle {
    replicas: BTreeSet<NodeId>,
    rounds_per_request: u32,
    info: BTreeMap<NodeId, RoundInfo>,
    rounds: BTreeMap<NodeId, u64>,
    message_rounds: BTreeMap<EventId, u64>,
}

impl RoundOracle {
    /// Oracle for `replicas`.
    pub fn new(replicas: BTreeSet<NodeId>, rounds_per_request: u32) -> Self {
        Self {
            replicas,
            rounds_per_request,
            info: BTreeMap::new(),
            rounds: BTreeMap::new(),
            message_rounds: BTreeMap::new(),
        }
    }

    /// Current round of `replica` (0 before any progress).
    pub fn replica_round(&self, replica: &str) -> u64 {
        self.rounds.get(replica).copied().unwrap_or(0)
    }

    /// Last position recorded for `replica`.
    pub fn replica_info(&self, replica: &str) -> Option<RoundInfo> {
        self.info.get(replica).copied()
    }

    /// Round tag of a message event.
    pub fn round_of(&self, event: EventId) -> Option<u64> {
        self.message_rounds.get(&event).copied()
    }

    /// Handle a multicast of `events` from `sender`.
    pub fn on_multicast<M: Message>(
        &mut self,
        sender: &str,
        recipients: &[NodeId],
        events: &[EventId],
        transport: &Transport<M>,
    ) {
        if !self.replicas.contains(sender) {
            return;
        }
        let Some(info) = events
            .first()
            .and_then(|id| transport.event(*id))
            .and_then(Event::payload)
            .and_then(Message::round_info)
        else {
            return;
        };

        if recipients.iter().any(|r| self.replicas.contains(r)) {
            if info.verb != 0 {
                self.advance(sender, info);
            }
        } else if !recipients.is_empty() {
            self.close_request(sender, info);
        }

        let round = self.replica_round(sender);
        for id in events {
            self.message_rounds.insert(*id, round);
        }
    }

    /// Handle delivery of `event`.
    pub fn on_delivered<M: Message>(&mut self, event: &Event<M>) {
        if !event.is_message() || !self.replicas.contains(&event.recipient) {
            return;
        }
        let Some(info) = event.payload().and_then(Message::round_info) else {
            return;
        };
        if info.verb != 0 {
            self.advance(&event.recipient, info);
        }
    }

    fn advance(&mut self, replica: &str, message: RoundInfo) -> u64 {
        let per_request = u64::from(self.rounds_per_request);
        let (delta, newer) = match self.info.get(replica) {
            None => (u64::from(message.verb), true),
            Some(current) if message.view > current.view => (1, true),
            Some(current)
                if message.view == current.view && message.sequence > current.sequence =>
            {
                let delta = (u64::from(message.verb) + per_request)
                    .saturating_sub(u64::from(current.verb));
                (delta, true)
            },
            Some(current)
                if message.view == current.view
                    && message.sequence == current.sequence
                    && message.verb > current.verb =>
            {
                (u64::from(message.verb - current.verb), true)
            },
            Some(_) => (0, false),
        };

        if newer {
            self.info.insert(replica.to_owned(), message);
        }
        *self.rounds.entry(replica.to_owned()).or_default() += delta;
        delta
    }

    fn close_request(&mut self, replica: &str, message: RoundInfo) {
        *self.rounds.entry(replica.to_owned()).or_default() += 1;
        let current = self.info.get(replica).copied().unwrap_or(message);
        self.info.insert(
            replica.to_owned(),
            RoundInfo::new(current.view, current.sequence, self.rounds_per_request),
        );
    }
}

impl<M: Message> Subscriber<M> for RoundOracle {
    fn notify(&mut self, notice: &Notification, observation: &Observation<'_, M>) {
        match notice {
            Notification::Multicast { sender, recipients, events } => {
                self.on_multicast(sender, recipients, events, observation.transport);
            },
            Notification::EventDelivered { event } => {
                if let Some(event) = observation.transport.event(*event) {
                    self.on_delivered(event);
                }
            },
            _ => {},
        }
    }
}
