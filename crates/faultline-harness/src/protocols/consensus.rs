//! Fixed-leader propose/ack/commit consensus.
//!
//! The replica with the smallest id leads view 0 for the whole run. For
//! each client request it assigns the next sequence number and broadcasts a
//! `PROPOSE`. Replicas answer with `ACK`; after 2f+1 matching acks a replica
//! broadcasts `COMMIT`, and after 2f+1 matching commits it commits the
//! request and replies to the client. Clients wait for f+1 matching replies
//! before issuing their next request.
//!
//! Lost messages are repaired by the client's retransmit timer: a repeated
//! request makes the leader re-propose, followers re-ack and re-commit, and
//! replicas that already committed resend their reply.

use std::collections::{BTreeMap, BTreeSet};

use faultline_core::{EventId, HandlerError, Message, Mutator, Node, NodeContext, NodeId, RoundInfo};

use crate::protocol::Protocol;

/// Ticks a client waits for replies before resending its request.
const RETRANSMIT_DELAY: u64 = 20;

/// A client operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Request {
    /// Issuing client
    pub client: NodeId,
    /// Per-client request number, starting at 1
    pub number: u64,
    /// Opaque operation
    pub operation: String,
}

impl Request {
    /// Value committed for this request.
    pub fn digest(&self) -> String {
        format!("{}/{}/{}", self.client, self.number, self.operation)
    }

    fn key(&self) -> (NodeId, u64) {
        (self.client.clone(), self.number)
    }
}

/// Messages of [`Consensus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    /// Client to replicas.
    Request(Request),
    /// Leader assigns `request` to `sequence`.
    Propose {
        /// View number
        view: u64,
        /// Assigned sequence
        sequence: u64,
        /// Proposed request
        request: Request,
    },
    /// Replica accepted a proposal.
    Ack {
        /// View number
        view: u64,
        /// Sequence acked
        sequence: u64,
        /// Digest of the accepted request
        digest: String,
    },
    /// Replica saw a quorum of acks.
    Commit {
        /// View number
        view: u64,
        /// Sequence committed
        sequence: u64,
        /// Digest of the request
        digest: String,
    },
    /// Replica to client: request executed.
    Reply {
        /// View number
        view: u64,
        /// Sequence the request was committed at
        sequence: u64,
        /// Client request number
        number: u64,
        /// Committed digest
        result: String,
    },
}

impl Message for ConsensusMessage {
    fn tag(&self) -> &'static str {
        match self {
            Self::Request(_) => "REQUEST",
            Self::Propose { .. } => "PROPOSE",
            Self::Ack { .. } => "ACK",
            Self::Commit { .. } => "COMMIT",
            Self::Reply { .. } => "REPLY",
        }
    }

    fn round_info(&self) -> Option<RoundInfo> {
        match self {
            Self::Request(_) => None,
            Self::Propose { view, sequence, .. } => Some(RoundInfo::new(*view, *sequence, 1)),
            Self::Ack { view, sequence, .. } => Some(RoundInfo::new(*view, *sequence, 2)),
            Self::Commit { view, sequence, .. } => Some(RoundInfo::new(*view, *sequence, 3)),
            Self::Reply { view, sequence, .. } => Some(RoundInfo::new(*view, *sequence, 4)),
        }
    }
}

fn corrupt_operation(message: &ConsensusMessage) -> ConsensusMessage {
    let mut message = message.clone();
    match &mut message {
        ConsensusMessage::Propose { request, .. } => request.operation.push('!'),
        ConsensusMessage::Ack { digest, .. } | ConsensusMessage::Commit { digest, .. } => {
            digest.push('!');
        },
        ConsensusMessage::Request(_) | ConsensusMessage::Reply { .. } => {},
    }
    message
}

fn bump_sequence(message: &ConsensusMessage) -> ConsensusMessage {
    let mut message = message.clone();
    match &mut message {
        ConsensusMessage::Propose { sequence, .. }
        | ConsensusMessage::Ack { sequence, .. }
        | ConsensusMessage::Commit { sequence, .. } => *sequence += 1,
        ConsensusMessage::Request(_) | ConsensusMessage::Reply { .. } => {},
    }
    message
}

/// Fixed-leader three-phase consensus.
#[derive(Debug, Clone, Copy, Default)]
pub struct Consensus;

impl Protocol for Consensus {
    type Message = ConsensusMessage;

    fn name(&self) -> &'static str {
        "consensus"
    }

    fn build_replica(
        &self,
        _id: &str,
        replicas: &BTreeSet<NodeId>,
    ) -> Box<dyn Node<Self::Message>> {
        Box::new(ConsensusReplica::new(replicas))
    }

    fn build_client(&self, _id: &str, replicas: &BTreeSet<NodeId>) -> Box<dyn Node<Self::Message>> {
        Box::new(ConsensusClient::new(replicas))
    }

    fn mutators(&self) -> Vec<Mutator<Self::Message>> {
        let phases = ["PROPOSE", "ACK", "COMMIT"];
        vec![
            Mutator::new("corrupt-operation", "corrupt the value", phases, corrupt_operation),
            Mutator::new("bump-sequence", "shift the sequence number", phases, bump_sequence),
        ]
    }

    fn rounds_per_request(&self) -> u32 {
        4
    }
}

type Votes = BTreeMap<String, BTreeSet<NodeId>>;

fn votes(votes: &Votes, digest: &str) -> usize {
    votes.get(digest).map_or(0, BTreeSet::len)
}

#[derive(Debug, Default)]
struct Slot {
    request: Option<Request>,
    acks: Votes,
    commits: Votes,
    commit_sent: bool,
    committed: bool,
}

#[derive(Debug)]
struct ConsensusReplica {
    leader: NodeId,
    quorum: usize,
    view: u64,
    next_sequence: u64,
    assigned: BTreeMap<(NodeId, u64), u64>,
    slots: BTreeMap<u64, Slot>,
}

impl ConsensusReplica {
    fn new(replicas: &BTreeSet<NodeId>) -> Self {
        let f = replicas.len().saturating_sub(1) / 3;
        Self {
            leader: replicas.first().cloned().unwrap_or_default(),
            quorum: 2 * f + 1,
            view: 0,
            next_sequence: 0,
            assigned: BTreeMap::new(),
            slots: BTreeMap::new(),
        }
    }

    fn on_propose(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
        sender: &str,
        sequence: u64,
        request: Request,
    ) -> Result<(), HandlerError> {
        if sender != self.leader {
            return Ok(());
        }
        let digest = request.digest();
        let slot = self.slots.entry(sequence).or_default();
        if let Some(existing) = &slot.request {
            if existing.digest() == digest {
                return self.retransmit(ctx, sequence);
            }
            tracing::debug!(replica = ctx.owner(), sequence, "Conflicting proposal ignored");
            return Ok(());
        }

        slot.request = Some(request.clone());
        let voters = slot.acks.entry(digest.clone()).or_default();
        voters.extend([sender.to_owned(), ctx.id().to_owned()]);
        self.assigned.insert(request.key(), sequence);
        ctx.broadcast(ConsensusMessage::Ack { view: self.view, sequence, digest });
        self.progress(ctx, sequence)
    }

    fn on_request(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
        request: Request,
    ) -> Result<(), HandlerError> {
        if let Some(&sequence) = self.assigned.get(&request.key()) {
            return self.retransmit(ctx, sequence);
        }
        if ctx.id() != self.leader {
            return Ok(());
        }

        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let slot = self.slots.entry(sequence).or_default();
        slot.acks.entry(request.digest()).or_default().insert(ctx.id().to_owned());
        slot.request = Some(request.clone());
        self.assigned.insert(request.key(), sequence);

        tracing::debug!(leader = ctx.owner(), sequence, client = %request.client, "Proposing");
        ctx.broadcast(ConsensusMessage::Propose { view: self.view, sequence, request });
        self.progress(ctx, sequence)
    }

    /// Resend everything this replica already said about `sequence`.
    fn retransmit(
        &self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
        sequence: u64,
    ) -> Result<(), HandlerError> {
        let view = self.view;
        let Some(slot) = self.slots.get(&sequence) else {
            return Ok(());
        };
        let Some(request) = slot.request.clone() else {
            return Ok(());
        };
        let digest = request.digest();

        if slot.committed {
            let reply =
                ConsensusMessage::Reply { view, sequence, number: request.number, result: digest };
            ctx.send(&request.client, reply);
            return Ok(());
        }
        let commit_sent = slot.commit_sent;
        if ctx.id() == self.leader {
            ctx.broadcast(ConsensusMessage::Propose { view, sequence, request });
        } else {
            ctx.broadcast(ConsensusMessage::Ack { view, sequence, digest: digest.clone() });
        }
        if commit_sent {
            ctx.broadcast(ConsensusMessage::Commit { view, sequence, digest });
        }
        Ok(())
    }

    fn progress(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
        sequence: u64,
    ) -> Result<(), HandlerError> {
        let view = self.view;
        let quorum = self.quorum;
        let Some(slot) = self.slots.get_mut(&sequence) else {
            return Ok(());
        };
        let Some(request) = slot.request.clone() else {
            return Ok(());
        };
        let digest = request.digest();

        if !slot.commit_sent && votes(&slot.acks, &digest) >= quorum {
            slot.commit_sent = true;
            slot.commits.entry(digest.clone()).or_default().insert(ctx.id().to_owned());
            ctx.broadcast(ConsensusMessage::Commit { view, sequence, digest: digest.clone() });
        }
        if !slot.committed && votes(&slot.commits, &digest) >= quorum {
            slot.committed = true;
            ctx.commit_operation(sequence, digest.clone())?;
            let reply =
                ConsensusMessage::Reply { view, sequence, number: request.number, result: digest };
            ctx.send(&request.client, reply);
        }
        Ok(())
    }
}

impl Node<ConsensusMessage> for ConsensusReplica {
    fn initialize(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
    ) -> Result<(), HandlerError> {
        ctx.report_leader_change(&self.leader);
        Ok(())
    }

    fn handle_message(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
        sender: &str,
        payload: ConsensusMessage,
    ) -> Result<(), HandlerError> {
        match payload {
            ConsensusMessage::Propose { view, sequence, request } if view == self.view => {
                self.on_propose(ctx, sender, sequence, request)
            },
            ConsensusMessage::Ack { view, sequence, digest } if view == self.view => {
                let slot = self.slots.entry(sequence).or_default();
                slot.acks.entry(digest).or_default().insert(sender.to_owned());
                self.progress(ctx, sequence)
            },
            ConsensusMessage::Commit { view, sequence, digest } if view == self.view => {
                let slot = self.slots.entry(sequence).or_default();
                slot.commits.entry(digest).or_default().insert(sender.to_owned());
                self.progress(ctx, sequence)
            },
            ConsensusMessage::Propose { .. }
            | ConsensusMessage::Ack { .. }
            | ConsensusMessage::Commit { .. } => Ok(()),
            ConsensusMessage::Request(_) | ConsensusMessage::Reply { .. } => {
                let tag = payload.tag();
                Err(HandlerError::UnexpectedMessage { tag, sender: sender.to_owned() })
            },
        }
    }

    fn handle_client_request(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
        client: &str,
        payload: ConsensusMessage,
    ) -> Result<(), HandlerError> {
        match payload {
            ConsensusMessage::Request(request) => self.on_request(ctx, request),
            other => {
                Err(HandlerError::UnexpectedMessage { tag: other.tag(), sender: client.to_owned() })
            },
        }
    }
}

#[derive(Debug)]
struct ConsensusClient {
    replicas: Vec<NodeId>,
    needed: usize,
    number: u64,
    replies: Votes,
    timer: Option<EventId>,
}

impl ConsensusClient {
    fn new(replicas: &BTreeSet<NodeId>) -> Self {
        Self {
            replicas: replicas.iter().cloned().collect(),
            needed: replicas.len().saturating_sub(1) / 3 + 1,
            number: 1,
            replies: BTreeMap::new(),
            timer: None,
        }
    }

    fn issue(&mut self, ctx: &mut NodeContext<'_, ConsensusMessage>) {
        let request = Request {
            client: ctx.id().to_owned(),
            number: self.number,
            operation: format!("op{}", self.number),
        };
        ctx.multicast_request(&self.replicas, ConsensusMessage::Request(request));
        self.timer = Some(ctx.set_timeout("retransmit", RETRANSMIT_DELAY));
    }
}

impl Node<ConsensusMessage> for ConsensusClient {
    fn initialize(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
    ) -> Result<(), HandlerError> {
        self.issue(ctx);
        Ok(())
    }

    fn handle_message(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
        sender: &str,
        payload: ConsensusMessage,
    ) -> Result<(), HandlerError> {
        let tag = payload.tag();
        let ConsensusMessage::Reply { number, result, .. } = payload else {
            return Err(HandlerError::UnexpectedMessage { tag, sender: sender.to_owned() });
        };
        if number != self.number {
            return Ok(());
        }

        let voters = self.replies.entry(result).or_default();
        voters.insert(sender.to_owned());
        if voters.len() >= self.needed {
            if let Some(timer) = self.timer.take() {
                ctx.clear_timeout(timer);
            }
            tracing::debug!(client = ctx.id(), number, "Request completed");
            self.replies.clear();
            self.number += 1;
            self.issue(ctx);
        }
        Ok(())
    }

    fn handle_timeout(
        &mut self,
        ctx: &mut NodeContext<'_, ConsensusMessage>,
        timer: EventId,
        _description: &str,
    ) -> Result<(), HandlerError> {
        if self.timer == Some(timer) {
            self.issue(ctx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(number: u64) -> Request {
        Request { client: "C0".into(), number, operation: format!("op{number}") }
    }

    #[test]
    fn phases_carry_rounds() {
        let propose = ConsensusMessage::Propose { view: 0, sequence: 2, request: request(1) };
        let ack = ConsensusMessage::Ack { view: 0, sequence: 2, digest: String::new() };

        assert_eq!(propose.round_info(), Some(RoundInfo::new(0, 2, 1)));
        assert_eq!(ack.round_info().map(|r| r.verb), Some(2));
        assert_eq!(ConsensusMessage::Request(request(1)).round_info(), None);
    }

    #[test]
    fn mutators_change_only_protocol_phases() {
        let mutators = Consensus.mutators();
        let propose = ConsensusMessage::Propose { view: 0, sequence: 1, request: request(1) };

        for mutator in &mutators {
            assert!(mutator.accepts("PROPOSE"));
            assert!(!mutator.accepts("REQUEST"));
            assert_ne!(mutator.apply(&propose).expect("accepted"), propose);
        }
        assert!(mutators[0].apply(&ConsensusMessage::Request(request(1))).is_err());
    }

    #[test]
    fn digest_names_client_and_number() {
        assert_eq!(request(3).digest(), "C0/3/op3");
    }

    #[test]
    fn quorums_follow_replica_count() {
        let four: BTreeSet<NodeId> = ["A", "B", "C", "D"].map(String::from).into();
        let replica = ConsensusReplica::new(&four);
        let client = ConsensusClient::new(&four);

        assert_eq!(replica.leader, "A");
        assert_eq!(replica.quorum, 3);
        assert_eq!(client.needed, 2);
    }
}
