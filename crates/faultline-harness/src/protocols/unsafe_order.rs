//! Arrival-order commits with no coordination.

use std::collections::{BTreeMap, BTreeSet};

use faultline_core::{HandlerError, Message, Node, NodeContext, NodeId, RoundInfo};

use crate::protocol::Protocol;

/// Messages of [`UnsafeOrder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsafeMessage {
    /// Client operation `number`.
    Request {
        /// Per-client request number
        number: u64,
    },
    /// Replica committed the request at `sequence`.
    Reply {
        /// Request number
        number: u64,
        /// Local sequence
        sequence: u64,
    },
}

impl Message for UnsafeMessage {
    fn tag(&self) -> &'static str {
        match self {
            Self::Request { .. } => "REQUEST",
            Self::Reply { .. } => "REPLY",
        }
    }

    fn round_info(&self) -> Option<RoundInfo> {
        match self {
            Self::Request { .. } => None,
            Self::Reply { sequence, .. } => Some(RoundInfo::new(0, *sequence, 1)),
        }
    }
}

/// Replicas commit each client request at the next free local sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsafeOrder;

impl Protocol for UnsafeOrder {
    type Message = UnsafeMessage;

    fn name(&self) -> &'static str {
        "unsafe-order"
    }

    fn build_replica(
        &self,
        _id: &str,
        _replicas: &BTreeSet<NodeId>,
    ) -> Box<dyn Node<UnsafeMessage>> {
        Box::new(ArrivalReplica::default())
    }

    fn build_client(
        &self,
        _id: &str,
        replicas: &BTreeSet<NodeId>,
    ) -> Box<dyn Node<UnsafeMessage>> {
        Box::new(ArrivalClient {
            replicas: replicas.iter().cloned().collect(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Default)]
struct ArrivalReplica {
    seen: BTreeSet<(NodeId, u64)>,
    next: u64,
}

impl Node<UnsafeMessage> for ArrivalReplica {
    fn handle_message(
        &mut self,
        _ctx: &mut NodeContext<'_, UnsafeMessage>,
        sender: &str,
        payload: UnsafeMessage,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::UnexpectedMessage { tag: payload.tag(), sender: sender.to_owned() })
    }

    fn handle_client_request(
        &mut self,
        ctx: &mut NodeContext<'_, UnsafeMessage>,
        client: &str,
        payload: UnsafeMessage,
    ) -> Result<(), HandlerError> {
        let UnsafeMessage::Request { number } = payload else {
            return Err(HandlerError::UnexpectedMessage { tag: "REPLY", sender: client.to_owned() });
        };
        if !self.seen.insert((client.to_owned(), number)) {
            return Ok(());
        }

        self.next += 1;
        ctx.commit_operation(self.next, format!("{client}/{number}"))?;
        ctx.send(client, UnsafeMessage::Reply { number, sequence: self.next });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ArrivalClient {
    replicas: Vec<NodeId>,
    number: u64,
    replies: BTreeMap<u64, BTreeSet<NodeId>>,
}

impl ArrivalClient {
    fn issue(&mut self, ctx: &mut NodeContext<'_, UnsafeMessage>) {
        self.number += 1;
        ctx.multicast_request(&self.replicas, UnsafeMessage::Request { number: self.number });
    }
}

impl Node<UnsafeMessage> for ArrivalClient {
    fn initialize(&mut self, ctx: &mut NodeContext<'_, UnsafeMessage>) -> Result<(), HandlerError> {
        self.issue(ctx);
        Ok(())
    }

    fn handle_message(
        &mut self,
        ctx: &mut NodeContext<'_, UnsafeMessage>,
        sender: &str,
        payload: UnsafeMessage,
    ) -> Result<(), HandlerError> {
        let UnsafeMessage::Reply { number, .. } = payload else {
            let sender = sender.to_owned();
            return Err(HandlerError::UnexpectedMessage { tag: "REQUEST", sender });
        };
        let voters = self.replies.entry(number).or_default();
        voters.insert(sender.to_owned());
        if number == self.number && voters.len() == self.replicas.len() {
            self.issue(ctx);
        }
        Ok(())
    }
}
