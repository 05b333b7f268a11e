//! Node arena.
//!
//! Every node instance of a scenario lives in one flat table indexed by
//! position. Public ids map to either a single instance or a twin group;
//! timeouts route by the internal id of the instance that armed them.
//!
//! Twin groups carry per-round partitions. Inbound messages reach only the
//! twins sharing a partition with the sender for the payload's round, and
//! each twin's outbound messages pass through a [`SendFilter`] confining it
//! to its own partition.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use faultline_core::{
    CommitLog, Dispatch, Event, EventId, EventKind, HandlerError, Message, Node, NodeContext,
    NodeId, SendFilter, SimError, Transport,
};

use crate::{predicates::ReplicaSnapshot, protocol::Protocol, strategy::TwinPlan};

/// Role of a node instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Replica: commits entries, checked by predicates
    Replica,
    /// Client: issues requests
    Client,
}

struct NodeSlot<M> {
    id: NodeId,
    internal: NodeId,
    role: Role,
    node: Box<dyn Node<M>>,
    log: CommitLog,
    twin_group: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Single(usize),
    Twins(usize),
}

#[derive(Debug)]
struct TwinGroup {
    members: Vec<usize>,
    round_partitions: BTreeMap<u64, Vec<Vec<NodeId>>>,
}

impl TwinGroup {
    fn layout<M: Message>(&self, payload: &M) -> Option<&[Vec<NodeId>]> {
        let round = payload.round_info()?.round();
        self.round_partitions.get(&round).map(Vec::as_slice)
    }
}

fn position(layout: &[Vec<NodeId>], node: &str) -> Option<usize> {
    layout.iter().position(|group| group.iter().any(|n| n == node))
}

struct TwinFilter<'a> {
    group: &'a TwinGroup,
    instance: &'a str,
}

impl<M: Message> SendFilter<M> for TwinFilter<'_> {
    fn permits(&self, recipient: &str, payload: &M) -> bool {
        let Some(layout) = self.group.layout(payload) else {
            return true;
        };
        match position(layout, recipient) {
            Some(theirs) => position(layout, self.instance) == Some(theirs),
            None => true,
        }
    }
}

enum Call<'e, M> {
    Initialize,
    Message { sender: &'e str, payload: M },
    Request { client: &'e str, payload: M },
    Timeout { timer: EventId, description: &'e str },
}

/// All node instances of a scenario.
pub struct NodeTable<M> {
    slots: Vec<NodeSlot<M>>,
    index: BTreeMap<NodeId, Entry>,
    internal: BTreeMap<NodeId, usize>,
    groups: Vec<TwinGroup>,
    replicas: BTreeSet<NodeId>,
    clients: BTreeSet<NodeId>,
}

impl<M> fmt::Debug for NodeTable<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTable")
            .field("instances", &self.slots.iter().map(|s| &s.internal).collect::<Vec<_>>())
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

impl<M: Message> NodeTable<M> {
    /// Empty table for the given membership.
    pub fn new(replicas: BTreeSet<NodeId>, clients: BTreeSet<NodeId>) -> Self {
        Self {
            slots: Vec::new(),
            index: BTreeMap::new(),
            internal: BTreeMap::new(),
            groups: Vec::new(),
            replicas,
            clients,
        }
    }

    /// Table with one fresh node per replica and client of `protocol`.
    pub fn build<P: Protocol<Message = M>>(
        protocol: &P,
        replicas: BTreeSet<NodeId>,
        clients: BTreeSet<NodeId>,
    ) -> Self {
        let mut table = Self::new(replicas, clients);
        let replicas = table.replicas.clone();
        for id in &replicas {
            table.add(id, Role::Replica, protocol.build_replica(id, &replicas));
        }
        for id in table.clients.clone() {
            table.add(&id, Role::Client, protocol.build_client(&id, &replicas));
        }
        table
    }

    /// Add a single instance whose internal id equals its public id.
    pub fn add(&mut self, id: &str, role: Role, node: Box<dyn Node<M>>) {
        let slot = self.slots.len();
        self.slots.push(NodeSlot {
            id: id.to_owned(),
            internal: id.to_owned(),
            role,
            node,
            log: CommitLog::new(),
            twin_group: None,
        });
        self.index.insert(id.to_owned(), Entry::Single(slot));
        self.internal.insert(id.to_owned(), slot);
    }

    /// Replace replica `plan.replica` with one instance per internal id in
    /// the plan. Must run before [`Self::initialize`].
    pub fn add_twins<F>(&mut self, plan: TwinPlan, mut build: F) -> Result<(), SimError>
    where
        F: FnMut(&str) -> Box<dyn Node<M>>,
    {
        let Some(Entry::Single(original)) = self.index.get(&plan.replica).copied() else {
            return Err(SimError::UnknownNode(plan.replica));
        };
        let group = self.groups.len();
        let mut members = Vec::with_capacity(plan.instances.len());

        self.internal.remove(&plan.replica);
        for (i, instance) in plan.instances.iter().enumerate() {
            let slot = NodeSlot {
                id: plan.replica.clone(),
                internal: instance.clone(),
                role: Role::Replica,
                node: build(&plan.replica),
                log: CommitLog::new(),
                twin_group: Some(group),
            };
            let position = if i == 0 {
                self.slots[original] = slot;
                original
            } else {
                self.slots.push(slot);
                self.slots.len() - 1
            };
            self.internal.insert(instance.clone(), position);
            members.push(position);
        }

        tracing::debug!(replica = %plan.replica, instances = ?plan.instances, "Created twins");
        self.index.insert(plan.replica, Entry::Twins(group));
        self.groups.push(TwinGroup { members, round_partitions: plan.round_partitions });
        Ok(())
    }

    /// Run every instance's `initialize` handler in table order.
    pub fn initialize(&mut self, transport: &mut Transport<M>) -> Result<(), SimError> {
        for slot in 0..self.slots.len() {
            self.invoke(slot, transport, Call::Initialize).map_err(|source| {
                SimError::HandlerFault { node: self.slots[slot].internal.clone(), source }
            })?;
        }
        Ok(())
    }

    /// Public replica ids.
    pub fn replicas(&self) -> &BTreeSet<NodeId> {
        &self.replicas
    }

    /// Public client ids.
    pub fn clients(&self) -> &BTreeSet<NodeId> {
        &self.clients
    }

    /// Internal ids of all instances in table order.
    pub fn instances(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.internal.as_str()).collect()
    }

    /// Public id of an instance.
    pub fn public_id(&self, internal: &str) -> Option<&str> {
        self.internal.get(internal).map(|&slot| self.slots[slot].id.as_str())
    }

    /// Commit log of an instance.
    pub fn commit_log(&self, internal: &str) -> Option<&CommitLog> {
        self.internal.get(internal).map(|&slot| &self.slots[slot].log)
    }

    /// Replica logs for predicate checks, ordered by internal id.
    pub fn replica_snapshots(&self, faulty: &BTreeSet<NodeId>) -> Vec<ReplicaSnapshot> {
        let mut replicas: Vec<_> = self
            .slots
            .iter()
            .filter(|s| s.role == Role::Replica)
            .map(|s| ReplicaSnapshot {
                id: s.internal.clone(),
                faulty: faulty.contains(&s.id),
                log: s.log.clone(),
            })
            .collect();
        replicas.sort_by(|a, b| a.id.cmp(&b.id));
        replicas
    }

    fn targets(
        &self,
        recipient: &str,
        sender: &str,
        payload: &M,
    ) -> Result<Vec<usize>, HandlerError> {
        match self.index.get(recipient) {
            Some(Entry::Single(slot)) => Ok(vec![*slot]),
            Some(Entry::Twins(group)) => {
                let group = &self.groups[*group];
                let partition = group.layout(payload).and_then(|layout| {
                    position(layout, sender).map(|pos| &layout[pos])
                });
                Ok(match partition {
                    Some(peers) => group
                        .members
                        .iter()
                        .copied()
                        .filter(|&m| peers.contains(&self.slots[m].internal))
                        .collect(),
                    None => group.members.clone(),
                })
            },
            None => Err(HandlerError::Protocol(format!("no node {recipient}"))),
        }
    }

    fn invoke(
        &mut self,
        slot: usize,
        transport: &mut Transport<M>,
        call: Call<'_, M>,
    ) -> Result<(), HandlerError> {
        let Self { slots, groups, replicas, .. } = self;
        let NodeSlot { id, internal, node, log, twin_group, .. } = slots
            .get_mut(slot)
            .ok_or_else(|| HandlerError::Protocol(format!("no node slot {slot}")))?;
        let (id, internal): (&str, &str) = (id, internal);

        let filter = twin_group.map(|g| TwinFilter { group: &groups[g], instance: internal });
        let mut ctx = NodeContext::new(id, internal, replicas, transport, log);
        if let Some(filter) = &filter {
            ctx = ctx.with_filter(filter);
        }

        match call {
            Call::Initialize => node.initialize(&mut ctx),
            Call::Message { sender, payload } => node.handle_message(&mut ctx, sender, payload),
            Call::Request { client, payload } => {
                node.handle_client_request(&mut ctx, client, payload)
            },
            Call::Timeout { timer, description } => {
                node.handle_timeout(&mut ctx, timer, description)
            },
        }
    }
}

impl<M: Message> Dispatch<M> for NodeTable<M> {
    fn dispatch(
        &mut self,
        transport: &mut Transport<M>,
        event: &Event<M>,
    ) -> Result<(), HandlerError> {
        match &event.kind {
            EventKind::Timeout { owner, description, .. } => {
                let slot = *self
                    .internal
                    .get(owner)
                    .ok_or_else(|| HandlerError::Protocol(format!("no node {owner}")))?;
                self.invoke(slot, transport, Call::Timeout { timer: event.id, description })
            },
            EventKind::Message { payload } => {
                for slot in self.targets(&event.recipient, &event.sender, payload)? {
                    let call = Call::Message { sender: &event.sender, payload: payload.clone() };
                    self.invoke(slot, transport, call)?;
                }
                Ok(())
            },
            EventKind::ClientRequest { payload } => {
                for slot in self.targets(&event.recipient, &event.sender, payload)? {
                    let call = Call::Request { client: &event.sender, payload: payload.clone() };
                    self.invoke(slot, transport, call)?;
                }
                Ok(())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use faultline_core::RoundInfo;

    use super::*;

    #[derive(Debug, Clone)]
    enum Probe {
        Hello(u64),
        Relay(u64),
    }

    impl Message for Probe {
        fn tag(&self) -> &'static str {
            match self {
                Self::Hello(_) => "HELLO",
                Self::Relay(_) => "RELAY",
            }
        }

        fn round_info(&self) -> Option<RoundInfo> {
            match self {
                Self::Hello(round) | Self::Relay(round) => Some(RoundInfo::new(0, *round, 1)),
            }
        }
    }

    /// Commits one entry per message naming the sender; relays broadcast.
    struct Recorder;

    impl Node<Probe> for Recorder {
        fn handle_message(
            &mut self,
            ctx: &mut NodeContext<'_, Probe>,
            sender: &str,
            payload: Probe,
        ) -> Result<(), HandlerError> {
            let next = ctx.commit_log().highest_sequence().unwrap_or(0) + 1;
            ctx.commit_operation(next, format!("{sender}:{}", payload.tag()))?;
            if let Probe::Relay(round) = payload {
                ctx.broadcast(Probe::Hello(round));
            }
            Ok(())
        }
    }

    fn ids(list: &[&str]) -> BTreeSet<NodeId> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    fn table_with_twins() -> NodeTable<Probe> {
        let mut table = NodeTable::new(ids(&["A", "B", "D"]), ids(&["C0"]));
        for id in ["A", "B", "D"] {
            table.add(id, Role::Replica, Box::new(Recorder));
        }
        table.add("C0", Role::Client, Box::new(Recorder));

        let plan = TwinPlan {
            replica: "D".into(),
            instances: vec!["D:0".into(), "D:1".into()],
            round_partitions: BTreeMap::from([(
                1,
                vec![vec!["A".into(), "D:0".into()], vec!["B".into(), "D:1".into()]],
            )]),
        };
        table.add_twins(plan, |_| Box::new(Recorder)).expect("twins");
        table
    }

    fn deliver(table: &mut NodeTable<Probe>, transport: &mut Transport<Probe>, id: EventId) {
        transport.deliver(id, table).expect("deliver");
    }

    fn log_len(table: &NodeTable<Probe>, instance: &str) -> usize {
        table.commit_log(instance).map_or(0, CommitLog::len)
    }

    #[test]
    fn twins_replace_original_instance() {
        let table = table_with_twins();

        assert_eq!(table.instances(), ["A", "B", "D:0", "C0", "D:1"]);
        assert_eq!(table.public_id("D:1"), Some("D"));
        assert!(table.commit_log("D").is_none());
    }

    #[test]
    fn inbound_follows_sender_partition() {
        let mut table = table_with_twins();
        let mut transport = Transport::new();

        let from_a = transport.send("A", "D", Probe::Hello(1));
        deliver(&mut table, &mut transport, from_a);
        assert_eq!((log_len(&table, "D:0"), log_len(&table, "D:1")), (1, 0));

        let from_b = transport.send("B", "D", Probe::Hello(1));
        deliver(&mut table, &mut transport, from_b);
        assert_eq!((log_len(&table, "D:0"), log_len(&table, "D:1")), (1, 1));
    }

    #[test]
    fn unlisted_senders_and_rounds_reach_all_twins() {
        let mut table = table_with_twins();
        let mut transport = Transport::new();

        let other_round = transport.send("A", "D", Probe::Hello(2));
        deliver(&mut table, &mut transport, other_round);
        let from_client = transport.send("C0", "D", Probe::Hello(1));
        deliver(&mut table, &mut transport, from_client);

        assert_eq!((log_len(&table, "D:0"), log_len(&table, "D:1")), (2, 2));
    }

    #[test]
    fn outbound_confined_to_own_partition() {
        let mut table = table_with_twins();
        let mut transport = Transport::new();

        let relay = transport.send("A", "D", Probe::Relay(1));
        deliver(&mut table, &mut transport, relay);

        let recipients: Vec<_> =
            transport.events().filter(|e| e.sender == "D").map(|e| e.recipient.clone()).collect();
        assert_eq!(recipients, ["A"]);
    }

    #[test]
    fn unknown_recipient_is_handler_error() {
        let mut table = table_with_twins();
        let mut transport = Transport::new();
        let id = transport.send("A", "Z", Probe::Hello(1));

        let err = transport.deliver(id, &mut table).expect_err("unknown");
        assert!(err.is_crash());
    }

    #[test]
    fn twins_of_unknown_replica_fail() {
        let mut table = table_with_twins();
        let plan = TwinPlan {
            replica: "Q".into(),
            instances: vec!["Q:0".into(), "Q:1".into()],
            round_partitions: BTreeMap::new(),
        };
        assert_eq!(
            table.add_twins(plan, |_| Box::new(Recorder)),
            Err(SimError::UnknownNode("Q".into()))
        );
    }
}
