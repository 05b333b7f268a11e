//! Fault preconditions.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use super::FaultContext;
use crate::{
    event::{Event, NodeId},
    message::Message,
    router::DEFAULT_PARTITION,
};

/// Pure boolean test over a candidate event and scenario state.
///
/// Message predicates (`MessageRound`, `SenderHasId`, ...) only ever hold
/// for message events; timeouts and client requests never match them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultPredicate {
    /// Always holds.
    Always,
    /// GST has not been raised yet.
    BeforeGst,
    /// Payload declares this round.
    MessageRound(u64),
    /// Round oracle assigned this round to the message.
    InferredRound(u64),
    /// Message was sent by this node.
    SenderHasId(NodeId),
    /// Message is addressed to one of these nodes.
    RecipientHasId(BTreeSet<NodeId>),
    /// Payload variant has this tag.
    PayloadTag(String),
    /// Node currently sits outside the default partition.
    NodeInPartition(NodeId),
    /// Message would cross the given partition layout. Nodes not listed
    /// form one extra group.
    AcrossPartitions(Vec<Vec<NodeId>>),
    /// Both hold.
    And(Box<FaultPredicate>, Box<FaultPredicate>),
    /// Either holds.
    Or(Box<FaultPredicate>, Box<FaultPredicate>),
    /// Inner predicate does not hold.
    Not(Box<FaultPredicate>),
}

impl FaultPredicate {
    /// Recipient set predicate from any iterator of ids.
    pub fn recipients<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        Self::RecipientHasId(ids.into_iter().map(Into::into).collect())
    }

    /// Logical AND.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Logical OR.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Logical NOT.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate against `ctx`.
    pub fn test<M: Message>(&self, ctx: &FaultContext<'_, M>) -> bool {
        match self {
            Self::Always => true,
            Self::BeforeGst => !ctx.transport.is_gst(),
            Self::MessageRound(round) => message(ctx)
                .and_then(Event::payload)
                .and_then(Message::round_info)
                .is_some_and(|info| info.round() == *round),
            Self::InferredRound(round) => {
                message(ctx).is_some() && ctx.inferred_round == Some(*round)
            },
            Self::SenderHasId(id) => message(ctx).is_some_and(|e| &e.sender == id),
            Self::RecipientHasId(ids) => message(ctx).is_some_and(|e| ids.contains(&e.recipient)),
            Self::PayloadTag(tag) => message(ctx).and_then(Event::tag) == Some(tag.as_str()),
            Self::NodeInPartition(node) => {
                ctx.transport.router().partition_of(node) != DEFAULT_PARTITION
            },
            Self::AcrossPartitions(groups) => message(ctx).is_some_and(|e| {
                let layout = layout(groups);
                layout.get(e.sender.as_str()) != layout.get(e.recipient.as_str())
            }),
            Self::And(a, b) => a.test(ctx) && b.test(ctx),
            Self::Or(a, b) => a.test(ctx) || b.test(ctx),
            Self::Not(inner) => !inner.test(ctx),
        }
    }

    /// Stable identifier, composed structurally for AND/OR/NOT.
    pub fn id(&self) -> String {
        match self {
            Self::Always => "always".to_owned(),
            Self::BeforeGst => "beforegst".to_owned(),
            Self::MessageRound(round) => format!("messageround-{round}"),
            Self::InferredRound(round) => format!("inferredround-{round}"),
            Self::SenderHasId(id) => format!("sender-{id}"),
            Self::RecipientHasId(ids) => format!("recipient-{}", join(ids)),
            Self::PayloadTag(tag) => format!("tag-{tag}"),
            Self::NodeInPartition(node) => format!("partitioned-{node}"),
            Self::AcrossPartitions(groups) => format!("across-{}", layout_id(groups)),
            Self::And(a, b) => format!("{}&&{}", a.id(), b.id()),
            Self::Or(a, b) => format!("{}||{}", a.id(), b.id()),
            Self::Not(inner) => format!("!({})", inner.id()),
        }
    }
}

impl fmt::Display for FaultPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::BeforeGst => write!(f, "before GST"),
            Self::MessageRound(round) => write!(f, "message round is {round}"),
            Self::InferredRound(round) => write!(f, "inferred round is {round}"),
            Self::SenderHasId(id) => write!(f, "sender is {id}"),
            Self::RecipientHasId(ids) => write!(f, "recipient in [{}]", join(ids)),
            Self::PayloadTag(tag) => write!(f, "payload is {tag}"),
            Self::NodeInPartition(node) => write!(f, "{node} is partitioned"),
            Self::AcrossPartitions(groups) => write!(f, "message crosses {}", layout_id(groups)),
            Self::And(a, b) => write!(f, "{a} and {b}"),
            Self::Or(a, b) => write!(f, "{a} or {b}"),
            Self::Not(inner) => write!(f, "not {inner}"),
        }
    }
}

fn message<'a, M: Message>(ctx: &FaultContext<'a, M>) -> Option<&'a Event<M>> {
    ctx.event.filter(|e| e.is_message())
}

fn layout(groups: &[Vec<NodeId>]) -> BTreeMap<&str, usize> {
    groups
        .iter()
        .enumerate()
        .flat_map(|(index, group)| group.iter().map(move |node| (node.as_str(), index)))
        .collect()
}

fn layout_id(groups: &[Vec<NodeId>]) -> String {
    groups.iter().map(|g| format!("[{}]", g.join(","))).collect()
}

fn join(ids: &BTreeSet<NodeId>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fault::MutatorRegistry,
        message::RoundInfo,
        transport::Transport,
    };

    #[derive(Debug, Clone)]
    struct Prepare(u64);

    impl Message for Prepare {
        fn tag(&self) -> &'static str {
            "PREPARE"
        }

        fn round_info(&self) -> Option<RoundInfo> {
            Some(RoundInfo::new(0, self.0, 2))
        }
    }

    fn check(predicate: &FaultPredicate, transport: &Transport<Prepare>, event: u64) -> bool {
        let mutators = MutatorRegistry::new();
        let ctx = FaultContext {
            transport,
            mutators: &mutators,
            event: transport.event(event),
            inferred_round: Some(3),
        };
        predicate.test(&ctx)
    }

    #[test]
    fn message_predicates_match_fields() {
        let mut transport = Transport::new();
        let id = transport.send("A", "B", Prepare(4));

        assert!(check(&FaultPredicate::MessageRound(4), &transport, id));
        assert!(!check(&FaultPredicate::MessageRound(3), &transport, id));
        assert!(check(&FaultPredicate::InferredRound(3), &transport, id));
        assert!(check(&FaultPredicate::SenderHasId("A".into()), &transport, id));
        assert!(check(&FaultPredicate::recipients(["B", "C"]), &transport, id));
        assert!(!check(&FaultPredicate::recipients(["C"]), &transport, id));
        assert!(check(&FaultPredicate::PayloadTag("PREPARE".into()), &transport, id));
    }

    #[test]
    fn message_predicates_ignore_timeouts() {
        let mut transport: Transport<Prepare> = Transport::new();
        let id = transport.schedule_timeout("A", "A", "t", 1);

        assert!(!check(&FaultPredicate::SenderHasId("A".into()), &transport, id));
        assert!(!check(&FaultPredicate::InferredRound(3), &transport, id));
        assert!(check(&FaultPredicate::Always, &transport, id));
    }

    #[test]
    fn across_partitions_treats_unlisted_nodes_as_one_group() {
        let mut transport = Transport::new();
        let ab = transport.send("A", "B", Prepare(1));
        let ac = transport.send("A", "C", Prepare(1));
        let cd = transport.send("C", "D", Prepare(1));
        let across = FaultPredicate::AcrossPartitions(vec![vec!["A".into(), "B".into()]]);

        assert!(!check(&across, &transport, ab));
        assert!(check(&across, &transport, ac));
        assert!(!check(&across, &transport, cd));
    }

    #[test]
    fn combinators_compose() {
        let mut transport = Transport::new();
        let id = transport.send("A", "B", Prepare(1));
        let from_a = FaultPredicate::SenderHasId("A".into());
        let from_b = FaultPredicate::SenderHasId("B".into());

        assert!(check(&from_a.clone().or(from_b.clone()), &transport, id));
        assert!(!check(&from_a.clone().and(from_b.clone()), &transport, id));
        assert!(check(&from_b.clone().negate(), &transport, id));
        assert!(check(&FaultPredicate::BeforeGst.and(from_a.clone()), &transport, id));

        transport.global_stabilization_time();
        assert!(!check(&FaultPredicate::BeforeGst.and(from_a), &transport, id));
    }

    #[test]
    fn composed_ids() {
        let p = FaultPredicate::BeforeGst.and(FaultPredicate::InferredRound(2).negate());
        assert_eq!(p.id(), "beforegst&&!(inferredround-2)");
        assert_eq!(p.to_string(), "before GST and not inferred round is 2");
    }

    #[test]
    fn node_in_partition_follows_router() {
        let mut transport: Transport<Prepare> = Transport::new();
        let id = transport.schedule_timeout("A", "A", "t", 1);
        let partitioned = FaultPredicate::NodeInPartition("B".into());

        assert!(!check(&partitioned, &transport, id));
        transport.router_mut().isolate(["B"]);
        assert!(check(&partitioned, &transport, id));
    }
}
