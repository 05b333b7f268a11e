//! Fault side effects.

use std::fmt;

use rand::Rng;

use super::{FaultContext, MutatorId, MutatorRegistry};
use crate::{
    error::SimError,
    event::{DroppedReason, EventId, NodeId},
    message::Message,
    transport::Transport,
};

/// What a fault does when its predicate holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultBehavior {
    /// Drop the target message with [`DroppedReason::Fault`].
    DropMessage,
    /// Replace the target message's payload. A random accepting mutator is
    /// chosen when `mutator` is `None`.
    MutateMessage {
        /// Mutator to apply
        mutator: Option<MutatorId>,
    },
    /// Mutate the target message, then deliver it in the same step.
    MutateAndDeliver {
        /// Mutator to apply
        mutator: Option<MutatorId>,
    },
    /// Move a node into its own partition.
    IsolateNode(NodeId),
    /// Return a node to the default partition.
    HealNode(NodeId),
    /// Return every node to the default partition.
    HealNetwork,
    /// Isolate each group into its own partition.
    CreateNetworkPartitions(Vec<Vec<NodeId>>),
    /// Raise global stabilization time.
    GlobalStabilization,
}

/// Effect of a fired behavior on the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Behavior ran; nothing else to do this step.
    Applied,
    /// Behavior ran; the caller must now deliver this event.
    DeliverNext(EventId),
}

impl FaultBehavior {
    /// Whether the behavior can run against `ctx.event`.
    ///
    /// Message behaviors need a queued message; mutations additionally need
    /// a mutator accepting its payload.
    pub fn is_applicable<M: Message>(&self, ctx: &FaultContext<'_, M>) -> bool {
        let queued_message = ctx.event.filter(|e| e.is_queued() && e.is_message());
        match self {
            Self::DropMessage => queued_message.is_some(),
            Self::MutateMessage { mutator } | Self::MutateAndDeliver { mutator } => {
                queued_message.and_then(|e| e.payload()).is_some_and(|payload| match mutator {
                    Some(id) => ctx.mutators.get(id).is_some_and(|m| m.accepts(payload.tag())),
                    None => ctx.mutators.can_mutate(payload),
                })
            },
            Self::IsolateNode(_)
            | Self::HealNode(_)
            | Self::HealNetwork
            | Self::CreateNetworkPartitions(_)
            | Self::GlobalStabilization => true,
        }
    }

    /// Whether the behavior acts on a specific event.
    pub fn needs_event(&self) -> bool {
        matches!(
            self,
            Self::DropMessage | Self::MutateMessage { .. } | Self::MutateAndDeliver { .. }
        )
    }

    /// Run the behavior.
    ///
    /// `fault` names the owning fault in errors.
    pub fn apply<M, R>(
        &self,
        fault: &str,
        transport: &mut Transport<M>,
        event: Option<EventId>,
        mutators: &MutatorRegistry<M>,
        rng: &mut R,
    ) -> Result<FaultOutcome, SimError>
    where
        M: Message,
        R: Rng,
    {
        match self {
            Self::DropMessage => {
                let id = event.ok_or_else(|| SimError::MissingEvent(fault.to_owned()))?;
                transport.drop_event(id, DroppedReason::Fault)?;
            },
            Self::MutateMessage { mutator } => {
                let id = event.ok_or_else(|| SimError::MissingEvent(fault.to_owned()))?;
                mutate(transport, id, mutator.as_deref(), mutators, rng)?;
            },
            Self::MutateAndDeliver { mutator } => {
                let id = event.ok_or_else(|| SimError::MissingEvent(fault.to_owned()))?;
                mutate(transport, id, mutator.as_deref(), mutators, rng)?;
                return Ok(FaultOutcome::DeliverNext(id));
            },
            Self::IsolateNode(node) => {
                transport.router_mut().isolate([node.as_str()]);
            },
            Self::HealNode(node) => transport.router_mut().heal(node),
            Self::HealNetwork => transport.router_mut().reset_all(),
            Self::CreateNetworkPartitions(groups) => {
                for group in groups {
                    transport.router_mut().isolate(group.iter().map(String::as_str));
                }
            },
            Self::GlobalStabilization => {
                transport.global_stabilization_time();
            },
        }
        Ok(FaultOutcome::Applied)
    }

    /// Stable identifier.
    pub fn id(&self) -> String {
        match self {
            Self::DropMessage => "dropmessage".to_owned(),
            Self::MutateMessage { mutator } => {
                format!("mutatemessage-{}", mutator.as_deref().unwrap_or("random"))
            },
            Self::MutateAndDeliver { mutator } => {
                format!("mutateanddeliver-{}", mutator.as_deref().unwrap_or("random"))
            },
            Self::IsolateNode(node) => format!("isolate-{node}"),
            Self::HealNode(node) => format!("heal-{node}"),
            Self::HealNetwork => "heal-network".to_owned(),
            Self::CreateNetworkPartitions(groups) => format!(
                "createnetworkpartitions-{}",
                groups.iter().map(|g| format!("[{}]", g.join(","))).collect::<String>()
            ),
            Self::GlobalStabilization => "gst".to_owned(),
        }
    }
}

impl fmt::Display for FaultBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropMessage => write!(f, "drop message"),
            Self::MutateMessage { mutator: Some(id) } => write!(f, "apply mutation {id}"),
            Self::MutateMessage { mutator: None } => write!(f, "apply random mutation"),
            Self::MutateAndDeliver { mutator: Some(id) } => {
                write!(f, "apply mutation {id} and deliver")
            },
            Self::MutateAndDeliver { mutator: None } => {
                write!(f, "apply random mutation and deliver")
            },
            Self::IsolateNode(node) => write!(f, "isolate {node}"),
            Self::HealNode(node) => write!(f, "heal {node}"),
            Self::HealNetwork => write!(f, "heal network"),
            Self::CreateNetworkPartitions(groups) => {
                write!(f, "create {} partitions", groups.len())
            },
            Self::GlobalStabilization => write!(f, "raise GST"),
        }
    }
}

fn mutate<M, R>(
    transport: &mut Transport<M>,
    event: EventId,
    mutator: Option<&str>,
    mutators: &MutatorRegistry<M>,
    rng: &mut R,
) -> Result<(), SimError>
where
    M: Message,
    R: Rng,
{
    let chosen = match mutator {
        Some(id) => mutators.require(id)?,
        None => {
            let tag = transport
                .event(event)
                .ok_or(SimError::NoSuchEvent(event))?
                .tag()
                .ok_or(SimError::NotAMessage(event))?;
            let candidates = mutators.for_tag(tag);
            if candidates.is_empty() {
                return Err(SimError::NoApplicableMutator(event));
            }
            candidates[rng.gen_range(0..candidates.len())]
        },
    };
    transport.mutate(event, chosen)
}
