//! Exploration strategies.
//!
//! A [`Strategy`] picks the next [`Action`] of a scenario from a read-only
//! [`StrategyView`] of the event store and fault registry. Returning `None`
//! tells the scenario that nothing is eligible: it raises GST, or stops if
//! GST is already up.
//!
//! | Strategy | Deliveries | Faults |
//! |----------|------------|--------|
//! | [`FifoStrategy`] | lowest queued id | none |
//! | [`RandomStrategy`] | weighted random | budgeted drops and mutations, registered faults |
//! | [`ByzzFuzzStrategy`] | as Random | round-scoped process and network faults |
//! | [`TwinsStrategy`] | as Random | twin replicas with per-round partitions |
//!
//! Every strategy owns a `ChaCha8Rng` seeded from the scenario seed, so a
//! seed fully determines its choices.

mod byzzfuzz;
mod fifo;
mod random;
mod twins;

use std::collections::{BTreeMap, BTreeSet};

pub use byzzfuzz::ByzzFuzzStrategy;
use faultline_core::{
    Event, EventId, EventKind, EventStatus, Fault, FaultId, FaultRegistry, FiringKey, Message,
    Mutator, MutatorRegistry, NodeId, Transport,
};
pub use fifo::FifoStrategy;
pub use random::RandomStrategy;
pub use twins::TwinsStrategy;

use crate::{
    config::{ConfigError, ExecutionMode, StrategyConfig, StrategyKind},
    rounds::RoundOracle,
};

/// One scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deliver a queued message or client request.
    Deliver(EventId),
    /// Drop a queued message.
    Drop(EventId),
    /// Mutate a queued message with `mutator`, then deliver it.
    MutateAndDeliver {
        /// Target message
        event: EventId,
        /// Mutator to apply
        mutator: String,
    },
    /// Fire a queued timeout.
    TriggerTimeout(EventId),
    /// Fire a registered fault.
    InjectFault {
        /// Fault to fire
        fault: FaultId,
        /// Event the fault targets
        event: Option<EventId>,
    },
}

/// Read-only scenario state a strategy decides from.
#[derive(Debug)]
pub struct StrategyView<'a, M: Message> {
    /// Event store and router
    pub transport: &'a Transport<M>,
    /// Registered faults
    pub faults: &'a FaultRegistry,
    /// Protocol mutators
    pub mutators: &'a MutatorRegistry<M>,
    /// Faulty replica ids
    pub faulty: &'a BTreeSet<NodeId>,
    /// Inferred rounds of replicas and messages
    pub oracle: &'a RoundOracle,
    /// `(fault, event)` pairs that already fired
    pub fired: &'a BTreeSet<FiringKey>,
}

impl<'a, M: Message> StrategyView<'a, M> {
    /// Messages and client requests that may be delivered now, in id order.
    ///
    /// ASYNC: every queued one. SYNC: the head of each recipient's mailbox.
    pub fn eligible_messages(&self, mode: ExecutionMode) -> Vec<&'a Event<M>> {
        let queued = self
            .transport
            .events_in_state(EventStatus::Queued)
            .filter(|e| e.is_message() || e.is_client_request());

        match mode {
            ExecutionMode::Async => queued.collect(),
            ExecutionMode::Sync => {
                let mut heads: BTreeMap<&str, &'a Event<M>> = BTreeMap::new();
                for event in queued {
                    heads.entry(event.recipient.as_str()).or_insert(event);
                }
                let mut heads: Vec<_> = heads.into_values().collect();
                heads.sort_by_key(|e| e.id);
                heads
            },
        }
    }

    /// Timeouts that may fire now: the earliest-expiring one per owning
    /// instance, in id order. In SYNC mode none while any message is
    /// deliverable.
    pub fn eligible_timeouts(&self, mode: ExecutionMode) -> Vec<&'a Event<M>> {
        if mode == ExecutionMode::Sync && !self.eligible_messages(mode).is_empty() {
            return Vec::new();
        }

        let mut earliest: BTreeMap<&str, &'a Event<M>> = BTreeMap::new();
        for event in self.transport.events_in_state(EventStatus::Queued) {
            let EventKind::Timeout { owner, expires_at, .. } = &event.kind else {
                continue;
            };
            earliest
                .entry(owner.as_str())
                .and_modify(|current| {
                    if current.expires_at().is_some_and(|t| *expires_at < t) {
                        *current = event;
                    }
                })
                .or_insert(event);
        }

        let mut timeouts: Vec<_> = earliest.into_values().collect();
        timeouts.sort_by_key(|e| e.id);
        timeouts
    }

    /// First registered fault enabled on an eligible message that has not
    /// already fired on it.
    pub fn first_enabled_fault(&self, mode: ExecutionMode) -> Option<(&'a Fault, EventId)> {
        let candidates = self
            .eligible_messages(mode)
            .into_iter()
            .map(|event| (event, self.oracle.round_of(event.id)));

        self.faults.first_enabled(self.transport, self.mutators, candidates, |fault, event| {
            self.fired.contains(&fault.firing_key(event))
        })
    }

    /// Eligible messages from faulty senders that some mutator accepts.
    pub fn mutable_messages(&self, mode: ExecutionMode) -> Vec<&'a Event<M>> {
        self.eligible_messages(mode)
            .into_iter()
            .filter(|e| e.is_message() && self.faulty.contains(&e.sender))
            .filter(|e| e.payload().is_some_and(|p| self.mutators.can_mutate(p)))
            .collect()
    }

    /// Mutators accepting the payload of `event`.
    pub fn mutators_for(&self, event: &Event<M>) -> Vec<&'a Mutator<M>> {
        event.tag().map(|tag| self.mutators.for_tag(tag)).unwrap_or_default()
    }

    /// Whether GST has been raised.
    pub fn is_gst(&self) -> bool {
        self.transport.is_gst()
    }
}

/// Replica to replace with twin instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinPlan {
    /// Public id shared by the twins
    pub replica: NodeId,
    /// Internal ids of the instances
    pub instances: Vec<NodeId>,
    /// Per-round partitions over the other replicas' public ids and the
    /// instances' internal ids
    pub round_partitions: BTreeMap<u64, Vec<Vec<NodeId>>>,
}

/// Scenario state a strategy may shape before the first step.
#[derive(Debug)]
pub struct ScenarioSetup<'a> {
    /// Replica ids
    pub replicas: &'a BTreeSet<NodeId>,
    /// Client ids
    pub clients: &'a BTreeSet<NodeId>,
    /// Faulty replica ids
    pub faulty: &'a BTreeSet<NodeId>,
    /// Fault registry to add automatic faults to
    pub faults: &'a mut FaultRegistry,
    /// Twins to create
    pub twins: Vec<TwinPlan>,
}

/// Decides the next action of a scenario.
pub trait Strategy<M: Message>: Send {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Called once before nodes are initialized.
    fn initialize(&mut self, _setup: &mut ScenarioSetup<'_>) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Next action, or `None` when nothing is eligible.
    fn next_action(&mut self, view: &StrategyView<'_, M>) -> Option<Action>;
}

/// Strategy described by `config`, seeded with `seed`.
pub fn build<M: Message>(config: &StrategyConfig, seed: u64) -> Box<dyn Strategy<M>> {
    match config.kind {
        StrategyKind::Fifo => Box::new(FifoStrategy::new(config.mode)),
        StrategyKind::Random => Box::new(RandomStrategy::new(config, seed)),
        StrategyKind::ByzzFuzz => Box::new(ByzzFuzzStrategy::new(config, seed)),
        StrategyKind::Twins => Box::new(TwinsStrategy::new(config, seed)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeSet;

    use faultline_core::{FaultRegistry, FiringKey, Message, MutatorRegistry, NodeId, Transport};

    use super::StrategyView;
    use crate::rounds::RoundOracle;

    /// Owned state behind a [`StrategyView`].
    pub struct ViewState<M: Message> {
        pub transport: Transport<M>,
        pub faults: FaultRegistry,
        pub mutators: MutatorRegistry<M>,
        pub faulty: BTreeSet<NodeId>,
        pub oracle: RoundOracle,
        pub fired: BTreeSet<FiringKey>,
    }

    impl<M: Message> ViewState<M> {
        pub fn new() -> Self {
            Self {
                transport: Transport::new(),
                faults: FaultRegistry::new(),
                mutators: MutatorRegistry::new(),
                faulty: BTreeSet::new(),
                oracle: RoundOracle::new(BTreeSet::new(), 1),
                fired: BTreeSet::new(),
            }
        }

        pub fn view(&self) -> StrategyView<'_, M> {
            StrategyView {
                transport: &self.transport,
                faults: &self.faults,
                mutators: &self.mutators,
                faulty: &self.faulty,
                oracle: &self.oracle,
                fired: &self.fired,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Msg {
        Vote(u64),
        Note,
    }

    impl Message for Msg {
        fn tag(&self) -> &'static str {
            match self {
                Self::Vote(_) => "VOTE",
                Self::Note => "NOTE",
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use faultline_core::{FaultBehavior, FaultPredicate};

    use super::{test_support::*, *};

    #[test]
    fn sync_mode_offers_mailbox_heads() {
        let mut state = ViewState::<Msg>::new();
        let first_b = state.transport.send("A", "B", Msg::Note);
        let _second_b = state.transport.send("C", "B", Msg::Note);
        let first_c = state.transport.send("A", "C", Msg::Note);

        let view = state.view();
        let sync: Vec<_> =
            view.eligible_messages(ExecutionMode::Sync).iter().map(|e| e.id).collect();
        let all = view.eligible_messages(ExecutionMode::Async);

        assert_eq!(sync, vec![first_b, first_c]);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn sync_mode_hides_timeouts_behind_messages() {
        let mut state = ViewState::<Msg>::new();
        state.transport.schedule_timeout("A", "A", "t", 5);
        state.transport.send("A", "B", Msg::Note);

        let view = state.view();
        assert!(view.eligible_timeouts(ExecutionMode::Sync).is_empty());
        assert_eq!(view.eligible_timeouts(ExecutionMode::Async).len(), 1);
    }

    #[test]
    fn earliest_timeout_per_owner() {
        let mut state = ViewState::<Msg>::new();
        let late = state.transport.schedule_timeout("A", "A", "late", 9);
        let early = state.transport.schedule_timeout("A", "A", "early", 2);
        let other = state.transport.schedule_timeout("B", "B", "b", 4);

        let view = state.view();
        let ids: Vec<_> =
            view.eligible_timeouts(ExecutionMode::Async).iter().map(|e| e.id).collect();

        assert_eq!(ids, vec![early, other]);
        assert!(!ids.contains(&late));
    }

    #[test]
    fn fired_faults_are_skipped() {
        let mut state = ViewState::<Msg>::new();
        let id = state.transport.send("A", "B", Msg::Vote(1));
        let fault = Fault::new("drop-all", "", FaultPredicate::Always, FaultBehavior::DropMessage);
        state.faults.register(fault);

        assert_eq!(
            state.view().first_enabled_fault(ExecutionMode::Async).map(|(f, e)| (f.id.clone(), e)),
            Some(("drop-all".to_owned(), id))
        );

        state.fired.insert(("drop-all".to_owned(), Some(id)));
        assert!(state.view().first_enabled_fault(ExecutionMode::Async).is_none());
    }

    #[test]
    fn only_faulty_senders_are_mutable() {
        let mut state = ViewState::<Msg>::new();
        state.mutators.register(Mutator::new("bump", "bump", ["VOTE"], |m: &Msg| match m {
            Msg::Vote(n) => Msg::Vote(n + 1),
            Msg::Note => Msg::Note,
        }));
        state.faulty.insert("D".into());
        let honest = state.transport.send("A", "B", Msg::Vote(1));
        let faulty = state.transport.send("D", "B", Msg::Vote(1));
        let untagged = state.transport.send("D", "C", Msg::Note);

        let view = state.view();
        let ids: Vec<_> =
            view.mutable_messages(ExecutionMode::Async).iter().map(|e| e.id).collect();

        assert_eq!(ids, vec![faulty]);
        assert!(!ids.contains(&honest) && !ids.contains(&untagged));
    }
}
