//! Scenario orchestrator.
//!
//! A [`Scenario`] wires one protocol's replicas and clients to a fresh event
//! store and drives it one scheduling decision at a time:
//!
//! ```text
//! loop:
//!   action = strategy.next_action(view)
//!   none    → raise GST, or stop when GST is already up (twice in a row)
//!   some    → execute, record schedule entries, fan out notifications
//!   check   → any predicate fails: stop (Violated)
//!   sample  → min_events reached: stop (Passed)
//! ```
//!
//! Predicates run after every step; the minimum-length check only every
//! `sampling_frequency` schedule entries. Everything is deterministic given
//! the protocol and the [`ScenarioConfig`], seed included.

mod nodes;
mod schedule;

use std::{collections::BTreeSet, sync::Arc};

use faultline_core::{
    Delivery, DroppedReason, Event, EventId, EventStatus, Fault, FaultBehavior, FaultOutcome,
    FaultPredicate, FaultRegistry, FiringKey, MutatorRegistry, NodeId, Notification, SimError,
    Transport,
};
pub use nodes::{NodeTable, Role};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
pub use schedule::{Schedule, ScheduleEntry};
use serde::Serialize;

use crate::{
    config::{ConfigError, ScenarioConfig},
    error::HarnessError,
    predicates::{PredicateRegistry, ScenarioSnapshot, Violation},
    protocol::{Protocol, client_id, replica_id},
    rounds::RoundOracle,
    strategy::{self, Action, ScenarioSetup, Strategy, StrategyView},
    subscriber::{Observation, Subscriber},
};

/// Consecutive empty decisions after GST that end a scenario.
const IDLE_DECISIONS_AFTER_GST: usize = 2;

/// How a scenario ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    /// Reached the minimum schedule length with every predicate holding.
    Passed,
    /// A predicate failed. The schedule is a counterexample.
    Violated {
        /// Failed predicates
        violations: Vec<Violation>,
    },
    /// Nothing left to schedule after GST, every predicate holding.
    Stalled,
    /// The harness or a protocol handler failed.
    Errored {
        /// Error description
        error: String,
    },
}

impl ScenarioOutcome {
    /// Whether a predicate failed.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Violated { .. })
    }

    /// Short status name.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Violated { .. } => "violated",
            Self::Stalled => "stalled",
            Self::Errored { .. } => "errored",
        }
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Scenario seed
    pub seed: u64,
    /// How it ended
    pub outcome: ScenarioOutcome,
    /// Executed decisions
    pub schedule: Schedule,
}

/// One protocol instance under one strategy.
pub struct Scenario<P: Protocol> {
    protocol: Arc<P>,
    config: ScenarioConfig,
    transport: Transport<P::Message>,
    nodes: NodeTable<P::Message>,
    faults: FaultRegistry,
    mutators: MutatorRegistry<P::Message>,
    faulty: BTreeSet<NodeId>,
    strategy: Box<dyn Strategy<P::Message>>,
    oracle: RoundOracle,
    predicates: PredicateRegistry,
    subscribers: Vec<Box<dyn Subscriber<P::Message>>>,
    schedule: Schedule,
    fired: BTreeSet<FiringKey>,
    rng: ChaCha8Rng,
    next_check: usize,
}

impl<P: Protocol> std::fmt::Debug for Scenario<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("protocol", &self.protocol.name())
            .field("seed", &self.config.seed)
            .field("strategy", &self.strategy.name())
            .field("faulty", &self.faulty)
            .field("schedule_len", &self.schedule.len())
            .finish_non_exhaustive()
    }
}

impl<P: Protocol> Scenario<P> {
    /// Build and initialize a scenario.
    ///
    /// Node `initialize` handlers have run when this returns, so their
    /// initial sends and timers are already queued.
    pub fn new(protocol: Arc<P>, config: ScenarioConfig) -> Result<Self, HarnessError> {
        config.validate()?;

        let replicas: BTreeSet<NodeId> = (0..config.replicas).map(replica_id).collect();
        let clients: BTreeSet<NodeId> = (0..config.clients).map(client_id).collect();
        let faulty = match &config.faulty {
            Some(faulty) => {
                if let Some(unknown) = faulty.iter().find(|id| !replicas.contains(*id)) {
                    return Err(ConfigError::UnknownFaultyReplica(unknown.clone()).into());
                }
                faulty.clone()
            },
            None => {
                let f = protocol.max_faulty(replicas.len());
                replicas.iter().rev().take(f).cloned().collect()
            },
        };

        let mut faults = network_faults(replicas.iter().chain(&clients));
        for fault in &config.faults {
            faults.register(fault.to_fault());
        }
        let mut mutators = MutatorRegistry::new();
        for mutator in protocol.mutators() {
            mutators.register(mutator);
        }

        let mut strategy = strategy::build::<P::Message>(&config.strategy, config.seed);
        let mut setup = ScenarioSetup {
            replicas: &replicas,
            clients: &clients,
            faulty: &faulty,
            faults: &mut faults,
            twins: Vec::new(),
        };
        strategy.initialize(&mut setup)?;
        let twins = setup.twins;

        let mut nodes = NodeTable::build(protocol.as_ref(), replicas.clone(), clients);
        for plan in twins {
            nodes.add_twins(plan, |id| protocol.build_replica(id, &replicas))?;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(1);

        let mut scenario = Self {
            oracle: RoundOracle::new(replicas, protocol.rounds_per_request()),
            predicates: PredicateRegistry::standard(config.termination.gst_grace_period),
            next_check: config.termination.sampling_frequency,
            schedule: Schedule::new(config.seed),
            transport: Transport::new(),
            subscribers: Vec::new(),
            fired: BTreeSet::new(),
            protocol,
            config,
            nodes,
            faults,
            mutators,
            faulty,
            strategy,
            rng,
        };
        scenario.nodes.initialize(&mut scenario.transport)?;
        scenario.drain_notices();

        tracing::debug!(
            seed = scenario.config.seed,
            protocol = scenario.protocol.name(),
            strategy = scenario.strategy.name(),
            faulty = ?scenario.faulty,
            "Scenario ready"
        );
        Ok(scenario)
    }

    /// Fresh scenario from the same protocol and configuration. Subscribers
    /// carry over.
    pub fn reset(&mut self) -> Result<(), HarnessError> {
        let mut fresh = Self::new(Arc::clone(&self.protocol), self.config.clone())?;
        fresh.subscribers = std::mem::take(&mut self.subscribers);
        *self = fresh;
        Ok(())
    }

    /// Register an observer for every later notification.
    pub fn add_subscriber<S: Subscriber<P::Message> + 'static>(&mut self, subscriber: S) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// Run until a termination condition holds.
    pub fn run(&mut self) -> ScenarioOutcome {
        let outcome = self.run_steps().unwrap_or_else(|err| {
            tracing::warn!(seed = self.config.seed, error = %err, "Scenario errored");
            ScenarioOutcome::Errored { error: err.to_string() }
        });

        if let ScenarioOutcome::Violated { violations } = &outcome {
            for violation in violations {
                tracing::warn!(seed = self.config.seed, %violation, "Predicate violated");
            }
            self.schedule.finalize(violations.clone());
        }
        tracing::info!(
            seed = self.config.seed,
            status = outcome.status(),
            entries = self.schedule.len(),
            events = self.transport.len(),
            "Scenario finished"
        );
        outcome
    }

    /// Run to completion and report.
    pub fn into_report(mut self) -> ScenarioReport {
        let outcome = self.run();
        ScenarioReport { seed: self.config.seed, outcome, schedule: self.schedule }
    }

    fn run_steps(&mut self) -> Result<ScenarioOutcome, HarnessError> {
        let mut idle = 0;
        loop {
            if self.step()?.is_none() {
                if !self.transport.is_gst() {
                    self.raise_gst();
                    continue;
                }
                idle += 1;
                if idle >= IDLE_DECISIONS_AFTER_GST {
                    return Ok(self.violated().unwrap_or(ScenarioOutcome::Stalled));
                }
                continue;
            }
            idle = 0;

            if let Some(outcome) = self.violated() {
                return Ok(outcome);
            }
            let len = self.schedule.len();
            if len >= self.next_check {
                self.next_check = len + self.config.termination.sampling_frequency;
                if len >= self.config.termination.min_events {
                    return Ok(ScenarioOutcome::Passed);
                }
            }
        }
    }

    /// Ask the strategy for one action and execute it.
    ///
    /// Returns `None` without side effects when nothing is eligible.
    pub fn step(&mut self) -> Result<Option<Action>, HarnessError> {
        let view = StrategyView {
            transport: &self.transport,
            faults: &self.faults,
            mutators: &self.mutators,
            faulty: &self.faulty,
            oracle: &self.oracle,
            fired: &self.fired,
        };
        let Some(action) = self.strategy.next_action(&view) else {
            return Ok(None);
        };

        tracing::trace!(?action, "Executing");
        self.execute(&action)?;
        self.drain_notices();
        Ok(Some(action))
    }

    /// Raise GST.
    pub fn raise_gst(&mut self) {
        self.transport.global_stabilization_time();
        self.drain_notices();
    }

    fn execute(&mut self, action: &Action) -> Result<(), SimError> {
        match action {
            Action::Deliver(id) | Action::TriggerTimeout(id) => self.deliver_event(*id),
            Action::Drop(id) => self.drop_queued(*id),
            Action::MutateAndDeliver { event, mutator } => {
                self.mutate_queued(*event, mutator)?;
                self.deliver_event(*event)
            },
            Action::InjectFault { fault, event } => self.inject(fault, *event),
        }
    }

    fn deliver_event(&mut self, id: EventId) -> Result<(), SimError> {
        let is_timeout = self.transport.event(id).ok_or(SimError::NoSuchEvent(id))?.is_timeout();
        let entry = match self.transport.deliver(id, &mut self.nodes)? {
            Delivery::Delivered if is_timeout => ScheduleEntry::Timeout { event: id },
            Delivery::Delivered => ScheduleEntry::Deliver { event: id },
            Delivery::DroppedByNetwork => ScheduleEntry::Drop { event: id },
        };
        self.schedule.push(entry);
        Ok(())
    }

    fn drop_queued(&mut self, id: EventId) -> Result<(), SimError> {
        self.transport.drop_event(id, DroppedReason::Explicit)?;
        self.schedule.push(ScheduleEntry::Drop { event: id });
        Ok(())
    }

    fn mutate_queued(&mut self, id: EventId, mutator: &str) -> Result<(), SimError> {
        let mutator = self.mutators.require(mutator)?;
        self.transport.mutate(id, mutator)?;
        self.schedule.push(ScheduleEntry::Mutation { event: id, mutator: mutator.id().to_owned() });
        Ok(())
    }

    fn inject(&mut self, fault_id: &str, event: Option<EventId>) -> Result<(), SimError> {
        let fault = self.faults.require(fault_id)?;
        let mark = self.transport.pending_notices().len();
        let outcome = fault.apply(&mut self.transport, event, &self.mutators, &mut self.rng)?;

        if let Some(event) = event {
            self.fired.insert(fault.firing_key(event));
        }
        self.schedule.push(ScheduleEntry::Fault { fault: fault.id.clone(), event });

        let effects: Vec<ScheduleEntry> = self
            .transport
            .pending_notices()
            .iter()
            .skip(mark)
            .filter_map(|notice| match notice {
                Notification::MessageMutated { event, mutator } => {
                    Some(ScheduleEntry::Mutation { event: *event, mutator: mutator.clone() })
                },
                Notification::EventDropped { event, .. } => {
                    Some(ScheduleEntry::Drop { event: *event })
                },
                _ => None,
            })
            .collect();
        for entry in effects {
            self.schedule.push(entry);
        }

        match outcome {
            FaultOutcome::DeliverNext(id) => self.deliver_event(id),
            FaultOutcome::Applied => Ok(()),
        }
    }

    fn drain_notices(&mut self) {
        let notices = self.transport.take_notices();
        let observation =
            Observation { transport: &self.transport, schedule_len: self.schedule.len() };
        for notice in &notices {
            self.oracle.notify(notice, &observation);
            self.predicates.observe(notice, observation.schedule_len);
            for subscriber in &mut self.subscribers {
                subscriber.notify(notice, &observation);
            }
        }
    }

    fn violated(&self) -> Option<ScenarioOutcome> {
        self.check_predicates().err().map(|violations| ScenarioOutcome::Violated { violations })
    }

    /// Run every predicate against the current state.
    pub fn check_predicates(&self) -> Result<(), Vec<Violation>> {
        self.predicates.check_all(&self.snapshot())
    }

    /// Current replica logs and event counts.
    pub fn snapshot(&self) -> ScenarioSnapshot {
        let count = |status| self.transport.events_in_state(status).count();
        ScenarioSnapshot {
            replicas: self.nodes.replica_snapshots(&self.faulty),
            queued: count(EventStatus::Queued),
            delivered: count(EventStatus::Delivered),
            dropped: count(EventStatus::Dropped),
            schedule_len: self.schedule.len(),
            gst: self.transport.is_gst(),
        }
    }

    /// Deliver a queued message, client request or timeout.
    pub fn deliver(&mut self, id: EventId) -> Result<(), HarnessError> {
        self.deliver_event(id)?;
        self.drain_notices();
        Ok(())
    }

    /// Drop a queued event.
    pub fn drop_event(&mut self, id: EventId) -> Result<(), HarnessError> {
        self.drop_queued(id)?;
        self.drain_notices();
        Ok(())
    }

    /// Mutate a queued message without delivering it.
    pub fn mutate(&mut self, id: EventId, mutator: &str) -> Result<(), HarnessError> {
        self.mutate_queued(id, mutator)?;
        self.drain_notices();
        Ok(())
    }

    /// Fire a registered fault, automatic or manual.
    pub fn apply_fault(&mut self, fault: &str, event: Option<EventId>) -> Result<(), HarnessError> {
        self.inject(fault, event)?;
        self.drain_notices();
        Ok(())
    }

    /// Ids of events in `status`.
    pub fn event_ids(&self, status: EventStatus) -> Vec<EventId> {
        self.transport.events_in_state(status).map(|e| e.id).collect()
    }

    /// Queued event ids.
    pub fn queued_events(&self) -> Vec<EventId> {
        self.event_ids(EventStatus::Queued)
    }

    /// Delivered event ids.
    pub fn delivered_events(&self) -> Vec<EventId> {
        self.event_ids(EventStatus::Delivered)
    }

    /// Dropped event ids.
    pub fn dropped_events(&self) -> Vec<EventId> {
        self.event_ids(EventStatus::Dropped)
    }

    /// Look up an event.
    pub fn event(&self, id: EventId) -> Option<&Event<P::Message>> {
        self.transport.event(id)
    }

    /// Ids of the mutators that accept the payload of `id`.
    pub fn mutators_for(&self, id: EventId) -> Vec<&str> {
        self.transport
            .event(id)
            .and_then(Event::tag)
            .map(|tag| self.mutators.for_tag(tag).into_iter().map(|m| m.id()).collect())
            .unwrap_or_default()
    }

    /// Registered faults.
    pub fn faults(&self) -> &FaultRegistry {
        &self.faults
    }

    /// Faulty replica ids.
    pub fn faulty(&self) -> &BTreeSet<NodeId> {
        &self.faulty
    }

    /// Node instances.
    pub fn nodes(&self) -> &NodeTable<P::Message> {
        &self.nodes
    }

    /// Event store.
    pub fn transport(&self) -> &Transport<P::Message> {
        &self.transport
    }

    /// Decisions executed so far.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Round oracle.
    pub fn oracle(&self) -> &RoundOracle {
        &self.oracle
    }

    /// Scenario configuration.
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }
}

/// Manual `isolate-<id>` and `heal-<id>` per node plus `heal-network`.
fn network_faults<'a>(nodes: impl Iterator<Item = &'a NodeId>) -> FaultRegistry {
    let mut faults = FaultRegistry::new();
    for id in nodes {
        faults.register_manual(Fault::new(
            format!("isolate-{id}"),
            format!("isolate {id}"),
            FaultPredicate::Always,
            FaultBehavior::IsolateNode(id.clone()),
        ));
        faults.register_manual(Fault::new(
            format!("heal-{id}"),
            format!("heal {id}"),
            FaultPredicate::Always,
            FaultBehavior::HealNode(id.clone()),
        ));
    }
    faults.register_manual(Fault::new(
        "heal-network",
        "heal the network",
        FaultPredicate::Always,
        FaultBehavior::HealNetwork,
    ));
    faults
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ActionConfig, FaultConfig, StrategyConfig, TerminationConfig},
        protocols::{Consensus, ConsensusMessage},
        subscriber::NoticeLog,
    };

    fn fifo(seed: u64) -> ScenarioConfig {
        ScenarioConfig {
            strategy: StrategyConfig::fifo(),
            termination: TerminationConfig { min_events: 60, ..TerminationConfig::default() },
            ..ScenarioConfig::with_seed(seed)
        }
    }

    fn scenario(config: ScenarioConfig) -> Scenario<Consensus> {
        Scenario::new(Arc::new(Consensus), config).expect("scenario")
    }

    #[test]
    fn initialization_queues_client_requests() {
        let scenario = scenario(fifo(1));

        let queued = scenario.queued_events();
        assert!(!queued.is_empty());
        assert!(queued.iter().filter_map(|id| scenario.event(*id)).any(Event::is_client_request));
        assert!(scenario.schedule().is_empty());
    }

    #[test]
    fn default_faulty_set_is_last_replicas() {
        let scenario = scenario(fifo(1));
        assert_eq!(scenario.faulty().iter().collect::<Vec<_>>(), ["D"]);
    }

    #[test]
    fn unknown_faulty_replica_rejected() {
        let config =
            ScenarioConfig { faulty: Some(BTreeSet::from(["Q".to_owned()])), ..fifo(1) };
        let err = Scenario::new(Arc::new(Consensus), config).expect_err("unknown replica");
        assert!(matches!(
            err,
            HarnessError::Config(ConfigError::UnknownFaultyReplica(id)) if id == "Q"
        ));
    }

    #[test]
    fn manual_network_faults_registered() {
        let scenario = scenario(fifo(1));
        for id in ["isolate-A", "heal-A", "isolate-C0", "heal-network"] {
            assert!(scenario.faults().get(id).is_some(), "{id}");
        }
        assert!(scenario.faults().automatic().is_empty());
    }

    #[test]
    fn event_free_fault_fires_once() {
        let config = ScenarioConfig {
            faults: vec![FaultConfig {
                id: Some("heal-all".into()),
                when: Vec::new(),
                action: ActionConfig::HealNetwork,
            }],
            termination: TerminationConfig { min_events: 40, ..TerminationConfig::default() },
            ..ScenarioConfig::with_seed(2)
        };
        let mut scenario = scenario(config);
        for _ in 0..40 {
            scenario.step().expect("step");
        }

        let fired = scenario
            .schedule()
            .entries()
            .iter()
            .filter(|e| matches!(e, ScheduleEntry::Fault { fault, .. } if fault == "heal-all"))
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn fifo_run_passes() {
        let mut scenario = scenario(fifo(1));
        assert_eq!(scenario.run(), ScenarioOutcome::Passed);
        assert!(scenario.schedule().len() >= 60);
        assert!(!scenario.schedule().is_buggy());
    }

    #[test]
    fn forced_drop_and_deliver_recorded() {
        let mut scenario = scenario(fifo(1));
        let queued = scenario.queued_events();

        scenario.drop_event(queued[0]).expect("drop");
        scenario.deliver(queued[1]).expect("deliver");

        assert_eq!(
            scenario.schedule().entries(),
            [ScheduleEntry::Drop { event: queued[0] }, ScheduleEntry::Deliver { event: queued[1] }]
        );
        assert!(scenario.drop_event(queued[0]).is_err());
    }

    #[test]
    fn isolation_drops_at_delivery() {
        let mut scenario = scenario(fifo(1));
        let request = scenario.queued_events()[0];
        let recipient = scenario.event(request).map(|e| e.recipient.clone()).expect("event");

        scenario.apply_fault(&format!("isolate-{recipient}"), None).expect("isolate");
        scenario.deliver(request).expect("deliver");

        assert_eq!(
            scenario.schedule().entries().last(),
            Some(&ScheduleEntry::Drop { event: request })
        );
    }

    #[test]
    fn reset_replays_from_same_seed() {
        let mut scenario = scenario(fifo(4));
        let log = NoticeLog::new();
        scenario.add_subscriber(log.clone());
        for _ in 0..10 {
            scenario.step().expect("step");
        }
        let first = scenario.schedule().clone();

        scenario.reset().expect("reset");
        assert!(scenario.schedule().is_empty());
        for _ in 0..10 {
            scenario.step().expect("step");
        }
        assert_eq!(scenario.schedule(), &first);
        assert!(!log.is_empty());
    }

    #[test]
    fn mutators_listed_per_event() {
        let mut scenario = scenario(fifo(2));
        while scenario.transport().events().all(|e| e.tag() != Some("PROPOSE")) {
            scenario.step().expect("step").expect("progress");
        }
        let propose = scenario
            .transport()
            .events()
            .find(|e| matches!(e.payload(), Some(ConsensusMessage::Propose { .. })))
            .map(|e| e.id)
            .expect("propose");

        let mut mutators = scenario.mutators_for(propose);
        mutators.sort_unstable();
        assert_eq!(mutators, ["bump-sequence", "corrupt-operation"]);
    }
}
