//! Fault model.
//!
//! A [`Fault`] pairs a [`FaultPredicate`] (pure test over a candidate event
//! and scenario state) with a [`FaultBehavior`] (side effect on the store or
//! router). Scenarios keep their faults in a [`FaultRegistry`]:
//!
//! - **automatic** faults are consulted by the scheduler before every step;
//!   the first enabled one, in candidate-event order then registration
//!   order, fires instead of a regular action;
//! - **manual** faults (per-node isolate/heal, heal-network) only fire when
//!   requested by id through the inspection surface.
//!
//! Mutation behaviors are scoped to payload tags through the protocol's
//! [`MutatorRegistry`]; eligibility is checked before a fault is reported
//! enabled, so an enabled mutation fault never fails for lack of a mutator.

mod behavior;
mod mutator;
mod predicate;

use std::fmt;

pub use behavior::{FaultBehavior, FaultOutcome};
pub use mutator::{Mutator, MutatorId, MutatorRegistry};
pub use predicate::FaultPredicate;
use rand::Rng;

use crate::{
    error::SimError,
    event::{Event, EventId},
    message::Message,
    notice::Notification,
    transport::Transport,
};

/// Fault identifier.
pub type FaultId = String;

/// Record of an automatic fault having fired. Behaviors that do not act on
/// an event carry no event id, so they fire at most once.
pub type FiringKey = (FaultId, Option<EventId>);

/// State a predicate is evaluated against.
#[derive(Debug)]
pub struct FaultContext<'a, M: Message> {
    /// Event store and router
    pub transport: &'a Transport<M>,
    /// Mutators of the protocol under test
    pub mutators: &'a MutatorRegistry<M>,
    /// Candidate event, if the check is about one
    pub event: Option<&'a Event<M>>,
    /// Round the oracle assigned to the candidate event
    pub inferred_round: Option<u64>,
}

/// Predicate-gated behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Unique id within a scenario
    pub id: FaultId,
    /// Human-readable description
    pub name: String,
    /// When the fault may fire
    pub predicate: FaultPredicate,
    /// What it does
    pub behavior: FaultBehavior,
}

impl Fault {
    /// Fault with an explicit id.
    pub fn new(
        id: impl Into<FaultId>,
        name: impl Into<String>,
        predicate: FaultPredicate,
        behavior: FaultBehavior,
    ) -> Self {
        Self { id: id.into(), name: name.into(), predicate, behavior }
    }

    /// Fault whose id and name derive from its parts.
    pub fn compose(predicate: FaultPredicate, behavior: FaultBehavior) -> Self {
        let id = format!("{}:{}", predicate.id(), behavior.id());
        let name = format!("{behavior} when {predicate}");
        Self { id, name, predicate, behavior }
    }

    /// Key marking that the fault fired while `event` was the candidate.
    pub fn firing_key(&self, event: EventId) -> FiringKey {
        (self.id.clone(), self.behavior.needs_event().then_some(event))
    }

    /// Whether the fault can fire in `ctx`.
    pub fn is_enabled<M: Message>(&self, ctx: &FaultContext<'_, M>) -> bool {
        self.predicate.test(ctx) && self.behavior.is_applicable(ctx)
    }

    /// Run the behavior and record a [`Notification::FaultApplied`].
    pub fn apply<M, R>(
        &self,
        transport: &mut Transport<M>,
        event: Option<EventId>,
        mutators: &MutatorRegistry<M>,
        rng: &mut R,
    ) -> Result<FaultOutcome, SimError>
    where
        M: Message,
        R: Rng,
    {
        let outcome = self.behavior.apply(&self.id, transport, event, mutators, rng)?;
        tracing::debug!(fault = %self.id, ?event, "Fault applied");
        transport.notify(Notification::FaultApplied { fault: self.id.clone(), event });
        Ok(outcome)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

/// Faults registered with a scenario.
#[derive(Debug, Clone, Default)]
pub struct FaultRegistry {
    automatic: Vec<Fault>,
    manual: Vec<Fault>,
}

impl FaultRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fault the scheduler consults every step.
    pub fn register(&mut self, fault: Fault) {
        tracing::debug!(fault = %fault.id, "Registered automatic fault");
        self.automatic.push(fault);
    }

    /// Add a fault that only fires on request.
    pub fn register_manual(&mut self, fault: Fault) {
        self.manual.push(fault);
    }

    /// Fault by id, automatic or manual.
    pub fn get(&self, id: &str) -> Option<&Fault> {
        self.automatic.iter().chain(&self.manual).find(|f| f.id == id)
    }

    /// Fault by id, or [`SimError::UnknownFault`].
    pub fn require(&self, id: &str) -> Result<&Fault, SimError> {
        self.get(id).ok_or_else(|| SimError::UnknownFault(id.to_owned()))
    }

    /// Automatic faults in registration order.
    pub fn automatic(&self) -> &[Fault] {
        &self.automatic
    }

    /// Manual faults in registration order.
    pub fn manual(&self) -> &[Fault] {
        &self.manual
    }

    /// Total number of faults.
    pub fn len(&self) -> usize {
        self.automatic.len() + self.manual.len()
    }

    /// Whether no fault is registered.
    pub fn is_empty(&self) -> bool {
        self.automatic.is_empty() && self.manual.is_empty()
    }

    /// First automatic fault enabled for any candidate.
    ///
    /// Candidates are `(event, inferred round)` pairs, visited in the order
    /// given; faults are tried in registration order for each. `skip`
    /// excludes `(fault, event)` pairs that already fired; see
    /// [`Fault::firing_key`].
    pub fn first_enabled<'r, 'e, M, I, S>(
        &'r self,
        transport: &Transport<M>,
        mutators: &MutatorRegistry<M>,
        candidates: I,
        mut skip: S,
    ) -> Option<(&'r Fault, EventId)>
    where
        M: Message,
        I: IntoIterator<Item = (&'e Event<M>, Option<u64>)>,
        S: FnMut(&Fault, EventId) -> bool,
    {
        if self.automatic.is_empty() {
            return None;
        }
        candidates.into_iter().find_map(|(event, inferred_round)| {
            let ctx = FaultContext { transport, mutators, event: Some(event), inferred_round };
            self.automatic
                .iter()
                .find(|fault| !skip(*fault, event.id) && fault.is_enabled(&ctx))
                .map(|fault| (fault, event.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::event::DroppedReason;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Ping;

    impl Message for Ping {
        fn tag(&self) -> &'static str {
            "PING"
        }
    }

    fn queued(transport: &Transport<Ping>) -> Vec<(&Event<Ping>, Option<u64>)> {
        transport.events().filter(|e| e.is_queued()).map(|e| (e, None)).collect()
    }

    #[test]
    fn first_match_wins_in_registration_order() {
        let mut transport = Transport::new();
        transport.send("A", "B", Ping);
        transport.send("C", "B", Ping);

        let mut registry = FaultRegistry::new();
        registry.register(Fault::new(
            "drop-from-c",
            "",
            FaultPredicate::SenderHasId("C".into()),
            FaultBehavior::DropMessage,
        ));
        registry.register(Fault::new(
            "drop-any",
            "",
            FaultPredicate::Always,
            FaultBehavior::DropMessage,
        ));

        let mutators = MutatorRegistry::new();
        let (fault, event) = registry
            .first_enabled(&transport, &mutators, queued(&transport), |_, _| false)
            .expect("enabled");

        // Event 1 comes first; only the second fault matches it.
        assert_eq!((fault.id.as_str(), event), ("drop-any", 1));
    }

    #[test]
    fn skip_excludes_fired_pairs() {
        let mut transport = Transport::new();
        transport.send("A", "B", Ping);
        transport.send("A", "C", Ping);

        let mut registry = FaultRegistry::new();
        registry.register(Fault::compose(FaultPredicate::Always, FaultBehavior::DropMessage));
        let fired: BTreeSet<(FaultId, EventId)> =
            [(registry.automatic()[0].id.clone(), 1)].into_iter().collect();

        let mutators = MutatorRegistry::new();
        let found = registry.first_enabled(&transport, &mutators, queued(&transport), |f, e| {
            fired.contains(&(f.id.clone(), e))
        });

        assert_eq!(found.map(|(_, e)| e), Some(2));
    }

    #[test]
    fn event_free_faults_keyed_by_id_alone() {
        let mut transport = Transport::new();
        transport.send("A", "B", Ping);
        transport.send("A", "C", Ping);

        let mut registry = FaultRegistry::new();
        registry.register(Fault::new(
            "isolate-a",
            "",
            FaultPredicate::BeforeGst,
            FaultBehavior::IsolateNode("A".into()),
        ));
        registry.register(Fault::new(
            "drop",
            "",
            FaultPredicate::Always,
            FaultBehavior::DropMessage,
        ));
        let [isolate, drop] = registry.automatic() else { panic!("two faults") };
        assert_eq!(isolate.firing_key(1), ("isolate-a".to_owned(), None));
        assert_eq!(drop.firing_key(1), ("drop".to_owned(), Some(1)));

        let fired: BTreeSet<FiringKey> = [isolate.firing_key(1)].into_iter().collect();
        let mutators = MutatorRegistry::new();
        let found = registry.first_enabled(&transport, &mutators, queued(&transport), |f, e| {
            fired.contains(&f.firing_key(e))
        });

        // The isolation does not come back for event 2.
        assert_eq!(found.map(|(f, e)| (f.id.as_str(), e)), Some(("drop", 1)));
    }

    #[test]
    fn mutation_fault_needs_mutator() {
        let mut transport = Transport::new();
        transport.send("A", "B", Ping);
        let mut registry = FaultRegistry::new();
        registry.register(Fault::compose(
            FaultPredicate::Always,
            FaultBehavior::MutateMessage { mutator: None },
        ));

        let empty = MutatorRegistry::new();
        let first = registry.first_enabled(&transport, &empty, queued(&transport), |_, _| false);
        assert!(first.is_none());

        let identity = Mutator::new("same", "Identity", ["PING"], |p: &Ping| p.clone());
        let mutators: MutatorRegistry<Ping> = [identity].into_iter().collect();
        let first = registry.first_enabled(&transport, &mutators, queued(&transport), |_, _| false);
        assert!(first.is_some());
    }

    #[test]
    fn apply_records_notification() {
        let mut transport = Transport::new();
        let id = transport.send("A", "B", Ping);
        transport.take_notices();
        let fault = Fault::new("f", "drop it", FaultPredicate::Always, FaultBehavior::DropMessage);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        fault.apply(&mut transport, Some(id), &MutatorRegistry::new(), &mut rng).expect("apply");

        assert_eq!(
            transport.take_notices(),
            vec![
                Notification::EventDropped { event: id, reason: DroppedReason::Fault },
                Notification::FaultApplied { fault: "f".into(), event: Some(id) },
            ]
        );
    }

    #[test]
    fn lookup_covers_manual_faults() {
        let mut registry = FaultRegistry::new();
        registry.register_manual(Fault::new(
            "heal-network",
            "Heal network",
            FaultPredicate::Always,
            FaultBehavior::HealNetwork,
        ));

        assert!(registry.get("heal-network").is_some());
        assert!(registry.automatic().is_empty());
        assert_eq!(
            registry.require("x").map(|f| f.id.clone()),
            Err(SimError::UnknownFault("x".into()))
        );
    }
}
