//! Correctness predicates.
//!
//! Predicates are properties a protocol must satisfy in every explored
//! interleaving. The scenario builds a [`ScenarioSnapshot`] of replica logs
//! and event counts and runs every registered [`Predicate`] against it.
//! Stateful predicates such as [`BoundedLiveness`] additionally observe the
//! notification stream through [`Predicate::observe`].
//!
//! A failed check is a [`Violation`] value, never an error: the scenario
//! records it as a counterexample and stops.
//!
//! ```ignore
//! let mut registry = PredicateRegistry::standard(100);
//! let snapshot = scenario.snapshot();
//! if let Err(violations) = registry.check_all(&snapshot) { ... }
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{Agreement, BoundedLiveness, Deadlock, Integrity};
use faultline_core::{Message, Notification};
use serde::Serialize;
pub use snapshot::{ReplicaSnapshot, ScenarioSnapshot};

use crate::subscriber::{Observation, Subscriber};

/// Predicate check result.
pub type PredicateResult = Result<(), Violation>;

/// A predicate that did not hold, with an explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Name of the violated predicate
    pub predicate: &'static str,
    /// What went wrong
    pub message: String,
}

impl Violation {
    /// Violation of `predicate`.
    pub fn new(predicate: &'static str, message: impl Into<String>) -> Self {
        Self { predicate, message: message.into() }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.predicate, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against scenario state.
pub trait Predicate: Send {
    /// Name used in violations.
    fn name(&self) -> &'static str;

    /// Observe one notification. `schedule_len` is the schedule length
    /// after the step that emitted it.
    fn observe(&mut self, _notice: &Notification, _schedule_len: usize) {}

    /// Check the predicate.
    fn check(&self, state: &ScenarioSnapshot) -> PredicateResult;
}

/// Ordered set of predicates checked together.
pub struct PredicateRegistry {
    predicates: Vec<Box<dyn Predicate>>,
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.predicates.iter().map(|p| p.name())).finish()
    }
}

impl PredicateRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self { predicates: Vec::new() }
    }

    /// Registry with the standard predicates:
    ///
    /// - [`Agreement`]: correct replicas agree per sequence
    /// - [`Integrity`]: no entry committed twice by one replica
    /// - [`BoundedLiveness`]: a commit within `grace_period` after GST
    /// - [`Deadlock`]: something is still queued
    pub fn standard(grace_period: usize) -> Self {
        let mut registry = Self::new();
        registry.add(Agreement);
        registry.add(Integrity);
        registry.add(BoundedLiveness::new(grace_period));
        registry.add(Deadlock);
        registry
    }

    /// Add a predicate.
    pub fn add<P: Predicate + 'static>(&mut self, predicate: P) {
        self.predicates.push(Box::new(predicate));
    }

    /// Forward a notification to every predicate.
    pub fn observe(&mut self, notice: &Notification, schedule_len: usize) {
        for predicate in &mut self.predicates {
            predicate.observe(notice, schedule_len);
        }
    }

    /// Check every predicate; all violations in registration order.
    pub fn check_all(&self, state: &ScenarioSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.predicates.iter().filter_map(|p| p.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Names of the registered predicates.
    pub fn names(&self) -> Vec<&'static str> {
        self.predicates.iter().map(|p| p.name()).collect()
    }

    /// Number of registered predicates.
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Whether no predicate is registered.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl<M: Message> Subscriber<M> for PredicateRegistry {
    fn notify(&mut self, notice: &Notification, observation: &Observation<'_, M>) {
        self.observe(notice, observation.schedule_len);
    }
}
