//! ByzzFuzz: round-scoped small-scope faults.
//!
//! Before the first step the strategy draws `c` process faults and `d`
//! network faults, each confined to one protocol round in `1..=r` (rounds
//! as inferred by the [`RoundOracle`](crate::rounds::RoundOracle)):
//!
//! - a **process fault** corrupts the messages a faulty replica sends to a
//!   random subset of the other replicas in its round
//! - a **network fault** drops, before GST, every message of its round that
//!   crosses a random two-way partition of the replicas
//!
//! Outside those faults it schedules like Random with drops and mutations
//! disabled.

use faultline_core::{Fault, FaultBehavior, FaultPredicate, Message, NodeId};
use rand::{Rng, seq::SliceRandom};

use super::{Action, RandomStrategy, ScenarioSetup, Strategy, StrategyView};
use crate::config::{ByzzFuzzParams, ConfigError, StrategyConfig};

/// Random scheduling plus round-scoped process and network faults.
#[derive(Debug, Clone)]
pub struct ByzzFuzzStrategy {
    params: ByzzFuzzParams,
    inner: RandomStrategy,
}

impl ByzzFuzzStrategy {
    /// ByzzFuzz seeded with `seed`.
    pub fn new(config: &StrategyConfig, seed: u64) -> Self {
        Self { params: config.byzzfuzz, inner: RandomStrategy::new(config, seed).without_faults() }
    }

    fn network_fault(&mut self, replicas: &[NodeId]) -> Option<Fault> {
        if replicas.len() < 2 {
            return None;
        }
        let rng = self.inner.rng();
        let round = rng.gen_range(1..=self.params.rounds_with_faults);
        let size = rng.gen_range(1..replicas.len());
        let mut side: Vec<NodeId> = replicas.choose_multiple(rng, size).cloned().collect();
        side.sort();

        let id = format!("byzzfuzznetworkfault-{round}-{}", side.join("-"));
        let predicate = FaultPredicate::AcrossPartitions(vec![side])
            .and(FaultPredicate::InferredRound(round))
            .and(FaultPredicate::BeforeGst);
        let name = format!("network fault in round {round}");
        Some(Fault::new(id, name, predicate, FaultBehavior::DropMessage))
    }

    fn process_fault(&mut self, faulty: &[NodeId], replicas: &[NodeId]) -> Option<Fault> {
        let rng = self.inner.rng();
        let round = rng.gen_range(1..=self.params.rounds_with_faults);
        let sender = faulty.choose(rng)?.clone();
        let others: Vec<&NodeId> = replicas.iter().filter(|r| **r != sender).collect();
        if others.is_empty() {
            return None;
        }
        let size = rng.gen_range(1..=others.len());
        let mut targets: Vec<NodeId> =
            others.choose_multiple(rng, size).map(|r| (*r).clone()).collect();
        targets.sort();

        let id = format!("byzzfuzzprocessfault-{round}-{sender}-{}", targets.join("-"));
        let name = format!("process fault of {sender} in round {round}");
        let predicate = FaultPredicate::InferredRound(round)
            .and(FaultPredicate::SenderHasId(sender))
            .and(FaultPredicate::recipients(targets));
        Some(Fault::new(id, name, predicate, FaultBehavior::MutateAndDeliver { mutator: None }))
    }
}

impl<M: Message> Strategy<M> for ByzzFuzzStrategy {
    fn name(&self) -> &'static str {
        "byzzfuzz"
    }

    fn initialize(&mut self, setup: &mut ScenarioSetup<'_>) -> Result<(), ConfigError> {
        if self.params.rounds_with_faults == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        let replicas: Vec<NodeId> = setup.replicas.iter().cloned().collect();
        let faulty: Vec<NodeId> = setup.faulty.iter().cloned().collect();
        if self.params.process_fault_rounds > 0 && faulty.is_empty() {
            return Err(ConfigError::NotEnoughFaultyReplicas { needed: 1, available: 0 });
        }

        for _ in 0..self.params.network_fault_rounds {
            match self.network_fault(&replicas) {
                Some(fault) => setup.faults.register(fault),
                None => tracing::warn!("Too few replicas to partition, skipping network fault"),
            }
        }
        for _ in 0..self.params.process_fault_rounds {
            if let Some(fault) = self.process_fault(&faulty, &replicas) {
                setup.faults.register(fault);
            }
        }
        Ok(())
    }

    fn next_action(&mut self, view: &StrategyView<'_, M>) -> Option<Action> {
        Strategy::<M>::next_action(&mut self.inner, view)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use faultline_core::FaultRegistry;

    use super::*;
    use crate::{config::StrategyKind, strategy::test_support::Msg};

    fn ids(list: &[&str]) -> BTreeSet<NodeId> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    fn initialize(
        params: ByzzFuzzParams,
        faulty: &[&str],
        seed: u64,
    ) -> Result<FaultRegistry, ConfigError> {
        let config = StrategyConfig {
            kind: StrategyKind::ByzzFuzz,
            byzzfuzz: params,
            ..StrategyConfig::default()
        };
        let mut strategy = ByzzFuzzStrategy::new(&config, seed);
        let replicas = ids(&["A", "B", "C", "D"]);
        let clients = ids(&["C0"]);
        let faulty = ids(faulty);
        let mut faults = FaultRegistry::new();
        let mut setup = ScenarioSetup {
            replicas: &replicas,
            clients: &clients,
            faulty: &faulty,
            faults: &mut faults,
            twins: Vec::new(),
        };
        Strategy::<Msg>::initialize(&mut strategy, &mut setup)?;
        Ok(faults)
    }

    fn params(c: usize, d: usize, r: u64) -> ByzzFuzzParams {
        ByzzFuzzParams { process_fault_rounds: c, network_fault_rounds: d, rounds_with_faults: r }
    }

    #[test]
    fn draws_configured_fault_counts() {
        let faults = initialize(params(2, 3, 4), &["D"], 11).expect("initialize");

        let count =
            |prefix: &str| faults.automatic().iter().filter(|f| f.id.starts_with(prefix)).count();
        assert_eq!(count("byzzfuzznetworkfault-"), 3);
        assert_eq!(count("byzzfuzzprocessfault-"), 2);
    }

    #[test]
    fn process_faults_come_from_faulty_senders() {
        let faults = initialize(params(5, 0, 2), &["D"], 3).expect("initialize");

        for fault in faults.automatic() {
            assert!(fault.id.contains("-D-"), "{}", fault.id);
            assert_eq!(fault.behavior, FaultBehavior::MutateAndDeliver { mutator: None });
        }
    }

    #[test]
    fn network_faults_stay_in_range_before_gst() {
        let faults = initialize(params(0, 1, 1), &[], 7).expect("initialize");

        let fault = &faults.automatic()[0];
        assert!(fault.id.starts_with("byzzfuzznetworkfault-1-"), "{}", fault.id);
        assert!(fault.predicate.id().contains("beforegst"));
        assert_eq!(fault.behavior, FaultBehavior::DropMessage);
    }

    #[test]
    fn process_faults_need_a_faulty_replica() {
        assert_eq!(
            initialize(params(1, 0, 1), &[], 0).expect_err("no faulty replica"),
            ConfigError::NotEnoughFaultyReplicas { needed: 1, available: 0 }
        );
    }

    #[test]
    fn same_seed_same_faults() {
        let params = ByzzFuzzParams::default();
        let a = initialize(params, &["D"], 99).expect("initialize");
        let b = initialize(params, &["D"], 99).expect("initialize");
        assert_eq!(a.automatic(), b.automatic());
    }
}
