//! Twins: one Byzantine identity, several honest instances.
//!
//! At setup the strategy replaces each of the first `replicas` faulty
//! replicas with `twins_per_replica` instances sharing its public id. For
//! each round in `1..=rounds` it draws a random partition of the other
//! replicas plus the twins' internal ids into one to three groups. A twin
//! only talks to the peers in its group for a message's round, so peers in
//! different groups see different, individually honest, behavior.
//!
//! Scheduling after setup is plain Random.

use std::collections::BTreeMap;

use faultline_core::{Message, NodeId};
use rand::{Rng, seq::SliceRandom};

use super::{Action, RandomStrategy, ScenarioSetup, Strategy, StrategyView, TwinPlan};
use crate::config::{ConfigError, StrategyConfig, TwinsParams};

/// Random scheduling over a cluster with twin replicas.
#[derive(Debug, Clone)]
pub struct TwinsStrategy {
    params: TwinsParams,
    inner: RandomStrategy,
}

impl TwinsStrategy {
    /// Twins seeded with `seed`.
    pub fn new(config: &StrategyConfig, seed: u64) -> Self {
        Self { params: config.twins, inner: RandomStrategy::new(config, seed) }
    }

    fn partition(&mut self, nodes: &[NodeId]) -> Vec<Vec<NodeId>> {
        let rng = self.inner.rng();
        let count = rng.gen_range(1..=3).min(nodes.len().max(1));
        let mut groups = vec![Vec::new(); count];
        let mut shuffled = nodes.to_vec();
        shuffled.shuffle(rng);
        for node in shuffled {
            groups[rng.gen_range(0..count)].push(node);
        }
        groups.retain(|g: &Vec<NodeId>| !g.is_empty());
        for group in &mut groups {
            group.sort();
        }
        groups
    }
}

impl<M: Message> Strategy<M> for TwinsStrategy {
    fn name(&self) -> &'static str {
        "twins"
    }

    fn initialize(&mut self, setup: &mut ScenarioSetup<'_>) -> Result<(), ConfigError> {
        if self.params.twins_per_replica < 2 {
            return Err(ConfigError::NotEnoughTwins(self.params.twins_per_replica));
        }
        if setup.faulty.len() < self.params.replicas {
            return Err(ConfigError::NotEnoughFaultyReplicas {
                needed: self.params.replicas,
                available: setup.faulty.len(),
            });
        }

        let twinned: Vec<NodeId> =
            setup.faulty.iter().take(self.params.replicas).cloned().collect();
        for replica in twinned {
            let instances: Vec<NodeId> =
                (0..self.params.twins_per_replica).map(|i| format!("{replica}:{i}")).collect();
            let universe: Vec<NodeId> = setup
                .replicas
                .iter()
                .filter(|r| **r != replica)
                .cloned()
                .chain(instances.iter().cloned())
                .collect();

            let round_partitions: BTreeMap<u64, Vec<Vec<NodeId>>> =
                (1..=self.params.rounds).map(|round| (round, self.partition(&universe))).collect();

            tracing::debug!(%replica, twins = instances.len(), "Planned twins");
            setup.twins.push(TwinPlan { replica, instances, round_partitions });
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

    fn plan(params: TwinsParams, faulty: &[&str]) -> Result<Vec<TwinPlan>, ConfigError> {
        let config = StrategyConfig {
            kind: StrategyKind::Twins,
            twins: params,
            ..StrategyConfig::default()
        };
        let mut strategy = TwinsStrategy::new(&config, 5);
        let replicas: BTreeSet<NodeId> = ["A", "B", "C", "D"].map(String::from).into();
        let clients = BTreeSet::new();
        let faulty: BTreeSet<NodeId> = faulty.iter().map(|s| (*s).to_owned()).collect();
        let mut faults = FaultRegistry::new();
        let mut setup = ScenarioSetup {
            replicas: &replicas,
            clients: &clients,
            faulty: &faulty,
            faults: &mut faults,
            twins: Vec::new(),
        };
        Strategy::<Msg>::initialize(&mut strategy, &mut setup)?;
        Ok(setup.twins)
    }

    #[test]
    fn plans_instances_and_round_partitions() {
        let params = TwinsParams { replicas: 1, twins_per_replica: 3, rounds: 4 };
        let plans = plan(params, &["D"]).expect("plan");

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].replica, "D");
        assert_eq!(plans[0].instances, ["D:0", "D:1", "D:2"]);
        assert_eq!(plans[0].round_partitions.keys().copied().collect::<Vec<_>>(), [1, 2, 3, 4]);

        for groups in plans[0].round_partitions.values() {
            assert!((1..=3).contains(&groups.len()));
            let mut members: Vec<&str> = groups.iter().flatten().map(String::as_str).collect();
            members.sort_unstable();
            assert_eq!(members, ["A", "B", "C", "D:0", "D:1", "D:2"]);
        }
    }

    #[test]
    fn needs_enough_faulty_replicas() {
        let params = TwinsParams { replicas: 2, ..TwinsParams::default() };
        assert_eq!(
            plan(params, &["D"]).expect_err("one faulty replica"),
            ConfigError::NotEnoughFaultyReplicas { needed: 2, available: 1 }
        );
    }

    #[test]
    fn needs_two_instances() {
        let params = TwinsParams { twins_per_replica: 1, ..TwinsParams::default() };
        assert_eq!(plan(params, &["D"]).expect_err("one twin"), ConfigError::NotEnoughTwins(1));
    }
}
