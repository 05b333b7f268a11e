//! Parallel campaigns.
//!
//! A campaign runs `scenarios` independent scenarios with seeds `seed`,
//! `seed + 1`, ... on a rayon pool. Workers share nothing but the protocol
//! adapter; each builds its own scenario and reports back a
//! [`ScenarioReport`], which is merged into an atomic tally. Violating
//! reports are kept as counterexamples.
//!
//! With `stop_on_violation` the first counterexample raises a shared flag
//! and scenarios that have not started yet are skipped.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    config::{CampaignConfig, StrategyKind},
    error::HarnessError,
    protocol::Protocol,
    scenario::{Scenario, ScenarioOutcome, ScenarioReport, Schedule},
};

/// Aggregate result of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignSummary {
    /// Protocol under test
    pub protocol: String,
    /// Strategy family
    pub strategy: StrategyKind,
    /// Scenarios requested
    pub scenarios: usize,
    /// Reached the minimum length with every predicate holding
    pub passed: usize,
    /// Broke a predicate
    pub violated: usize,
    /// Ran out of actions after GST
    pub stalled: usize,
    /// Failed with an error
    pub errored: usize,
    /// Never started because of an earlier violation
    pub skipped: usize,
    /// Violating scenarios, by seed
    pub counterexamples: Vec<ScenarioReport>,
}

impl CampaignSummary {
    /// Whether any scenario broke a predicate.
    pub fn found_violation(&self) -> bool {
        self.violated > 0
    }
}

#[derive(Debug, Default)]
struct Tally {
    passed: AtomicUsize,
    violated: AtomicUsize,
    stalled: AtomicUsize,
    errored: AtomicUsize,
    skipped: AtomicUsize,
}

impl Tally {
    fn record(&self, outcome: &ScenarioOutcome) {
        let counter = match outcome {
            ScenarioOutcome::Passed => &self.passed,
            ScenarioOutcome::Violated { .. } => &self.violated,
            ScenarioOutcome::Stalled => &self.stalled,
            ScenarioOutcome::Errored { .. } => &self.errored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Many scenarios of one protocol and configuration.
#[derive(Debug)]
pub struct Campaign<P: Protocol> {
    protocol: Arc<P>,
    config: CampaignConfig,
}

impl<P: Protocol> Campaign<P> {
    /// Validate `config` by building the first scenario.
    pub fn new(protocol: P, config: CampaignConfig) -> Result<Self, HarnessError> {
        let protocol = Arc::new(protocol);
        Scenario::new(Arc::clone(&protocol), config.scenario(config.seed))?;
        Ok(Self { protocol, config })
    }

    /// Campaign configuration.
    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// Run every scenario and merge the reports.
    pub fn run(&self) -> Result<CampaignSummary, HarnessError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .thread_name(|i| format!("faultline-{i}"))
            .build()?;

        tracing::info!(
            protocol = self.protocol.name(),
            scenarios = self.config.scenarios,
            seed = self.config.seed,
            threads = pool.current_num_threads(),
            "Starting campaign"
        );

        let tally = Tally::default();
        let stop = AtomicBool::new(false);
        let counterexamples = Mutex::new(Vec::new());

        pool.install(|| {
            (0..self.config.scenarios).into_par_iter().for_each(|index| {
                if stop.load(Ordering::Relaxed) {
                    tally.skipped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                let seed = self.config.seed.wrapping_add(index as u64);
                let report = self.run_scenario(seed);
                tally.record(&report.outcome);

                if report.outcome.is_violation() {
                    if self.config.stop_on_violation {
                        stop.store(true, Ordering::Relaxed);
                    }
                    counterexamples.lock().push(report);
                }
            });
        });

        let mut counterexamples = counterexamples.into_inner();
        counterexamples.sort_by_key(|report| report.seed);

        let summary = CampaignSummary {
            protocol: self.protocol.name().to_owned(),
            strategy: self.config.strategy.kind,
            scenarios: self.config.scenarios,
            passed: tally.passed.into_inner(),
            violated: tally.violated.into_inner(),
            stalled: tally.stalled.into_inner(),
            errored: tally.errored.into_inner(),
            skipped: tally.skipped.into_inner(),
            counterexamples,
        };
        tracing::info!(
            passed = summary.passed,
            violated = summary.violated,
            stalled = summary.stalled,
            errored = summary.errored,
            skipped = summary.skipped,
            "Campaign finished"
        );
        Ok(summary)
    }

    fn run_scenario(&self, seed: u64) -> ScenarioReport {
        match Scenario::new(Arc::clone(&self.protocol), self.config.scenario(seed)) {
            Ok(scenario) => scenario.into_report(),
            Err(err) => {
                tracing::warn!(seed, error = %err, "Scenario setup failed");
                ScenarioReport {
                    seed,
                    outcome: ScenarioOutcome::Errored { error: err.to_string() },
                    schedule: Schedule::new(seed),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ConfigError, ProtocolConfig, StrategyConfig, TerminationConfig},
        protocols::{Consensus, UnsafeOrder},
    };

    fn config(scenarios: usize, strategy: StrategyConfig) -> CampaignConfig {
        CampaignConfig {
            scenarios,
            threads: 2,
            strategy,
            termination: TerminationConfig { min_events: 80, ..TerminationConfig::default() },
            ..CampaignConfig::default()
        }
    }

    #[test]
    fn every_scenario_is_counted() {
        let campaign = Campaign::new(Consensus, config(6, StrategyConfig::fifo())).expect("valid");
        let summary = campaign.run().expect("run");

        assert_eq!(summary.passed, 6);
        assert_eq!(
            summary.passed + summary.violated + summary.stalled + summary.errored + summary.skipped,
            6
        );
        assert!(summary.counterexamples.is_empty());
    }

    #[test]
    fn counterexamples_sorted_by_seed() {
        let strategy = StrategyConfig { max_drop_messages: 0, ..StrategyConfig::default() };
        let mut config = config(8, strategy);
        config.protocol = ProtocolConfig { clients: 2, ..ProtocolConfig::default() };
        let summary = Campaign::new(UnsafeOrder, config).expect("valid").run().expect("run");

        assert!(summary.found_violation());
        let seeds: Vec<u64> = summary.counterexamples.iter().map(|r| r.seed).collect();
        let mut sorted = seeds.clone();
        sorted.sort_unstable();
        assert_eq!(seeds, sorted);
        assert!(summary.counterexamples.iter().all(|r| r.schedule.is_buggy()));
    }

    #[test]
    fn invalid_configuration_rejected_up_front() {
        let mut config = config(1, StrategyConfig::default());
        config.protocol.replicas = 0;
        let err = Campaign::new(Consensus, config).expect_err("no replicas");
        assert!(matches!(err, HarnessError::Config(ConfigError::NoReplicas)));
    }
}
