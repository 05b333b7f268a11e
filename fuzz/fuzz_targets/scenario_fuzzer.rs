//! Fuzz target for whole scenarios of the reference consensus protocol.
//!
//! # Strategy
//!
//! - Arbitrary seed, strategy family, timing model and fault budgets
//!
//! # Invariants
//!
//! - A safe protocol never violates Agreement or Integrity
//! - The harness never errors on a valid configuration
//! - Same configuration, same report

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use faultline_harness::{
    ExecutionMode, Scenario, ScenarioConfig, ScenarioOutcome, StrategyConfig, StrategyKind,
    TerminationConfig, protocols::Consensus,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    seed: u64,
    kind: u8,
    sync: bool,
    max_drop_messages: u8,
    max_mutate_messages: u8,
    min_events: u8,
}

impl Input {
    fn config(&self) -> ScenarioConfig {
        let kind = match self.kind % 4 {
            0 => StrategyKind::Fifo,
            1 => StrategyKind::Random,
            2 => StrategyKind::ByzzFuzz,
            _ => StrategyKind::Twins,
        };
        let mode = if self.sync { ExecutionMode::Sync } else { ExecutionMode::Async };
        ScenarioConfig {
            strategy: StrategyConfig {
                kind,
                mode,
                max_drop_messages: usize::from(self.max_drop_messages % 16),
                max_mutate_messages: usize::from(self.max_mutate_messages % 16),
                ..StrategyConfig::default()
            },
            termination: TerminationConfig {
                min_events: 20 + usize::from(self.min_events),
                ..TerminationConfig::default()
            },
            ..ScenarioConfig::with_seed(self.seed)
        }
    }
}

fuzz_target!(|input: Input| {
    let config = input.config();
    let first = Scenario::new(Arc::new(Consensus), config.clone()).expect("valid configuration");
    let report = first.into_report();

    if let ScenarioOutcome::Violated { violations } = &report.outcome {
        assert!(
            violations.iter().all(|v| v.predicate != "Agreement" && v.predicate != "Integrity"),
            "{violations:?}"
        );
    }
    assert!(!matches!(report.outcome, ScenarioOutcome::Errored { .. }), "{:?}", report.outcome);

    let second = Scenario::new(Arc::new(Consensus), config).expect("valid configuration");
    assert_eq!(report, second.into_report());
});
