//! Scenario orchestration for faultline.
//!
//! Builds on the simulation kernel in `faultline-core` and adds everything
//! needed to explore a protocol's executions:
//!
//! - [`strategy`]: FIFO, random, ByzzFuzz and Twins schedulers, each in
//!   synchronous or asynchronous mode
//! - [`predicates`]: agreement, integrity, bounded liveness and deadlock
//!   checks over replica commit logs
//! - [`scenario`]: one seeded run, recorded as a replayable [`Schedule`]
//! - [`campaign`]: many seeds in parallel on a rayon pool
//! - [`protocols`]: reference protocols to drive the harness end to end
//! - [`model`]: reference event store for model-based tests
//!
//! # Determinism
//!
//! Every random choice in a scenario is drawn from ChaCha generators seeded
//! from the scenario seed. Two scenarios built from the same configuration
//! produce the same schedule.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod campaign;
pub mod config;
pub mod error;
pub mod model;
pub mod predicates;
pub mod protocol;
pub mod protocols;
pub mod rounds;
pub mod scenario;
pub mod strategy;
pub mod subscriber;

pub use campaign::{Campaign, CampaignSummary};
pub use config::{
    CampaignConfig, ConfigError, ExecutionMode, ProtocolConfig, ScenarioConfig, StrategyConfig,
    StrategyKind, TerminationConfig,
};
pub use error::HarnessError;
pub use predicates::{Predicate, PredicateRegistry, Violation};
pub use protocol::{Protocol, client_id, replica_id};
pub use rounds::RoundOracle;
pub use scenario::{Scenario, ScenarioOutcome, ScenarioReport, Schedule, ScheduleEntry};
pub use strategy::{Action, Strategy};
pub use subscriber::{NoticeLog, Subscriber, TraceSubscriber};
