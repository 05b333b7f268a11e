//! Faultline campaign runner.
//!
//! # Usage
//!
//! ```bash
//! # 100 random scenarios of the reference consensus protocol
//! faultline --scenarios 100
//!
//! # Campaign file, overriding the seed and strategy
//! faultline --config campaign.toml --seed 42 --strategy byzzfuzz
//!
//! # Look for counterexamples in the unsafe protocol, stop at the first
//! faultline --protocol unsafe-order --clients 2 --stop-on-violation
//! ```
//!
//! The JSON summary goes to stdout; logs go to stderr. Exits with status 1
//! when any scenario violated a predicate.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, ValueEnum};
use faultline_harness::{
    Campaign, CampaignConfig, CampaignSummary, ExecutionMode, HarnessError, Protocol,
    StrategyKind,
    protocols::{Consensus, ProtocolKind, UnsafeOrder},
};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Faultline campaign runner
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(about = "Explore BFT protocol executions under adversarial scheduling")]
#[command(version)]
struct Args {
    /// Campaign file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Protocol under test
    #[arg(short, long)]
    protocol: Option<String>,

    /// Base seed; scenario i uses seed + i
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of scenarios
    #[arg(short = 'n', long)]
    scenarios: Option<usize>,

    /// Exploration strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Network timing model
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Number of replicas
    #[arg(long)]
    replicas: Option<usize>,

    /// Number of clients
    #[arg(long)]
    clients: Option<usize>,

    /// Worker threads
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Skip remaining scenarios after the first violation
    #[arg(long)]
    stop_on_violation: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Fifo,
    Random,
    Byzzfuzz,
    Twins,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Fifo => Self::Fifo,
            StrategyArg::Random => Self::Random,
            StrategyArg::Byzzfuzz => Self::ByzzFuzz,
            StrategyArg::Twins => Self::Twins,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Sync,
    Async,
}

impl From<ModeArg> for ExecutionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Sync => Self::Sync,
            ModeArg::Async => Self::Async,
        }
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("invalid campaign file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error("failed to write summary: {0}")]
    Output(#[from] std::io::Error),

    #[error("failed to encode summary: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Args {
    fn campaign(&self) -> Result<CampaignConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => load(path)?,
            None => CampaignConfig::default(),
        };

        if let Some(name) = &self.protocol {
            config.protocol.name.clone_from(name);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(scenarios) = self.scenarios {
            config.scenarios = scenarios;
        }
        if let Some(strategy) = self.strategy {
            config.strategy.kind = strategy.into();
        }
        if let Some(mode) = self.mode {
            config.strategy.mode = mode.into();
        }
        if let Some(replicas) = self.replicas {
            config.protocol.replicas = replicas;
        }
        if let Some(clients) = self.clients {
            config.protocol.clients = clients;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        config.stop_on_violation |= self.stop_on_violation;
        Ok(config)
    }
}

fn load(path: &Path) -> Result<CampaignConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| CliError::Read { path: path.to_owned(), source })?;
    toml::from_str(&text).map_err(|source| CliError::Parse { path: path.to_owned(), source })
}

fn run<P: Protocol>(protocol: P, config: CampaignConfig) -> Result<CampaignSummary, CliError> {
    Ok(Campaign::new(protocol, config)?.run()?)
}

fn execute(args: &Args) -> Result<bool, CliError> {
    let config = args.campaign()?;
    let kind = ProtocolKind::from_name(&config.protocol.name).map_err(HarnessError::from)?;

    tracing::info!(
        protocol = %config.protocol.name,
        strategy = ?config.strategy.kind,
        mode = ?config.strategy.mode,
        "Faultline starting"
    );

    let summary = match kind {
        ProtocolKind::Consensus => run(Consensus, config)?,
        ProtocolKind::UnsafeOrder => run(UnsafeOrder, config)?,
    };

    for report in &summary.counterexamples {
        tracing::warn!(
            seed = report.seed,
            schedule_len = report.schedule.len(),
            status = report.outcome.status(),
            "Counterexample"
        );
    }

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &summary)?;
    writeln!(stdout)?;
    Ok(summary.found_violation())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match execute(&args) {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(1),
        Err(err) => {
            tracing::error!(error = %err, "Faultline failed");
            ExitCode::from(2)
        },
    }
}
