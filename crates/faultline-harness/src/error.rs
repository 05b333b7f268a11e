//! Harness error type.

use faultline_core::SimError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors building or driving a scenario or campaign.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Configuration rejected before anything ran.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Kernel error while setting up or stepping a scenario.
    #[error(transparent)]
    Sim(#[from] SimError),

    /// Campaign worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl HarnessError {
    /// The protocol under test crashed.
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Sim(err) if err.is_crash())
    }
}
