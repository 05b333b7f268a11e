//! FIFO strategy.

use faultline_core::Message;

use super::{Action, Strategy, StrategyView};
use crate::config::ExecutionMode;

/// Delivers the lowest-id eligible message or client request.
///
/// Ignores timeouts and faults and uses no randomness, so identical
/// initial states always produce identical schedules.
#[derive(Debug, Clone, Copy)]
pub struct FifoStrategy {
    mode: ExecutionMode,
}

impl FifoStrategy {
    /// FIFO in `mode`.
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }
}

impl<M: Message> Strategy<M> for FifoStrategy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn next_action(&mut self, view: &StrategyView<'_, M>) -> Option<Action> {
        view.eligible_messages(self.mode).first().map(|event| Action::Deliver(event.id))
    }
}
