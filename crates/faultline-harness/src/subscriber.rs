//! Scenario observers.
//!
//! The scenario owns one subscriber list. After every step it drains the
//! store's notifications and hands each one, in emission order, to the round
//! oracle, the predicate engine and then every registered [`Subscriber`].

use std::sync::Arc;

use faultline_core::{Message, Notification, Transport};
use parking_lot::Mutex;

/// State visible to a subscriber while it handles a notification.
#[derive(Debug)]
pub struct Observation<'a, M> {
    /// Event store after the step
    pub transport: &'a Transport<M>,
    /// Schedule length after the step
    pub schedule_len: usize,
}

/// Receives every notification of a scenario.
pub trait Subscriber<M: Message>: Send {
    /// Handle one notification.
    fn notify(&mut self, notice: &Notification, observation: &Observation<'_, M>);
}

/// Logs every notification at TRACE level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceSubscriber;

impl<M: Message> Subscriber<M> for TraceSubscriber {
    fn notify(&mut self, notice: &Notification, observation: &Observation<'_, M>) {
        tracing::trace!(?notice, schedule_len = observation.schedule_len, "Notification");
    }
}

/// Records notifications into a shared buffer.
///
/// Clone the log before boxing it into a scenario to keep a handle for
/// reading.
#[derive(Debug, Default, Clone)]
pub struct NoticeLog {
    notices: Arc<Mutex<Vec<Notification>>>,
}

impl NoticeLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn notices(&self) -> Vec<Notification> {
        self.notices.lock().clone()
    }

    /// Number of recorded notifications.
    pub fn len(&self) -> usize {
        self.notices.lock().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.notices.lock().is_empty()
    }
}

impl<M: Message> Subscriber<M> for NoticeLog {
    fn notify(&mut self, notice: &Notification, _observation: &Observation<'_, M>) {
        self.notices.lock().push(notice.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Nop;

    impl Message for Nop {
        fn tag(&self) -> &'static str {
            "NOP"
        }
    }

    #[test]
    fn notice_log_shares_buffer() {
        let log = NoticeLog::new();
        let mut subscriber: Box<dyn Subscriber<Nop>> = Box::new(log.clone());
        let transport = Transport::new();
        let observation = Observation { transport: &transport, schedule_len: 0 };

        subscriber.notify(&Notification::GlobalStabilization, &observation);

        assert_eq!(log.notices(), vec![Notification::GlobalStabilization]);
    }
}
