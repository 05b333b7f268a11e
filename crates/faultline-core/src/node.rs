//! Contract between the harness and protocol implementations.
//!
//! A protocol provides one [`Node`] implementation per role. The harness
//! calls its handlers with a [`NodeContext`], which is the node's only way to
//! touch the world: sending, arming timers and committing.

use std::collections::BTreeSet;

use crate::{
    commit_log::{CommitLog, CommitLogError, LogEntry},
    error::HandlerError,
    event::{EventId, NodeId},
    message::Message,
    notice::Notification,
    transport::Transport,
};

/// A replica or client participating in a scenario.
///
/// Handlers run synchronously inside delivery. Anything they send is queued
/// in the store and only reaches its recipient when the scheduler says so.
pub trait Node<M: Message>: Send {
    /// Called once before the first scheduling decision.
    fn initialize(&mut self, _ctx: &mut NodeContext<'_, M>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// A protocol message from `sender` arrived.
    fn handle_message(
        &mut self,
        ctx: &mut NodeContext<'_, M>,
        sender: &str,
        payload: M,
    ) -> Result<(), HandlerError>;

    /// A client request from `client` arrived.
    fn handle_client_request(
        &mut self,
        ctx: &mut NodeContext<'_, M>,
        client: &str,
        payload: M,
    ) -> Result<(), HandlerError> {
        self.handle_message(ctx, client, payload)
    }

    /// A timer armed through [`NodeContext::set_timeout`] fired.
    fn handle_timeout(
        &mut self,
        _ctx: &mut NodeContext<'_, M>,
        _timer: EventId,
        _description: &str,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Outbound filter applied to every send from one node instance.
///
/// Used to confine a twin to the nodes of its partition.
pub trait SendFilter<M>: Send + Sync {
    /// Whether `payload` may be sent to `recipient`.
    fn permits(&self, recipient: &str, payload: &M) -> bool;
}

/// Handle a node uses to act during a handler call.
pub struct NodeContext<'a, M: Message> {
    id: &'a str,
    owner: &'a str,
    replicas: &'a BTreeSet<NodeId>,
    transport: &'a mut Transport<M>,
    log: &'a mut CommitLog,
    filter: Option<&'a dyn SendFilter<M>>,
}

impl<'a, M: Message> NodeContext<'a, M> {
    /// Context for the node instance `owner`, publicly known as `id`.
    pub fn new(
        id: &'a str,
        owner: &'a str,
        replicas: &'a BTreeSet<NodeId>,
        transport: &'a mut Transport<M>,
        log: &'a mut CommitLog,
    ) -> Self {
        Self { id, owner, replicas, transport, log, filter: None }
    }

    /// Restrict outbound messages with `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: &'a dyn SendFilter<M>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Public id of this node.
    pub fn id(&self) -> &str {
        self.id
    }

    /// Internal id of this instance. Differs from [`Self::id`] for twins.
    pub fn owner(&self) -> &str {
        self.owner
    }

    /// Ids of all replicas in the scenario, including this one.
    pub fn replica_ids(&self) -> &BTreeSet<NodeId> {
        self.replicas
    }

    /// Logical time.
    pub fn now(&self) -> u64 {
        self.transport.now()
    }

    /// Send `payload` to one node. `None` if the send filter refused it.
    pub fn send(&mut self, recipient: &str, payload: M) -> Option<EventId> {
        if !self.permits(recipient, &payload) {
            return None;
        }
        Some(self.transport.send(self.id, recipient, payload))
    }

    /// Send `payload` to each of `recipients`.
    pub fn multicast(&mut self, recipients: &[NodeId], payload: M) -> Vec<EventId> {
        let allowed: Vec<NodeId> =
            recipients.iter().filter(|r| self.permits(r, &payload)).cloned().collect();
        if allowed.is_empty() {
            return Vec::new();
        }
        self.transport.multicast(self.id, &allowed, &payload)
    }

    /// Send `payload` to every other replica.
    pub fn broadcast(&mut self, payload: M) -> Vec<EventId> {
        let others: Vec<NodeId> =
            self.replicas.iter().filter(|r| r.as_str() != self.id).cloned().collect();
        self.multicast(&others, payload)
    }

    /// Send `payload` to every replica, this one included.
    pub fn broadcast_including_self(&mut self, payload: M) -> Vec<EventId> {
        let all: Vec<NodeId> = self.replicas.iter().cloned().collect();
        self.multicast(&all, payload)
    }

    /// Issue a client request to one replica.
    pub fn send_request(&mut self, replica: &str, payload: M) -> EventId {
        self.transport.send_client_request(self.id, replica, payload)
    }

    /// Issue the same client request to several replicas.
    pub fn multicast_request(&mut self, replicas: &[NodeId], payload: M) -> Vec<EventId> {
        self.transport.multicast_client_request(self.id, replicas, &payload)
    }

    /// Arm a timer due `delay` ticks from now.
    pub fn set_timeout(&mut self, description: impl Into<String>, delay: u64) -> EventId {
        self.transport.schedule_timeout(self.id, self.owner, description, delay)
    }

    /// Cancel a timer. Returns `false` if it already fired or was cleared.
    pub fn clear_timeout(&mut self, timer: EventId) -> bool {
        self.transport.clear_timeout(timer).is_ok()
    }

    /// Cancel every pending timer of this instance.
    pub fn clear_all_timeouts(&mut self) -> usize {
        self.transport.clear_owner_timeouts(self.owner).len()
    }

    /// Commit `entry` at `sequence` in this replica's log.
    pub fn commit_operation(
        &mut self,
        sequence: u64,
        entry: impl Into<LogEntry>,
    ) -> Result<(), HandlerError> {
        let entry = entry.into();
        self.log.insert(sequence, entry.clone()).map_err(|err| match err {
            CommitLogError::Occupied { sequence, .. } => HandlerError::AlreadyCommitted(sequence),
        })?;

        tracing::debug!(replica = self.owner, sequence, %entry, "Committed");
        self.transport.notify(Notification::LocalCommit { replica: self.id.to_owned(), sequence });
        Ok(())
    }

    /// This replica's commit log.
    pub fn commit_log(&self) -> &CommitLog {
        self.log
    }

    /// Announce that this replica now follows `leader`.
    pub fn report_leader_change(&mut self, leader: &str) {
        self.transport.notify(Notification::LeaderChange {
            replica: self.id.to_owned(),
            leader: leader.to_owned(),
        });
    }

    fn permits(&self, recipient: &str, payload: &M) -> bool {
        self.filter.is_none_or(|f| f.permits(recipient, payload))
    }
}
