//! Reference event store.
//!
//! Plain vectors and linear scans: events in creation order, one partition
//! tag per node. No handlers run; a delivered message is simply appended to
//! the received list.

use faultline_core::{DEFAULT_PARTITION, NodeId};

use super::operation::{MODEL_NODES, ModelNodeId, Operation, OperationError, OperationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Queued,
    Delivered,
    Dropped,
}

#[derive(Debug, Clone)]
struct ModelEvent {
    sender: ModelNodeId,
    recipient: ModelNodeId,
    /// `None` for timeouts.
    value: Option<u8>,
    owner: ModelNodeId,
    status: Status,
}

/// State both implementations expose for comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Ids of QUEUED events, ascending
    pub queued: Vec<u64>,
    /// Ids of DELIVERED events, ascending
    pub delivered: Vec<u64>,
    /// Ids of DROPPED events, ascending
    pub dropped: Vec<u64>,
    /// Logical clock
    pub now: u64,
    /// Whether GST was raised
    pub gst: bool,
    /// Every ordered pair of distinct nodes that can communicate
    pub connected: Vec<(NodeId, NodeId)>,
    /// Messages handed to recipients, in delivery order
    pub received: Vec<(NodeId, u8)>,
}

/// Reference implementation of the event store and router.
#[derive(Debug, Clone)]
pub struct ModelStore {
    events: Vec<ModelEvent>,
    partitions: Vec<u32>,
    next_partition: u32,
    gst: bool,
    now: u64,
    received: Vec<(ModelNodeId, u8)>,
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelStore {
    /// Empty store, every node in the default partition.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            partitions: vec![DEFAULT_PARTITION; usize::from(MODEL_NODES)],
            next_partition: DEFAULT_PARTITION + 1,
            gst: false,
            now: 0,
            received: Vec::new(),
        }
    }

    /// Apply an operation. Node indices must already be clamped.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match *op {
            Operation::Send { sender, recipient, value } => {
                self.push(sender, recipient, Some(value), sender);
            },
            Operation::Broadcast { sender, value } => {
                for recipient in (0..MODEL_NODES).filter(|&n| n != sender) {
                    self.push(sender, recipient, Some(value), sender);
                }
            },
            Operation::ScheduleTimeout { node, .. } => self.push(node, node, None, node),
            Operation::Deliver { index } => {
                let Some(position) = self.queued_position(index) else {
                    return OperationResult::Error(OperationError::NothingQueued);
                };
                self.deliver(position);
            },
            Operation::Drop { index } => {
                let Some(position) = self.queued_position(index) else {
                    return OperationResult::Error(OperationError::NothingQueued);
                };
                self.events[position].status = Status::Dropped;
            },
            Operation::ClearTimeouts { node } => {
                let armed = |e: &&mut ModelEvent| {
                    e.status == Status::Queued && e.value.is_none() && e.owner == node
                };
                for event in self.events.iter_mut().filter(armed) {
                    event.status = Status::Dropped;
                }
            },
            Operation::Isolate { node } => {
                self.partitions[usize::from(node)] = self.next_partition;
                self.next_partition += 1;
            },
            Operation::Heal { node } => self.partitions[usize::from(node)] = DEFAULT_PARTITION,
            Operation::HealAll => {
                self.partitions.fill(DEFAULT_PARTITION);
                self.next_partition = DEFAULT_PARTITION + 1;
            },
            Operation::Gst => self.gst = true,
        }
        OperationResult::Ok
    }

    /// Current observable state.
    pub fn observable_state(&self) -> ObservableState {
        let ids = |status: Status| -> Vec<u64> {
            (1u64..)
                .zip(&self.events)
                .filter(|(_, e)| e.status == status)
                .map(|(id, _)| id)
                .collect()
        };
        let mut connected = Vec::new();
        for a in 0..MODEL_NODES {
            for b in (0..MODEL_NODES).filter(|&b| b != a) {
                if self.connected(a, b) {
                    connected.push((Operation::node_id(a), Operation::node_id(b)));
                }
            }
        }

        ObservableState {
            queued: ids(Status::Queued),
            delivered: ids(Status::Delivered),
            dropped: ids(Status::Dropped),
            now: self.now,
            gst: self.gst,
            connected,
            received: self
                .received
                .iter()
                .map(|&(node, value)| (Operation::node_id(node), value))
                .collect(),
        }
    }

    fn connected(&self, a: ModelNodeId, b: ModelNodeId) -> bool {
        self.gst || self.partitions[usize::from(a)] == self.partitions[usize::from(b)]
    }

    fn push(
        &mut self,
        sender: ModelNodeId,
        recipient: ModelNodeId,
        value: Option<u8>,
        owner: ModelNodeId,
    ) {
        let status = if value.is_some() && !self.connected(sender, recipient) {
            Status::Dropped
        } else {
            Status::Queued
        };
        self.events.push(ModelEvent { sender, recipient, value, owner, status });
    }

    fn queued_position(&self, index: u8) -> Option<usize> {
        let queued: Vec<usize> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == Status::Queued)
            .map(|(position, _)| position)
            .collect();
        if queued.is_empty() {
            return None;
        }
        Some(queued[usize::from(index) % queued.len()])
    }

    fn deliver(&mut self, position: usize) {
        let event = self.events[position].clone();
        if let Some(value) = event.value {
            if !self.connected(event.sender, event.recipient) {
                self.events[position].status = Status::Dropped;
                return;
            }
            self.received.push((event.recipient, value));
        }
        self.now += 1;
        self.events[position].status = Status::Delivered;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_sender_drops_at_creation() {
        let mut model = ModelStore::new();
        model.apply(&Operation::Isolate { node: 0 });
        model.apply(&Operation::Send { sender: 0, recipient: 1, value: 7 });
        model.apply(&Operation::ScheduleTimeout { node: 0, delay: 3 });

        let state = model.observable_state();
        assert_eq!(state.dropped, vec![1]);
        assert_eq!(state.queued, vec![2]);
    }

    #[test]
    fn partition_after_send_drops_at_delivery() {
        let mut model = ModelStore::new();
        model.apply(&Operation::Send { sender: 0, recipient: 1, value: 7 });
        model.apply(&Operation::Isolate { node: 1 });
        assert!(model.apply(&Operation::Deliver { index: 0 }).is_ok());

        let state = model.observable_state();
        assert_eq!(state.dropped, vec![1]);
        assert_eq!(state.now, 0);
        assert!(state.received.is_empty());
    }

    #[test]
    fn gst_reconnects_everyone() {
        let mut model = ModelStore::new();
        model.apply(&Operation::Isolate { node: 2 });
        assert_eq!(model.observable_state().connected.len(), 6);
        model.apply(&Operation::Gst);
        assert_eq!(model.observable_state().connected.len(), 12);
    }

    #[test]
    fn deliver_on_empty_queue_fails() {
        let mut model = ModelStore::new();
        assert_eq!(
            model.apply(&Operation::Deliver { index: 3 }),
            OperationResult::Error(OperationError::NothingQueued)
        );
    }
}
