//! Protocol adapter.

use std::collections::BTreeSet;

use faultline_core::{Message, Mutator, Node, NodeId};

/// A protocol under test: how to build its nodes and corrupt its messages.
///
/// Implementations are shared across campaign worker threads and must not
/// hold per-scenario state; that belongs in the nodes they build.
pub trait Protocol: Send + Sync + 'static {
    /// Message set of the protocol.
    type Message: Message;

    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Fresh replica `id`. `replicas` lists every replica in the scenario.
    fn build_replica(
        &self,
        id: &str,
        replicas: &BTreeSet<NodeId>,
    ) -> Box<dyn Node<Self::Message>>;

    /// Fresh client `id`.
    fn build_client(&self, id: &str, replicas: &BTreeSet<NodeId>) -> Box<dyn Node<Self::Message>>;

    /// Payload mutators available to faults and the Random strategy.
    fn mutators(&self) -> Vec<Mutator<Self::Message>> {
        Vec::new()
    }

    /// Faulty replicas tolerated with `n` replicas.
    fn max_faulty(&self, n: usize) -> usize {
        n.saturating_sub(1) / 3
    }

    /// Rounds on the happy path of one request, for the round oracle.
    fn rounds_per_request(&self) -> u32 {
        1
    }
}

/// Public id of replica `index`: `A`, `B`, ..., `Z`, `R26`, ...
pub fn replica_id(index: usize) -> NodeId {
    match u8::try_from(index) {
        Ok(i) if i < 26 => char::from(b'A' + i).to_string(),
        _ => format!("R{index}"),
    }
}

/// Public id of client `index`.
pub fn client_id(index: usize) -> NodeId {
    format!("C{index}")
}
