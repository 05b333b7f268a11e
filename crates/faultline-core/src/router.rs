//! Partition router.
//!
//! Maps node ids to partition tags. Nodes without an entry sit in
//! [`DEFAULT_PARTITION`]. Two nodes can exchange messages iff they share a
//! tag, or once global stabilization time has been raised.

use std::collections::BTreeMap;

use crate::event::NodeId;

/// Partition of every node that was never isolated.
pub const DEFAULT_PARTITION: u32 = 0;

/// Node → partition tag map plus the GST flag.
#[derive(Debug, Clone)]
pub struct Router {
    partitions: BTreeMap<NodeId, u32>,
    next_partition: u32,
    gst: bool,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Router with every node in the default partition.
    pub fn new() -> Self {
        Self { partitions: BTreeMap::new(), next_partition: 1, gst: false }
    }

    /// Move `nodes` into a fresh partition, shared only with each other.
    ///
    /// Returns the new tag.
    pub fn isolate<I, S>(&mut self, nodes: I) -> u32
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let tag = self.next_partition;
        self.next_partition += 1;
        for node in nodes {
            self.partitions.insert(node.into(), tag);
        }
        tracing::debug!(partition = tag, "Isolated nodes into partition");
        tag
    }

    /// Return `node` to the default partition.
    pub fn heal(&mut self, node: &str) {
        self.partitions.remove(node);
    }

    /// Return every node to the default partition.
    pub fn reset_all(&mut self) {
        self.partitions.clear();
        self.next_partition = 1;
    }

    /// Partition tag of `node`.
    pub fn partition_of(&self, node: &str) -> u32 {
        self.partitions.get(node).copied().unwrap_or(DEFAULT_PARTITION)
    }

    /// Whether `a` can currently reach `b`.
    pub fn is_connected(&self, a: &str, b: &str) -> bool {
        self.gst || self.partition_of(a) == self.partition_of(b)
    }

    /// Whether any node is outside the default partition.
    pub fn has_active_partitions(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// Raise global stabilization time. One-way.
    ///
    /// Returns `true` if this call raised it.
    pub fn raise_gst(&mut self) -> bool {
        let raised = !self.gst;
        self.gst = true;
        raised
    }

    /// Whether GST has been raised.
    pub fn is_gst(&self) -> bool {
        self.gst
    }

    /// Nodes grouped by non-default partition tag.
    pub fn groups(&self) -> BTreeMap<u32, Vec<NodeId>> {
        let mut groups: BTreeMap<u32, Vec<NodeId>> = BTreeMap::new();
        for (node, tag) in &self.partitions {
            groups.entry(*tag).or_default().push(node.clone());
        }
        groups
    }
}
