//! Reference model of the event store.
//!
//! [`ModelStore`] re-implements event lifecycle, partitions and GST in the
//! most direct way possible. Model-based tests apply the same arbitrary
//! [`Operation`] sequence to it and to a real
//! [`Transport`](faultline_core::Transport) and compare the resulting
//! [`ObservableState`]s.

mod operation;
mod store;

pub use operation::{MODEL_NODES, ModelNodeId, Operation, OperationError, OperationResult};
pub use store::{ModelStore, ObservableState};
