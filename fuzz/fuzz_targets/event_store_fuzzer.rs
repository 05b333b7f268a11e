//! Fuzz target for the event store and router.
//!
//! # Strategy
//!
//! - Arbitrary operation sequences (send, broadcast, timers, deliver, drop,
//!   partitions, GST) applied to the real store and the reference model
//!
//! # Invariants
//!
//! - Model and store agree on every event's status after every operation
//! - Event ids are dense and each event is in exactly one state
//! - The clock equals the number of deliveries
//! - NEVER panic on any operation sequence

#![no_main]

use faultline_core::{
    Dispatch, DroppedReason, Event, EventKind, EventStatus, HandlerError, Message, NodeId,
    RoundInfo, Transport,
};
use faultline_harness::model::{MODEL_NODES, ModelStore, Operation};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone)]
struct Value(u8);

impl Message for Value {
    fn tag(&self) -> &'static str {
        "VALUE"
    }

    fn round_info(&self) -> Option<RoundInfo> {
        None
    }
}

struct Sink;

impl Dispatch<Value> for Sink {
    fn dispatch(
        &mut self,
        _transport: &mut Transport<Value>,
        _event: &Event<Value>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

fn ids(transport: &Transport<Value>, status: EventStatus) -> Vec<u64> {
    transport.events_in_state(status).map(|e| e.id).collect()
}

fn apply(transport: &mut Transport<Value>, op: &Operation) {
    let pick = |transport: &Transport<Value>, index: u8| {
        let queued = ids(transport, EventStatus::Queued);
        (!queued.is_empty()).then(|| queued[usize::from(index) % queued.len()])
    };

    match *op {
        Operation::Send { sender, recipient, value } => {
            let (s, r) = (Operation::node_id(sender), Operation::node_id(recipient));
            transport.send(&s, &r, Value(value));
        },
        Operation::Broadcast { sender, value } => {
            let others: Vec<NodeId> =
                (0..MODEL_NODES).filter(|&n| n != sender).map(Operation::node_id).collect();
            transport.multicast(&Operation::node_id(sender), &others, &Value(value));
        },
        Operation::ScheduleTimeout { node, delay } => {
            let node = Operation::node_id(node);
            transport.schedule_timeout(&node, &node, "tick", u64::from(delay));
        },
        Operation::Deliver { index } => {
            if let Some(id) = pick(transport, index) {
                transport.deliver(id, &mut Sink).expect("queued event delivers");
            }
        },
        Operation::Drop { index } => {
            if let Some(id) = pick(transport, index) {
                transport.drop_event(id, DroppedReason::Explicit).expect("queued event drops");
            }
        },
        Operation::ClearTimeouts { node } => {
            transport.clear_owner_timeouts(&Operation::node_id(node));
        },
        Operation::Isolate { node } => {
            transport.router_mut().isolate([Operation::node_id(node)]);
        },
        Operation::Heal { node } => transport.router_mut().heal(&Operation::node_id(node)),
        Operation::HealAll => transport.router_mut().reset_all(),
        Operation::Gst => {
            transport.global_stabilization_time();
        },
    }
}

fuzz_target!(|ops: Vec<Operation>| {
    let mut transport = Transport::<Value>::new();
    let mut model = ModelStore::new();

    for op in ops.into_iter().take(256).map(Operation::clamp) {
        apply(&mut transport, &op);
        model.apply(&op);

        let expected = model.observable_state();
        assert_eq!(ids(&transport, EventStatus::Queued), expected.queued, "{op:?}");
        assert_eq!(ids(&transport, EventStatus::Delivered), expected.delivered, "{op:?}");
        assert_eq!(ids(&transport, EventStatus::Dropped), expected.dropped, "{op:?}");
        assert_eq!(transport.now(), expected.now);
        assert_eq!(transport.is_gst(), expected.gst);
    }

    let total = transport.len();
    let counted = [EventStatus::Queued, EventStatus::Delivered, EventStatus::Dropped]
        .into_iter()
        .map(|status| transport.events_in_state(status).count())
        .sum::<usize>();
    assert_eq!(total, counted);
    for event in transport.events() {
        assert_eq!(event.delivered_at.is_some(), event.status == EventStatus::Delivered);
        assert_eq!(event.dropped_reason.is_some(), event.status == EventStatus::Dropped);
        if let EventKind::Timeout { owner, .. } = &event.kind {
            assert_eq!(owner, &event.recipient);
        }
    }
});
