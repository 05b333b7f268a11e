//! Property tests for the event lifecycle and partition routing.

use std::collections::BTreeMap;

use faultline_core::{
    Dispatch, DroppedReason, Event, EventId, EventStatus, HandlerError, Message, SimError,
    Transport,
};
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token(u8);

impl Message for Token {
    fn tag(&self) -> &'static str {
        "TOKEN"
    }
}

/// Handler that never sends anything back.
struct Sink;

impl Dispatch<Token> for Sink {
    fn dispatch(
        &mut self,
        _transport: &mut Transport<Token>,
        _event: &Event<Token>,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

const NODES: [&str; 4] = ["A", "B", "C", "D"];

#[derive(Debug, Clone)]
enum Step {
    Send { from: usize, to: usize },
    Timeout { node: usize },
    Deliver(EventId),
    Drop(EventId),
    Isolate(usize),
    Heal(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..4usize, 0..4usize).prop_map(|(from, to)| Step::Send { from, to }),
        1 => (0..4usize).prop_map(|node| Step::Timeout { node }),
        3 => (0..40u64).prop_map(Step::Deliver),
        2 => (0..40u64).prop_map(Step::Drop),
        1 => (0..4usize).prop_map(Step::Isolate),
        1 => (0..4usize).prop_map(Step::Heal),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn status_changes_at_most_once(steps in prop::collection::vec(step(), 1..80)) {
        let mut transport = Transport::new();
        let mut first_terminal: BTreeMap<EventId, EventStatus> = BTreeMap::new();

        for step in steps {
            match step {
                Step::Send { from, to } => {
                    transport.send(NODES[from], NODES[to], Token(0));
                },
                Step::Timeout { node } => {
                    transport.schedule_timeout(NODES[node], NODES[node], "t", 1);
                },
                Step::Deliver(id) => {
                    let before = transport.event(id).map(|e| e.status);
                    let result = transport.deliver(id, &mut Sink);
                    match before {
                        None => prop_assert_eq!(result, Err(SimError::NoSuchEvent(id))),
                        Some(EventStatus::Queued) => prop_assert!(result.is_ok()),
                        Some(status) => prop_assert_eq!(
                            result,
                            Err(SimError::InvalidTransition { event: id, status })
                        ),
                    }
                },
                Step::Drop(id) => {
                    let before = transport.event(id).map(|e| e.status);
                    let result = transport.drop_event(id, DroppedReason::Explicit);
                    prop_assert_eq!(result.is_ok(), before == Some(EventStatus::Queued));
                },
                Step::Isolate(node) => {
                    transport.router_mut().isolate([NODES[node]]);
                },
                Step::Heal(node) => transport.router_mut().heal(NODES[node]),
            }

            for event in transport.events() {
                if event.is_queued() {
                    prop_assert!(!first_terminal.contains_key(&event.id));
                    continue;
                }
                let seen = *first_terminal.entry(event.id).or_insert(event.status);
                prop_assert_eq!(seen, event.status);
                let dropped = event.status == EventStatus::Dropped;
                prop_assert_eq!(event.dropped_reason.is_some(), dropped);
            }
        }
    }

    #[test]
    fn ids_are_dense_and_increasing(sends in prop::collection::vec((0..4usize, 0..4usize), 1..50)) {
        let mut transport = Transport::new();
        let ids: Vec<EventId> = sends
            .iter()
            .map(|(from, to)| transport.send(NODES[*from], NODES[*to], Token(1)))
            .collect();

        let expected: Vec<EventId> = (1..=ids.len() as EventId).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn partitioned_messages_never_deliver(
        isolated in prop::collection::btree_set(0..4usize, 1..3),
        from in 0..4usize,
        to in 0..4usize,
    ) {
        let mut transport = Transport::new();
        transport.router_mut().isolate(isolated.iter().map(|i| NODES[*i]));
        let crosses = isolated.contains(&from) != isolated.contains(&to);

        let id = transport.send(NODES[from], NODES[to], Token(2));
        let event = transport.event(id).cloned().expect("event was just created");

        if crosses {
            prop_assert_eq!(event.status, EventStatus::Dropped);
            prop_assert_eq!(event.dropped_reason, Some(DroppedReason::Network));
        } else {
            prop_assert!(event.is_queued());
            prop_assert!(transport.deliver(id, &mut Sink).is_ok());
        }
    }

    #[test]
    fn gst_reconnects_everyone(isolated in prop::collection::btree_set(0..4usize, 1..4)) {
        let mut transport = Transport::new();
        transport.router_mut().isolate(isolated.iter().map(|i| NODES[*i]));
        transport.global_stabilization_time();

        for from in NODES {
            for to in NODES {
                let id = transport.send(from, to, Token(3));
                prop_assert!(transport.event(id).is_some_and(Event::is_queued));
            }
        }
    }
}
