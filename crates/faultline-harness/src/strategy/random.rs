//! Weighted random strategy.

use faultline_core::{Event, Message};
use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;

use super::{Action, Strategy, StrategyView};
use crate::config::{ExecutionMode, StrategyConfig, Weights};

/// Picks among timeouts, deliveries, drops and mutations at random.
///
/// Each action class is weighted by its configured weight times the number
/// of candidates for it:
///
/// - timeouts: eligible timeouts
/// - message deliveries: eligible messages
/// - request deliveries: eligible client requests
/// - drops: eligible messages, before GST and while the drop budget lasts
/// - mutations: eligible messages from faulty senders with an accepting
///   mutator, while the mutation budget lasts
///
/// Budgets deplete and never refill. Enabled registered faults take
/// priority over the weighted choice.
#[derive(Debug, Clone)]
pub struct RandomStrategy {
    mode: ExecutionMode,
    weights: Weights,
    drops_left: usize,
    mutations_left: usize,
    rng: ChaCha8Rng,
}

impl RandomStrategy {
    /// Random strategy seeded with `seed`.
    pub fn new(config: &StrategyConfig, seed: u64) -> Self {
        Self {
            mode: config.mode,
            weights: config.weights,
            drops_left: config.max_drop_messages,
            mutations_left: config.max_mutate_messages,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Same strategy with drops and mutations disabled.
    #[must_use]
    pub fn without_faults(mut self) -> Self {
        self.weights.drop_message = 0;
        self.weights.mutate_message = 0;
        self
    }

    /// Drops still allowed.
    pub fn drops_left(&self) -> usize {
        self.drops_left
    }

    /// Mutations still allowed.
    pub fn mutations_left(&self) -> usize {
        self.mutations_left
    }

    pub(super) fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    fn pick<'e, M: Message>(&mut self, events: &[&'e Event<M>]) -> Option<&'e Event<M>> {
        events.choose(&mut self.rng).copied()
    }

    fn pick_delivery<'e, M: Message>(&mut self, events: &[&'e Event<M>]) -> Option<&'e Event<M>> {
        match self.mode {
            ExecutionMode::Sync => events.iter().min_by_key(|e| e.id).copied(),
            ExecutionMode::Async => self.pick(events),
        }
    }
}

impl<M: Message> Strategy<M> for RandomStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn next_action(&mut self, view: &StrategyView<'_, M>) -> Option<Action> {
        if let Some((fault, event)) = view.first_enabled_fault(self.mode) {
            return Some(Action::InjectFault { fault: fault.id.clone(), event: Some(event) });
        }

        let deliverable = view.eligible_messages(self.mode);
        let timeouts = view.eligible_timeouts(self.mode);
        let (messages, requests): (Vec<_>, Vec<_>) =
            deliverable.into_iter().partition(|e| e.is_message());
        let mutable = if self.mutations_left > 0 && self.weights.mutate_message > 0 {
            view.mutable_messages(self.mode)
        } else {
            Vec::new()
        };

        let weight = |count: usize, w: u32| count as u64 * u64::from(w);
        let timeout_weight = weight(timeouts.len(), self.weights.deliver_timeout);
        let message_weight = weight(messages.len(), self.weights.deliver_message);
        let request_weight = weight(requests.len(), self.weights.client_request());
        let drop_weight = if view.is_gst() || self.drops_left == 0 {
            0
        } else {
            weight(messages.len(), self.weights.drop_message)
        };
        let mutate_weight = weight(mutable.len(), self.weights.mutate_message);

        let total = timeout_weight + message_weight + request_weight + drop_weight + mutate_weight;
        if total == 0 {
            return None;
        }

        let mut roll = self.rng.gen_range(0..total);
        if roll < timeout_weight {
            return self.pick(&timeouts).map(|e| Action::TriggerTimeout(e.id));
        }
        roll -= timeout_weight;
        if roll < message_weight {
            return self.pick_delivery(&messages).map(|e| Action::Deliver(e.id));
        }
        roll -= message_weight;
        if roll < request_weight {
            return self.pick_delivery(&requests).map(|e| Action::Deliver(e.id));
        }
        roll -= request_weight;
        if roll < drop_weight {
            let event = self.pick(&messages)?;
            self.drops_left -= 1;
            return Some(Action::Drop(event.id));
        }

        let event = self.pick(&mutable)?;
        let mutators = view.mutators_for(event);
        let mutator = mutators.choose(&mut self.rng)?;
        self.mutations_left -= 1;
        Some(Action::MutateAndDeliver { event: event.id, mutator: mutator.id().to_owned() })
    }
}

#[cfg(test)]
mod tests {
    use faultline_core::{Fault, FaultBehavior, FaultPredicate, Mutator};

    use super::*;
    use crate::strategy::test_support::{Msg, ViewState};

    fn config(weights: Weights) -> StrategyConfig {
        StrategyConfig { weights, ..StrategyConfig::default() }
    }

    fn only(deliver: u32, timeout: u32, drop: u32, mutate: u32) -> Weights {
        Weights {
            deliver_message: deliver,
            deliver_timeout: timeout,
            deliver_client_request: None,
            drop_message: drop,
            mutate_message: mutate,
        }
    }

    #[test]
    fn same_seed_same_choices() {
        let mut state = ViewState::<Msg>::new();
        for i in 0..8 {
            state.transport.send("A", "B", Msg::Vote(i));
        }
        state.transport.schedule_timeout("A", "A", "t", 3);

        let mut a = RandomStrategy::new(&StrategyConfig::default(), 42);
        let mut b = RandomStrategy::new(&StrategyConfig::default(), 42);
        for _ in 0..20 {
            assert_eq!(a.next_action(&state.view()), b.next_action(&state.view()));
        }
    }

    #[test]
    fn drop_budget_depletes() {
        let mut state = ViewState::<Msg>::new();
        for i in 0..4 {
            state.transport.send("A", "B", Msg::Vote(i));
        }
        let mut strategy = RandomStrategy::new(
            &StrategyConfig { max_drop_messages: 2, ..config(only(0, 0, 1, 0)) },
            1,
        );

        assert!(matches!(strategy.next_action(&state.view()), Some(Action::Drop(_))));
        assert!(matches!(strategy.next_action(&state.view()), Some(Action::Drop(_))));
        assert_eq!(strategy.drops_left(), 0);
        assert_eq!(strategy.next_action(&state.view()), None);
    }

    #[test]
    fn no_drops_after_gst() {
        let mut state = ViewState::<Msg>::new();
        state.transport.send("A", "B", Msg::Vote(1));
        state.transport.global_stabilization_time();

        let mut strategy = RandomStrategy::new(&config(only(0, 0, 1, 0)), 3);
        assert_eq!(strategy.next_action(&state.view()), None);
    }

    #[test]
    fn mutations_target_faulty_senders() {
        let mut state = ViewState::<Msg>::new();
        state.mutators.register(Mutator::new("bump", "bump", ["VOTE"], |m: &Msg| m.clone()));
        state.faulty.insert("D".into());
        state.transport.send("A", "B", Msg::Vote(1));
        let faulty = state.transport.send("D", "B", Msg::Vote(1));

        let mut strategy = RandomStrategy::new(&config(only(0, 0, 0, 1)), 9);
        assert_eq!(
            strategy.next_action(&state.view()),
            Some(Action::MutateAndDeliver { event: faulty, mutator: "bump".into() })
        );
        assert_eq!(strategy.mutations_left(), 9);
    }

    #[test]
    fn sync_delivers_lowest_id() {
        let mut state = ViewState::<Msg>::new();
        let first = state.transport.send("A", "B", Msg::Note);
        state.transport.send("A", "C", Msg::Note);
        state.transport.send("A", "D", Msg::Note);

        let mut strategy = RandomStrategy::new(
            &StrategyConfig { mode: ExecutionMode::Sync, ..config(only(1, 0, 0, 0)) },
            5,
        );
        for _ in 0..5 {
            assert_eq!(strategy.next_action(&state.view()), Some(Action::Deliver(first)));
        }
    }

    #[test]
    fn client_request_weight_applies_per_request() {
        let mut state = ViewState::<Msg>::new();
        for i in 0..50 {
            state.transport.send("A", "B", Msg::Vote(i));
        }
        let request = state.transport.send_client_request("C0", "A", Msg::Note);
        let weights = Weights { deliver_client_request: Some(99), ..only(1, 0, 0, 0) };

        let mut strategy = RandomStrategy::new(&config(weights), 17);
        let rounds = 1000;
        let chosen = (0..rounds)
            .filter(|_| strategy.next_action(&state.view()) == Some(Action::Deliver(request)))
            .count();

        // 99 / 149 of the weight belongs to the single request.
        assert!((560..760).contains(&chosen), "request chosen {chosen} of {rounds}");
    }

    #[test]
    fn sync_delivers_lowest_id_per_kind() {
        let mut state = ViewState::<Msg>::new();
        let message = state.transport.send("A", "B", Msg::Note);
        state.transport.send("A", "C", Msg::Note);
        let request = state.transport.send_client_request("C0", "A", Msg::Note);
        state.transport.send_client_request("C0", "B", Msg::Note);

        let weights = Weights { deliver_client_request: Some(1), ..only(1, 0, 0, 0) };
        let mut strategy = RandomStrategy::new(
            &StrategyConfig { mode: ExecutionMode::Sync, ..config(weights) },
            5,
        );
        for _ in 0..20 {
            let action = strategy.next_action(&state.view());
            let expected = [Some(Action::Deliver(message)), Some(Action::Deliver(request))];
            assert!(expected.contains(&action), "unexpected {action:?}");
        }
    }

    #[test]
    fn enabled_faults_take_priority() {
        let mut state = ViewState::<Msg>::new();
        let id = state.transport.send("A", "B", Msg::Note);
        state.faults.register(Fault::new(
            "drop-a",
            "",
            FaultPredicate::SenderHasId("A".into()),
            FaultBehavior::DropMessage,
        ));

        let mut strategy = RandomStrategy::new(&StrategyConfig::default(), 0);
        assert_eq!(
            strategy.next_action(&state.view()),
            Some(Action::InjectFault { fault: "drop-a".into(), event: Some(id) })
        );
    }

    #[test]
    fn nothing_queued_yields_none() {
        let state = ViewState::<Msg>::new();
        let mut strategy = RandomStrategy::new(&StrategyConfig::default(), 0);
        assert_eq!(strategy.next_action(&state.view()), None);
    }
}
