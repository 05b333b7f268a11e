//! Event store.
//!
//! Owns every event of a scenario together with the partition router. All
//! lifecycle transitions go through here so the `Queued → {Delivered,
//! Dropped}` rule is enforced in one place.
//!
//! Delivery is synchronous: [`Transport::deliver`] marks the event, then
//! calls the recipient handler through a [`Dispatch`] on the caller's
//! thread. Handler failures propagate as [`SimError::HandlerFault`].

use crate::{
    error::{HandlerError, SimError},
    event::{DroppedReason, Event, EventId, EventKind, EventStatus, NodeId},
    fault::Mutator,
    message::Message,
    notice::Notification,
    router::Router,
};

/// Result of a successful [`Transport::deliver`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Recipient handler ran.
    Delivered,
    /// Endpoints were partitioned at delivery time; event is now DROPPED
    /// with [`DroppedReason::Network`] and the handler did not run.
    DroppedByNetwork,
}

/// Routes a delivered event to the node that handles it.
pub trait Dispatch<M: Message> {
    /// Run the recipient's handler for `event`.
    ///
    /// `transport` is the store the event came from, so the handler can
    /// send new messages synchronously.
    fn dispatch(
        &mut self,
        transport: &mut Transport<M>,
        event: &Event<M>,
    ) -> Result<(), HandlerError>;
}

/// Event store for one scenario.
#[derive(Debug, Clone)]
pub struct Transport<M> {
    /// Event `id` lives at index `id - 1`.
    events: Vec<Event<M>>,
    router: Router,
    clock: u64,
    notices: Vec<Notification>,
}

impl<M: Message> Default for Transport<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Transport<M> {
    /// Empty store with an unpartitioned router.
    pub fn new() -> Self {
        Self { events: Vec::new(), router: Router::new(), clock: 0, notices: Vec::new() }
    }

    /// Partition router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Mutable partition router, for fault behaviors.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Whether global stabilization time has been raised.
    pub fn is_gst(&self) -> bool {
        self.router.is_gst()
    }

    /// Raise global stabilization time. Idempotent.
    ///
    /// Returns `true` if this call raised it.
    pub fn global_stabilization_time(&mut self) -> bool {
        let raised = self.router.raise_gst();
        if raised {
            tracing::info!(time = self.clock, "Global stabilization time reached");
            self.notices.push(Notification::GlobalStabilization);
        }
        raised
    }

    /// Logical time: the number of deliveries so far.
    pub fn now(&self) -> u64 {
        self.clock
    }

    /// Send `payload` from `sender` to each recipient.
    ///
    /// Creates one event per recipient. Events between disconnected nodes
    /// are DROPPED at creation with [`DroppedReason::Network`].
    pub fn multicast(&mut self, sender: &str, recipients: &[NodeId], payload: &M) -> Vec<EventId> {
        let events = recipients
            .iter()
            .map(|recipient| {
                self.enqueue(sender, recipient, EventKind::Message { payload: payload.clone() })
            })
            .collect::<Vec<_>>();

        self.notices.push(Notification::Multicast {
            sender: sender.to_owned(),
            recipients: recipients.to_vec(),
            events: events.clone(),
        });
        events
    }

    /// Send `payload` from `sender` to a single recipient.
    pub fn send(&mut self, sender: &str, recipient: &str, payload: M) -> EventId {
        let event = self.enqueue(sender, recipient, EventKind::Message { payload });
        self.notices.push(Notification::Multicast {
            sender: sender.to_owned(),
            recipients: vec![recipient.to_owned()],
            events: vec![event],
        });
        event
    }

    /// Client request from `client` to `replica`.
    pub fn send_client_request(&mut self, client: &str, replica: &str, payload: M) -> EventId {
        self.enqueue(client, replica, EventKind::ClientRequest { payload })
    }

    /// Same client request to several replicas.
    pub fn multicast_client_request(
        &mut self,
        client: &str,
        replicas: &[NodeId],
        payload: &M,
    ) -> Vec<EventId> {
        replicas
            .iter()
            .map(|replica| self.send_client_request(client, replica, payload.clone()))
            .collect()
    }

    /// Arm a timer on `node`, due `delay` logical ticks from now.
    ///
    /// `owner` is the internal id of the instance that handles it (equal to
    /// `node` except for twins). Timeouts ignore partitions and always start
    /// QUEUED.
    pub fn schedule_timeout(
        &mut self,
        node: &str,
        owner: &str,
        description: impl Into<String>,
        delay: u64,
    ) -> EventId {
        let kind = EventKind::Timeout {
            description: description.into(),
            expires_at: self.clock + delay,
            owner: owner.to_owned(),
        };
        self.enqueue(node, node, kind)
    }

    /// Cancel a pending timer.
    pub fn clear_timeout(&mut self, event: EventId) -> Result<(), SimError> {
        if !self.get(event)?.is_timeout() {
            return Err(SimError::NotATimeout(event));
        }
        self.drop_event(event, DroppedReason::TimeoutCleared)
    }

    /// Cancel every pending timer armed by `owner`.
    ///
    /// Returns the cancelled ids.
    pub fn clear_owner_timeouts(&mut self, owner: &str) -> Vec<EventId> {
        let mut pending: Vec<EventId> = self
            .events
            .iter()
            .filter(|e| {
                e.is_queued()
                    && matches!(&e.kind, EventKind::Timeout { owner: o, .. } if o == owner)
            })
            .map(|e| e.id)
            .collect();

        pending.retain(|&id| self.mark_dropped(id, DroppedReason::TimeoutCleared).is_ok());
        pending
    }

    /// Deliver a queued event and run the recipient handler.
    ///
    /// Messages and client requests whose endpoints are no longer connected
    /// are dropped instead and [`Delivery::DroppedByNetwork`] is returned.
    pub fn deliver(
        &mut self,
        id: EventId,
        dispatch: &mut impl Dispatch<M>,
    ) -> Result<Delivery, SimError> {
        let event = self.queued(id)?;

        if !event.is_timeout() && !self.router.is_connected(&event.sender, &event.recipient) {
            tracing::debug!(event_id = id, "Endpoints partitioned at delivery, dropping");
            self.mark_dropped(id, DroppedReason::Network)?;
            return Ok(Delivery::DroppedByNetwork);
        }

        self.clock += 1;
        let now = self.clock;
        let delivered = {
            let event = self.queued_mut(id)?;
            event.status = EventStatus::Delivered;
            event.delivered_at = Some(now);
            event.clone()
        };
        tracing::trace!(event = %delivered, "Delivering event");

        if delivered.is_timeout() {
            let node = delivered.recipient.clone();
            self.notices.push(Notification::Timeout { node, event: id });
        }

        dispatch.dispatch(self, &delivered).map_err(|source| SimError::HandlerFault {
            node: delivered.recipient.clone(),
            source,
        })?;

        self.notices.push(Notification::EventDelivered { event: id });
        Ok(Delivery::Delivered)
    }

    /// Drop a queued event. The recipient never sees it.
    pub fn drop_event(&mut self, id: EventId, reason: DroppedReason) -> Result<(), SimError> {
        self.mark_dropped(id, reason)
    }

    /// Replace the payload of a queued message with `mutator`'s output.
    ///
    /// Status is unchanged; the message must still be delivered or dropped.
    pub fn mutate(&mut self, id: EventId, mutator: &Mutator<M>) -> Result<(), SimError> {
        let event = self.queued_mut(id)?;
        let EventKind::Message { payload } = &mut event.kind else {
            return Err(SimError::NotAMessage(id));
        };
        *payload = mutator.apply(payload)?;

        tracing::debug!(event_id = id, mutator = mutator.id(), "Mutated message");
        self.notices
            .push(Notification::MessageMutated { event: id, mutator: mutator.id().to_owned() });
        Ok(())
    }

    /// Look up an event.
    pub fn event(&self, id: EventId) -> Option<&Event<M>> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.events.get(index)
    }

    /// All events in id order.
    pub fn events(&self) -> impl Iterator<Item = &Event<M>> {
        self.events.iter()
    }

    /// Events in `status`, in id order.
    pub fn events_in_state(&self, status: EventStatus) -> impl Iterator<Item = &Event<M>> {
        self.events.iter().filter(move |e| e.status == status)
    }

    /// Number of QUEUED events.
    pub fn queued_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_queued()).count()
    }

    /// Number of events ever created.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no event was ever created.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Record a notification on behalf of a node or fault.
    pub fn notify(&mut self, notification: Notification) {
        self.notices.push(notification);
    }

    /// Notifications buffered since the last [`Self::take_notices`].
    pub fn pending_notices(&self) -> &[Notification] {
        &self.notices
    }

    /// Take the buffered notifications, oldest first.
    pub fn take_notices(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notices)
    }

    fn enqueue(&mut self, sender: &str, recipient: &str, kind: EventKind<M>) -> EventId {
        let id = self.events.len() as EventId + 1;
        let partitioned = !matches!(kind, EventKind::Timeout { .. })
            && !self.router.is_connected(sender, recipient);
        let (status, dropped_reason) = if partitioned {
            (EventStatus::Dropped, Some(DroppedReason::Network))
        } else {
            (EventStatus::Queued, None)
        };

        self.events.push(Event {
            id,
            sender: sender.to_owned(),
            recipient: recipient.to_owned(),
            created_at: self.clock,
            delivered_at: None,
            status,
            dropped_reason,
            kind,
        });
        self.notices.push(Notification::EventAdded { event: id });

        if partitioned {
            tracing::debug!(event_id = id, sender, recipient, "Partitioned at creation");
            let reason = DroppedReason::Network;
            self.notices.push(Notification::EventDropped { event: id, reason });
        }
        id
    }

    fn mark_dropped(&mut self, id: EventId, reason: DroppedReason) -> Result<(), SimError> {
        let event = self.queued_mut(id)?;
        event.status = EventStatus::Dropped;
        event.dropped_reason = Some(reason);
        tracing::trace!(event_id = id, ?reason, "Dropped event");
        self.notices.push(Notification::EventDropped { event: id, reason });
        Ok(())
    }

    fn get(&self, id: EventId) -> Result<&Event<M>, SimError> {
        self.event(id).ok_or(SimError::NoSuchEvent(id))
    }

    fn queued(&self, id: EventId) -> Result<&Event<M>, SimError> {
        let event = self.get(id)?;
        if event.is_queued() {
            Ok(event)
        } else {
            Err(SimError::InvalidTransition { event: id, status: event.status })
        }
    }

    fn queued_mut(&mut self, id: EventId) -> Result<&mut Event<M>, SimError> {
        let index = usize::try_from(id.checked_sub(1).ok_or(SimError::NoSuchEvent(id))?)
            .map_err(|_| SimError::NoSuchEvent(id))?;
        let event = self.events.get_mut(index).ok_or(SimError::NoSuchEvent(id))?;
        if event.is_queued() {
            Ok(event)
        } else {
            Err(SimError::InvalidTransition { event: id, status: event.status })
        }
    }
}
