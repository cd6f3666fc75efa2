use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use polycrypt_channel::HostChannel;
use polycrypt_wire::{Direction, Envelope, Event, EventKind, Method, OperationId};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::registry::OperationRegistry;
use crate::scheduler::Scheduler;

/// Lifecycle of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    Pending,
    Completed,
    Aborted,
    Errored,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }

    fn settled_by(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::Complete => Some(OperationStatus::Completed),
            EventKind::Abort => Some(OperationStatus::Aborted),
            EventKind::Error => Some(OperationStatus::Errored),
            EventKind::Progress => None,
        }
    }
}

/// Token returned by `add_event_listener`, used to remove that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Event callback. Runs on the scheduler task, never inside the call that
/// caused the event.
pub type Listener = Arc<dyn Fn(&OperationEvent) + Send + Sync>;

/// What a listener receives.
#[derive(Debug)]
pub struct OperationEvent {
    pub operation_id: OperationId,
    pub event: Event,
    /// The operation that raised the event.
    pub target: OperationHandle,
}

/// Read-only view of an operation, handed to listeners.
#[derive(Debug, Clone)]
pub struct OperationHandle(Arc<Messenger>);

impl OperationHandle {
    pub fn id(&self) -> OperationId {
        self.0.id()
    }

    pub fn status(&self) -> OperationStatus {
        self.0.status()
    }

    pub fn result(&self) -> Option<Value> {
        self.0.result()
    }
}

/// Why an inbound payload had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not an object, wrong marker, no verb, or a verb outside the protocol.
    Invalid,
    /// Addressed to the backend side.
    WrongDirection,
    /// Valid envelope without an operation id.
    MissingOperationId,
    /// No live operation with that id.
    UnknownOperation,
    /// Addressed to another operation.
    IdMismatch,
    /// Failed the payload schema for its event kind.
    SchemaRejected,
}

/// Outcome of offering one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Applied to an operation.
    Delivered,
    /// Consumed as the backend readiness signal.
    Ready,
    Dropped(DropReason),
}

/// Outbound path shared by every operation of one client.
#[derive(Clone)]
pub struct Link {
    channel: Arc<dyn HostChannel>,
    target: String,
    scheduler: Scheduler,
}

impl Link {
    pub fn new(
        channel: Arc<dyn HostChannel>,
        target: impl Into<String>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            channel,
            target: target.into(),
            scheduler,
        }
    }

    /// Origin every post is addressed to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("target", &self.target)
            .field("peer_origin", &self.channel.peer_origin())
            .finish()
    }
}

struct Slot {
    id: ListenerId,
    listener: Listener,
    live: Arc<AtomicBool>,
}

type Scheduled = Vec<(Listener, Arc<AtomicBool>)>;

#[derive(Default)]
struct State {
    result: Option<Value>,
    listeners: HashMap<EventKind, Vec<Slot>>,
    next_listener: u64,
    /// The event that settled the operation.
    terminal: Option<Event>,
}

impl State {
    fn snapshot(&self, kind: EventKind) -> Scheduled {
        self.listeners
            .get(&kind)
            .map(|slots| {
                slots
                    .iter()
                    .map(|slot| (slot.listener.clone(), slot.live.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Per-operation message endpoint.
///
/// Sends requests tagged with its operation id, filters inbound envelopes
/// down to the ones addressed to it, caches the latest result, and fans
/// events out to listeners through the scheduler.
///
/// The event that settles the operation is kept. A listener registered for
/// its kind after the operation settled is still invoked once with it, so
/// attaching `complete`/`error` listeners after a factory returns never
/// misses the outcome. Progress events are not replayed.
pub struct Messenger {
    id: OperationId,
    link: Link,
    registry: Weak<OperationRegistry>,
    state: Mutex<State>,
    status: watch::Sender<OperationStatus>,
}

impl Messenger {
    /// A messenger that is not tracked by any registry.
    pub fn new(id: OperationId, link: Link) -> Arc<Self> {
        Self::with_registry(id, link, Weak::new())
    }

    pub(crate) fn with_registry(
        id: OperationId,
        link: Link,
        registry: Weak<OperationRegistry>,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(OperationStatus::Pending);
        Arc::new(Self {
            id,
            link,
            registry,
            state: Mutex::new(State::default()),
            status,
        })
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn status(&self) -> OperationStatus {
        *self.status.borrow()
    }

    /// Snapshot of the cached result.
    pub fn result(&self) -> Option<Value> {
        self.lock().result.clone()
    }

    pub fn handle(self: &Arc<Self>) -> OperationHandle {
        OperationHandle(self.clone())
    }

    /// Resolves once a terminal event has been applied.
    pub async fn completion(&self) -> OperationStatus {
        let mut rx = self.status.subscribe();
        let settled = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        settled
    }

    /// Post a request for this operation.
    ///
    /// Never blocks and never fails to the caller: a post that cannot be
    /// handed to the channel becomes a local `error` event.
    pub fn send(self: &Arc<Self>, method: Method) {
        let name = method.name();
        let outcome = Envelope::request(self.id, method)
            .to_value()
            .map_err(|err| err.to_string())
            .and_then(|message| {
                self.link
                    .channel
                    .post(message, &self.link.target)
                    .map_err(|err| err.to_string())
            });

        match outcome {
            Ok(()) => debug!(operation = %self.id, method = name, "request posted"),
            Err(err) => {
                warn!(
                    operation = %self.id,
                    method = name,
                    error = %err,
                    "request could not be posted"
                );
                self.apply(
                    Some(Event::error(format!("failed to post '{name}' request: {err}"))),
                    None,
                );
            }
        }
    }

    /// Offer a raw inbound payload to this operation.
    pub fn on_inbound(self: &Arc<Self>, raw: &Value) -> Disposition {
        match Envelope::parse(raw) {
            Some(envelope) => self.on_envelope(envelope),
            None => {
                trace!(operation = %self.id, "dropping invalid inbound payload");
                Disposition::Dropped(DropReason::Invalid)
            }
        }
    }

    pub(crate) fn on_envelope(self: &Arc<Self>, envelope: Envelope) -> Disposition {
        if envelope.direction != Direction::ToCaller {
            trace!(operation = %self.id, "dropping envelope addressed to the backend");
            return Disposition::Dropped(DropReason::WrongDirection);
        }
        match envelope.operation_id {
            None => return Disposition::Dropped(DropReason::MissingOperationId),
            Some(id) if id != self.id => {
                trace!(operation = %self.id, other = %id, "dropping envelope for another operation");
                return Disposition::Dropped(DropReason::IdMismatch);
            }
            Some(_) => {}
        }

        self.apply(envelope.event, envelope.result);
        Disposition::Delivered
    }

    /// Register a listener for one event kind. Listeners run in registration
    /// order; registering the same callback twice makes it run twice.
    ///
    /// If the operation already settled with an event of this kind, the
    /// listener is scheduled once with that event.
    pub fn add_event_listener(
        self: &Arc<Self>,
        kind: EventKind,
        listener: impl Fn(&OperationEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let listener: Listener = Arc::new(listener);
        let live = Arc::new(AtomicBool::new(true));

        let (id, replay) = {
            let mut state = self.lock();
            let id = ListenerId(state.next_listener);
            state.next_listener += 1;
            state.listeners.entry(kind).or_default().push(Slot {
                id,
                listener: listener.clone(),
                live: live.clone(),
            });
            let replay = state.terminal.clone().filter(|event| event.kind == kind);
            (id, replay)
        };

        if let Some(event) = replay {
            trace!(operation = %self.id, %kind, "replaying settled event to late listener");
            self.schedule(vec![(listener, live)], event);
        }
        id
    }

    /// Remove a listener. Invocations already scheduled for it are skipped.
    pub fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut state = self.lock();
        let Some(slots) = state.listeners.get_mut(&kind) else {
            return false;
        };
        let Some(position) = slots.iter().position(|slot| slot.id == id) else {
            return false;
        };
        let slot = slots.remove(position);
        slot.live.store(false, Ordering::Release);
        true
    }

    /// Schedule every listener registered for the event's kind.
    pub fn dispatch(self: &Arc<Self>, event: Event) {
        let slots = self.lock().snapshot(event.kind);
        self.schedule(slots, event);
    }

    fn schedule(self: &Arc<Self>, slots: Scheduled, event: Event) {
        if slots.is_empty() {
            trace!(operation = %self.id, kind = %event.kind, "no listeners for event");
            return;
        }

        let delivered = Arc::new(OperationEvent {
            operation_id: self.id,
            event,
            target: self.handle(),
        });
        for (listener, live) in slots {
            let delivered = delivered.clone();
            let scheduled = self.link.scheduler.schedule(move || {
                if live.load(Ordering::Acquire) {
                    listener(&delivered);
                }
            });
            if !scheduled {
                warn!(operation = %self.id, "scheduler stopped; dropping listener invocations");
                break;
            }
        }
    }

    // Result first, so listeners see the result carried with their event.
    // Recording the terminal event and snapshotting listeners share one lock
    // so a concurrent add_event_listener lands in exactly one of the two.
    fn apply(self: &Arc<Self>, event: Option<Event>, result: Option<Value>) {
        let (slots, event, settled) = {
            let mut state = self.lock();
            if let Some(result) = result {
                state.result = Some(result);
            }
            let Some(event) = event else {
                return;
            };

            let slots = state.snapshot(event.kind);
            let settled = OperationStatus::settled_by(event.kind)
                .filter(|_| state.terminal.is_none());
            if settled.is_some() {
                state.terminal = Some(event.clone());
            }
            (slots, event, settled)
        };

        self.schedule(slots, event);
        if let Some(next) = settled {
            self.settle(next);
        }
    }

    fn settle(&self, next: OperationStatus) {
        let changed = self.status.send_if_modified(|status| {
            if status.is_terminal() {
                false
            } else {
                *status = next;
                true
            }
        });
        if !changed {
            return;
        }

        debug!(operation = %self.id, status = ?next, "operation settled");
        if let Some(registry) = self.registry.upgrade() {
            if registry.config().reclaim_terminal {
                registry.release(self.id);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use polycrypt_channel::{Inbound, MemoryChannel};
    use polycrypt_wire::{ProcessArgs, MARKER};
    use serde_json::json;

    use super::*;

    fn setup(id: u64) -> (Arc<Messenger>, Inbound, Scheduler) {
        let ((caller, _caller_in), (_backend, backend_in)) =
            MemoryChannel::pair("http://caller.test", "http://backend.test");
        let scheduler = Scheduler::spawn();
        let link = Link::new(Arc::new(caller), "http://backend.test", scheduler.clone());
        (Messenger::new(OperationId::new(id), link), backend_in, scheduler)
    }

    fn notification(id: u64, event: Value, result: Option<Value>) -> Value {
        let mut raw = json!({"cookie": MARKER, "opid": id, "toFront": true, "event": event});
        if let Some(result) = result {
            raw["result"] = result;
        }
        raw
    }

    fn recorder(messenger: &Arc<Messenger>, kind: EventKind) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        messenger.add_event_listener(kind, move |event| {
            sink.lock()
                .unwrap()
                .push(event.target.result().unwrap_or(Value::Null));
        });
        seen
    }

    #[tokio::test]
    async fn send_posts_tagged_request() {
        let (messenger, mut backend_in, _scheduler) = setup(3);

        messenger.send(Method::Process(ProcessArgs { buffer: vec![9] }));

        let posted = backend_in.recv().await.unwrap();
        assert_eq!(posted["cookie"], MARKER);
        assert_eq!(posted["opid"], 3);
        assert_eq!(posted["toBack"], true);
        assert_eq!(posted["method"], "process");
        assert_eq!(posted["args"]["buffer"], json!([9]));
    }

    #[tokio::test]
    async fn listener_observes_result_carried_with_event() {
        let (messenger, _backend_in, scheduler) = setup(7);
        let seen = recorder(&messenger, EventKind::Complete);

        let disposition = messenger.on_inbound(&notification(
            7,
            json!({"type": "complete"}),
            Some(json!([0xAB, 0xCD])),
        ));
        assert_eq!(disposition, Disposition::Delivered);
        scheduler.flush().await;

        assert_eq!(*seen.lock().unwrap(), vec![json!([0xAB, 0xCD])]);
        assert_eq!(messenger.status(), OperationStatus::Completed);
    }

    #[tokio::test]
    async fn foreign_envelopes_have_no_effect() {
        let (messenger, _backend_in, scheduler) = setup(7);
        let seen = recorder(&messenger, EventKind::Complete);

        let other_id = notification(8, json!({"type": "complete"}), Some(json!(1)));
        assert_eq!(
            messenger.on_inbound(&other_id),
            Disposition::Dropped(DropReason::IdMismatch)
        );

        let wrong_direction = json!({
            "cookie": MARKER, "opid": 7, "toBack": true, "event": {"type": "complete"}, "result": 1
        });
        assert_eq!(
            messenger.on_inbound(&wrong_direction),
            Disposition::Dropped(DropReason::WrongDirection)
        );

        let bad_marker = json!({
            "cookie": "nope", "opid": 7, "toFront": true, "event": {"type": "complete"}
        });
        assert_eq!(
            messenger.on_inbound(&bad_marker),
            Disposition::Dropped(DropReason::Invalid)
        );

        scheduler.flush().await;
        assert!(seen.lock().unwrap().is_empty());
        assert!(messenger.result().is_none());
        assert_eq!(messenger.status(), OperationStatus::Pending);
    }

    #[tokio::test]
    async fn null_result_is_cached() {
        let (messenger, _backend_in, _scheduler) = setup(1);
        messenger.on_inbound(&notification(1, json!({"type": "progress"}), Some(Value::Null)));
        assert_eq!(messenger.result(), Some(Value::Null));
    }

    #[tokio::test]
    async fn listeners_run_in_registration_order() {
        let (messenger, _backend_in, scheduler) = setup(2);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            messenger.add_event_listener(EventKind::Progress, move |_| {
                order.lock().unwrap().push(tag);
            });
        }

        messenger.on_inbound(&notification(2, json!({"type": "progress"}), None));
        scheduler.flush().await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn removed_listener_skips_already_scheduled_invocation() {
        let (messenger, _backend_in, scheduler) = setup(4);
        let kept = recorder(&messenger, EventKind::Progress);
        let removed = Arc::new(Mutex::new(0));
        let counter = removed.clone();
        let id = messenger.add_event_listener(EventKind::Progress, move |_| {
            *counter.lock().unwrap() += 1;
        });

        messenger.on_inbound(&notification(4, json!({"type": "progress"}), None));
        assert!(messenger.remove_event_listener(EventKind::Progress, id));
        assert!(!messenger.remove_event_listener(EventKind::Progress, id));
        scheduler.flush().await;

        assert_eq!(kept.lock().unwrap().len(), 1);
        assert_eq!(*removed.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_post_becomes_deferred_error_event() {
        let ((caller, _caller_in), (_backend, backend_in)) =
            MemoryChannel::pair("http://caller.test", "http://backend.test");
        drop(backend_in);
        let scheduler = Scheduler::spawn();
        let link = Link::new(Arc::new(caller), "http://backend.test", scheduler.clone());
        let messenger = Messenger::new(OperationId::new(5), link);

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        messenger.add_event_listener(EventKind::Error, move |event| {
            sink.lock().unwrap().push(event.event.detail["message"].clone());
        });

        messenger.send(Method::Finish);
        assert!(messages.lock().unwrap().is_empty());
        assert_eq!(messenger.status(), OperationStatus::Errored);

        scheduler.flush().await;
        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].as_str().unwrap().contains("finish"));
    }

    #[tokio::test]
    async fn late_listener_receives_settling_event_once() {
        let (messenger, _backend_in, scheduler) = setup(9);
        messenger.on_inbound(&notification(
            9,
            json!({"type": "error", "message": "bad algorithm"}),
            None,
        ));
        messenger.on_inbound(&notification(9, json!({"type": "complete"}), None));
        scheduler.flush().await;

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        messenger.add_event_listener(EventKind::Error, move |event| {
            sink.lock().unwrap().push(event.event.detail["message"].clone());
        });
        let completes = recorder(&messenger, EventKind::Complete);
        scheduler.flush().await;

        assert_eq!(*messages.lock().unwrap(), vec![json!("bad algorithm")]);
        assert!(completes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn progress_is_not_replayed() {
        let (messenger, _backend_in, scheduler) = setup(10);
        messenger.on_inbound(&notification(10, json!({"type": "progress"}), None));
        scheduler.flush().await;

        let seen = recorder(&messenger, EventKind::Progress);
        scheduler.flush().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_terminal_event_wins() {
        let (messenger, _backend_in, _scheduler) = setup(6);
        messenger.on_inbound(&notification(6, json!({"type": "abort"}), None));
        messenger.on_inbound(&notification(6, json!({"type": "complete"}), Some(json!(1))));

        assert_eq!(messenger.status(), OperationStatus::Aborted);
        assert_eq!(messenger.result(), Some(json!(1)));
        assert_eq!(messenger.completion().await, OperationStatus::Aborted);
    }
}
