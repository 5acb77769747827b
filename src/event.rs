use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Connection,
    Conference,
    Track,
}

/// Signal identifiers emitted by the conferencing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionEstablished,
    ConnectionFailed,
    ConnectionDisconnected,
    WrongState,
    DisplayNameRequired,
    ConferenceJoined,
    ConferenceLeft,
    ConferenceFailed,
    ConnectionInterrupted,
    TrackAdded,
    TrackRemoved,
    UserJoined,
    UserLeft,
    MessageReceived,
    Kicked,
    DisplayNameChanged,
    TrackMuteChanged,
}

const ALL_KINDS: [EventKind; 17] = [
    EventKind::ConnectionEstablished,
    EventKind::ConnectionFailed,
    EventKind::ConnectionDisconnected,
    EventKind::WrongState,
    EventKind::DisplayNameRequired,
    EventKind::ConferenceJoined,
    EventKind::ConferenceLeft,
    EventKind::ConferenceFailed,
    EventKind::ConnectionInterrupted,
    EventKind::TrackAdded,
    EventKind::TrackRemoved,
    EventKind::UserJoined,
    EventKind::UserLeft,
    EventKind::MessageReceived,
    EventKind::Kicked,
    EventKind::DisplayNameChanged,
    EventKind::TrackMuteChanged,
];

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ConnectionEstablished => "connection.connectionEstablished",
            EventKind::ConnectionFailed => "connection.connectionFailed",
            EventKind::ConnectionDisconnected => "connection.connectionDisconnected",
            EventKind::WrongState => "connection.wrongState",
            EventKind::DisplayNameRequired => "connection.display_name_required",
            EventKind::ConferenceJoined => "conference.joined",
            EventKind::ConferenceLeft => "conference.left",
            EventKind::ConferenceFailed => "conference.failed",
            EventKind::ConnectionInterrupted => "conference.connectionInterrupted",
            EventKind::TrackAdded => "conference.trackAdded",
            EventKind::TrackRemoved => "conference.trackRemoved",
            EventKind::UserJoined => "conference.userJoined",
            EventKind::UserLeft => "conference.userLeft",
            EventKind::MessageReceived => "conference.messageReceived",
            EventKind::Kicked => "conference.kicked",
            EventKind::DisplayNameChanged => "conference.displayNameChanged",
            EventKind::TrackMuteChanged => "track.trackMuteChanged",
        }
    }

    pub fn from_name(name: &str) -> Option<EventKind> {
        ALL_KINDS.into_iter().find(|k| k.name() == name)
    }

    pub fn category(&self) -> EventCategory {
        let name = self.name();
        if name.starts_with("connection.") {
            EventCategory::Connection
        } else if name.starts_with("track.") {
            EventCategory::Track
        } else {
            EventCategory::Conference
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Event {
    ConnectionEstablished {
        session_id: String,
    },
    ConnectionFailed {
        reason: String,
    },
    ConnectionDisconnected {
        reason: Option<String>,
    },
    WrongState {
        reason: String,
    },
    DisplayNameRequired,
    ConferenceJoined {
        room: String,
    },
    ConferenceLeft {
        room: String,
    },
    ConferenceFailed {
        room: String,
        reason: String,
    },
    ConnectionInterrupted {
        room: String,
    },
    TrackAdded {
        track: Track,
    },
    TrackRemoved {
        track: Track,
    },
    UserJoined {
        participant: Participant,
    },
    UserLeft {
        participant: Participant,
    },
    MessageReceived {
        participant_id: String,
        text: String,
    },
    Kicked {
        room: String,
        actor: Option<String>,
        reason: Option<String>,
    },
    DisplayNameChanged {
        participant_id: String,
        display_name: String,
    },
    TrackMuteChanged {
        track: Track,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ConnectionEstablished { .. } => EventKind::ConnectionEstablished,
            Event::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            Event::ConnectionDisconnected { .. } => EventKind::ConnectionDisconnected,
            Event::WrongState { .. } => EventKind::WrongState,
            Event::DisplayNameRequired => EventKind::DisplayNameRequired,
            Event::ConferenceJoined { .. } => EventKind::ConferenceJoined,
            Event::ConferenceLeft { .. } => EventKind::ConferenceLeft,
            Event::ConferenceFailed { .. } => EventKind::ConferenceFailed,
            Event::ConnectionInterrupted { .. } => EventKind::ConnectionInterrupted,
            Event::TrackAdded { .. } => EventKind::TrackAdded,
            Event::TrackRemoved { .. } => EventKind::TrackRemoved,
            Event::UserJoined { .. } => EventKind::UserJoined,
            Event::UserLeft { .. } => EventKind::UserLeft,
            Event::MessageReceived { .. } => EventKind::MessageReceived,
            Event::Kicked { .. } => EventKind::Kicked,
            Event::DisplayNameChanged { .. } => EventKind::DisplayNameChanged,
            Event::TrackMuteChanged { .. } => EventKind::TrackMuteChanged,
        }
    }
}

pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct Entry {
    id: u64,
    kind: EventKind,
    listener: Listener,
}

struct Waiter {
    kinds: Vec<EventKind>,
    sender: oneshot::Sender<Event>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
    waiters: Vec<Waiter>,
}

/// Listener registry. Subscriptions are released through the returned [`Subscription`].
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_listener(kind, Arc::new(listener))
    }

    pub fn subscribe_listener(&self, kind: EventKind, listener: Listener) -> Subscription {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push(Entry { id, kind, listener });
        tracing::trace!("listener {} subscribed to {}", id, kind);

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Resolves with the first event emitted after this call whose kind is in `kinds`.
    pub fn wait_for(&self, kinds: &[EventKind]) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        self.lock().waiters.push(Waiter {
            kinds: kinds.to_vec(),
            sender: tx,
        });
        rx
    }

    /// Calls every listener of the event's kind in subscription order, then resolves matching waiters.
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        let (listeners, resolved): (Vec<Listener>, Vec<Waiter>) = {
            let mut registry = self.lock();

            let (resolved, pending): (Vec<Waiter>, Vec<Waiter>) =
                std::mem::take(&mut registry.waiters)
                    .into_iter()
                    .filter(|w| !w.sender.is_closed())
                    .partition(|w| w.kinds.contains(&kind));
            registry.waiters = pending;

            let listeners = registry
                .entries
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| Arc::clone(&e.listener))
                .collect();
            (listeners, resolved)
        };

        for listener in listeners {
            (listener)(event);
        }
        for waiter in resolved {
            let _ = waiter.sender.send(event.clone());
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every listener and pending waiter.
    pub fn clear(&self) {
        let mut registry = self.lock();
        registry.entries.clear();
        registry.waiters.clear();
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let mut builder = f.debug_struct("jitsimeet::EventBus");

        builder.field("listeners", &registry.entries.len());
        builder.field("waiters", &registry.waiters.len());

        builder.finish()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the listener registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns false when the listener was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = registry.entries.len();
        registry.entries.retain(|e| e.id != self.id);
        let removed = registry.entries.len() != before;
        tracing::trace!("listener {} unsubscribed from {}", self.id, self.kind);
        removed
    }
}

/// Caller supplied listeners, registered on every connect or join they are passed to.
#[derive(Clone, Default)]
pub struct Listeners {
    entries: Vec<(EventKind, Listener)>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, kind: EventKind, listener: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.entries.push((kind, Arc::new(listener)));
        self
    }

    pub fn register(&self, bus: &EventBus) -> Vec<Subscription> {
        self.entries
            .iter()
            .map(|(kind, listener)| bus.subscribe_listener(*kind, Arc::clone(listener)))
            .collect()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.entries.iter().map(|(k, _)| *k).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("jitsimeet::Listeners")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_event_names() {
        for kind in ALL_KINDS {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("conference.unknown"), None);
        assert_eq!(
            EventKind::ConnectionFailed.category(),
            EventCategory::Connection
        );
        assert_eq!(EventKind::Kicked.category(), EventCategory::Conference);
        assert_eq!(EventKind::TrackMuteChanged.category(), EventCategory::Track);
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let copied = Arc::clone(&count);
        let subscription = bus.subscribe(EventKind::ConferenceJoined, move |_| {
            copied.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&Event::ConferenceJoined {
            room: "room".to_string(),
        });
        bus.emit(&Event::ConferenceLeft {
            room: "room".to_string(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(subscription.unsubscribe());
        bus.emit(&Event::ConferenceJoined {
            room: "room".to_string(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_clear() {
        let bus = EventBus::new();
        let subscription = bus.subscribe(EventKind::Kicked, |_| {});
        bus.clear();
        assert!(!subscription.unsubscribe());
    }

    #[test]
    fn test_listeners_called_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let listeners = Listeners::new()
            .on(EventKind::UserJoined, {
                let order = Arc::clone(&order);
                move |_| order.lock().unwrap().push(1)
            })
            .on(EventKind::UserJoined, {
                let order = Arc::clone(&order);
                move |_| order.lock().unwrap().push(2)
            });
        let subscriptions = listeners.register(&bus);
        assert_eq!(subscriptions.len(), 2);
        assert_eq!(bus.listener_count(EventKind::UserJoined), 2);

        bus.emit(&Event::UserJoined {
            participant: Participant {
                id: "p1".to_string(),
                display_name: None,
            },
        });
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_wait_for_resolves_once() {
        let bus = EventBus::new();
        let rx = bus.wait_for(&[EventKind::ConnectionEstablished, EventKind::ConnectionFailed]);

        bus.emit(&Event::DisplayNameRequired);
        bus.emit(&Event::ConnectionFailed {
            reason: "connection.otherError".to_string(),
        });
        bus.emit(&Event::ConnectionEstablished {
            session_id: "id".to_string(),
        });

        let event = rx.await.unwrap();
        assert_eq!(event.kind(), EventKind::ConnectionFailed);
        assert!(bus.lock().waiters.is_empty());
    }
}
