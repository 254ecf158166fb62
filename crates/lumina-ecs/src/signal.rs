//! Observer lists and the typed event dispatcher.
//!
//! Every place that fans a notification out to listeners (component
//! construct/destroy hooks on the [`Registry`](crate::registry::Registry) and
//! events on the [`Dispatcher`]) goes through an [`ObserverList`]. Firing
//! always iterates a snapshot of the list taken before the first listener
//! runs, so a listener may connect or disconnect (itself included) without
//! disturbing the dispatch in progress. Newly connected listeners are first
//! called on the next firing.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Handle returned when a listener is connected; pass it back to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection(u64);

impl Connection {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Monotonic connection id source shared by the lists of one owner.
#[derive(Debug, Default)]
pub(crate) struct ConnectionIds {
    next: u64,
}

impl ConnectionIds {
    pub(crate) fn next(&mut self) -> Connection {
        self.next += 1;
        Connection(self.next)
    }
}

// ---------------------------------------------------------------------------
// ObserverList
// ---------------------------------------------------------------------------

/// Ordered listeners of one signal. `F` is an unsized callback type such as
/// `dyn Fn(&MyEvent)`.
pub struct ObserverList<F: ?Sized> {
    entries: Vec<(Connection, Rc<F>)>,
}

impl<F: ?Sized> Default for ObserverList<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F: ?Sized> ObserverList<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, connection: Connection, listener: Rc<F>) {
        self.entries.push((connection, listener));
    }

    /// Returns `true` if the connection belonged to this list.
    pub fn disconnect(&mut self, connection: Connection) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(c, _)| *c != connection);
        self.entries.len() != before
    }

    /// Listeners as of now, in connection order.
    pub fn snapshot(&self) -> Vec<Rc<F>> {
        self.entries.iter().map(|(_, f)| Rc::clone(f)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

type Listener<E> = dyn Fn(&E);

struct Sink<E: 'static> {
    listeners: ObserverList<Listener<E>>,
    queue: Vec<E>,
}

impl<E: 'static> Default for Sink<E> {
    fn default() -> Self {
        Self {
            listeners: ObserverList::new(),
            queue: Vec::new(),
        }
    }
}

impl<E: 'static> Sink<E> {
    fn fire(&self, event: &E) {
        for listener in self.listeners.snapshot() {
            listener(event);
        }
    }
}

trait ErasedSink {
    fn flush(&mut self) -> usize;
    fn disconnect(&mut self, connection: Connection) -> bool;
    fn pending(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: 'static> ErasedSink for Sink<E> {
    fn flush(&mut self) -> usize {
        let queued = std::mem::take(&mut self.queue);
        let listeners = self.listeners.snapshot();
        for event in &queued {
            for listener in &listeners {
                listener(event);
            }
        }
        queued.len()
    }

    fn disconnect(&mut self, connection: Connection) -> bool {
        self.listeners.disconnect(connection)
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed publish/subscribe hub owned by a world.
///
/// Events are either delivered immediately ([`trigger`](Self::trigger)) or
/// queued ([`enqueue`](Self::enqueue)) and delivered in FIFO order by
/// [`update`](Self::update) / [`update_all`](Self::update_all).
#[derive(Default)]
pub struct Dispatcher {
    sinks: HashMap<TypeId, Box<dyn ErasedSink>>,
    /// Event types in first-use order so `update_all` is deterministic.
    order: Vec<TypeId>,
    ids: ConnectionIds,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn sink_mut<E: 'static>(&mut self) -> &mut Sink<E> {
        let key = TypeId::of::<E>();
        if !self.sinks.contains_key(&key) {
            self.sinks.insert(key, Box::<Sink<E>>::default());
            self.order.push(key);
        }
        self.sinks
            .get_mut(&key)
            .and_then(|s| s.as_any_mut().downcast_mut::<Sink<E>>())
            .expect("sink registered under its own TypeId")
    }

    fn sink<E: 'static>(&self) -> Option<&Sink<E>> {
        self.sinks
            .get(&TypeId::of::<E>())
            .and_then(|s| s.as_any().downcast_ref::<Sink<E>>())
    }

    pub fn connect<E: 'static>(&mut self, listener: impl Fn(&E) + 'static) -> Connection {
        let connection = self.ids.next();
        self.sink_mut::<E>()
            .listeners
            .connect(connection, Rc::new(listener));
        connection
    }

    pub fn disconnect(&mut self, connection: Connection) -> bool {
        self.sinks.values_mut().any(|s| s.disconnect(connection))
    }

    /// Deliver `event` to every current listener right away.
    pub fn trigger<E: 'static>(&self, event: E) {
        if let Some(sink) = self.sink::<E>() {
            sink.fire(&event);
        }
    }

    pub fn enqueue<E: 'static>(&mut self, event: E) {
        self.sink_mut::<E>().queue.push(event);
    }

    /// Deliver queued events of type `E`. Returns how many were delivered.
    pub fn update<E: 'static>(&mut self) -> usize {
        match self.sinks.get_mut(&TypeId::of::<E>()) {
            Some(sink) => sink.flush(),
            None => 0,
        }
    }

    /// Deliver every queued event, type by type in first-use order.
    pub fn update_all(&mut self) -> usize {
        let mut delivered = 0;
        for key in &self.order {
            if let Some(sink) = self.sinks.get_mut(key) {
                delivered += sink.flush();
            }
        }
        delivered
    }

    pub fn pending<E: 'static>(&self) -> usize {
        self.sinks
            .get(&TypeId::of::<E>())
            .map_or(0, |s| s.pending())
    }

    pub fn listener_count<E: 'static>(&self) -> usize {
        self.sink::<E>().map_or(0, |s| s.listeners.len())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("event_types", &self.sinks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
