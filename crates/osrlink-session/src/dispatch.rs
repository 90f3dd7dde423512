//! Routing between named calls and host-side handlers.
//!
//! [`HandlerRegistry`] answers the remote's `API_REQUEST` calls by name.
//! [`EventRouter`] goes the other way: the embedder registers an event or
//! keybind under a small integer [`Slot`], and code that only holds the slot
//! (a callback installed in some other subsystem, on any thread) fires it.
//! The session drains fired calls on its next tick.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use osrlink_wire::{kind, Arg, ArgCall};

use crate::transport::lock;

/// Call name of a fired event; first argument is the event name.
pub const EVENT_CALL: &str = "events:dispatch";
/// Call name of a fired keybind; arguments are the identifier and a release flag.
pub const KEYBIND_CALL: &str = "keybinds:invoke";

/// Index of a registration. Reused only after it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(u32);

impl Slot {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Slot arena shared by both tables.
#[derive(Debug)]
struct Arena<T> {
    entries: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    fn insert(&mut self, value: T) -> Slot {
        if let Some(index) = self.free.pop() {
            self.entries[index as usize] = Some(value);
            return Slot(index);
        }
        let index = self.entries.len() as u32;
        self.entries.push(Some(value));
        Slot(index)
    }

    fn remove(&mut self, slot: Slot) -> Option<T> {
        let value = self.entries.get_mut(slot.0 as usize)?.take()?;
        self.free.push(slot.0);
        Some(value)
    }

    fn get(&self, slot: Slot) -> Option<&T> {
        self.entries.get(slot.0 as usize)?.as_ref()
    }

    fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        self.entries.get_mut(slot.0 as usize)?.as_mut()
    }

    fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }
}

pub type Handler = Box<dyn FnMut(&ArgCall) -> Option<ArgCall> + Send>;

struct Registration {
    name: String,
    handler: Handler,
}

/// Result of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran; carries its reply, if it produced one.
    Handled(Option<ArgCall>),
    /// No handler is registered under the call's name.
    Unhandled,
}

/// Named handlers for calls arriving from the remote.
#[derive(Default)]
pub struct HandlerRegistry {
    arena: Arena<Registration>,
    by_name: HashMap<String, Slot>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for calls named `name`.
    ///
    /// Registering a name again replaces its handler and keeps its slot.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> Slot
    where
        F: FnMut(&ArgCall) -> Option<ArgCall> + Send + 'static,
    {
        let name = name.into();
        if let Some(&slot) = self.by_name.get(&name) {
            if let Some(existing) = self.arena.get_mut(slot) {
                existing.handler = Box::new(handler);
                return slot;
            }
        }
        let slot = self.arena.insert(Registration {
            name: name.clone(),
            handler: Box::new(handler),
        });
        self.by_name.insert(name, slot);
        slot
    }

    /// Remove a registration. Returns false for an unknown slot.
    pub fn unregister(&mut self, slot: Slot) -> bool {
        match self.arena.remove(slot) {
            Some(registration) => {
                self.by_name.remove(&registration.name);
                true
            }
            None => false,
        }
    }

    pub fn dispatch(&mut self, call: &ArgCall) -> Dispatch {
        let Some(&slot) = self.by_name.get(&call.name) else {
            return Dispatch::Unhandled;
        };
        match self.arena.get_mut(slot) {
            Some(registration) => Dispatch::Handled((registration.handler)(call)),
            None => Dispatch::Unhandled,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a routed slot delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Event,
    Keybind,
}

impl RouteKind {
    /// Envelope kind used to deliver this route.
    pub fn message_kind(self) -> u32 {
        match self {
            RouteKind::Event => kind::EVENT_DISPATCH,
            RouteKind::Keybind => kind::KEYBIND_INVOKE,
        }
    }

    fn call_name(self) -> &'static str {
        match self {
            RouteKind::Event => EVENT_CALL,
            RouteKind::Keybind => KEYBIND_CALL,
        }
    }
}

/// One routing table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub session_id: u64,
    pub kind: RouteKind,
    pub name: String,
}

#[derive(Debug, Default)]
struct RouterState {
    routes: Arena<Route>,
    pending: VecDeque<(u32, ArgCall)>,
    closed: bool,
}

/// Thread-safe slot table for events and keybinds bound to one session.
#[derive(Debug, Clone)]
pub struct EventRouter {
    session_id: u64,
    state: Arc<Mutex<RouterState>>,
}

impl EventRouter {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            state: Arc::default(),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn register(&self, kind: RouteKind, name: impl Into<String>) -> Slot {
        lock(&self.state).routes.insert(Route {
            session_id: self.session_id,
            kind,
            name: name.into(),
        })
    }

    pub fn unregister(&self, slot: Slot) -> bool {
        lock(&self.state).routes.remove(slot).is_some()
    }

    pub fn route(&self, slot: Slot) -> Option<Route> {
        lock(&self.state).routes.get(slot).cloned()
    }

    /// Queue a delivery for `slot` with extra arguments after the route name.
    ///
    /// Returns false, and queues nothing, for an unknown slot or once the
    /// router is closed.
    pub fn fire(&self, slot: Slot, args: impl IntoIterator<Item = Arg>) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        let Some(route) = state.routes.get(slot) else {
            tracing::debug!(slot = slot.index(), "fired unknown slot");
            return false;
        };
        let mut call = ArgCall::new(route.kind.call_name()).arg(route.name.as_str());
        call.args.extend(args);
        let message_kind = route.kind.message_kind();
        state.pending.push_back((message_kind, call));
        true
    }

    /// Convenience for keybinds: fire with the release flag.
    pub fn fire_keybind(&self, slot: Slot, is_release: bool) -> bool {
        self.fire(slot, [Arg::Bool(is_release)])
    }

    /// Take every queued delivery in firing order.
    pub fn drain(&self) -> Vec<(u32, ArgCall)> {
        lock(&self.state).pending.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Drop queued deliveries and refuse new ones. Clones see it too.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}
