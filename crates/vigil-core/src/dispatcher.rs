//! Typed publish/subscribe dispatcher.
//!
//! The dispatcher owns a registry of handlers keyed by [`EventKey`]. It is
//! constructed explicitly and passed by reference (or cloned, which shares
//! the registry) to every consumer of one logical connection.
//!
//! Guarantees:
//!
//! - A handler is registered at most once per key. Identity is fixed when a
//!   [`Handler`] is built and shared by its clones, not its behaviour.
//! - [`Dispatcher::dispatch`] snapshots the handler list before invoking
//!   anything, so handlers may subscribe, unsubscribe or emit re-entrantly.
//! - A handler that returns an error or panics is logged and skipped; the
//!   remaining handlers still run and dispatch never fails.

use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, error, trace, warn};
use vigil_protocol::{Event, EventKey, EventKind};

/// Error returned by a handler that could not process a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of a single handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

type Callback<P> = dyn Fn(&P) -> HandlerResult + Send + Sync;
type ErasedCallback = dyn Fn(&Event) -> HandlerResult + Send + Sync;

/// Counter for listener identities, unique for the life of the process.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A subscriber for events of kind `K`.
///
/// Clones share identity: registering a clone of an already registered
/// handler is a no-op. Two handlers built from identical closures are
/// distinct.
pub struct Handler<K: EventKind> {
    id: ListenerId,
    callback: Arc<Callback<K::Payload>>,
    name: Option<&'static str>,
}

impl<K: EventKind> Handler<K> {
    /// Create an anonymous handler.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&K::Payload) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            id: ListenerId::next(),
            callback: Arc::new(callback),
            name: None,
        }
    }

    /// Create a handler with a name used in fault logs.
    pub fn named<F>(name: &'static str, callback: F) -> Self
    where
        F: Fn(&K::Payload) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            id: ListenerId::next(),
            callback: Arc::new(callback),
            name: Some(name),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Whether `other` is the same handler.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.id() == other.id()
    }

    fn id(&self) -> ListenerId {
        self.id
    }

    fn erase(&self) -> Arc<ErasedCallback> {
        let callback = Arc::clone(&self.callback);
        Arc::new(move |event: &Event| match K::payload(event) {
            Some(payload) => callback(payload),
            None => Ok(()),
        })
    }
}

impl<K: EventKind> Clone for Handler<K> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Arc::clone(&self.callback),
            name: self.name,
        }
    }
}

impl<K: EventKind> fmt::Debug for Handler<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("key", &K::KEY)
            .field("name", &self.name)
            .finish()
    }
}

/// Type-erased registry entry.
#[derive(Clone)]
struct Listener {
    id: ListenerId,
    /// Identity of the user handler; differs from `id` for `once` wrappers.
    origin: ListenerId,
    name: Option<&'static str>,
    call: Arc<ErasedCallback>,
}

impl Listener {
    fn label(&self) -> &'static str {
        self.name.unwrap_or("<anonymous>")
    }
}

#[derive(Default)]
struct Registry {
    listeners: DashMap<EventKey, Vec<Listener>>,
    emitted: AtomicU64,
    faults: AtomicU64,
}

impl Registry {
    fn insert(&self, key: EventKey, listener: Listener) -> bool {
        let mut list = self.listeners.entry(key).or_default();
        if list.iter().any(|l| l.id == listener.id) {
            trace!(key = %key, handler = listener.label(), "Handler already registered");
            return false;
        }
        debug!(key = %key, handler = listener.label(), "Handler registered");
        list.push(listener);
        true
    }

    fn remove(&self, key: EventKey, matches: impl Fn(&Listener) -> bool) -> usize {
        let removed = match self.listeners.get_mut(&key) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|l| !matches(l));
                before - list.len()
            }
            None => 0,
        };

        // Empty sets are pruned so `has` and `events` stop reporting the key.
        self.listeners.remove_if(&key, |_, list| list.is_empty());

        if removed > 0 {
            debug!(key = %key, removed, "Handler removed");
        }
        removed
    }
}

/// Handle returned by [`Dispatcher::on`] and [`Dispatcher::once`].
///
/// Dropping it does not unsubscribe. [`Subscription::unsubscribe`] may be
/// called any number of times, including after the dispatcher is gone.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    key: EventKey,
    id: ListenerId,
    done: AtomicBool,
}

impl Subscription {
    /// Remove the registration this handle refers to.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.key, |l| l.id == self.id);
        }
    }

    /// The key this subscription was made for.
    #[must_use]
    pub fn key(&self) -> EventKey {
        self.key
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("keys", &self.listeners.len())
            .finish()
    }
}

/// The typed dispatcher.
///
/// Cloning is cheap and shares the registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn subscription(&self, key: EventKey, id: ListenerId) -> Subscription {
        Subscription {
            registry: Arc::downgrade(&self.registry),
            key,
            id,
            done: AtomicBool::new(false),
        }
    }

    /// Register `handler` for events of kind `K`.
    ///
    /// Registering the same handler twice has no additional effect.
    pub fn on<K: EventKind>(&self, handler: &Handler<K>) -> Subscription {
        let id = handler.id();
        self.registry.insert(
            K::KEY,
            Listener {
                id,
                origin: id,
                name: handler.name,
                call: handler.erase(),
            },
        );
        self.subscription(K::KEY, id)
    }

    /// Register `handler` for the next event of kind `K` only.
    ///
    /// The registration is removed before `handler` runs, so a handler that
    /// re-emits the same key is not invoked again.
    pub fn once<K: EventKind>(&self, handler: &Handler<K>) -> Subscription {
        let id = ListenerId::next();
        let fired = AtomicBool::new(false);
        let registry = Arc::downgrade(&self.registry);
        let callback = Arc::clone(&handler.callback);

        let call: Arc<ErasedCallback> = Arc::new(move |event: &Event| {
            let Some(payload) = K::payload(event) else {
                return Ok(());
            };
            if fired.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            if let Some(registry) = registry.upgrade() {
                registry.remove(K::KEY, |l| l.id == id);
            }
            callback(payload)
        });

        self.registry.insert(
            K::KEY,
            Listener {
                id,
                origin: handler.id(),
                name: handler.name,
                call,
            },
        );
        self.subscription(K::KEY, id)
    }

    /// Remove `handler`, including a pending `once` registration of it.
    ///
    /// Does nothing if the handler is not registered.
    pub fn off<K: EventKind>(&self, handler: &Handler<K>) {
        let id = handler.id();
        self.registry
            .remove(K::KEY, |l| l.id == id || l.origin == id);
    }

    /// Emit a typed payload to every handler of kind `K`.
    ///
    /// Returns the number of handlers that completed without fault.
    pub fn emit<K: EventKind>(&self, payload: K::Payload) -> usize {
        self.dispatch(&K::into_event(payload))
    }

    /// Deliver an already validated event to the handlers of its key.
    ///
    /// Handlers run in registration order against a snapshot of the
    /// registry taken on entry. Returns the number of handlers that
    /// completed without fault.
    pub fn dispatch(&self, event: &Event) -> usize {
        let key = event.key();
        self.registry.emitted.fetch_add(1, Ordering::Relaxed);

        let snapshot = match self.registry.listeners.get(&key) {
            Some(list) => list.clone(),
            None => {
                trace!(key = %key, "No handlers");
                return 0;
            }
        };

        let mut delivered = 0;
        for listener in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| (listener.call)(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    self.registry.faults.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, handler = listener.label(), error = %err, "Handler failed");
                }
                Err(panic) => {
                    self.registry.faults.fetch_add(1, Ordering::Relaxed);
                    error!(
                        key = %key,
                        handler = listener.label(),
                        panic = panic_message(&*panic),
                        "Handler panicked"
                    );
                }
            }
        }

        trace!(key = %key, delivered, handlers = snapshot.len(), "Dispatched");
        delivered
    }

    /// Whether any handler is registered for `key`.
    #[must_use]
    pub fn has(&self, key: EventKey) -> bool {
        self.listener_count(key) > 0
    }

    /// Number of handlers registered for `key`.
    #[must_use]
    pub fn listener_count(&self, key: EventKey) -> usize {
        self.registry
            .listeners
            .get(&key)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Whether `handler` is registered, directly or through `once`.
    #[must_use]
    pub fn contains<K: EventKind>(&self, handler: &Handler<K>) -> bool {
        let id = handler.id();
        self.registry
            .listeners
            .get(&K::KEY)
            .is_some_and(|list| list.iter().any(|l| l.id == id || l.origin == id))
    }

    /// Keys that currently have at least one handler, in catalog order.
    #[must_use]
    pub fn events(&self) -> Vec<EventKey> {
        let mut keys: Vec<EventKey> = self
            .registry
            .listeners
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        keys.sort();
        keys
    }

    /// Remove every handler registered for `key`.
    pub fn remove_all_listeners(&self, key: EventKey) -> usize {
        self.registry.remove(key, |_| true)
    }

    /// Remove every handler for every key.
    pub fn clear(&self) {
        self.registry.listeners.clear();
        debug!("Dispatcher cleared");
    }

    /// Registry and delivery counters.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            key_count: self.registry.listeners.len(),
            listener_count: self.registry.listeners.iter().map(|l| l.len()).sum(),
            emitted: self.registry.emitted.load(Ordering::Relaxed),
            handler_faults: self.registry.faults.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Dispatcher statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Number of keys with handlers.
    pub key_count: usize,
    /// Total number of registered handlers.
    pub listener_count: usize,
    /// Events dispatched since creation.
    pub emitted: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_faults: u64,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
