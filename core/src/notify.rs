//! Change notification.
//!
//! A [`Hub`] is a small publish/subscribe registry. Subscribing returns a [`Subscription`]
//! handle that owns the registration: dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the listener exactly once. Listeners are called
//! outside the hub's lock, so a listener may itself subscribe, unsubscribe or publish.
//!
//! Two event streams run through this module:
//! - push: Data Stores publish a [`ChangeEvent`] for every row written,
//! - pull: the tracker service publishes a refresh after its own successful writes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;

use crate::models::Table;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: BTreeMap<u64, Listener<E>>,
}

fn lock<E>(registry: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Hub<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> Hub<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut reg = lock(&self.registry);
            let id = reg.next_id;
            reg.next_id += 1;
            reg.listeners.insert(id, Arc::new(listener));
            id
        };
        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).listeners.remove(&id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn publish(&self, event: &E) {
        let listeners: Vec<Listener<E>> = lock(&self.registry).listeners.values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.registry).listeners.len()
    }
}

impl<E: 'static> Default for Hub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Hub<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Registration handle returned by every `subscribe`. Releases on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// A handle with nothing to release, for sources that never emit.
    pub fn inert() -> Self {
        Self { release: None }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Subscriptions acquired together and released together, e.g. everything a view
/// registered while it is shown.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn push(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn release(&mut self) {
        self.subscriptions.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Where a change notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// Emitted by the Data Store for a row it wrote.
    Push,
    /// Emitted by the writer itself after a confirmed write.
    Pull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub source: ChangeSource,
    pub user_id: Option<String>,
    pub row_id: Option<String>,
}

impl ChangeEvent {
    #[must_use]
    pub fn push(table: Table, kind: ChangeKind, user_id: Option<String>, row_id: Option<String>) -> Self {
        Self {
            table,
            kind,
            source: ChangeSource::Push,
            user_id,
            row_id,
        }
    }

    #[must_use]
    pub fn pull(table: Table, kind: ChangeKind, user_id: &str, row_id: &str) -> Self {
        Self {
            table,
            kind,
            source: ChangeSource::Pull,
            user_id: Some(user_id.to_string()),
            row_id: Some(row_id.to_string()),
        }
    }
}

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Per-table change stream, as exposed by Data Stores.
#[derive(Clone, Default)]
pub struct ChangeFeed {
    hub: Hub<ChangeEvent>,
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, table: Table, on_change: ChangeCallback) -> Subscription {
        self.hub.subscribe(move |event: &ChangeEvent| {
            if event.table == table {
                on_change(event);
            }
        })
    }

    pub fn subscribe_all(&self, on_change: ChangeCallback) -> Subscription {
        self.hub.subscribe(move |event: &ChangeEvent| on_change(event))
    }

    pub fn publish(&self, event: &ChangeEvent) {
        tracing::debug!(table = %event.table, kind = ?event.kind, source = ?event.source, "change");
        self.hub.publish(event);
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.hub.active_subscriptions()
    }
}
