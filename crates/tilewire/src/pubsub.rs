//! Subscription registry
//!
//! Maps event keys to handlers. Both connection flavours keep one registry
//! behind a lock and dispatch in two steps: [`PubSub::matching`] copies the
//! matching handlers out under the lock, then the connection invokes them
//! with the lock released. A handler may therefore call `off()` (on itself
//! or anything else) while an event is being dispatched; the change applies
//! from the next event on.

use std::collections::BTreeSet;

use crate::events::{EventKey, EventType};

/// Identity comparison for handlers
///
/// Handlers are closures, so equality is pointer identity of the shared
/// allocation, never equality of behaviour.
pub trait HandlerIdentity {
    fn same(&self, other: &Self) -> bool;
}

/// One registration
#[derive(Debug, Clone)]
pub struct Subscription<H> {
    pub key: EventKey,
    pub handler: H,
}

/// Registered handlers, in registration order
#[derive(Debug)]
pub struct PubSub<H> {
    subscriptions: Vec<Subscription<H>>,
}

impl<H> Default for PubSub<H> {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }
}

impl<H: Clone + HandlerIdentity> PubSub<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    ///
    /// Registering the same handler twice makes it fire twice.
    pub fn subscribe(&mut self, key: EventKey, handler: H) {
        tracing::debug!(key = %key, "Registered event handler");
        self.subscriptions.push(Subscription { key, handler });
    }

    /// Remove every registration of `handler`, returning how many were
    /// removed
    pub fn unsubscribe(&mut self, handler: &H) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| !sub.handler.same(handler));
        let removed = before - self.subscriptions.len();

        tracing::debug!(removed, "Unregistered event handler");
        removed
    }

    /// Snapshot of the handlers an event should be dispatched to
    ///
    /// Matches on the kind, and on `change` for registrations with a
    /// detail.
    pub fn matching(&self, event_type: EventType, change: Option<&str>) -> Vec<H> {
        self.subscriptions
            .iter()
            .filter(|sub| sub.key.matches(event_type, change))
            .map(|sub| sub.handler.clone())
            .collect()
    }

    /// Kinds with at least one registration
    pub fn event_types(&self) -> BTreeSet<EventType> {
        self.subscriptions
            .iter()
            .map(|sub| sub.key.event_type)
            .collect()
    }

    /// Wire subscription mask covering every registration
    pub fn mask(&self) -> u32 {
        self.subscriptions
            .iter()
            .fold(0, |mask, sub| mask | sub.key.event_type.mask())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
