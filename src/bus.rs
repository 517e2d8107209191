//! Per-node subscriber registries and cancellation handles.

use crate::storage::NodeId;
use crate::store::StoreInner;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Subscriber callback for node changes, receiving the new value.
pub(crate) type Subscriber = Rc<dyn Fn(&dyn Any)>;

/// Identifier of one registration within a node's subscriber list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Ordered callback registry owned by a single node.
///
/// Registration order is notification order.
pub(crate) struct SubscriberList {
    next_id: u64,
    entries: Vec<(SubscriberId, Subscriber)>,
}

impl SubscriberList {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, callback: Subscriber) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    /// Remove a registration, handing the callback back so the caller can
    /// drop it outside any arena borrow.
    pub fn unregister(&mut self, id: SubscriberId) -> Option<Subscriber> {
        let index = self.entries.iter().position(|(entry, _)| *entry == id)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == id)
    }

    /// The registrations at this instant, for dispatch.
    pub fn snapshot(&self) -> Vec<(SubscriberId, Subscriber)> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cancels one subscription.
///
/// Calling [`unsubscribe`](Self::unsubscribe) more than once is a no-op.
/// Dropping the handle leaves the subscription in place; use
/// [`guard`](Self::guard) for scope-bound subscriptions.
#[must_use = "dropping an Unsubscribe keeps the callback registered"]
pub struct Unsubscribe {
    store: Weak<StoreInner>,
    node: NodeId,
    id: SubscriberId,
    active: Cell<bool>,
}

impl Unsubscribe {
    pub(crate) fn new(store: Weak<StoreInner>, node: NodeId, id: SubscriberId) -> Self {
        Self {
            store,
            node,
            id,
            active: Cell::new(true),
        }
    }

    /// Remove the callback from its node.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.node, self.id);
        }
    }

    /// Whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.active.get()
            && self
                .store
                .upgrade()
                .is_some_and(|store| store.is_subscribed(self.node, self.id))
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Turn this handle into a guard that unsubscribes when dropped.
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard { inner: self }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("node", &self.node)
            .field("id", &self.id)
            .field("active", &self.active.get())
            .finish()
    }
}

/// RAII subscription: unsubscribes on drop.
#[must_use = "dropping a SubscriptionGuard unsubscribes immediately"]
#[derive(Debug)]
pub struct SubscriptionGuard {
    inner: Unsubscribe,
}

impl SubscriptionGuard {
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.inner.unsubscribe();
    }
}
