//! Read and subscribe access shared by every node handle.

use crate::bus::Unsubscribe;
use crate::storage::NodeId;
use crate::store::Store;
use crate::stream::ValueStream;
use futures::channel::mpsc;

/// A node whose value can be read and observed.
///
/// Implemented by [`Chunk`](crate::Chunk), [`ReadOnlyChunk`](crate::ReadOnlyChunk),
/// [`Computed`](crate::Computed), [`Selector`](crate::Selector) and
/// [`History`](crate::History). Any observable can be a source of a computed
/// value or a selector.
pub trait Observable {
    type Value: Clone + PartialEq + 'static;

    fn node_id(&self) -> NodeId;

    fn store(&self) -> &Store;

    /// Get a clone of the current value.
    fn get(&self) -> Self::Value {
        self.store().read(self.node_id())
    }

    /// Read the current value with a closure, without cloning it.
    ///
    /// The closure may read other nodes of the store.
    ///
    /// # Panics
    ///
    /// The store is borrowed while the closure runs. Writing to a node
    /// (outside a propagation or batch), subscribing, or creating a node
    /// from inside the closure panics with a `RefCell` borrow error. Use
    /// [`get`](Observable::get) when the value is needed for any of those.
    fn with<R>(&self, f: impl FnOnce(&Self::Value) -> R) -> R {
        self.store().with_value(self.node_id(), f)
    }

    /// Register `callback` to run with the new value after every change.
    fn subscribe(&self, callback: impl Fn(&Self::Value) + 'static) -> Unsubscribe {
        self.store().subscribe(self.node_id(), callback)
    }

    /// Changes of this node as a stream of values.
    ///
    /// The subscription ends when the stream is dropped.
    fn stream(&self) -> ValueStream<Self::Value> {
        let (tx, rx) = mpsc::unbounded();
        let subscription = self.subscribe(move |value: &Self::Value| {
            // The receiver is gone only once the stream was dropped.
            let _ = tx.unbounded_send(value.clone());
        });
        ValueStream::new(rx, subscription.guard())
    }

    fn subscriber_count(&self) -> usize {
        self.store().subscriber_count(self.node_id())
    }
}
