//! Core Chunk type and operations.

use crate::error::Result;
use crate::observable::Observable;
use crate::selector::Selector;
use crate::storage::NodeId;
use crate::store::Store;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

/// Shared handle to a node, counted by the store.
///
/// The node is freed when the last handle is dropped.
pub(crate) struct NodeHandle {
    store: Store,
    id: NodeId,
}

impl NodeHandle {
    /// Adopt the count a freshly inserted node starts with.
    pub(crate) fn adopt(store: Store, id: NodeId) -> Self {
        Self { store, id }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }
}

impl Clone for NodeHandle {
    fn clone(&self) -> Self {
        self.store.retain(self.id);
        Self {
            store: self.store.clone(),
            id: self.id,
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}

/// A mutable, observable value. Chunks are the only nodes that accept
/// writes.
///
/// Cloning a chunk yields another handle to the same value. A write that
/// equals the current value is dropped without notifying anyone.
///
/// # Examples
///
/// ```rust,no_run
/// use chunk_state::prelude::*;
///
/// let store = Store::new();
/// let count = store.chunk(0);
/// let _logger = count.subscribe(|n| println!("count = {n}"));
/// count.set(1)?;
/// count.update(|n| n + 1)?;
/// assert_eq!(count.get(), 2);
/// # Ok::<(), chunk_state::StateError>(())
/// ```
pub struct Chunk<T> {
    handle: NodeHandle,
    initial: Rc<T>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for Chunk<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            initial: self.initial.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> PartialEq for Chunk<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle.store() == other.handle.store() && self.handle.id() == other.handle.id()
    }
}

impl<T> Eq for Chunk<T> {}

impl<T> Hash for Chunk<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.id().hash(state);
    }
}

impl<T: Clone + PartialEq + 'static> Observable for Chunk<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.handle.id()
    }

    fn store(&self) -> &Store {
        self.handle.store()
    }
}

impl Chunk<bool> {
    /// Toggle the boolean value of the chunk.
    pub fn toggle(&self) -> Result<()> {
        self.update(|v| !*v)
    }
}

impl<T: Clone + PartialEq + 'static> Chunk<T> {
    pub(crate) fn from_parts(store: Store, id: NodeId, initial: Rc<T>) -> Self {
        Self {
            handle: NodeHandle::adopt(store, id),
            initial,
            _phantom: PhantomData,
        }
    }

    /// Set the chunk to a new value.
    ///
    /// Subscribers and dependents are notified before this returns, unless
    /// the write happens inside a batch or a running propagation, in which
    /// case it is queued. Errors from the propagation this write started
    /// are returned here.
    pub fn set(&self, value: T) -> Result<()> {
        self.store()
            .write(self.node_id(), move |current: &T| (*current != value).then_some(value))
    }

    /// Replace the value with `updater(current)`.
    ///
    /// The updater sees the value committed when the write is applied, so
    /// queued updates compose.
    pub fn update(&self, updater: impl FnOnce(&T) -> T + 'static) -> Result<()> {
        self.store().write(self.node_id(), move |current: &T| {
            let next = updater(current);
            (next != *current).then_some(next)
        })
    }

    /// Restore the value the chunk was created with.
    pub fn reset(&self) -> Result<()> {
        self.set(self.initial())
    }

    /// The value the chunk was created with.
    pub fn initial(&self) -> T {
        (*self.initial).clone()
    }

    /// Convert this chunk to a read-only view of the same node.
    pub fn read_only(&self) -> ReadOnlyChunk<T> {
        ReadOnlyChunk {
            inner: self.clone(),
        }
    }

    /// Project this chunk through `project`.
    pub fn select<U: Clone + PartialEq + 'static>(
        &self,
        project: impl Fn(&T) -> U + 'static,
    ) -> Selector<U> {
        self.store().select(self, project)
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for Chunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.node_id())
            .field("value", &self.get())
            .finish()
    }
}

/// A read-only view of a chunk.
///
/// This prevents accidental mutations while still allowing reads and subscriptions.
pub struct ReadOnlyChunk<T> {
    inner: Chunk<T>,
}

impl<T> Clone for ReadOnlyChunk<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for ReadOnlyChunk<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Eq for ReadOnlyChunk<T> {}

impl<T> Hash for ReadOnlyChunk<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<T: Clone + PartialEq + 'static> Observable for ReadOnlyChunk<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    fn store(&self) -> &Store {
        self.inner.store()
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for ReadOnlyChunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyChunk")
            .field("value", &self.get())
            .finish()
    }
}
