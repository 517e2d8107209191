//! The store: node ownership, write queue and change propagation.
//!
//! All writes go through a queue. A write issued while no propagation is
//! running starts one; a write issued from inside a propagation (from a
//! subscriber, an updater or a derivation) is queued for the next wave.
//!
//! A propagation pass runs in waves:
//!
//! 1. Apply the queued writes in issue order. Writes equal to the current
//!    value are dropped.
//! 2. Notify the subscribers of every chunk that changed, in write order.
//!    Writes they issue form the next wave, so steps 1 and 2 repeat until
//!    the queue is empty.
//! 3. Recompute every derived node downstream of the chunks changed so far,
//!    in rank order. A node with several sources therefore reads them only
//!    after every write caused by the original one has been applied.
//! 4. Notify subscribers of the derived nodes that changed, in rank order.
//!    Writes they issue start again at step 1.
//!
//! A chunk that changes again in a later wave of the same pass is a cycle.
//! So is a pass that runs more than [`StoreConfig::max_waves`] waves. On a
//! cycle or a failed derivation no further writes are applied, but the
//! derived nodes below every applied write are still brought up to date
//! and notified before the error is returned.
//!
//! User callbacks never run while the arena is borrowed.

use crate::bus::{SubscriberId, Unsubscribe};
use crate::chunk::Chunk;
use crate::computed::{Computed, Sources};
use crate::error::{DeriveError, Result, StateError};
use crate::history::History;
use crate::observable::Observable;
use crate::selector::Selector;
use crate::storage::{read_value, Arena, Compute, Derivation, Node, NodeId, ReadSources};
use slotmap::Key;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Tunables for a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound on propagation waves in one pass before it is treated as
    /// a cycle.
    pub max_waves: usize,
}

impl StoreConfig {
    pub fn with_max_waves(mut self, max_waves: usize) -> Self {
        self.max_waves = max_waves.max(1);
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_waves: 1000 }
    }
}

/// A queued write. `apply` returns true if the node's value changed.
struct PendingWrite {
    node: NodeId,
    apply: Box<dyn FnOnce(&StoreInner) -> bool>,
}

pub(crate) struct StoreInner {
    nodes: RefCell<Arena>,
    queue: RefCell<VecDeque<PendingWrite>>,
    /// Handle releases deferred because the arena was borrowed.
    releases: RefCell<Vec<NodeId>>,
    propagating: Cell<bool>,
    batch_depth: Cell<usize>,
    config: StoreConfig,
}

impl StoreInner {
    pub(crate) fn unsubscribe(&self, node: NodeId, id: SubscriberId) {
        let removed = self
            .nodes
            .borrow_mut()
            .get_mut(node)
            .and_then(|n| n.subscribers.unregister(id));
        if removed.is_some() {
            debug!(?node, ?id, "unsubscribed");
        }
        // `removed` drops here, after the borrow ended.
    }

    pub(crate) fn is_subscribed(&self, node: NodeId, id: SubscriberId) -> bool {
        self.nodes
            .borrow()
            .get(node)
            .is_some_and(|n| n.subscribers.contains(id))
    }

    fn apply_write<T: Clone + 'static>(
        &self,
        id: NodeId,
        next: impl FnOnce(&T) -> Option<T>,
    ) -> bool {
        let Some(current) = read_value::<T>(&self.nodes.borrow(), id) else {
            return false;
        };
        let Some(value) = next(&current) else {
            return false;
        };
        self.nodes
            .borrow_mut()
            .get_mut(id)
            .is_some_and(|node| node.replace(Box::new(value)))
    }

    fn retain(&self, id: NodeId) {
        if let Some(node) = self.nodes.borrow().get(id) {
            node.handles.set(node.handles.get() + 1);
        }
    }

    /// Drop one handle count of `id`, freeing the node at zero.
    ///
    /// While the arena is borrowed the decrement is deferred; the node keeps
    /// one count until the deferred release runs.
    fn release(&self, id: NodeId) {
        let Ok(nodes) = self.nodes.try_borrow() else {
            self.releases.borrow_mut().push(id);
            return;
        };
        let Some(node) = nodes.get(id) else {
            return;
        };
        let remaining = node.handles.get().saturating_sub(1);
        if remaining > 0 {
            node.handles.set(remaining);
            return;
        }
        drop(nodes);

        let removed = match self.nodes.try_borrow_mut() {
            Ok(mut nodes) => {
                let removed = nodes.remove(id);
                if let Some(derivation) = removed.as_ref().and_then(|n| n.derivation.as_ref()) {
                    for source in &derivation.sources {
                        if let Some(source) = nodes.get_mut(*source) {
                            source.dependents.retain(|d| *d != id);
                        }
                    }
                }
                removed
            }
            Err(_) => {
                self.releases.borrow_mut().push(id);
                return;
            }
        };
        if removed.is_some() {
            debug!(node = ?id, "node released");
        }
        // Subscribers and values may own handles whose drop re-enters the
        // store, so the node is dropped only after the borrow ended.
        drop(removed);
    }

    fn drain_releases(&self) {
        while self.nodes.try_borrow_mut().is_ok() {
            let Some(id) = self.releases.borrow_mut().pop() else {
                break;
            };
            self.release(id);
        }
    }
}

/// An explicitly constructed, independently owned state container.
///
/// Every node is created through a store and can only be combined with
/// nodes of the same store. Cloning a `Store` yields another handle to the
/// same container.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("nodes", &self.node_count())
            .field("propagating", &self.inner.propagating.get())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Store {}

impl Store {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                nodes: RefCell::new(Arena::new()),
                queue: RefCell::new(VecDeque::new()),
                releases: RefCell::new(Vec::new()),
                propagating: Cell::new(false),
                batch_depth: Cell::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// Whether a propagation pass is currently running.
    pub fn is_propagating(&self) -> bool {
        self.inner.propagating.get()
    }

    /// Whether a write issued now would be queued instead of applied.
    pub(crate) fn defers_writes(&self) -> bool {
        self.inner.propagating.get() || self.inner.batch_depth.get() > 0
    }

    /// Create a chunk holding `initial`.
    pub fn chunk<T: Clone + PartialEq + 'static>(&self, initial: T) -> Chunk<T> {
        let id = self.insert(Node::new(initial.clone()));
        debug!(node = ?id, "chunk created");
        Chunk::from_parts(self.clone(), id, Rc::new(initial))
    }

    /// Create a value derived from `sources` through `derive`.
    ///
    /// `sources` is a tuple of up to four node references, or a slice of
    /// nodes of one type; `derive` receives their values positionally.
    pub fn computed<S, T>(
        &self,
        sources: S,
        derive: impl Fn(S::Values) -> T + 'static,
    ) -> Computed<T>
    where
        S: Sources,
        T: Clone + PartialEq + 'static,
    {
        match self.derive_node(sources, move |values| Ok::<T, Infallible>(derive(values))) {
            Ok(computed) => computed,
            Err(never) => match never {},
        }
    }

    /// Like [`computed`](Self::computed), for derivations that can fail.
    ///
    /// Fails with [`StateError::Derivation`] if the first computation fails;
    /// the error then carries the null node id, as no node was created.
    pub fn try_computed<S, T, E>(
        &self,
        sources: S,
        derive: impl Fn(S::Values) -> Result<T, E> + 'static,
    ) -> Result<Computed<T>>
    where
        S: Sources,
        T: Clone + PartialEq + 'static,
        E: Into<DeriveError>,
    {
        self.derive_node(sources, derive)
            .map_err(|err| StateError::Derivation {
                node: NodeId::null(),
                source: err.into(),
            })
    }

    /// Create a selector projecting `source` through `project`.
    ///
    /// `project` must be pure: it may be called any number of times.
    pub fn select<O, T>(
        &self,
        source: &O,
        project: impl Fn(&O::Value) -> T + 'static,
    ) -> Selector<T>
    where
        O: Observable,
        T: Clone + PartialEq + 'static,
    {
        Selector::from_computed(self.computed((source,), move |(value,)| project(&value)))
    }

    /// Create a chunk with an unbounded undo/redo log.
    pub fn history<T: Clone + PartialEq + 'static>(&self, initial: T) -> History<T> {
        History::new(self.chunk(initial), None)
    }

    /// Create a chunk with an undo/redo log keeping at most `capacity`
    /// entries.
    pub fn history_with_capacity<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        capacity: usize,
    ) -> History<T> {
        History::new(self.chunk(initial), Some(capacity))
    }

    /// Run `f` with all writes deferred, then propagate them as one wave.
    ///
    /// Nested batches propagate when the outermost one ends. Inside a
    /// running propagation the writes simply join the next wave.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let output = {
            let _depth = BatchDepth::enter(&self.inner);
            f()
        };
        self.flush()?;
        Ok(output)
    }

    fn insert(&self, node: Node) -> NodeId {
        self.inner.nodes.borrow_mut().insert(node)
    }

    fn derive_node<S, T, E>(
        &self,
        sources: S,
        derive: impl Fn(S::Values) -> Result<T, E> + 'static,
    ) -> Result<Computed<T>, E>
    where
        S: Sources,
        T: Clone + PartialEq + 'static,
        E: Into<DeriveError>,
    {
        assert!(
            sources.belongs_to(self),
            "sources of a derived node must belong to the store creating it"
        );
        let ids = sources.node_ids();
        let reader = sources.reader();
        let read: ReadSources = Rc::new(move |arena: &Arena, ids: &[NodeId]| {
            reader(arena, ids).map(|v| Box::new(v) as Box<dyn Any>)
        });

        let initial = {
            let values = read(&self.inner.nodes.borrow(), &ids);
            values.and_then(|v| v.downcast::<S::Values>().ok())
        };
        let Some(initial) = initial else {
            // The caller holds handles to every source, so they are alive.
            unreachable!("source node missing while creating a derived node");
        };
        let value = derive(*initial)?;

        let compute: Compute = Rc::new(
            move |values: Box<dyn Any>| -> Result<Box<dyn Any>, DeriveError> {
                let values = values
                    .downcast::<S::Values>()
                    .map_err(|_| DeriveError::from("source values have an unexpected type"))?;
                derive(*values)
                    .map(|v| Box::new(v) as Box<dyn Any>)
                    .map_err(Into::into)
            },
        );

        let id = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let rank = ids
                .iter()
                .filter_map(|s| nodes.get(*s).map(|n| n.rank))
                .max()
                .map_or(1, |r| r + 1);
            let derivation = Derivation {
                sources: ids.clone(),
                read,
                compute,
            };
            let id = nodes.insert(Node::derived(value, derivation, rank));
            for source in &ids {
                if let Some(source) = nodes.get_mut(*source) {
                    if !source.dependents.contains(&id) {
                        source.dependents.push(id);
                    }
                }
            }
            id
        };
        debug!(node = ?id, sources = ids.len(), "derived node created");
        Ok(Computed::from_parts(self.clone(), id))
    }

    pub(crate) fn retain(&self, id: NodeId) {
        self.inner.retain(id);
    }

    pub(crate) fn release(&self, id: NodeId) {
        self.inner.release(id);
        self.inner.drain_releases();
    }

    /// Clone the committed value of `id`.
    pub(crate) fn read<T: Clone + 'static>(&self, id: NodeId) -> T {
        read_value::<T>(&self.inner.nodes.borrow(), id).expect("node value not found")
    }

    /// Borrow the committed value of `id`.
    pub(crate) fn with_value<T: 'static, R>(&self, id: NodeId, f: impl FnOnce(&T) -> R) -> R {
        let nodes = self.inner.nodes.borrow();
        let value = nodes
            .get(id)
            .and_then(|node| node.value.downcast_ref::<T>())
            .expect("node value not found");
        f(value)
    }

    pub(crate) fn subscribe<T: 'static>(
        &self,
        id: NodeId,
        callback: impl Fn(&T) + 'static,
    ) -> Unsubscribe {
        let subscriber = Rc::new(move |value: &dyn Any| {
            if let Some(value) = value.downcast_ref::<T>() {
                callback(value);
            }
        });
        let subscriber_id = self
            .inner
            .nodes
            .borrow_mut()
            .get_mut(id)
            .map(|node| node.subscribers.register(subscriber))
            .expect("subscribing to a released node");
        debug!(node = ?id, id = ?subscriber_id, "subscribed");
        Unsubscribe::new(Rc::downgrade(&self.inner), id, subscriber_id)
    }

    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        self.inner
            .nodes
            .borrow()
            .get(id)
            .map_or(0, |node| node.subscribers.len())
    }

    /// Queue a write to chunk `id` and propagate unless a pass is running.
    ///
    /// `next` maps the value committed when the write is applied to the new
    /// value, or `None` to leave it untouched.
    pub(crate) fn write<T: Clone + 'static>(
        &self,
        id: NodeId,
        next: impl FnOnce(&T) -> Option<T> + 'static,
    ) -> Result<()> {
        self.inner.queue.borrow_mut().push_back(PendingWrite {
            node: id,
            apply: Box::new(move |inner: &StoreInner| inner.apply_write(id, next)),
        });
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        if self.defers_writes() {
            return Ok(());
        }
        let inner = &*self.inner;
        let result = {
            let _pass = PropagationPass::enter(inner);
            self.propagate()
        };
        inner.drain_releases();
        result
    }

    fn propagate(&self) -> Result<()> {
        let inner = &*self.inner;
        // Chunks changed in an earlier wave of this pass.
        let mut settled: HashSet<NodeId> = HashSet::new();
        // Chunks changed since the last derived round. `dirty` also picks up
        // the derived nodes that change while recomputing.
        let mut roots: Vec<NodeId> = Vec::new();
        let mut dirty: HashSet<NodeId> = HashSet::new();
        let mut failure: Option<StateError> = None;
        let mut wave = 0usize;
        loop {
            let writes: Vec<PendingWrite> = inner.queue.borrow_mut().drain(..).collect();
            if failure.is_some() {
                if !writes.is_empty() {
                    let count = writes.len();
                    debug!(count, "discarding writes issued after the pass failed");
                }
            } else if let Some(first) = writes.first().map(|w| w.node) {
                wave += 1;
                if wave > inner.config.max_waves {
                    warn!(node = ?first, wave, "propagation exceeded wave limit");
                    failure = Some(StateError::CyclicUpdate { node: first });
                    continue;
                }
                trace!(wave, writes = writes.len(), "applying writes");
                let changed = self.apply_wave(writes, &settled, &mut failure);
                settled.extend(changed.iter().copied());
                for node in &changed {
                    if dirty.insert(*node) {
                        roots.push(*node);
                    }
                    self.dispatch(*node);
                }
                continue;
            }

            if roots.is_empty() {
                return match failure {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            let derived = self.recompute(&roots, &mut dirty, &mut failure);
            roots.clear();
            dirty.clear();
            for node in &derived {
                self.dispatch(*node);
            }
        }
    }

    /// Apply one wave of writes and return the chunks that changed, in write
    /// order. A chunk that changed in an earlier wave is a cycle: it is kept,
    /// the remaining writes of the wave are dropped and `failure` is set.
    fn apply_wave(
        &self,
        writes: Vec<PendingWrite>,
        settled: &HashSet<NodeId>,
        failure: &mut Option<StateError>,
    ) -> Vec<NodeId> {
        let inner = &*self.inner;
        let mut changed = Vec::new();
        let mut seen = HashSet::new();
        let mut writes = writes.into_iter();
        for write in writes.by_ref() {
            let node = write.node;
            if !(write.apply)(inner) {
                continue;
            }
            if seen.insert(node) {
                changed.push(node);
            }
            if settled.contains(&node) {
                warn!(?node, "cyclic update aborted propagation");
                *failure = Some(StateError::CyclicUpdate { node });
                break;
            }
        }
        let dropped = writes.count();
        if dropped > 0 {
            debug!(count = dropped, "dropping rest of the cyclic wave");
        }
        changed
    }

    /// Recompute derived nodes downstream of `roots` in rank order and return
    /// the ones whose value changed. `dirty` holds every node changed so far
    /// in this round.
    ///
    /// A failing derivation keeps its last value and the nodes below it are
    /// left alone; the rest are still recomputed. The first error lands in
    /// `failure`.
    fn recompute(
        &self,
        roots: &[NodeId],
        dirty: &mut HashSet<NodeId>,
        failure: &mut Option<StateError>,
    ) -> Vec<NodeId> {
        let mut changed = Vec::new();
        let mut failed: HashSet<NodeId> = HashSet::new();
        for id in self.downstream(roots) {
            let derivation = {
                let nodes = self.inner.nodes.borrow();
                nodes
                    .get(id)
                    .and_then(|node| node.derivation.as_ref())
                    .map(|d| (d.sources.clone(), d.read.clone(), d.compute.clone()))
            };
            let Some((sources, read, compute)) = derivation else {
                continue;
            };
            if sources.iter().any(|source| failed.contains(source)) {
                failed.insert(id);
                continue;
            }
            if !sources.iter().any(|source| dirty.contains(source)) {
                continue;
            }
            let values = read(&self.inner.nodes.borrow(), &sources);
            let Some(values) = values else {
                trace!(node = ?id, "source released, keeping last value");
                continue;
            };
            trace!(node = ?id, "recomputing");
            let next = match compute(values) {
                Ok(next) => next,
                Err(source) => {
                    warn!(node = ?id, error = %source, "derivation failed");
                    failed.insert(id);
                    if failure.is_none() {
                        *failure = Some(StateError::Derivation { node: id, source });
                    }
                    continue;
                }
            };
            let updated = self
                .inner
                .nodes
                .borrow_mut()
                .get_mut(id)
                .is_some_and(|node| node.replace(next));
            if updated && dirty.insert(id) {
                changed.push(id);
            }
        }
        changed
    }

    /// Derived nodes reachable from `roots`, ordered by rank.
    fn downstream(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let nodes = self.inner.nodes.borrow();
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = roots.to_vec();
        let mut found = Vec::new();
        while let Some(id) = stack.pop() {
            let Some(node) = nodes.get(id) else {
                continue;
            };
            for dependent in &node.dependents {
                if seen.insert(*dependent) {
                    if let Some(d) = nodes.get(*dependent) {
                        found.push((d.rank, *dependent));
                        stack.push(*dependent);
                    }
                }
            }
        }
        found.sort();
        found.into_iter().map(|(_, id)| id).collect()
    }

    fn dispatch(&self, id: NodeId) {
        let snapshot = {
            let nodes = self.inner.nodes.borrow();
            nodes
                .get(id)
                .map(|node| (node.snapshot(), node.subscribers.snapshot()))
        };
        let Some((value, subscribers)) = snapshot else {
            return;
        };
        trace!(node = ?id, subscribers = subscribers.len(), "notifying");
        for (subscriber, callback) in subscribers {
            if self.inner.is_subscribed(id, subscriber) {
                callback(&*value);
            }
        }
    }
}

/// Marks a propagation pass; clears leftover writes when the pass ends.
struct PropagationPass<'a> {
    inner: &'a StoreInner,
}

impl<'a> PropagationPass<'a> {
    fn enter(inner: &'a StoreInner) -> Self {
        inner.propagating.set(true);
        Self { inner }
    }
}

impl Drop for PropagationPass<'_> {
    fn drop(&mut self) {
        let dropped: Vec<PendingWrite> = self.inner.queue.borrow_mut().drain(..).collect();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "discarding queued writes of aborted pass");
        }
        self.inner.propagating.set(false);
    }
}

struct BatchDepth<'a> {
    inner: &'a StoreInner,
}

impl<'a> BatchDepth<'a> {
    fn enter(inner: &'a StoreInner) -> Self {
        inner.batch_depth.set(inner.batch_depth.get() + 1);
        Self { inner }
    }
}

impl Drop for BatchDepth<'_> {
    fn drop(&mut self) {
        self.inner.batch_depth.set(self.inner.batch_depth.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    #[test]
    fn test_stores_are_independent() {
        let first = Store::new();
        let second = Store::new();
        let a = first.chunk(1);
        let b = second.chunk(1);
        a.set(5).unwrap();
        assert_eq!(a.get(), 5);
        assert_eq!(b.get(), 1);
        assert_ne!(first, second);
        assert_eq!(first, first.clone());
    }

    #[test]
    fn test_batch_coalesces_notifications() {
        let store = Store::new();
        let a = store.chunk(1);
        let b = store.chunk(2);
        let sum = store.computed((&a, &b), |(a, b)| a + b);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = sum.subscribe({
            let seen = seen.clone();
            move |v| seen.borrow_mut().push(*v)
        });

        let output = store
            .batch(|| {
                a.set(10).unwrap();
                b.set(20).unwrap();
                "done"
            })
            .unwrap();

        assert_eq!(output, "done");
        assert_eq!(sum.get(), 30);
        assert_eq!(*seen.borrow(), vec![30]);
    }

    #[test]
    fn test_writes_inside_batch_are_deferred() {
        let store = Store::new();
        let a = store.chunk(1);
        store
            .batch(|| {
                a.set(2).unwrap();
                assert_eq!(a.get(), 1);
            })
            .unwrap();
        assert_eq!(a.get(), 2);
    }

    #[test]
    fn test_nested_batches_flush_once() {
        let store = Store::new();
        let a = store.chunk(0);
        let calls = Rc::new(Cell::new(0));
        let _sub = a.subscribe({
            let calls = calls.clone();
            move |_| calls.set(calls.get() + 1)
        });
        store
            .batch(|| {
                a.update(|v| v + 1).unwrap();
                store.batch(|| a.update(|v| v + 1).unwrap()).unwrap();
                assert_eq!(a.get(), 0);
            })
            .unwrap();
        assert_eq!(a.get(), 2);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_subscriber_write_cascades_to_next_wave() {
        let store = Store::new();
        let celsius = store.chunk(0.0f64);
        let fahrenheit = store.chunk(32.0f64);
        let _link = celsius.subscribe({
            let fahrenheit = fahrenheit.clone();
            move |c: &f64| {
                fahrenheit.set(c * 9.0 / 5.0 + 32.0).unwrap();
            }
        });

        celsius.set(100.0).unwrap();
        assert_eq!(fahrenheit.get(), 212.0);
    }

    #[test]
    fn test_cyclic_update_is_reported() {
        let store = Store::new();
        let a = store.chunk(0);
        let b = store.chunk(0);
        let ab = a.subscribe({
            let b = b.clone();
            move |v: &i32| {
                let _ = b.set(v + 1);
            }
        });
        let ba = b.subscribe({
            let a = a.clone();
            move |v: &i32| {
                let _ = a.set(v + 1);
            }
        });

        let err = a.set(1).unwrap_err();
        assert!(matches!(err, StateError::CyclicUpdate { node } if node == a.node_id()));
        // Writes applied before the abort are kept.
        assert_eq!(a.get(), 3);
        assert_eq!(b.get(), 2);
        assert!(!store.is_propagating());

        // The store keeps working afterwards.
        ab.unsubscribe();
        ba.unsubscribe();
        a.set(10).unwrap();
        assert_eq!(a.get(), 10);
    }

    #[test]
    fn test_cycle_still_updates_dependents() {
        let store = Store::new();
        let a = store.chunk(0);
        let b = store.chunk(0);
        let tens = store.computed((&b,), |(b,)| b * 10);
        let _echo = a.subscribe({
            let a = a.clone();
            let b = b.clone();
            move |v: &i32| {
                let _ = b.set(*v);
                let _ = a.set(v + 100);
            }
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = tens.subscribe({
            let seen = seen.clone();
            move |v| seen.borrow_mut().push(*v)
        });

        assert!(matches!(a.set(1), Err(StateError::CyclicUpdate { .. })));
        assert_eq!(b.get(), 1);
        assert_eq!(a.get(), 101);
        assert_eq!(tens.get(), b.get() * 10);
        assert_eq!(*seen.borrow(), vec![10]);
        assert!(!store.is_propagating());
    }

    #[test]
    fn test_failed_derivation_spares_siblings() {
        let store = Store::new();
        let a = store.chunk(1);
        let checked = store
            .try_computed((&a,), |(a,)| {
                if a < 0 {
                    Err(std::fmt::Error)
                } else {
                    Ok(a)
                }
            })
            .unwrap();
        let next = store.computed((&a,), |(a,)| a + 1);
        let below = store.computed((&checked,), |(c,)| c * 2);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = a.subscribe({
            let seen = seen.clone();
            move |v| seen.borrow_mut().push(*v)
        });

        let err = a.set(-1).unwrap_err();
        assert!(matches!(err, StateError::Derivation { node, .. } if node == checked.node_id()));
        assert_eq!(a.get(), -1);
        assert_eq!(checked.get(), 1);
        assert_eq!(below.get(), 2);
        assert_eq!(next.get(), 0);
        assert_eq!(*seen.borrow(), vec![-1]);

        a.set(4).unwrap();
        assert_eq!(checked.get(), 4);
        assert_eq!(below.get(), 8);
    }

    #[test]
    fn test_side_effect_writes_settle_before_derivation() {
        let store = Store::new();
        let a = store.chunk(1);
        let b = store.chunk(1);
        let product = store.computed((&a, &b), |(a, b)| a * b);
        let _mirror = a.subscribe({
            let b = b.clone();
            move |v: &i32| {
                let _ = b.set(*v);
            }
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = product.subscribe({
            let seen = seen.clone();
            move |v| seen.borrow_mut().push(*v)
        });

        a.set(3).unwrap();
        assert_eq!(*seen.borrow(), vec![9]);
        assert_eq!(product.get(), 9);
    }

    #[test]
    fn test_derived_subscriber_write_starts_new_wave() {
        let store = Store::new();
        let input = store.chunk(2);
        let mirror = store.chunk(0);
        let doubled = store.computed((&input,), |(n,)| n * 2);
        let _copy = doubled.subscribe({
            let mirror = mirror.clone();
            move |v: &i32| {
                let _ = mirror.set(*v);
            }
        });
        let plus = store.computed((&mirror,), |(m,)| m + 1);

        input.set(5).unwrap();
        assert_eq!(mirror.get(), 10);
        assert_eq!(plus.get(), 11);
    }

    #[test]
    fn test_self_write_is_cyclic() {
        let store = Store::new();
        let a = store.chunk(0);
        let _clamp = a.subscribe({
            let a = a.clone();
            move |v: &i32| {
                if *v > 10 {
                    let _ = a.set(10);
                }
            }
        });
        assert!(matches!(
            a.set(50),
            Err(StateError::CyclicUpdate { .. })
        ));
        assert_eq!(a.get(), 10);
    }

    #[test]
    fn test_equal_rewrite_is_not_cyclic() {
        let store = Store::new();
        let a = store.chunk(0);
        let _echo = a.subscribe({
            let a = a.clone();
            move |v: &i32| {
                let _ = a.set(*v);
            }
        });
        a.set(3).unwrap();
        assert_eq!(a.get(), 3);
    }

    #[test]
    fn test_wave_limit() {
        let store = Store::with_config(StoreConfig::default().with_max_waves(2));
        let chain: Vec<_> = (0..4).map(|_| store.chunk(0)).collect();
        let mut subs = Vec::new();
        for pair in chain.windows(2) {
            let next = pair[1].clone();
            subs.push(pair[0].subscribe(move |v: &i32| {
                let _ = next.set(*v);
            }));
        }
        let err = chain[0].set(1).unwrap_err();
        assert!(matches!(err, StateError::CyclicUpdate { .. }));
        assert_eq!(chain[1].get(), 1);
        assert_eq!(chain[2].get(), 0);
    }

    #[test]
    fn test_handles_free_nodes() {
        let store = Store::new();
        let a = store.chunk(1);
        let b = a.clone();
        assert_eq!(store.node_count(), 1);
        drop(a);
        assert_eq!(store.node_count(), 1);
        assert_eq!(b.get(), 1);
        drop(b);
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn test_dropping_source_makes_dependent_inert() {
        let store = Store::new();
        let a = store.chunk(2);
        let doubled = store.computed((&a,), |(a,)| a * 2);
        let a2 = a.clone();
        drop(a);
        a2.set(3).unwrap();
        assert_eq!(doubled.get(), 6);
        drop(a2);
        assert_eq!(store.node_count(), 1);
        assert_eq!(doubled.get(), 6);
    }

    #[test]
    fn test_handle_dropped_in_subscriber_is_released() {
        let store = Store::new();
        let trigger = store.chunk(0);
        let held = Rc::new(RefCell::new(Some(store.chunk(String::from("temp")))));
        let _sub = trigger.subscribe({
            let held = held.clone();
            move |_: &i32| {
                held.borrow_mut().take();
            }
        });
        assert_eq!(store.node_count(), 2);
        trigger.set(1).unwrap();
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    #[should_panic(expected = "must belong to the store")]
    fn test_foreign_sources_are_rejected() {
        let first = Store::new();
        let second = Store::new();
        let a = first.chunk(1);
        let _ = second.computed((&a,), |(a,)| a + 1);
    }
}
