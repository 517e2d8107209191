//! Generational arena storage for state nodes.
//!
//! Every chunk, computed value and selector of a [`Store`](crate::Store) lives
//! in a slot map with generational indices. Handles refer to nodes by
//! [`NodeId`], so a derived node can point at its sources without owning them:
//! once a source slot is freed its id never resolves again, even if the slot
//! is reused.

use crate::bus::SubscriberList;
use crate::error::DeriveError;
use slotmap::{new_key_type, SlotMap};
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

new_key_type! {
    /// Unique identifier for a node in a store.
    pub struct NodeId;
}

/// The node slots of one store.
pub struct Arena {
    slots: SlotMap<NodeId, Node>,
}

impl Arena {
    pub(crate) fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots.get_mut(id)
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        self.slots.insert(node)
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.slots.remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Reads and clones the current values of a source list, type-erased.
pub(crate) type ReadSources = Rc<dyn Fn(&Arena, &[NodeId]) -> Option<Box<dyn Any>>>;

/// Applies a derivation function to type-erased source values.
pub(crate) type Compute = Rc<dyn Fn(Box<dyn Any>) -> Result<Box<dyn Any>, DeriveError>>;

/// How a derived node obtains its value.
pub(crate) struct Derivation {
    /// Source nodes in positional order. Not owned.
    pub sources: Vec<NodeId>,
    pub read: ReadSources,
    pub compute: Compute,
}

/// A type-erased node value together with its subscribers and graph edges.
pub(crate) struct Node {
    /// The committed value, boxed and type-erased.
    pub value: Box<dyn Any>,
    pub clone_value: fn(&dyn Any) -> Box<dyn Any>,
    pub same_value: fn(&dyn Any, &dyn Any) -> bool,
    pub subscribers: SubscriberList,
    /// `None` for chunks.
    pub derivation: Option<Derivation>,
    /// Derived nodes reading this node.
    pub dependents: Vec<NodeId>,
    /// 0 for chunks, one more than the highest source rank otherwise.
    pub rank: usize,
    /// Number of live handles. The node is freed when this drops to zero.
    pub handles: Cell<usize>,
}

impl Node {
    /// Create a node holding `value`, with one live handle.
    pub fn new<T: Clone + PartialEq + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            clone_value: clone_boxed::<T>,
            same_value: same_boxed::<T>,
            subscribers: SubscriberList::new(),
            derivation: None,
            dependents: Vec::new(),
            rank: 0,
            handles: Cell::new(1),
        }
    }

    pub fn derived<T: Clone + PartialEq + 'static>(
        value: T,
        derivation: Derivation,
        rank: usize,
    ) -> Self {
        Self {
            derivation: Some(derivation),
            rank,
            ..Self::new(value)
        }
    }

    /// Clone the committed value so it can be handed out after the arena
    /// borrow ends.
    pub fn snapshot(&self) -> Box<dyn Any> {
        (self.clone_value)(&*self.value)
    }

    /// Replace the value unless it equals the current one.
    ///
    /// Returns true if the value changed.
    pub fn replace(&mut self, next: Box<dyn Any>) -> bool {
        if (self.same_value)(&*self.value, &*next) {
            return false;
        }
        self.value = next;
        true
    }
}

fn clone_boxed<T: Clone + 'static>(value: &dyn Any) -> Box<dyn Any> {
    match value.downcast_ref::<T>() {
        Some(value) => Box::new(value.clone()),
        None => Box::new(()),
    }
}

fn same_boxed<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Clone the value of node `id` as a `T`.
///
/// Returns `None` if the node has been freed.
pub(crate) fn read_value<T: Clone + 'static>(arena: &Arena, id: NodeId) -> Option<T> {
    arena
        .get(id)
        .and_then(|node| node.value.downcast_ref::<T>())
        .cloned()
}
