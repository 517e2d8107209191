//! Computed values that derive from other nodes.

use crate::chunk::NodeHandle;
use crate::observable::Observable;
use crate::selector::Selector;
use crate::storage::{read_value, Arena, NodeId};
use crate::store::Store;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Reads the values of a source list out of the arena, positionally.
pub type ReadFn<V> = fn(&Arena, &[NodeId]) -> Option<V>;

/// An ordered, statically typed list of source nodes.
///
/// Implemented for tuples of one to four node references, which may have
/// different value types, and for slices of nodes sharing one type.
pub trait Sources {
    /// The source values handed to the derivation function.
    type Values: 'static;

    fn node_ids(&self) -> Vec<NodeId>;

    fn belongs_to(&self, store: &Store) -> bool;

    #[doc(hidden)]
    fn reader(&self) -> ReadFn<Self::Values>;
}

macro_rules! impl_sources_for_tuple {
    ($read:ident; $($name:ident : $idx:tt),+) => {
        fn $read<$($name: Clone + 'static),+>(
            arena: &Arena,
            ids: &[NodeId],
        ) -> Option<($($name,)+)> {
            Some(($(read_value::<$name>(arena, *ids.get($idx)?)?,)+))
        }

        impl<'a, $($name: Observable),+> Sources for ($(&'a $name,)+) {
            type Values = ($(<$name as Observable>::Value,)+);

            fn node_ids(&self) -> Vec<NodeId> {
                vec![$(self.$idx.node_id()),+]
            }

            fn belongs_to(&self, store: &Store) -> bool {
                true $(&& self.$idx.store() == store)+
            }

            fn reader(&self) -> ReadFn<Self::Values> {
                $read::<$(<$name as Observable>::Value),+>
            }
        }
    };
}

impl_sources_for_tuple!(read_one; A: 0);
impl_sources_for_tuple!(read_two; A: 0, B: 1);
impl_sources_for_tuple!(read_three; A: 0, B: 1, C: 2);
impl_sources_for_tuple!(read_four; A: 0, B: 1, C: 2, D: 3);

fn read_all<V: Clone + 'static>(arena: &Arena, ids: &[NodeId]) -> Option<Vec<V>> {
    ids.iter().map(|id| read_value::<V>(arena, *id)).collect()
}

impl<'a, A: Observable> Sources for &'a [A] {
    type Values = Vec<A::Value>;

    fn node_ids(&self) -> Vec<NodeId> {
        self.iter().map(Observable::node_id).collect()
    }

    fn belongs_to(&self, store: &Store) -> bool {
        self.iter().all(|source| source.store() == store)
    }

    fn reader(&self) -> ReadFn<Self::Values> {
        read_all::<A::Value>
    }
}

impl<'a, A: Observable> Sources for &'a Vec<A> {
    type Values = Vec<A::Value>;

    fn node_ids(&self) -> Vec<NodeId> {
        self.as_slice().node_ids()
    }

    fn belongs_to(&self, store: &Store) -> bool {
        self.as_slice().belongs_to(store)
    }

    fn reader(&self) -> ReadFn<Self::Values> {
        read_all::<A::Value>
    }
}

/// A cached value derived from an ordered list of sources.
///
/// The value is computed once at construction and recomputed eagerly
/// whenever a source changes. If the new value equals the cached one,
/// subscribers are not notified. Sources are not kept alive by the computed
/// value: if every handle to a source is dropped, the computed value keeps
/// its last value from then on.
///
/// # Examples
///
/// Computed values are created using `store.computed(sources, derive)`.
///
/// ```rust,no_run
/// use chunk_state::prelude::*;
///
/// let store = Store::new();
/// let price = store.chunk(3);
/// let quantity = store.chunk(4);
/// let total = store.computed((&price, &quantity), |(p, q)| p * q);
/// assert_eq!(total.get(), 12);
/// ```
pub struct Computed<T> {
    handle: NodeHandle,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> PartialEq for Computed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.handle.store() == other.handle.store() && self.handle.id() == other.handle.id()
    }
}

impl<T> Eq for Computed<T> {}

impl<T> Hash for Computed<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.id().hash(state);
    }
}

impl<T: Clone + PartialEq + 'static> Observable for Computed<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.handle.id()
    }

    fn store(&self) -> &Store {
        self.handle.store()
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    pub(crate) fn from_parts(store: Store, id: NodeId) -> Self {
        Self {
            handle: NodeHandle::adopt(store, id),
            _phantom: PhantomData,
        }
    }

    /// Project this value through `project`.
    pub fn select<U: Clone + PartialEq + 'static>(
        &self,
        project: impl Fn(&T) -> U + 'static,
    ) -> Selector<U> {
        self.store().select(self, project)
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.node_id())
            .field("value", &self.get())
            .finish()
    }
}
