//! Single-source projections.

use crate::computed::Computed;
use crate::observable::Observable;
use crate::storage::NodeId;
use crate::store::Store;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A read-only projection of one node through a pure function.
///
/// The projection runs once at construction and again whenever the source
/// changes, so it must not have side effects. Subscribers are notified only
/// when the projected value changes, which makes selectors the way to watch
/// one field of a larger value.
///
/// ```rust,no_run
/// use chunk_state::prelude::*;
///
/// #[derive(Clone, PartialEq)]
/// struct User { name: String, email: String }
///
/// let store = Store::new();
/// let user = store.chunk(User { name: "ada".into(), email: "a@x.org".into() });
/// let name = user.select(|u| u.name.clone());
/// let _sub = name.subscribe(|n| println!("name is now {n}"));
/// ```
pub struct Selector<T> {
    inner: Computed<T>,
}

impl<T> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for Selector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Eq for Selector<T> {}

impl<T> Hash for Selector<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<T: Clone + PartialEq + 'static> Observable for Selector<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    fn store(&self) -> &Store {
        self.inner.store()
    }
}

impl<T: Clone + PartialEq + 'static> Selector<T> {
    pub(crate) fn from_computed(inner: Computed<T>) -> Self {
        Self { inner }
    }

    /// Project this selector further.
    pub fn select<U: Clone + PartialEq + 'static>(
        &self,
        project: impl Fn(&T) -> U + 'static,
    ) -> Selector<U> {
        self.store().select(self, project)
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("value", &self.get())
            .finish()
    }
}
