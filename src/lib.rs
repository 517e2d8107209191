//! # Chunk State
//!
//! A small reactive state library: observable chunks, derived values,
//! selectors and undo/redo history, all owned by an explicit [`Store`].
//!
//! ## Features
//!
//! - **No globals**: every node lives in a [`Store`] you construct and own
//! - **Push-based derivation**: [`Computed`] values recompute eagerly and
//!   glitch-free when their sources change
//! - **Selectors**: watch one part of a larger value without hearing about
//!   the rest
//! - **Batching**: writes made during propagation or inside
//!   [`Store::batch`] are queued and applied as one wave
//! - **Time travel**: [`History`] records a chunk's values for undo/redo
//! - **Memory safe**: generational arena prevents use-after-free without unsafe code
//!
//! ## Example
//!
//! ```rust,no_run
//! use chunk_state::prelude::*;
//!
//! let store = Store::new();
//! let price = store.chunk(3);
//! let quantity = store.chunk(4);
//! let total = store.computed((&price, &quantity), |(p, q)| p * q);
//!
//! let _printer = total.subscribe(|t| println!("total: {t}"));
//! quantity.set(5)?; // prints "total: 15"
//! # Ok::<(), chunk_state::StateError>(())
//! ```

mod bus;
mod chunk;
mod computed;
mod error;
mod history;
mod observable;
mod selector;
mod storage;
mod store;
mod stream;

pub use bus::{SubscriberId, SubscriptionGuard, Unsubscribe};
pub use chunk::{Chunk, ReadOnlyChunk};
pub use computed::{Computed, ReadFn, Sources};
pub use error::{DeriveError, Result, StateError};
pub use history::History;
pub use observable::Observable;
pub use selector::Selector;
pub use storage::NodeId;
pub use store::{Store, StoreConfig};
pub use stream::ValueStream;

// Re-export the prelude
pub mod prelude {
    pub use crate::{
        Chunk, Computed, History, Observable, ReadOnlyChunk, Selector, StateError, Store,
        StoreConfig, Unsubscribe,
    };
}
