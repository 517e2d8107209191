//! Error types for state propagation and history navigation.

use crate::storage::NodeId;
use thiserror::Error;

/// Boxed error produced by a fallible derivation function.
pub type DeriveError = Box<dyn std::error::Error + 'static>;

/// Errors surfaced by writes, derivations and history navigation.
#[derive(Debug, Error)]
pub enum StateError {
    /// A write chain came back to a chunk already updated in the same
    /// propagation pass, or the pass exceeded the configured wave limit.
    #[error("cyclic update detected at node {node:?}")]
    CyclicUpdate { node: NodeId },

    /// A derivation function failed; the node keeps its last good value.
    #[error("derivation of node {node:?} failed: {source}")]
    Derivation {
        node: NodeId,
        #[source]
        source: DeriveError,
    },

    #[error("already at the start of history")]
    AtHistoryStart,

    #[error("already at the end of history")]
    AtHistoryEnd,
}

impl StateError {
    /// Whether this error only reports an exhausted history and can be
    /// treated as a no-op.
    pub fn is_history_bound(&self) -> bool {
        matches!(self, StateError::AtHistoryStart | StateError::AtHistoryEnd)
    }
}

pub type Result<T, E = StateError> = std::result::Result<T, E>;
