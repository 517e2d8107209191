//! Undo/redo history for a chunk.
//!
//! # Invariants
//!
//! 1. The log is never empty and `cursor < log.len()`.
//! 2. Outside a running propagation, `log[cursor]` equals the chunk value.
//! 3. A new entry discards every entry after the cursor.
//! 4. With a capacity, `log.len() <= capacity`; the oldest entries go first.

use crate::chunk::Chunk;
use crate::error::{Result, StateError};
use crate::observable::Observable;
use crate::storage::NodeId;
use crate::store::Store;
use std::collections::VecDeque;
use std::fmt;
use tracing::trace;

/// A chunk with an undo/redo log of its past values.
///
/// Writes through the history append to the log; `undo` and `redo` move a
/// cursor through it and write the logged value back to the chunk without
/// appending. Writes made directly to the wrapped chunk bypass the log.
pub struct History<T> {
    chunk: Chunk<T>,
    log: VecDeque<T>,
    cursor: usize,
    capacity: Option<usize>,
}

impl<T: Clone + PartialEq + 'static> History<T> {
    /// Wrap `chunk`, starting the log at its current value.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(chunk: Chunk<T>, capacity: Option<usize>) -> Self {
        let mut log = VecDeque::new();
        log.push_back(chunk.get());
        Self {
            chunk,
            log,
            cursor: 0,
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    /// The wrapped chunk.
    pub fn chunk(&self) -> &Chunk<T> {
        &self.chunk
    }

    /// Write `value` and record the result as the newest entry.
    ///
    /// Nothing happens if `value` equals the current value. What gets
    /// recorded is the value the chunk holds once propagation is over, so a
    /// subscriber that rewrites the chunk is reflected in the log. The entry
    /// is recorded even when propagation fails, since applied writes are
    /// kept. Inside a batch or a running propagation the write is only
    /// queued and `value` itself is recorded.
    pub fn set(&mut self, value: T) -> Result<()> {
        if self.current() == value {
            return Ok(());
        }
        let queued = self.chunk.store().defers_writes();
        let result = self.chunk.set(value.clone());
        let committed = if queued { value } else { self.chunk.get() };
        if self.log[self.cursor] != committed {
            self.record(committed);
        }
        result
    }

    /// Write `updater(current)` and record it.
    pub fn update(&mut self, updater: impl FnOnce(&T) -> T) -> Result<()> {
        let next = updater(&self.current());
        self.set(next)
    }

    /// Write the chunk's initial value as a new entry.
    pub fn reset(&mut self) -> Result<()> {
        self.set(self.chunk.initial())
    }

    /// Step back one entry.
    pub fn undo(&mut self) -> Result<()> {
        if self.cursor == 0 {
            return Err(StateError::AtHistoryStart);
        }
        self.cursor -= 1;
        trace!(cursor = self.cursor, "undo");
        self.chunk.set(self.log[self.cursor].clone())
    }

    /// Step forward one entry.
    pub fn redo(&mut self) -> Result<()> {
        if self.cursor + 1 >= self.log.len() {
            return Err(StateError::AtHistoryEnd);
        }
        self.cursor += 1;
        trace!(cursor = self.cursor, "redo");
        self.chunk.set(self.log[self.cursor].clone())
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.log.len()
    }

    /// Forget every entry except the current one.
    pub fn clear(&mut self) {
        let current = self.log[self.cursor].clone();
        self.log.clear();
        self.log.push_back(current);
        self.cursor = 0;
    }

    /// Number of entries, including the current one.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Always false: the log holds at least the current value.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// The logged values, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &T> {
        self.log.iter()
    }

    /// The value the next write starts from: the chunk's value, or the
    /// newest entry while writes are being queued.
    fn current(&self) -> T {
        if self.chunk.store().defers_writes() {
            self.log[self.cursor].clone()
        } else {
            self.chunk.get()
        }
    }

    fn record(&mut self, value: T) {
        self.log.truncate(self.cursor + 1);
        self.log.push_back(value);
        if let Some(capacity) = self.capacity {
            while self.log.len() > capacity {
                self.log.pop_front();
            }
        }
        self.cursor = self.log.len() - 1;
    }
}

impl<T: Clone + PartialEq + 'static> Observable for History<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.chunk.node_id()
    }

    fn store(&self) -> &Store {
        self.chunk.store()
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for History<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("log", &self.log)
            .field("cursor", &self.cursor)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use rand::Rng;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_undo_redo_walk() {
        let store = Store::new();
        let mut history = store.history(0);

        history.set(5).unwrap();
        history.set(10).unwrap();
        history.undo().unwrap();
        assert_eq!(history.get(), 5);
        history.undo().unwrap();
        assert_eq!(history.get(), 0);
        history.redo().unwrap();
        assert_eq!(history.get(), 5);

        history.set(7).unwrap();
        assert!(!history.can_redo());
        assert!(matches!(history.redo(), Err(StateError::AtHistoryEnd)));
        assert_eq!(history.entries().copied().collect::<Vec<_>>(), vec![0, 5, 7]);
    }

    #[test]
    fn test_bounds_are_reported() {
        let store = Store::new();
        let mut history = store.history("a");
        let err = history.undo().unwrap_err();
        assert!(matches!(err, StateError::AtHistoryStart));
        assert!(err.is_history_bound());
        assert!(matches!(history.redo(), Err(StateError::AtHistoryEnd)));
        assert_eq!(history.get(), "a");
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = Store::new();
        let mut history = store.history_with_capacity(0, 3);
        for n in 1..=5 {
            history.set(n).unwrap();
        }
        assert_eq!(history.entries().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(history.cursor(), 2);

        history.undo().unwrap();
        history.undo().unwrap();
        assert_eq!(history.get(), 3);
        assert!(history.undo().is_err());
    }

    #[test]
    fn test_zero_capacity_keeps_current() {
        let store = Store::new();
        let mut history = store.history_with_capacity(1, 0);
        history.set(2).unwrap();
        assert_eq!(history.capacity(), Some(1));
        assert_eq!(history.len(), 1);
        assert!(!history.can_undo());
        assert_eq!(history.get(), 2);
    }

    #[test]
    fn test_equal_write_is_not_recorded() {
        let store = Store::new();
        let mut history = store.history(1);
        history.set(1).unwrap();
        history.update(|n| *n).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_log_follows_rewritten_value() {
        let store = Store::new();
        let mut history = store.history(0);
        let _clamp = history.subscribe({
            let chunk = history.chunk().clone();
            move |v: &i32| {
                if *v > 10 {
                    let _ = chunk.set(10);
                }
            }
        });

        let err = history.set(50).unwrap_err();
        assert!(matches!(err, StateError::CyclicUpdate { .. }));
        assert_eq!(history.get(), 10);
        assert_eq!(history.entries().copied().collect::<Vec<_>>(), vec![0, 10]);

        history.set(10).unwrap();
        assert_eq!(history.len(), 2);
        history.undo().unwrap();
        assert_eq!(history.get(), 0);
    }

    #[test]
    fn test_set_after_direct_chunk_write() {
        let store = Store::new();
        let mut history = store.history(1);
        history.chunk().set(5).unwrap();

        history.set(1).unwrap();
        assert_eq!(history.get(), 1);
        assert_eq!(history.len(), 1);

        history.chunk().set(5).unwrap();
        history.set(7).unwrap();
        assert_eq!(history.get(), 7);
        assert_eq!(history.entries().copied().collect::<Vec<_>>(), vec![1, 7]);
    }

    #[test]
    fn test_set_inside_batch_records_queued_value() {
        let store = Store::new();
        let mut history = store.history(0);
        store
            .batch(|| {
                history.set(1).unwrap();
                history.update(|n| n + 1).unwrap();
                history.set(2).unwrap();
            })
            .unwrap();
        assert_eq!(history.get(), 2);
        assert_eq!(history.entries().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_reset_is_undoable() {
        let store = Store::new();
        let mut history = store.history(String::from("draft"));
        history.set(String::from("final")).unwrap();
        history.reset().unwrap();
        assert_eq!(history.get(), "draft");
        history.undo().unwrap();
        assert_eq!(history.get(), "final");
    }

    #[test]
    fn test_clear_keeps_current() {
        let store = Store::new();
        let mut history = store.history(0);
        history.set(1).unwrap();
        history.set(2).unwrap();
        history.undo().unwrap();
        history.clear();
        assert_eq!(history.len(), 1);
        assert_eq!(history.get(), 1);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn test_navigation_notifies_subscribers() {
        let store = Store::new();
        let mut history = store.history(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = history.subscribe({
            let seen = seen.clone();
            move |v| seen.borrow_mut().push(*v)
        });
        history.set(1).unwrap();
        history.undo().unwrap();
        history.redo().unwrap();
        assert_eq!(*seen.borrow(), vec![1, 0, 1]);
    }

    #[test]
    fn test_history_feeds_computed() {
        let store = Store::new();
        let mut history = store.history(2);
        let doubled = store.computed((&history,), |(n,)| n * 2);
        history.set(5).unwrap();
        assert_eq!(doubled.get(), 10);
        history.undo().unwrap();
        assert_eq!(doubled.get(), 4);
    }

    #[test]
    fn test_matches_model_under_random_operations() {
        let mut rng = rand::thread_rng();
        let store = Store::new();
        let mut history = store.history_with_capacity(0i64, 8);
        let mut model: Vec<i64> = vec![0];
        let mut cursor = 0usize;

        for _ in 0..500 {
            match rng.gen_range(0..3) {
                0 => {
                    let value = rng.gen_range(-5..5);
                    if model[cursor] != value {
                        model.truncate(cursor + 1);
                        model.push(value);
                        if model.len() > 8 {
                            model.remove(0);
                        }
                        cursor = model.len() - 1;
                    }
                    history.set(value).unwrap();
                }
                1 => {
                    let moved = history.undo().is_ok();
                    assert_eq!(moved, cursor > 0);
                    if moved {
                        cursor -= 1;
                    }
                }
                _ => {
                    let moved = history.redo().is_ok();
                    assert_eq!(moved, cursor + 1 < model.len());
                    if moved {
                        cursor += 1;
                    }
                }
            }
            assert_eq!(history.get(), model[cursor]);
            assert_eq!(history.cursor(), cursor);
            assert_eq!(history.entries().copied().collect::<Vec<_>>(), model);
        }
    }
}
