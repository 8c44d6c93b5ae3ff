//! Linear undo/redo history of configuration snapshots

use super::RecipeConfig;
use std::sync::Arc;

/// Ordered list of immutable snapshots plus a cursor
///
/// The first snapshot is the initial configuration and cannot be undone
/// past. Appending while the cursor is not at the tail drops every
/// snapshot after the cursor.
#[derive(Debug, Clone)]
pub struct ConfigHistory<T = RecipeConfig> {
    snapshots: Vec<Arc<T>>,
    cursor: usize,
}

impl<T> ConfigHistory<T> {
    /// Start a history at `initial`
    pub fn new(initial: T) -> Self {
        Self {
            snapshots: vec![Arc::new(initial)],
            cursor: 0,
        }
    }

    /// Push a snapshot after the cursor and move the cursor onto it
    pub fn append(&mut self, snapshot: T) -> Arc<T> {
        self.snapshots.truncate(self.cursor + 1);
        let snapshot = Arc::new(snapshot);
        self.snapshots.push(snapshot.clone());
        self.cursor = self.snapshots.len() - 1;
        snapshot
    }

    /// Move the cursor back; returns the new current snapshot
    pub fn undo(&mut self) -> Option<Arc<T>> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        Some(self.current())
    }

    /// Move the cursor forward; returns the new current snapshot
    pub fn redo(&mut self) -> Option<Arc<T>> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        Some(self.current())
    }

    /// Snapshot at the cursor
    pub fn current(&self) -> Arc<T> {
        self.snapshots[self.cursor].clone()
    }

    /// Returns true if there is a snapshot before the cursor
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    /// Returns true if there is a snapshot after the cursor
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }

    /// Cursor position
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Always false: a history holds at least its initial snapshot
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_undo_stops_at_initial() {
        let mut history = ConfigHistory::new(0);
        assert!(!history.can_undo());
        assert!(history.undo().is_none());
        history.append(1);
        assert_eq!(*history.undo().unwrap(), 0);
        assert!(history.undo().is_none());
        assert_eq!(*history.current(), 0);
    }

    #[test]
    fn test_append_truncates_redo() {
        let mut history = ConfigHistory::new(0);
        history.append(1);
        history.append(2);
        history.undo();
        history.append(3);

        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);
        assert_eq!(*history.undo().unwrap(), 1);
        assert_eq!(*history.redo().unwrap(), 3);
    }

    proptest! {
        #[test]
        fn prop_undo_then_redo_restores(n in 1usize..30, k_seed in 0usize..30) {
            let k = k_seed % (n + 1);
            let mut history = ConfigHistory::new(0usize);
            for i in 1..=n {
                history.append(i);
            }
            let before = history.current();

            for _ in 0..k {
                prop_assert!(history.undo().is_some());
            }
            prop_assert_eq!(*history.current(), n - k);
            for _ in 0..k {
                prop_assert!(history.redo().is_some());
            }
            prop_assert!(Arc::ptr_eq(&before, &history.current()));
        }

        #[test]
        fn prop_append_after_undo_truncates(n in 2usize..30) {
            let mut history = ConfigHistory::new(0usize);
            for i in 1..=n {
                history.append(i);
            }
            history.undo();
            history.append(100);

            prop_assert!(!history.can_redo());
            prop_assert_eq!(history.len(), n + 1);
            prop_assert!(history.redo().is_none());
            prop_assert_eq!(*history.current(), 100);
        }
    }
}
