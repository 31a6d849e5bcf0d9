//! Bounded snapshot stack backing undo. Oldest snapshots are discarded
//! first once the capacity is reached; popping restores most-recent-first.

use serde::{Deserialize, Serialize};

pub const HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History<T> {
    snapshots: Vec<T>,
    capacity: usize,
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> History<T> {
        History {
            snapshots: Vec::new(),
            capacity,
        }
    }

    pub fn push(&mut self, snapshot: T) {
        if self.capacity == 0 {
            return;
        }
        while self.snapshots.len() >= self.capacity {
            self.snapshots.remove(0);
        }
        self.snapshots.push(snapshot);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.snapshots.pop()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

impl<T> Default for History<T> {
    fn default() -> History<T> {
        History::new(HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_order() {
        let mut history = History::default();
        history.push(1);
        history.push(2);
        history.push(3);
        assert_eq!(history.pop(), Some(3));
        assert_eq!(history.pop(), Some(2));
        assert_eq!(history.pop(), Some(1));
        assert_eq!(history.pop(), None);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut history = History::new(3);
        for n in 0..5 {
            history.push(n);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.pop(), Some(4));
        assert_eq!(history.pop(), Some(3));
        assert_eq!(history.pop(), Some(2));
        assert!(history.is_empty());
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut history = History::new(0);
        history.push("snapshot");
        assert!(history.is_empty());
        assert_eq!(history.pop(), None);
    }

    #[test]
    fn test_clear() {
        let mut history = History::default();
        history.push(1);
        history.push(2);
        history.clear();
        assert!(history.is_empty());
    }
}
