//! Fixed-size window over the most recent rows.

use std::collections::VecDeque;

/// Keeps the last `capacity` rows. Starts out full of blank rows so the
/// newest row is always drawn at the same position.
#[derive(Debug, Clone)]
pub struct Scrollback<T> {
    rows: VecDeque<T>,
    capacity: usize,
}

impl<T: Default> Scrollback<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: (0..capacity).map(|_| T::default()).collect(),
            capacity,
        }
    }

    /// Append `row`, discarding the oldest one.
    pub fn push(&mut self, row: T) {
        self.rows.push_back(row);
        while self.rows.len() > self.capacity {
            self.rows.pop_front();
        }
    }
}

impl<T> Scrollback<T> {
    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.iter()
    }
}
