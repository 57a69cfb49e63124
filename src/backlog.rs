//! Bounded backlog of recent readings awaiting correlation
//!
//! Fixed-capacity FIFO keyed by the caller-supplied timestamp. Insertion
//! order is arrival order, which is not necessarily timestamp order.

use crate::config::defaults::BACKLOG_CAPACITY;
use crate::types::Readings;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

/// One stored snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BacklogEntry {
    pub timestamp: DateTime<Utc>,
    pub readings: Readings,
}

/// Insertion-ordered ring of `(timestamp, readings)`.
///
/// Owned by a single monitor and mutated only through [`push`](Backlog::push).
#[derive(Debug, Clone)]
pub struct Backlog {
    capacity: usize,
    entries: VecDeque<BacklogEntry>,
}

impl Backlog {
    /// Create a backlog holding at most `capacity` entries.
    ///
    /// A zero capacity is raised to one; config validation rejects it
    /// before it gets here.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, evicting the oldest by insertion order when full.
    pub fn push(&mut self, timestamp: DateTime<Utc>, readings: Readings) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BacklogEntry {
            timestamp,
            readings,
        });
    }

    /// Frozen copy of the current contents.
    ///
    /// Later pushes are never visible through an existing snapshot, and the
    /// snapshot can be iterated any number of times.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.entries.iter().cloned().collect(),
        }
    }

    /// Newest entry, if any.
    pub fn latest(&self) -> Option<&BacklogEntry> {
        self.entries.back()
    }
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new(BACKLOG_CAPACITY)
    }
}

/// Immutable, cheaply clonable view of a backlog at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Arc<[BacklogEntry]>,
}

impl Snapshot {
    /// Entries oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, BacklogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a BacklogEntry;
    type IntoIter = std::slice::Iter<'a, BacklogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
