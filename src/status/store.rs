//! Bounded, most-recent-first status history for one tracked entity.
//!
//! Index 0 is the latest insertion. Ordering follows insertion, never the
//! records' timestamps. The capacity bound is supplied on every mutation
//! so a bound that shrinks at runtime takes effect on the next prepend.

#![allow(missing_docs)]

use std::collections::VecDeque;

use crate::core::errors::{Result, TtError};
use crate::status::record::StatusRecord;

/// Ordered, bounded collection of status records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusStore {
    records: VecDeque<StatusRecord>,
    loaded: bool,
}

impl StatusStore {
    /// Empty, not yet hydrated store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrate from the initial snapshot. Allowed once per session.
    pub fn load(&mut self, snapshot: Vec<StatusRecord>) -> Result<()> {
        if self.loaded {
            return Err(TtError::InvalidState {
                expected: "unloaded status store",
                actual: "already loaded",
            });
        }
        self.records = VecDeque::from(snapshot);
        self.loaded = true;
        Ok(())
    }

    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at `index`, or `None` when out of range. Never mutates.
    #[must_use]
    pub fn peek(&self, index: usize) -> Option<&StatusRecord> {
        self.records.get(index)
    }

    /// Replace the record at `index` in place.
    pub fn replace_at(&mut self, index: usize, record: StatusRecord) -> Result<()> {
        let len = self.records.len();
        let slot = self
            .records
            .get_mut(index)
            .ok_or(TtError::IndexOutOfBounds { index, len })?;
        *slot = record;
        Ok(())
    }

    /// Insert `record` at index 0, first dropping tail entries while the
    /// history holds `max_len` or more. Returns how many were evicted.
    ///
    /// The result never exceeds `max(max_len, 1)` entries, even when
    /// `max_len` shrank since the previous call.
    pub fn prepend_and_evict(&mut self, record: StatusRecord, max_len: usize) -> usize {
        let bound = max_len.max(1);
        let mut evicted = 0;
        while self.records.len() >= bound {
            self.records.pop_back();
            evicted += 1;
        }
        self.records.push_front(record);
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusRecord> {
        self.records.iter()
    }

    /// Owned copy of the history, most recent first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<StatusRecord> {
        self.records.iter().copied().collect()
    }
}
