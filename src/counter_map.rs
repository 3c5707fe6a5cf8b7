//! Plain key → delta accumulation used by every buffer variant.

use std::collections::HashMap;

/// One increment event: add `delta` to the counter for `key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterDelta {
    pub key: String,
    pub delta: i64,
}

impl CounterDelta {
    pub fn new(key: impl Into<String>, delta: i64) -> Self {
        Self {
            key: key.into(),
            delta,
        }
    }
}

/// Accumulated signed deltas since the map was last reset.
///
/// Has no synchronization of its own; buffers wrap it in their locks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterMap {
    counts: HashMap<String, i64>,
}

impl CounterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to `key`, inserting the key on first sight.
    ///
    /// Accumulation wraps on `i64` overflow instead of panicking, so any
    /// delta is accepted.
    #[inline]
    pub fn add(&mut self, key: &str, delta: i64) {
        match self.counts.get_mut(key) {
            Some(value) => *value = value.wrapping_add(delta),
            None => {
                self.counts.insert(key.to_owned(), delta);
            }
        }
    }

    /// Accumulated value for `key`, 0 if never incremented.
    pub fn get(&self, key: &str) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Drop every entry but keep the allocation.
    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// Entries whose net delta is not zero.
    pub fn non_zero(&self) -> impl Iterator<Item = (&str, i64)> {
        self.counts
            .iter()
            .filter(|(_, delta)| **delta != 0)
            .map(|(key, delta)| (key.as_str(), *delta))
    }
}
