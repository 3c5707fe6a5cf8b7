//! Contention-free event counting for the ingestion hot path.
//!
//! Every buffer increment bumps a statistics counter. A single atomic would
//! become a shared cache line for all ingestion workers, so increments are
//! spread across shards and only summed when metrics are read.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of shards. 64 shards of one AtomicU64 each is 512 bytes per counter.
const SHARDS: usize = 64;

/// Counter whose increments are distributed over several atomics.
///
/// Shard selection uses a thread-local round-robin cursor, which keeps
/// working when tokio migrates a task between threads: only distribution
/// matters, not affinity.
#[derive(Debug)]
pub struct ShardedCounter {
    shards: Box<[AtomicU64]>,
}

impl ShardedCounter {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    fn shard(&self) -> &AtomicU64 {
        thread_local! {
            static CURSOR: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
        }

        let idx = CURSOR.with(|c| {
            let val = c.get();
            c.set(val.wrapping_add(1));
            val % SHARDS
        });

        &self.shards[idx]
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.shard().fetch_add(n, Ordering::Relaxed);
    }

    /// Sum of all shards. Not a snapshot: concurrent adds may or may not be seen.
    pub fn sum(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for ShardedCounter {
    fn default() -> Self {
        Self::new()
    }
}
