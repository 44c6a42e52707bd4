// per-queue counters.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Snapshot of a queue's byte counters.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Stats {
    /// Bytes queued by [`Queue::produce`](crate::Queue::produce)
    pub produced: u64,
    /// Bytes copied out by [`Queue::consume`](crate::Queue::consume)
    pub consumed: u64,
    /// Bytes copied by [`Queue::copy`](crate::Queue::copy)
    pub copied: u64,
    /// Bytes offered to the queue but dropped rather than queued
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    produced: AtomicU64,
    consumed: AtomicU64,
    copied: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn produced(&self, n: usize) {
        self.produced.fetch_add(n as u64, Relaxed);
    }

    pub(crate) fn consumed(&self, n: usize) {
        self.consumed.fetch_add(n as u64, Relaxed);
    }

    pub(crate) fn copied(&self, n: usize) {
        self.copied.fetch_add(n as u64, Relaxed);
    }

    pub(crate) fn dropped(&self, n: usize) {
        self.dropped.fetch_add(n as u64, Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Stats {
        Stats {
            produced: self.produced.load(Relaxed),
            consumed: self.consumed.load(Relaxed),
            copied: self.copied.load(Relaxed),
            dropped: self.dropped.load(Relaxed),
        }
    }
}
