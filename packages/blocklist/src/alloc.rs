// block allocators.

use crate::block::{Block, HDR_SPACE};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use thiserror::Error;

/// Error for a sleeping allocation that could not be satisfied.
///
/// Process-context callers treat this as fatal to the operation in progress.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("failed to allocate block of {size} bytes")]
pub struct AllocError {
    /// Requested readable capacity
    pub size: usize,
}

/// Source of blocks.
///
/// Blocks returned by either method have at least `size` bytes of tailroom and both cursors
/// positioned at the start of that tailroom.
pub trait Allocator: Send + Sync {
    /// Allocate a block from process context. May sleep.
    fn alloc(&self, size: usize) -> Result<Block, AllocError>;

    /// Allocate a block from interrupt context. Never sleeps, may fail.
    fn try_alloc(&self, size: usize) -> Option<Block>;
}

/// Allocator backed by the global heap, reserving [`HDR_SPACE`] bytes of headroom per block.
#[derive(Debug, Default, Copy, Clone)]
pub struct Heap;

impl Allocator for Heap {
    fn alloc(&self, size: usize) -> Result<Block, AllocError> {
        let cap = HDR_SPACE.checked_add(size).ok_or(AllocError { size })?;
        Ok(Block::from_storage(BytesMut::zeroed(cap), HDR_SPACE))
    }

    fn try_alloc(&self, size: usize) -> Option<Block> {
        let cap = HDR_SPACE.checked_add(size)?;
        let mut storage = Vec::new();
        storage.try_reserve_exact(cap).ok()?;
        storage.resize(cap, 0);
        let storage = Bytes::from(storage).try_into_mut().ok()?;
        Some(Block::from_storage(storage, HDR_SPACE))
    }
}

/// Allocator that hands out at most a fixed total number of footprint bytes, then fails.
///
/// Capacity is charged when a block is allocated and never refunded. Useful for capping the
/// memory a producer may ever pin, and for exercising allocation-failure paths.
#[derive(Debug)]
pub struct Budget<A = Heap> {
    inner: A,
    remaining: AtomicUsize,
}

impl Budget<Heap> {
    /// Construct over the heap with a budget of `bytes`.
    pub fn new(bytes: usize) -> Self {
        Budget::with_allocator(Heap, bytes)
    }
}

impl<A: Allocator> Budget<A> {
    /// Construct over another allocator with a budget of `bytes`.
    pub fn with_allocator(inner: A, bytes: usize) -> Self {
        Budget { inner, remaining: AtomicUsize::new(bytes) }
    }

    /// Footprint bytes that may still be allocated.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Relaxed)
    }

    // atomically subtract the footprint of a size-byte block from the budget, if it fits.
    fn charge(&self, size: usize) -> bool {
        let Some(cost) = HDR_SPACE.checked_add(size) else { return false };
        self.remaining
            .fetch_update(Relaxed, Relaxed, |remaining| remaining.checked_sub(cost))
            .is_ok()
    }
}

impl<A: Allocator> Allocator for Budget<A> {
    fn alloc(&self, size: usize) -> Result<Block, AllocError> {
        if !self.charge(size) {
            return Err(AllocError { size });
        }
        self.inner.alloc(size)
    }

    fn try_alloc(&self, size: usize) -> Option<Block> {
        if !self.charge(size) {
            return None;
        }
        self.inner.try_alloc(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_blocks_have_header_space() {
        let block = Heap.alloc(100).unwrap();
        assert!(block.is_empty());
        assert_eq!(block.headroom(), HDR_SPACE);
        assert_eq!(block.tailroom(), 100);
        assert_eq!(block.alloc_len(), HDR_SPACE + 100);

        let block = Heap.try_alloc(10).unwrap();
        assert_eq!(block.headroom(), HDR_SPACE);
        assert_eq!(block.tailroom(), 10);
    }

    #[test]
    fn heap_alloc_rejects_overflowing_size() {
        assert_eq!(Heap.alloc(usize::MAX).unwrap_err(), AllocError { size: usize::MAX });
    }

    #[test]
    fn budget_runs_dry() {
        let budget = Budget::new(2 * (HDR_SPACE + 10));
        assert!(budget.alloc(10).is_ok());
        assert!(budget.try_alloc(10).is_some());
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.alloc(0).unwrap_err(), AllocError { size: 0 });
        assert!(budget.try_alloc(0).is_none());
    }
}
