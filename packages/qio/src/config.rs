// queue construction parameters.

use crate::queue::{Bypass, Kick, Mode, Queue};
use blocklist::{Allocator, Heap};
use std::sync::Arc;

/// Largest chunk a blocking write queues as one unit. Bigger writes are split, and each chunk
/// is visible to readers as a whole.
pub const MAX_ATOMIC: usize = 64 * 1024;

/// Number of reads of a closed, drained queue that return end-of-file before the close reason
/// is surfaced as an error.
pub const EOF_READS: u32 = 3;

/// Queued bytes past which [`Queue::iwrite`] stops accepting data.
pub const PRINT_BACKLOG: usize = 16 * 1024;

/// Builder for a [`Queue`].
///
/// Obtained from [`Queue::builder`].
pub struct QueueBuilder {
    pub(crate) limit: usize,
    pub(crate) mode: Mode,
    pub(crate) kick: Option<Arc<dyn Kick>>,
    pub(crate) bypass: Option<Arc<dyn Bypass>>,
    pub(crate) alloc: Arc<dyn Allocator>,
    pub(crate) max_atomic: usize,
    pub(crate) eof_reads: u32,
    pub(crate) print_backlog: usize,
}

impl QueueBuilder {
    pub(crate) fn new(limit: usize) -> Self {
        QueueBuilder {
            limit,
            mode: Mode::empty(),
            kick: None,
            bypass: None,
            alloc: Arc::new(Heap),
            max_atomic: MAX_ATOMIC,
            eof_reads: EOF_READS,
            print_backlog: PRINT_BACKLOG,
        }
    }

    /// Set all mode bits at once.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Preserve write boundaries: each read returns at most one chain.
    pub fn message(mut self) -> Self {
        self.mode |= Mode::MESSAGE;
        self
    }

    /// Drop zero-length chains and let reads gather several whole chains.
    pub fn coalesce(mut self) -> Self {
        self.mode |= Mode::COALESCE;
        self
    }

    /// Kick after every blocking write, not only when a starved reader is satisfied.
    pub fn kick_always(mut self) -> Self {
        self.mode |= Mode::KICK;
        self
    }

    /// Install the capability used to prod the external party feeding or draining the queue.
    pub fn kick<K: Kick + 'static>(mut self, kick: K) -> Self {
        self.kick = Some(Arc::new(kick));
        self
    }

    /// Forward every write synchronously to `bypass` instead of buffering it.
    pub fn bypass<B: Bypass + 'static>(mut self, bypass: B) -> Self {
        self.bypass = Some(Arc::new(bypass));
        self
    }

    /// Allocate blocks from `alloc` instead of the heap.
    pub fn allocator<A: Allocator + 'static>(mut self, alloc: A) -> Self {
        self.alloc = Arc::new(alloc);
        self
    }

    /// Override [`MAX_ATOMIC`]. Panics if zero.
    pub fn max_atomic(mut self, max_atomic: usize) -> Self {
        assert!(max_atomic > 0, "max_atomic must be non-zero");
        self.max_atomic = max_atomic;
        self
    }

    /// Override [`EOF_READS`].
    pub fn eof_reads(mut self, eof_reads: u32) -> Self {
        self.eof_reads = eof_reads;
        self
    }

    /// Override [`PRINT_BACKLOG`].
    pub fn print_backlog(mut self, print_backlog: usize) -> Self {
        self.print_backlog = print_backlog;
        self
    }

    /// Construct the queue, open and empty.
    pub fn build(self) -> Queue {
        Queue::from_builder(self)
    }
}
