// queue shared state, construction, and the control surface.

use super::{rendez::Rendez, Bypass, Kick, Mode, State};
use crate::{config::QueueBuilder, stats::{Counters, Stats}};
use blocklist::{Allocator, Chain};
use std::{
    collections::VecDeque,
    mem,
    sync::{Arc, Mutex},
};

/// Close reason recorded when none is given.
pub const HUNG_UP: &str = "hung up";

/// Bounded FIFO of block chains with flow control.
///
/// Each enqueue inserts one chain at the tail; each dequeue removes one chain at the head, or
/// splits it and puts the remainder back. Two byte counts are kept: the readable length, which
/// decides whether a read can proceed, and the footprint of every queued block, which flow
/// control is accounted against.
///
/// Once the footprint reaches the limit the queue is flow-controlled, and it stays so until the
/// footprint falls below half the limit.
///
/// A queue is shared by reference (typically in an `Arc`) between its producer and consumer.
pub struct Queue {
    // guards everything that interrupt-context callers touch.
    pub(super) inner: spin::Mutex<Inner>,
    // serializes blocking readers.
    pub(super) rlock: Mutex<()>,
    // serializes blocking writers.
    pub(super) wlock: Mutex<()>,
    // readers waiting for data.
    pub(super) rr: Rendez,
    // writers waiting for flow control to clear.
    pub(super) wr: Rendez,

    pub(super) mode: Mode,
    pub(super) kick: Option<Arc<dyn Kick>>,
    pub(super) bypass: Option<Arc<dyn Bypass>>,
    pub(super) alloc: Arc<dyn Allocator>,
    pub(super) max_atomic: usize,
    pub(super) eof_reads: u32,
    pub(super) print_backlog: usize,
    // the limit given at open time, restored on reopen.
    initial_limit: usize,
    pub(super) stats: Counters,
}

// state guarded by the spin lock.
pub(super) struct Inner {
    pub(super) chains: VecDeque<Chain>,
    // sum of footprint of queued chains.
    pub(super) len: usize,
    // sum of readable bytes of queued chains. invariant: dlen <= len.
    pub(super) dlen: usize,
    pub(super) limit: usize,
    pub(super) state: State,
    // reads that have returned end-of-file since the queue was closed.
    pub(super) eof: u32,
    pub(super) err: Arc<str>,
}

impl Inner {
    // add a chain at the tail, asserting flow control if that reaches the limit.
    pub(super) fn add(&mut self, chain: Chain) {
        self.len += chain.alloc_len();
        self.dlen += chain.len();
        self.chains.push_back(chain);
        if self.len >= self.limit {
            self.state.insert(State::FLOW);
        }
    }

    // remove the chain at the head.
    pub(super) fn remove(&mut self) -> Option<Chain> {
        let chain = self.chains.pop_front()?;
        self.len -= chain.alloc_len();
        self.dlen -= chain.len();
        Some(chain)
    }

    // put the unconsumed part of a chain back at the head.
    pub(super) fn put_back(&mut self, chain: Chain) {
        self.len += chain.alloc_len();
        self.dlen += chain.len();
        self.chains.push_front(chain);
    }

    // consume from the head chain in place with `f`, which returns the readable bytes it
    // removed. blocks it drops leave the footprint count too.
    pub(super) fn consume_front<F>(&mut self, f: F) -> usize
    where
        F: FnOnce(&mut Chain) -> usize,
    {
        let Some(front) = self.chains.front_mut() else { return 0 };
        let before = front.alloc_len();
        let n = f(front);
        self.len -= before - front.alloc_len();
        self.dlen -= n;
        n
    }

    // take everything queued, zeroing the counts.
    pub(super) fn drain(&mut self) -> VecDeque<Chain> {
        self.len = 0;
        self.dlen = 0;
        mem::take(&mut self.chains)
    }

    // clear the starved bit, returning whether it was set.
    pub(super) fn take_starved(&mut self) -> bool {
        let starved = self.state.contains(State::STARVED);
        self.state.remove(State::STARVED);
        starved
    }

    // clear flow control if the footprint has fallen below half the limit, or to nothing for
    // limits too small to halve, returning whether it was cleared.
    pub(super) fn take_flow(&mut self) -> bool {
        if self.state.contains(State::FLOW) && (self.len < self.limit / 2 || self.len == 0) {
            self.state.remove(State::FLOW);
            true
        } else {
            false
        }
    }

    // whether a blocked reader has something to act on.
    pub(super) fn readable(&self) -> bool {
        self.state.contains(State::CLOSED) || !self.chains.is_empty()
    }

    // whether a blocked writer may proceed.
    pub(super) fn writable(&self) -> bool {
        self.state.contains(State::CLOSED) || !self.state.contains(State::FLOW)
    }
}

impl Queue {
    /// Open a queue with the given limit and mode, allocating from the heap.
    pub fn open(limit: usize, mode: Mode) -> Queue {
        Queue::builder(limit).mode(mode).build()
    }

    /// Open a bypass queue, which buffers nothing and hands every write straight to `bypass`.
    pub fn open_bypass<B: Bypass + 'static>(bypass: B) -> Queue {
        Queue::builder(0).bypass(bypass).build()
    }

    /// Start configuring a queue with the given limit.
    pub fn builder(limit: usize) -> QueueBuilder {
        QueueBuilder::new(limit)
    }

    pub(crate) fn from_builder(builder: QueueBuilder) -> Queue {
        debug!(limit = builder.limit, mode = ?builder.mode, bypass = builder.bypass.is_some(), "queue open");
        // nothing has been produced yet, so the first producer should wake and kick
        let state = State::from(builder.mode) | State::STARVED;
        Queue {
            inner: spin::Mutex::new(Inner {
                chains: VecDeque::new(),
                len: 0,
                dlen: 0,
                limit: builder.limit,
                state,
                eof: 0,
                err: Arc::from(HUNG_UP),
            }),
            rlock: Mutex::new(()),
            wlock: Mutex::new(()),
            rr: Rendez::new(),
            wr: Rendez::new(),
            mode: builder.mode,
            kick: builder.kick,
            bypass: builder.bypass,
            alloc: builder.alloc,
            max_atomic: builder.max_atomic,
            eof_reads: builder.eof_reads,
            print_backlog: builder.print_backlog,
            initial_limit: builder.limit,
            stats: Counters::default(),
        }
    }

    /// Close the queue, dropping everything queued.
    ///
    /// Records `reason` (or [`HUNG_UP`]) as the error later surfaced to readers and writers, and
    /// wakes every blocked party.
    pub fn close(&self, reason: Option<&str>) {
        let reason = close_reason(reason);
        let mut inner = self.inner.lock();
        inner.state.insert(State::CLOSED);
        inner.state.remove(State::FLOW | State::STARVED | State::NONBLOCK);
        inner.err = reason;
        let chains = inner.drain();
        drop(inner);

        debug!(chains = chains.len(), "queue closed");
        drop(chains);
        self.rr.wakeup();
        self.wr.wakeup();
    }

    /// Hang up the queue: reject new writes but keep what is queued, so readers can drain it
    /// before they see end-of-file.
    pub fn hangup(&self, reason: Option<&str>) {
        let reason = close_reason(reason);
        let mut inner = self.inner.lock();
        inner.state.insert(State::CLOSED);
        inner.err = reason;
        drop(inner);

        debug!("queue hung up");
        self.rr.wakeup();
        self.wr.wakeup();
    }

    /// Make a closed or hung up queue usable again, restoring the limit it was opened with.
    pub fn reopen(&self) {
        let mut inner = self.inner.lock();
        inner.state.remove(State::CLOSED | State::STARVED);
        inner.eof = 0;
        inner.limit = self.initial_limit;
        drop(inner);
        debug!(limit = self.initial_limit, "queue reopened");
    }

    /// Close and drop the queue.
    pub fn free(self) {
        self.close(None);
    }

    /// Drop everything queued without closing the queue.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let chains = inner.drain();
        let wake = inner.take_flow();
        drop(inner);

        debug!(chains = chains.len(), "queue flushed");
        drop(chains);
        if wake {
            self.wake_writers();
        }
    }

    /// Change the limit flow control is accounted against.
    ///
    /// Flow control clears once the footprint falls below half the limit. With a limit of 0 or 1
    /// that only happens when the queue is empty.
    pub fn set_limit(&self, limit: usize) {
        let mut inner = self.inner.lock();
        inner.limit = limit;
        let wake = inner.take_flow();
        drop(inner);

        debug!(limit, "queue limit changed");
        if wake {
            self.wake_writers();
        }
    }

    /// Switch between blocking writes and dropping writes that find the queue over its limit.
    ///
    /// Switching to non-blocking releases a writer blocked on flow control.
    pub fn set_nonblocking(&self, nonblocking: bool) {
        self.inner.lock().state.set(State::NONBLOCK, nonblocking);
        if nonblocking {
            self.wr.wakeup();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().state.contains(State::CLOSED)
    }

    /// Readable bytes queued.
    pub fn len(&self) -> usize {
        self.inner.lock().dlen
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().dlen == 0
    }

    /// Footprint of everything queued.
    pub fn alloc_len(&self) -> usize {
        self.inner.lock().len
    }

    /// Footprint that can still be queued before flow control starts.
    pub fn window(&self) -> usize {
        let inner = self.inner.lock();
        inner.limit.saturating_sub(inner.len)
    }

    /// Whether a read would find a chain without blocking. A queued zero-length chain counts.
    pub fn can_read(&self) -> bool {
        !self.inner.lock().chains.is_empty()
    }

    pub fn is_flow_controlled(&self) -> bool {
        self.inner.lock().state.contains(State::FLOW)
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// Interrupt a reader blocked waiting for data. It returns having consumed nothing. If no
    /// reader is blocked, the next one to block is interrupted instead.
    pub fn interrupt_reader(&self) {
        self.rr.interrupt();
    }

    /// Interrupt a writer blocked on flow control. The chunk it was writing is already queued.
    /// If no writer is blocked, the next one to block is interrupted instead.
    pub fn interrupt_writer(&self) {
        self.wr.interrupt();
    }

    // must be called without the spin lock held.
    pub(super) fn kick(&self) {
        if let Some(kick) = &self.kick {
            kick.kick();
        }
    }

    // a starved reader became satisfiable. must be called without the spin lock held.
    pub(super) fn wake_readers(&self) {
        self.kick();
        self.rr.wakeup();
    }

    // flow control cleared. must be called without the spin lock held.
    pub(super) fn wake_writers(&self) {
        self.kick();
        self.wr.wakeup();
    }
}

fn close_reason(reason: Option<&str>) -> Arc<str> {
    Arc::from(reason.filter(|reason| !reason.is_empty()).unwrap_or(HUNG_UP))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklist::{Block, HDR_SPACE};
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    fn chain(data: &[u8]) -> Chain {
        Chain::from(Block::copy_from_slice(data))
    }

    #[test]
    fn open_starts_idle_and_starved() {
        let q = Queue::open(1024, Mode::MESSAGE);
        assert_eq!(q.state(), State::MESSAGE | State::STARVED);
        assert_eq!(q.len(), 0);
        assert_eq!(q.window(), 1024);
        assert!(!q.can_read());
        assert!(!q.is_closed());
    }

    #[test]
    fn flow_control_hysteresis() {
        let q = Queue::open(1000, Mode::empty());
        // each chain has a footprint of 100
        for _ in 0..9 {
            q.pass(chain(&[1; 100])).unwrap();
            assert!(!q.is_flow_controlled());
        }
        q.pass(chain(&[1; 100])).unwrap();
        assert_eq!(q.alloc_len(), 1000);
        assert!(q.is_flow_controlled());
        assert_eq!(q.window(), 0);

        // draining to 500 is not below half the limit
        for _ in 0..5 {
            q.get().unwrap();
            assert!(q.is_flow_controlled());
        }
        q.get().unwrap();
        assert_eq!(q.alloc_len(), 400);
        assert!(!q.is_flow_controlled());

        // refilling to just under the limit does not re-assert it
        for _ in 0..5 {
            q.pass(chain(&[1; 100])).unwrap();
        }
        assert_eq!(q.alloc_len(), 900);
        assert!(!q.is_flow_controlled());
    }

    #[test]
    fn close_discards_and_rejects() {
        let q = Queue::open(4096, Mode::empty());
        q.write(b"queued").unwrap();
        q.close(None);
        assert_eq!(q.len(), 0);
        assert_eq!(q.alloc_len(), 0);
        assert!(!q.can_read());
        let err = q.write(b"more").unwrap_err();
        assert_eq!(err.closed_reason(), Some(HUNG_UP));
    }

    #[test]
    fn hangup_keeps_queued_data() {
        let q = Queue::open(4096, Mode::empty());
        q.write(b"queued").unwrap();
        q.hangup(Some("peer gone"));
        assert_eq!(q.len(), 6);
        assert_eq!(q.write(b"more").unwrap_err().closed_reason(), Some("peer gone"));

        let mut buf = [0; 16];
        assert_eq!(q.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"queued");
        assert_eq!(q.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn reopen_after_close_restores_limit() {
        let q = Queue::open(4096, Mode::empty());
        q.write(b"data").unwrap();
        q.set_limit(10);
        q.close(Some("gone"));
        q.reopen();
        assert!(!q.is_closed());
        assert_eq!(q.len(), 0);
        assert_eq!(q.window(), 4096);
        assert!(!q.state().contains(State::STARVED));
        assert_eq!(q.write(b"again").unwrap(), 5);
        assert_eq!(q.len(), 5);
    }

    #[test]
    fn flush_keeps_queue_open() {
        let q = Queue::open(4096, Mode::empty());
        q.write(b"abc").unwrap();
        q.flush();
        assert_eq!(q.len(), 0);
        assert!(!q.is_closed());
        assert_eq!(q.write(b"d").unwrap(), 1);
    }

    #[test]
    fn set_limit_clears_flow_control() {
        let kicks = Arc::new(AtomicUsize::new(0));
        let q = {
            let kicks = Arc::clone(&kicks);
            Queue::builder(HDR_SPACE).kick(move || { kicks.fetch_add(1, SeqCst); }).build()
        };
        q.produce(b"x").unwrap();
        assert!(q.is_flow_controlled());
        let kicked = kicks.load(SeqCst);
        q.set_limit(1 << 20);
        assert!(!q.is_flow_controlled());
        assert_eq!(kicks.load(SeqCst), kicked + 1);
    }

    #[test]
    fn tiny_limit_clears_flow_control_when_drained() {
        let q = Queue::open(1, Mode::empty());
        let mut buf = [0; 4];
        for _ in 0..3 {
            // would block forever if flow control never cleared
            q.write(b"ab").unwrap();
            assert!(q.is_flow_controlled());
            assert_eq!(q.read(&mut buf).unwrap(), 2);
            assert!(!q.is_flow_controlled());
        }
    }

    #[test]
    fn empty_reason_defaults_to_hung_up() {
        let q = Queue::open(4096, Mode::empty());
        q.hangup(Some(""));
        assert_eq!(q.write(b"x").unwrap_err().closed_reason(), Some(HUNG_UP));
    }

    #[test]
    fn free_closes() {
        let q = Queue::open(4096, Mode::empty());
        q.write(b"data").unwrap();
        q.free();
    }
}
