// entry points that add data to a queue.

use super::{shared::Queue, Mode, State};
use crate::error::{FullError, QueueError};
use blocklist::Chain;
use std::sync::PoisonError;

impl Queue {
    /// Copy `data` into a new block and queue it, from interrupt context.
    ///
    /// Never blocks. Errors without queueing if the queue is closed or at its limit. If the
    /// non-sleeping allocation fails the data is dropped and `Ok(0)` returned.
    pub fn produce(&self, data: &[u8]) -> Result<usize, QueueError> {
        {
            let mut inner = self.inner.lock();
            if inner.state.contains(State::CLOSED) {
                let err = QueueError::closed(&inner.err);
                drop(inner);
                self.stats.dropped(data.len());
                return Err(err);
            }
            if inner.len >= inner.limit {
                inner.state.insert(State::FLOW);
                drop(inner);
                self.stats.dropped(data.len());
                return Err(FullError.into());
            }
        }

        let Some(mut block) = self.alloc.try_alloc(data.len()) else {
            self.stats.dropped(data.len());
            debug!(len = data.len(), "produce dropped data, allocation failed");
            return Ok(0);
        };
        block.put_slice(data);

        let mut inner = self.inner.lock();
        if inner.state.contains(State::CLOSED) {
            let err = QueueError::closed(&inner.err);
            drop(inner);
            self.stats.dropped(data.len());
            return Err(err);
        }
        inner.add(block.into());
        let starved = inner.take_starved();
        drop(inner);

        self.stats.produced(data.len());
        if starved {
            self.wake_readers();
        }
        Ok(data.len())
    }

    /// Hand an already built chain to the queue, from interrupt context.
    ///
    /// The chain is consumed whatever the outcome. Errors if the queue is at its limit.
    /// Otherwise returns the chain's footprint, including when the chain was dropped because the
    /// queue is closed.
    pub fn pass(&self, chain: Chain) -> Result<usize, QueueError> {
        self.pass_inner(chain, true)
    }

    /// Like [`pass`](Self::pass), but queues the chain even past the limit.
    pub fn pass_nolimit(&self, chain: Chain) -> Result<usize, QueueError> {
        self.pass_inner(chain, false)
    }

    fn pass_inner(&self, chain: Chain, limited: bool) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock();
        if limited && inner.len >= inner.limit {
            drop(inner);
            self.stats.dropped(chain.len());
            return Err(FullError.into());
        }
        let footprint = chain.alloc_len();
        if inner.state.contains(State::CLOSED) {
            drop(inner);
            self.stats.dropped(chain.len());
            return Ok(footprint);
        }
        inner.add(chain);
        let starved = inner.take_starved();
        drop(inner);

        if starved {
            self.wake_readers();
        }
        Ok(footprint)
    }

    /// Write `data` without ever sleeping, for diagnostic output.
    ///
    /// Data is queued in chunks of at most the atomic write size, and only one chunk in message
    /// mode. Stops silently at the first chunk whose allocation fails, or once the readable
    /// backlog reaches the print backlog threshold, or if the queue is closed. Returns the
    /// number of bytes queued.
    pub fn iwrite(&self, data: &[u8]) -> usize {
        let mut sofar = 0;
        loop {
            let n = (data.len() - sofar).min(self.max_atomic);
            let Some(mut block) = self.alloc.try_alloc(n) else {
                debug!(len = n, "iwrite stopped, allocation failed");
                break;
            };
            block.put_slice(&data[sofar..sofar + n]);

            let mut inner = self.inner.lock();
            if inner.dlen >= self.print_backlog || inner.state.contains(State::CLOSED) {
                drop(inner);
                debug!(backlog = self.print_backlog, "iwrite stopped, backlog full or closed");
                break;
            }
            inner.add(block.into());
            let starved = inner.take_starved();
            drop(inner);

            if starved {
                self.wake_readers();
            }
            sofar += n;
            if sofar >= data.len() || self.mode.contains(Mode::MESSAGE) {
                break;
            }
        }
        self.stats.dropped(data.len() - sofar);
        sofar
    }

    /// Queue a chain from process context, obeying flow control.
    ///
    /// The chain is always queued whole, even if that takes the queue past its limit, so the
    /// write that reaches the limit completes. A write that finds the queue already
    /// flow-controlled queues its chain and then blocks until flow control clears. An interrupt
    /// may cut that wait short, but never before the chain is queued. Closing the queue also
    /// ends the wait, and the write still reports the chain as written even though close has
    /// dropped it. The next write sees the close reason.
    ///
    /// The writer lock orders enqueues only. It is released before the kick capability runs
    /// and before waiting, so a kick may itself write to the queue.
    ///
    /// If the queue is non-blocking and already at its limit, the chain is dropped and counted,
    /// and its length is still returned. On a bypass queue the chain is forwarded and the bypass
    /// capability's accepted count is returned.
    pub fn bwrite(&self, chain: Chain) -> Result<usize, QueueError> {
        if let Some(bypass) = &self.bypass {
            return Ok(bypass.bypass(chain));
        }
        let n = chain.len();

        let wlock = self.wlock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut inner = self.inner.lock();
        if inner.state.contains(State::CLOSED) {
            return Err(QueueError::closed(&inner.err));
        }
        if inner.state.contains(State::NONBLOCK) && inner.len >= inner.limit {
            drop(inner);
            self.stats.dropped(n);
            debug!(len = n, "non-blocking write dropped over limit");
            return Ok(n);
        }
        let throttled = inner.state.contains(State::FLOW);
        inner.add(chain);
        let starved = inner.take_starved();
        drop(inner);
        drop(wlock);

        if starved || self.mode.contains(Mode::KICK) {
            self.kick();
        }
        if starved {
            self.rr.wakeup();
        }

        // wait only after queueing, so that an interrupt can never split the chunk
        if throttled {
            self.wr.sleep(|| {
                let inner = self.inner.lock();
                inner.state.contains(State::NONBLOCK) || inner.writable()
            })?;
        }
        Ok(n)
    }

    /// Write `data` from process context, obeying flow control.
    ///
    /// Data is split into chunks of at most the atomic write size, each queued as its own chain
    /// with [`bwrite`](Self::bwrite). In message mode only the first chunk is written, so a
    /// message must not exceed that size. Block allocation may sleep; its failure is returned.
    pub fn write(&self, data: &[u8]) -> Result<usize, QueueError> {
        let mut sofar = 0;
        let mut accepted = 0;
        loop {
            let n = (data.len() - sofar).min(self.max_atomic);
            let mut block = self.alloc.alloc(n)?;
            block.put_slice(&data[sofar..sofar + n]);
            accepted += self.bwrite(block.into())?;
            sofar += n;
            if sofar >= data.len() || self.mode.contains(Mode::MESSAGE) {
                break;
            }
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InterruptedError;
    use blocklist::{Block, Budget, HDR_SPACE};
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
            Arc, Mutex, OnceLock, Weak,
        },
        thread,
        time::Duration,
    };

    fn chain(data: &[u8]) -> Chain {
        Chain::from(Block::copy_from_slice(data))
    }

    fn counting_queue(limit: usize) -> (Queue, Arc<AtomicUsize>) {
        let kicks = Arc::new(AtomicUsize::new(0));
        let q = {
            let kicks = Arc::clone(&kicks);
            Queue::builder(limit).kick(move || { kicks.fetch_add(1, SeqCst); }).build()
        };
        (q, kicks)
    }

    #[test]
    fn produce_kicks_only_starved_consumer() {
        let (q, kicks) = counting_queue(4096);
        assert_eq!(q.produce(b"one").unwrap(), 3);
        assert_eq!(kicks.load(SeqCst), 1);
        assert_eq!(q.produce(b"two").unwrap(), 3);
        assert_eq!(kicks.load(SeqCst), 1);
        assert_eq!(q.len(), 6);
        assert_eq!(q.stats().produced, 6);
    }

    #[test]
    fn produce_full_drops() {
        let q = Queue::open(HDR_SPACE, Mode::empty());
        assert_eq!(q.produce(b"fits").unwrap(), 4);
        assert_eq!(q.produce(b"over").unwrap_err(), QueueError::Full(FullError));
        assert_eq!(q.len(), 4);
        assert_eq!(q.stats().dropped, 4);
        assert!(q.is_flow_controlled());
    }

    #[test]
    fn produce_allocation_failure_is_silent() {
        let q = Queue::builder(4096).allocator(Budget::new(HDR_SPACE + 4)).build();
        assert_eq!(q.produce(b"abcd").unwrap(), 4);
        assert_eq!(q.produce(b"efgh").unwrap(), 0);
        assert_eq!(q.len(), 4);
        assert_eq!(q.stats().dropped, 4);
    }

    #[test]
    fn produce_into_closed_errors() {
        let q = Queue::open(4096, Mode::empty());
        q.close(Some("down"));
        assert_eq!(q.produce(b"x").unwrap_err().closed_reason(), Some("down"));
    }

    #[test]
    fn pass_reports_footprint_even_when_closed() {
        let q = Queue::open(4096, Mode::empty());
        assert_eq!(q.pass(chain(b"abc")).unwrap(), 3);
        q.hangup(None);
        assert_eq!(q.pass(chain(b"defg")).unwrap(), 4);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn pass_nolimit_ignores_limit() {
        let q = Queue::open(4, Mode::empty());
        q.pass(chain(b"abcd")).unwrap();
        assert_eq!(q.pass(chain(b"efgh")).unwrap_err(), QueueError::Full(FullError));
        assert_eq!(q.pass_nolimit(chain(b"efgh")).unwrap(), 4);
        assert_eq!(q.len(), 8);
    }

    #[test]
    fn iwrite_stops_at_backlog() {
        let q = Queue::builder(1 << 20).max_atomic(100).print_backlog(250).build();
        assert_eq!(q.iwrite(&[7; 1000]), 300);
        assert_eq!(q.len(), 300);
        assert_eq!(q.iwrite(b"more"), 0);
        assert_eq!(q.stats().dropped, 704);
    }

    #[test]
    fn iwrite_message_mode_writes_one_chunk() {
        let q = Queue::builder(1 << 20).message().max_atomic(100).build();
        assert_eq!(q.iwrite(&[7; 1000]), 100);
        assert_eq!(q.len(), 100);
    }

    #[test]
    fn write_splits_into_atomic_chunks() {
        let q = Queue::builder(1 << 20).max_atomic(100).build();
        assert_eq!(q.write(&[1; 250]).unwrap(), 250);
        let sizes: Vec<usize> = std::iter::from_fn(|| q.get()).map(|chain| chain.len()).collect();
        assert_eq!(sizes, [100, 100, 50]);
    }

    #[test]
    fn write_message_mode_sends_first_chunk() {
        let q = Queue::builder(1 << 20).message().max_atomic(100).build();
        assert_eq!(q.write(&[1; 250]).unwrap(), 100);
        assert_eq!(q.len(), 100);
    }

    #[test]
    fn write_allocation_failure_propagates() {
        let q = Queue::builder(4096).allocator(Budget::new(0)).build();
        assert!(matches!(q.write(b"x").unwrap_err(), QueueError::Alloc(_)));
    }

    #[test]
    fn nonblocking_write_drops_over_limit() {
        let q = Queue::open(HDR_SPACE + 10, Mode::empty());
        q.set_nonblocking(true);
        assert_eq!(q.write(&[1; 10]).unwrap(), 10);
        // at the limit now, so the next write is dropped but still reported
        assert_eq!(q.write(&[2; 10]).unwrap(), 10);
        assert_eq!(q.len(), 10);
        assert_eq!(q.stats().dropped, 10);
    }

    #[test]
    fn kick_mode_kicks_every_write() {
        let kicks = Arc::new(AtomicUsize::new(0));
        let q = {
            let kicks = Arc::clone(&kicks);
            Queue::builder(4096).kick_always().kick(move || { kicks.fetch_add(1, SeqCst); }).build()
        };
        for _ in 0..3 {
            q.write(b"x").unwrap();
        }
        assert_eq!(kicks.load(SeqCst), 3);
    }

    #[test]
    fn bypass_forwards_without_buffering() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let q = {
            let seen = Arc::clone(&seen);
            Queue::open_bypass(move |chain: Chain| {
                let n = chain.len();
                seen.lock().unwrap().extend(chain.to_vec());
                n / 2
            })
        };
        assert_eq!(q.write(b"abcd").unwrap(), 2);
        assert_eq!(q.len(), 0);
        assert!(!q.can_read());
        assert_eq!(&seen.lock().unwrap()[..], b"abcd");
    }

    #[test]
    fn write_past_limit_throttles_next_write() {
        let q = Arc::new(Queue::open(4096, Mode::empty()));
        assert_eq!(q.write(&[1; 3000]).unwrap(), 3000);
        assert_eq!(q.len(), 3000);
        assert!(!q.is_flow_controlled());
        assert_eq!(q.write(&[2; 2000]).unwrap(), 2000);
        assert!(q.is_flow_controlled());

        let done = Arc::new(AtomicBool::new(false));
        let join = {
            let q = Arc::clone(&q);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let n = q.write(&[3; 100]).unwrap();
                done.store(true, SeqCst);
                n
            })
        };

        // the third write is queued in full, then its writer blocks
        while q.len() < 5100 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(SeqCst));

        // draining the first chain leaves a footprint of 2228, not yet below 2048
        let mut buf = [0; 3000];
        assert_eq!(q.read(&mut buf).unwrap(), 3000);
        assert_eq!(q.alloc_len(), 2 * HDR_SPACE + 2100);
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(SeqCst));
        assert!(q.is_flow_controlled());

        assert_eq!(q.read(&mut buf).unwrap(), 2000);
        assert_eq!(join.join().unwrap(), 100);
        assert!(!q.is_flow_controlled());
        assert_eq!(q.read(&mut buf).unwrap(), 100);
    }

    #[test]
    fn close_releases_blocked_writer() {
        let q = Arc::new(Queue::open(HDR_SPACE, Mode::empty()));
        q.write(b"fills").unwrap();
        let join = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.write(b"blocks"))
        };
        while q.len() < 11 {
            thread::yield_now();
        }
        q.close(None);
        assert_eq!(join.join().unwrap().unwrap(), 6);
    }

    #[test]
    fn nonblocking_releases_blocked_writer() {
        let q = Arc::new(Queue::open(HDR_SPACE, Mode::empty()));
        q.write(b"fills").unwrap();
        let join = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.write(b"blocks"))
        };
        while q.len() < 11 {
            thread::yield_now();
        }
        thread::sleep(Duration::from_millis(20));
        q.set_nonblocking(true);
        assert_eq!(join.join().unwrap().unwrap(), 6);
        assert!(q.is_flow_controlled());
        assert_eq!(q.len(), 11);
    }

    #[test]
    fn kick_may_write_to_same_queue() {
        let cell: Arc<OnceLock<Weak<Queue>>> = Arc::new(OnceLock::new());
        let armed = Arc::new(AtomicBool::new(true));
        let q = {
            let cell = Arc::clone(&cell);
            let armed = Arc::clone(&armed);
            Arc::new(
                Queue::builder(4096)
                    .kick(move || {
                        if armed.swap(false, SeqCst) {
                            if let Some(q) = cell.get().and_then(Weak::upgrade) {
                                q.write(b"echo").unwrap();
                            }
                        }
                    })
                    .build(),
            )
        };
        cell.set(Arc::downgrade(&q)).unwrap();

        // the first write finds the queue starved, so it kicks
        assert_eq!(q.write(b"x").unwrap(), 1);
        assert!(!armed.load(SeqCst));
        assert_eq!(q.bread(16).unwrap().unwrap(), b"x"[..]);
        assert_eq!(q.bread(16).unwrap().unwrap(), b"echo"[..]);
    }

    #[test]
    fn interrupted_writer_has_queued_its_chunk() {
        let q = Arc::new(Queue::open(HDR_SPACE, Mode::empty()));
        q.write(b"fills").unwrap();
        let join = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.write(b"chunk"))
        };
        while q.len() < 10 {
            thread::yield_now();
        }
        q.interrupt_writer();
        assert_eq!(join.join().unwrap().unwrap_err(), QueueError::Interrupted(InterruptedError));
        assert_eq!(q.len(), 10);
    }
}
