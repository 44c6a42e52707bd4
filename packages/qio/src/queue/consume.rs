// entry points that remove data from a queue.

use super::{
    shared::{Inner, Queue},
    Mode, State,
};
use crate::error::QueueError;
use blocklist::{Block, Chain};
use smallvec::SmallVec;
use std::{mem, sync::PoisonError};

impl Queue {
    /// Dequeue the head chain whole, from interrupt context.
    ///
    /// Never blocks. If the queue is empty, marks it starved so that the next producer kicks,
    /// and returns `None`.
    pub fn get(&self) -> Option<Chain> {
        let mut inner = self.inner.lock();
        let Some(chain) = inner.remove() else {
            inner.state.insert(State::STARVED);
            return None;
        };
        let wake = inner.take_flow();
        drop(inner);

        if wake {
            self.wake_writers();
        }
        Some(chain)
    }

    /// Copy bytes from the head chain into `buf`, from interrupt context.
    ///
    /// Never blocks. Zero-length chains at the head are dropped first. In message mode the head
    /// chain is removed whole, even if it did not fit. Otherwise any remainder stays at the
    /// head. If the queue holds no data, marks it starved and returns `None`.
    pub fn consume(&self, buf: &mut [u8]) -> Option<usize> {
        let mut tofree: SmallVec<[Chain; 2]> = SmallVec::new();
        let mut inner = self.inner.lock();
        while inner.chains.front().is_some_and(Chain::is_empty) {
            tofree.extend(inner.remove());
        }
        if inner.chains.is_empty() {
            inner.state.insert(State::STARVED);
            return None;
        }

        let n = inner.consume_front(|chain| chain.read_into(buf));
        if self.mode.contains(Mode::MESSAGE) || inner.chains.front().is_some_and(Chain::is_empty) {
            tofree.extend(inner.remove());
        }
        let wake = inner.take_flow();
        drop(inner);

        self.stats.consumed(n);
        drop(tofree);
        if wake {
            self.wake_writers();
        }
        Some(n)
    }

    /// Throw away up to `n` queued bytes without copying them. Returns the number of bytes
    /// thrown away.
    ///
    /// Chains left without readable bytes are removed, message boundaries notwithstanding.
    pub fn discard(&self, n: usize) -> usize {
        let mut tofree: SmallVec<[Chain; 4]> = SmallVec::new();
        let mut inner = self.inner.lock();
        let mut discarded = 0;
        while discarded < n && !inner.chains.is_empty() {
            discarded += inner.consume_front(|chain| chain.discard(n - discarded));
            if inner.chains.front().is_some_and(Chain::is_empty) {
                tofree.extend(inner.remove());
            }
        }
        let wake = inner.take_flow();
        drop(inner);

        drop(tofree);
        if wake {
            self.wake_writers();
        }
        discarded
    }

    /// Copy up to `len` queued bytes, starting `offset` bytes past the head, into a new block.
    /// The queue is left untouched.
    ///
    /// The block is short if fewer bytes are queued past `offset`. Allocation happens before
    /// the queue is locked, and may sleep.
    pub fn copy(&self, len: usize, offset: usize) -> Result<Block, QueueError> {
        let mut out = self.alloc.alloc(len)?;
        let inner = self.inner.lock();
        let mut skip = offset;
        for block in inner.chains.iter().flat_map(|chain| chain.blocks()) {
            if out.len() == len {
                break;
            }
            if skip >= block.len() {
                skip -= block.len();
                continue;
            }
            let want = (len - out.len()).min(block.len() - skip);
            out.put_slice(&block[skip..skip + want]);
            skip = 0;
        }
        drop(inner);

        self.stats.copied(out.len());
        Ok(out)
    }

    /// Read from the queue into `buf`, blocking until data is available. Returns the number of
    /// bytes read.
    ///
    /// Reads the head chain, or in coalesce mode the head chain plus as many following chains
    /// as fit whole. Whatever of the last chain does not fit is put back at the head, or in
    /// message mode discarded.
    ///
    /// Once the queue is closed and drained, the first few reads return 0 for end-of-file, and
    /// later ones return the close reason as an error.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, QueueError> {
        let rlock = self.rlock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((mut inner, first)) = self.next_chain()? else { return Ok(0) };

        let mut taken: SmallVec<[Chain; 4]> = SmallVec::new();
        let mut n = first.len();
        taken.push(first);
        if self.mode.contains(Mode::COALESCE) {
            while let Some(next) = inner.chains.front() {
                if n + next.len() > buf.len() {
                    break;
                }
                n += next.len();
                taken.extend(inner.remove());
            }
        }
        drop(inner);

        // copy with no spin lock held, since `buf` may be slow to write to
        let mut copied = 0;
        let mut remainder = None;
        for mut chain in taken {
            copied += chain.read_into(&mut buf[copied..]);
            if !chain.is_empty() {
                remainder = Some(chain);
            }
        }
        trace!(copied, "read");

        let mut inner = self.inner.lock();
        if !self.mode.contains(Mode::MESSAGE) {
            if let Some(chain) = remainder.take() {
                inner.put_back(chain);
            }
        }
        let wake = inner.take_flow();
        drop(inner);
        drop(rlock);

        drop(remainder);
        if wake {
            self.wake_writers();
        }
        Ok(copied)
    }

    /// Dequeue one chain of at most `len` bytes, blocking until data is available.
    ///
    /// A longer head chain is split without copying. The rest is put back at the head, or in
    /// message mode discarded. Returns `None` for end-of-file, under the same rules as
    /// [`read`](Self::read).
    pub fn bread(&self, len: usize) -> Result<Option<Chain>, QueueError> {
        let rlock = self.rlock.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((mut inner, mut chain)) = self.next_chain()? else { return Ok(None) };

        let mut remainder = None;
        if chain.len() > len {
            let head = chain.split_to(len);
            let rest = mem::replace(&mut chain, head);
            if self.mode.contains(Mode::MESSAGE) {
                remainder = Some(rest);
            } else {
                inner.put_back(rest);
            }
        }
        let wake = inner.take_flow();
        drop(inner);
        drop(rlock);

        drop(remainder);
        if wake {
            self.wake_writers();
        }
        Ok(Some(chain))
    }

    // wait for a chain to dequeue, with the reader lock held. returns it along with the spin
    // guard, or `None` for end-of-file.
    fn next_chain(&self) -> Result<Option<(spin::MutexGuard<'_, Inner>, Chain)>, QueueError> {
        loop {
            let mut inner = self.inner.lock();
            if let Some(chain) = inner.remove() {
                if self.mode.contains(Mode::COALESCE) && chain.is_empty() {
                    // zero-length chains just go away when coalescing
                    drop(inner);
                    drop(chain);
                    continue;
                }
                return Ok(Some((inner, chain)));
            }
            if inner.state.contains(State::CLOSED) {
                inner.eof = inner.eof.saturating_add(1);
                if inner.eof > self.eof_reads {
                    return Err(QueueError::closed(&inner.err));
                }
                return Ok(None);
            }
            inner.state.insert(State::STARVED);
            drop(inner);
            // a chain that woke us may be taken by an interrupt-path consumer before we look, so
            // every empty check re-asserts starvation for the next producer to see
            self.rr.sleep(|| {
                let mut inner = self.inner.lock();
                if inner.readable() {
                    return true;
                }
                inner.state.insert(State::STARVED);
                false
            })?;
        }
    }
}
