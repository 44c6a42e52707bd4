// implementation of the queue.
//
// the architecture is as such:
//
//                    Queue
//                      |
//                      |------ a spin lock around `Inner`: the FIFO of chains, the byte counters,
//                      |       the state bits, the EOF counter and the close reason. it never
//                      |       blocks and every critical section under it is short, so it may be
//                      |       taken from interrupt or driver-callback context.
//                      |
//                      |------ a reader mutex and a writer mutex. these serialize readers among
//                      |       themselves and enqueues among themselves, so that a read assembled
//                      |       from several chains looks atomic to peers without holding the spin
//                      |       lock for long. neither is held while the kick capability runs.
//                      |
//                      \------ a rendezvous for readers waiting for data and one for writers
//                              waiting for flow control to clear.
//
// lock order is always: reader/writer mutex, then rendezvous, then spin lock. the spin lock is
// released before anything that may block or fault: sleeping allocation, copying into a
// blocking reader's buffer, waking another thread, calling the kick capability. the interrupt
// paths copy under the spin lock, since their callers hand in memory that cannot fault.
//
// the organization of these modules is as such:
//
//      rendez: the opaque sleep/wakeup primitive.
//
//      shared: the shared state, construction and the control/introspection surface.
//
//      produce<----shared: non-blocking and blocking entry points that add data.
//
//      consume<----shared: non-blocking and blocking entry points that remove data.

use bitflags::bitflags;
use blocklist::Chain;

mod consume;
mod produce;
mod rendez;
mod shared;

pub use self::shared::{Queue, HUNG_UP};

bitflags! {
    /// Discipline a queue is opened with.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct Mode: u8 {
        /// Chain boundaries are read boundaries. A read returns at most one chain, and whatever
        /// of it does not fit in the read buffer is discarded.
        const MESSAGE = 1 << 0;
        /// Zero-length chains are dropped on sight, and a read gathers as many whole chains as
        /// fit in its buffer.
        const COALESCE = 1 << 1;
        /// Invoke the kick capability after every blocking write.
        const KICK = 1 << 2;
    }
}

bitflags! {
    /// Snapshot of a queue's state bits.
    ///
    /// The low bits mirror [`Mode`].
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct State: u8 {
        const MESSAGE = Mode::MESSAGE.bits();
        const COALESCE = Mode::COALESCE.bits();
        const KICK = Mode::KICK.bits();
        /// Closed or hung up. New writes are rejected.
        const CLOSED = 1 << 3;
        /// Queued footprint reached the limit and has not yet fallen below half of it.
        const FLOW = 1 << 4;
        /// A consumer found the queue empty and wants the next producer to wake it.
        const STARVED = 1 << 5;
        /// Writes over the limit are dropped instead of blocking.
        const NONBLOCK = 1 << 6;
    }
}

impl From<Mode> for State {
    fn from(mode: Mode) -> Self {
        State::from_bits_retain(mode.bits())
    }
}

/// Capability used to prod the external party feeding or draining a queue, such as a device
/// driver.
///
/// Invoked synchronously and outside of every queue lock, whenever flow control clears or a
/// starved consumer becomes satisfiable.
pub trait Kick: Send + Sync {
    fn kick(&self);
}

impl<F: Fn() + Send + Sync> Kick for F {
    fn kick(&self) {
        self()
    }
}

/// Capability that receives every chain written to a bypass queue, which buffers nothing.
///
/// Returns the number of bytes it accepted.
pub trait Bypass: Send + Sync {
    fn bypass(&self, chain: Chain) -> usize;
}

impl<F: Fn(Chain) -> usize + Send + Sync> Bypass for F {
    fn bypass(&self, chain: Chain) -> usize {
        self(chain)
    }
}
