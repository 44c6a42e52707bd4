// sleep/wakeup primitive for blocked readers and writers.
//
// a sleeper evaluates its condition while holding the rendezvous mutex, and a waker takes that
// same mutex before notifying. a waker always makes the condition true (under the queue's spin
// lock) before it calls wakeup, so a wakeup can never fall between a sleeper's check and its
// wait.

use crate::error::InterruptedError;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub(crate) struct Rendez {
    state: Mutex<RendezState>,
    cond: Condvar,
}

struct RendezState {
    // an interrupt has been posted and not yet delivered to a sleeper.
    interrupted: bool,
}

impl Rendez {
    pub(crate) fn new() -> Self {
        Rendez {
            state: Mutex::new(RendezState { interrupted: false }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RendezState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // block until `cond` returns true, or until an interrupt is delivered.
    //
    // `cond` may take the queue's spin lock, but must not block.
    pub(crate) fn sleep<F>(&self, mut cond: F) -> Result<(), InterruptedError>
    where
        F: FnMut() -> bool,
    {
        let mut lock = self.lock();
        loop {
            if cond() {
                return Ok(());
            }
            if lock.interrupted {
                lock.interrupted = false;
                return Err(InterruptedError);
            }
            lock = self.cond.wait(lock).unwrap_or_else(PoisonError::into_inner);
        }
    }

    // wake every sleeper so it re-evaluates its condition.
    pub(crate) fn wakeup(&self) {
        let _lock = self.lock();
        self.cond.notify_all();
    }

    // post an interrupt. it is delivered to one sleeper that finds its condition still false,
    // now or the next time one blocks.
    pub(crate) fn interrupt(&self) {
        let mut lock = self.lock();
        lock.interrupted = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering::SeqCst},
            Arc,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn wakeup_after_condition_change() {
        let rendez = Arc::new(Rendez::new());
        let ready = Arc::new(AtomicBool::new(false));
        let join = {
            let rendez = Arc::clone(&rendez);
            let ready = Arc::clone(&ready);
            thread::spawn(move || rendez.sleep(|| ready.load(SeqCst)))
        };
        thread::sleep(Duration::from_millis(20));
        ready.store(true, SeqCst);
        rendez.wakeup();
        assert_eq!(join.join().unwrap(), Ok(()));
    }

    #[test]
    fn satisfied_condition_never_blocks() {
        let rendez = Rendez::new();
        rendez.interrupt();
        // the posted interrupt stays pending because the sleeper never had to wait
        assert_eq!(rendez.sleep(|| true), Ok(()));
        assert_eq!(rendez.sleep(|| false), Err(InterruptedError));
    }

    #[test]
    fn interrupt_releases_sleeper() {
        let rendez = Arc::new(Rendez::new());
        let join = {
            let rendez = Arc::clone(&rendez);
            thread::spawn(move || rendez.sleep(|| false))
        };
        thread::sleep(Duration::from_millis(20));
        rendez.interrupt();
        assert_eq!(join.join().unwrap(), Err(InterruptedError));
    }
}
