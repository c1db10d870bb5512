//! Counting semaphore for worker parking and the per-cycle handshake.

use parking_lot::{Condvar, Mutex};

/// Counting semaphore built on a parking_lot mutex + condvar.
///
/// Used in three places: parking idle workers (`execution`), waking the pool
/// main loop from the audio callback (`callback_start`), and reporting cycle
/// completion back to the audio callback (`callback_done`).
pub(crate) struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub(crate) fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    /// Increments the counter and wakes one waiter.
    pub(crate) fn signal(&self) {
        let mut count = self.count.lock();
        *count += 1;
        drop(count);
        self.available.notify_one();
    }

    /// Blocks until the counter is positive, then decrements it.
    pub(crate) fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }
}
