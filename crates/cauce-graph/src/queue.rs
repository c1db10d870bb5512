//! Lock-free bounded MPMC queue used as the scheduler's trigger queue.
//!
//! [`BoundedQueue`] is a fixed-capacity circular buffer supporting concurrent
//! `push_back`/`pop_front` from any number of threads, after Dmitry Vyukov's
//! bounded MPMC design: every slot carries a sequence number that encodes
//! whether it is free to write or ready to read, and producers/consumers
//! claim slots with a CAS loop on a shared cursor.
//!
//! Capacity is always a power of two so that index masking replaces modulo.
//! There is no blocking and no heap allocation after construction; on the
//! audio path the queue is sized once (generously) and never grown.
//!
//! Items are not strictly FIFO across producers, but each slot's
//! publish/consume pair is ordered (Release store, Acquire load), so a popped
//! item is always fully written, and no item is lost or delivered twice while
//! the queue stays within its reserved capacity.

// The one module in this workspace that needs raw slot storage; everything
// else stays under the workspace-wide unsafe_code deny.
#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    /// Encodes slot state relative to the cursors: `seq == pos` means free to
    /// write at `pos`, `seq == pos + 1` means readable at `pos`.
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity lock-free multi-producer/multi-consumer queue.
///
/// `reserve` and `clear` take `&mut self`: exclusive access is the caller's
/// guarantee that no concurrent push/pop is in flight, checked by the borrow
/// checker instead of a comment.
pub struct BoundedQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
}

// SAFETY: slots are plain storage; all cross-thread hand-off goes through the
// per-slot sequence numbers (Release on publish, Acquire on claim), so an item
// is only ever read after its write completed. T itself crosses threads.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
// SAFETY: see above — shared access is mediated entirely by atomics.
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at least `capacity` items.
    ///
    /// The actual capacity is the next power of two, minimum 2.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(2).next_power_of_two();
        let buffer = (0..cap)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            mask: cap - 1,
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
        }
    }

    /// Returns the number of items the queue can hold.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Grows capacity to the next power of two >= `n`.
    ///
    /// Existing items are carried over. Exclusive access (`&mut self`) rules
    /// out concurrent push/pop for the duration.
    pub fn reserve(&mut self, n: usize) {
        if n <= self.capacity() {
            return;
        }
        let mut carried = Vec::with_capacity(self.capacity());
        while let Some(item) = self.pop_front() {
            carried.push(item);
        }
        *self = Self::new(n);
        for item in carried {
            let pushed = self.push_back(item);
            debug_assert!(pushed);
        }
    }

    /// Resets the queue to empty, dropping any queued items.
    pub fn clear(&mut self) {
        while self.pop_front().is_some() {}
        for (i, slot) in self.buffer.iter().enumerate() {
            slot.sequence.store(i, Ordering::Relaxed);
        }
        self.enqueue_pos.store(0, Ordering::Relaxed);
        self.dequeue_pos.store(0, Ordering::Relaxed);
    }

    /// Attempts to enqueue `item`.
    ///
    /// Returns `false` only when the queue is full relative to its reserved
    /// capacity. Callers size the queue to the maximum number of
    /// concurrently-ready nodes, so a `false` here indicates a sizing bug
    /// upstream, not a runtime condition to handle.
    pub fn push_back(&self, item: T) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = seq as isize - pos as isize;
            if dif == 0 {
                // Slot is free at this position; try to claim it.
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS above made us the unique writer of
                        // this slot for cursor value `pos`; no reader touches
                        // it until the Release store below publishes it.
                        unsafe {
                            (*slot.value.get()).write(item);
                        }
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // The slot is still occupied by an item a full lap behind:
                // the queue is full.
                return false;
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to dequeue an item. Non-blocking; `None` when nothing is
    /// currently available.
    pub fn pop_front(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = seq as isize - pos.wrapping_add(1) as isize;
            if dif == 0 {
                // Slot holds a published item for this position; claim it.
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS made us the unique reader of this
                        // slot; the Acquire load of `sequence` synchronized
                        // with the producer's Release store, so the value is
                        // fully written.
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // Release anything still queued (e.g. node Arcs at engine teardown).
        while self.pop_front().is_some() {}
    }
}
