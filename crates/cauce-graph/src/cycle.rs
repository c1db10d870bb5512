//! Per-cycle parameters and results.
//!
//! One cycle corresponds to one audio callback period. The callback thread
//! records the cycle's parameters before kicking off the worker pool; every
//! node reads them through [`CycleContext`] and reports a [`ProcessOutcome`],
//! which the scheduler aggregates into the [`CycleResult`] returned to the
//! callback.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

/// Parameters of the cycle currently being processed.
///
/// Passed by reference to every node's `process()` call.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    /// Number of audio frames to process this cycle.
    pub n_frames: u32,
    /// First sample of the cycle on the timeline.
    pub start_sample: i64,
    /// One past the last sample of the cycle on the timeline.
    pub end_sample: i64,
    /// `true` for a rolling-transport cycle, `false` for a no-roll cycle.
    pub rolling: bool,
    /// For no-roll cycles: whether non-real-time work is pending upstream
    /// (nodes may use this to keep ports flushed without producing output).
    pub non_rt_pending: bool,
}

/// What a single node reports back from its `process()` call.
///
/// A nonzero status does not stop the cycle; it is folded into the cycle's
/// aggregate status. Nodes are expected to absorb DSP faults themselves
/// (silence on failure) so the dependency accounting stays intact.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOutcome {
    /// Zero on success; any nonzero value is surfaced in [`CycleResult`].
    pub status: i32,
    /// Request deferred disk I/O (ring-buffer refill/flush) after the cycle.
    pub needs_disk_io: bool,
}

/// Aggregate result of one full graph cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleResult {
    /// Zero if every node reported success; otherwise the status of one of
    /// the failing nodes (which one is unspecified).
    pub status: i32,
    /// `true` if any node requested deferred disk I/O this cycle.
    pub needs_disk_io: bool,
}

/// Atomic storage for the active cycle's parameters.
///
/// Written by the callback thread before the start signal, read by workers
/// during the cycle; the start-semaphore handshake orders the two.
#[derive(Default)]
pub(crate) struct CycleParams {
    n_frames: AtomicU32,
    start_sample: AtomicI64,
    end_sample: AtomicI64,
    rolling: AtomicBool,
    non_rt_pending: AtomicBool,
}

impl CycleParams {
    pub(crate) fn store(&self, ctx: CycleContext) {
        self.n_frames.store(ctx.n_frames, Ordering::Relaxed);
        self.start_sample.store(ctx.start_sample, Ordering::Relaxed);
        self.end_sample.store(ctx.end_sample, Ordering::Relaxed);
        self.rolling.store(ctx.rolling, Ordering::Relaxed);
        self.non_rt_pending.store(ctx.non_rt_pending, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CycleContext {
        CycleContext {
            n_frames: self.n_frames.load(Ordering::Relaxed),
            start_sample: self.start_sample.load(Ordering::Relaxed),
            end_sample: self.end_sample.load(Ordering::Relaxed),
            rolling: self.rolling.load(Ordering::Relaxed),
            non_rt_pending: self.non_rt_pending.load(Ordering::Relaxed),
        }
    }
}
