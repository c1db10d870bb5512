//! Parallel routing-graph scheduler for the cauce audio engine.
//!
//! This crate executes a directed acyclic graph of audio-processing nodes —
//! one per signal-routing entity — within a single audio callback, using a
//! fixed pool of worker threads, a lock-free trigger queue and atomic
//! dependency counting. Guarantees on the audio path: no locks (one
//! non-blocking try-lock aside), no allocation in steady state, every node
//! runs exactly once per cycle and only after all of its upstream nodes.
//!
//! # Architecture
//!
//! - [`BoundedQueue`] — fixed-capacity lock-free MPMC ring, the "ready to
//!   run" queue.
//! - [`GraphNode`] — a routing entity plus its dependency counter and
//!   per-chain activation sets; DSP work stays opaque behind
//!   [`RouteProcessor`].
//! - [`RTTask`] — wraps ad-hoc maintenance work as a schedulable node.
//! - [`GraphScheduler`] — owns the worker pool, the double-buffered
//!   topology chains, and the per-cycle handshake with the audio callback.
//!
//! Topology rebuilds happen off the real-time path: the control thread calls
//! [`GraphScheduler::rechain`] with a node list and a precomputed
//! [`GraphEdges`] relation; the pool swaps to the new chain at the next
//! cycle boundary.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cauce_graph::{GraphEdges, GraphNode, GraphScheduler, SchedulerConfig};
//!
//! let scheduler = GraphScheduler::new(&SchedulerConfig::default())?;
//!
//! let src = GraphNode::new(Arc::new(source));
//! let out = GraphNode::new(Arc::new(master));
//! let mut edges = GraphEdges::new();
//! edges.add(&src, &out);
//! scheduler.rechain(&[src, out], &edges);
//!
//! // Once per audio callback:
//! let result = scheduler.process_routes(n_frames, start, end);
//! ```

mod cycle;
mod edges;
mod node;
mod queue;
mod rt_task;
mod scheduler;
mod sync;

pub use cycle::{CycleContext, CycleResult, ProcessOutcome};
pub use edges::GraphEdges;
pub use node::{ChainId, GraphNode, ProcessNode, RouteProcessor};
pub use queue::BoundedQueue;
pub use rt_task::RTTask;
pub use scheduler::{Graph, GraphScheduler, SchedulerConfig};

/// Error types for scheduler construction and diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A worker thread could not be created; the scheduler cannot operate.
    #[error("failed to spawn graph worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// The supplied configuration is unusable.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// Writing a topology plot failed.
    #[error("failed to write graph plot: {0}")]
    PlotIo(#[from] std::io::Error),
}

/// Convenience result type for scheduler operations.
pub type Result<T> = std::result::Result<T, Error>;
