//! Ad-hoc tasks scheduled through the real-time worker pool.

use std::sync::Arc;

use crate::node::{ChainId, ProcessNode};
use crate::scheduler::Graph;

/// Wraps a zero-argument operation as a schedulable node.
///
/// Used for maintenance work that must run inside the real-time pool but is
/// not part of the routing topology: an `RTTask` has no upstream dependency
/// (it is always an input node, so `prep` is a no-op) and no downstream
/// consumers (completion is reported directly to the scheduler's terminal
/// counter, bypassing activation-set notification).
///
/// Submit batches with
/// [`GraphScheduler::process_tasks`](crate::GraphScheduler::process_tasks).
pub struct RTTask {
    op: Box<dyn Fn() + Send + Sync>,
}

impl RTTask {
    /// Wraps `op` for execution on the worker pool.
    pub fn new(op: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { op: Box::new(op) })
    }
}

impl ProcessNode for RTTask {
    fn prep(&self, _chain: ChainId) {}

    fn run(&self, _chain: ChainId, graph: &Graph) {
        (self.op)();
        graph.reached_terminal_node();
    }
}
