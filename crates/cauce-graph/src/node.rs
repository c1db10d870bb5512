//! Graph nodes and the dependency-counting protocol.
//!
//! A [`GraphNode`] wraps one signal-routing entity (its DSP work is opaque
//! behind [`RouteProcessor`]) together with the scheduling state the worker
//! pool needs: a live atomic dependency counter and, per topology chain, an
//! initial dependency count plus the set of downstream nodes to notify on
//! completion (the *activation set*).
//!
//! Per-chain state is double-buffered: each of the two chain slots holds an
//! immutable `NodeChain` snapshot behind an `ArcSwap`, so rebuilding one
//! chain never disturbs readers of the other and real-time workers never
//! block or observe a partially-updated map.
//!
//! Node state machine, per cycle:
//!
//! - **Armed** — `prep(chain)` resets the live counter from the chain's
//!   initial count.
//! - **Waiting** — counter > 0.
//! - **Runnable** — an upstream completion decremented the counter to zero;
//!   the thread that observed the zero hands the node to the trigger queue.
//! - **Running** — a worker popped the node and is executing `process()`.
//! - **Finished** — every member of the activation set is triggered, or (for
//!   an empty set) the node reports terminal completion to the scheduler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use arc_swap::ArcSwap;

use crate::cycle::{CycleContext, ProcessOutcome};
use crate::scheduler::Graph;

/// Identifies one of the two double-buffered topology chain slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub(crate) usize);

impl ChainId {
    /// The first chain slot.
    pub const A: ChainId = ChainId(0);
    /// The second chain slot.
    pub const B: ChainId = ChainId(1);

    /// Raw slot index (0 or 1).
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// The opaque per-node DSP seam.
///
/// Implementations must not block or allocate inside `process()`, and must
/// absorb their own DSP faults (mute/silence on failure) — an escaped panic
/// mid-graph would corrupt the dependency accounting for the rest of the
/// cycle. The scheduler guarantees `process()` is invoked at most once per
/// cycle, and only after every upstream node completed; mutable DSP state is
/// typically kept behind an uncontended lock or cell inside the implementor.
pub trait RouteProcessor: Send + Sync {
    /// Performs this node's work for the current cycle.
    fn process(&self, cycle: &CycleContext) -> ProcessOutcome;

    /// Human-readable name, used by `plot()`/`dump()` diagnostics.
    fn name(&self) -> &str;
}

/// A unit of scheduling in the worker pool.
///
/// Implemented by [`GraphNode`] (dependency-counted routing nodes) and
/// [`RTTask`](crate::RTTask) (ad-hoc maintenance work).
pub trait ProcessNode: Send + Sync {
    /// Resets per-cycle state for `chain`. Called once per node per cycle
    /// before any trigger is seeded.
    fn prep(&self, chain: ChainId);

    /// Executes the node's work and propagates completion through `graph`.
    fn run(&self, chain: ChainId, graph: &Graph);
}

/// Per-chain scheduling state of one node: how many upstream nodes feed it
/// and which downstream nodes it must notify.
#[derive(Default)]
pub(crate) struct NodeChain {
    pub(crate) init_refcount: u32,
    pub(crate) activation_set: Vec<Arc<GraphNode>>,
}

/// A signal-routing entity as seen by the scheduler.
///
/// Owned externally and referenced through `Arc` handles, so the scheduler
/// never dangles even if the owner drops its copy mid-cycle.
pub struct GraphNode {
    processor: Arc<dyn RouteProcessor>,
    /// Live dependency counter for the cycle in flight.
    refcount: AtomicU32,
    /// Immutable per-chain snapshots, one per double-buffered slot.
    chains: [ArcSwap<NodeChain>; 2],
}

impl GraphNode {
    /// Wraps `processor` as a schedulable node.
    pub fn new(processor: Arc<dyn RouteProcessor>) -> Arc<Self> {
        Arc::new(Self {
            processor,
            refcount: AtomicU32::new(0),
            chains: [
                ArcSwap::from_pointee(NodeChain::default()),
                ArcSwap::from_pointee(NodeChain::default()),
            ],
        })
    }

    /// The node's diagnostic name (delegates to the processor).
    pub fn name(&self) -> &str {
        self.processor.name()
    }

    /// Number of distinct upstream nodes feeding this node in `chain`.
    pub fn init_refcount(&self, chain: ChainId) -> u32 {
        self.chains[chain.index()].load().init_refcount
    }

    /// Snapshot of the downstream nodes notified on completion in `chain`.
    pub fn activation_set(&self, chain: ChainId) -> Vec<Arc<GraphNode>> {
        self.chains[chain.index()].load().activation_set.clone()
    }

    /// Installs a freshly built chain snapshot. Only called by `rechain`
    /// while it holds the swap lock, and only for the setup slot.
    pub(crate) fn install_chain(&self, chain: ChainId, plan: NodeChain) {
        self.chains[chain.index()].store(Arc::new(plan));
    }

    /// Records that one upstream dependency of `this` completed.
    ///
    /// The decrement-check-zero contract lives here and nowhere else: the
    /// thread that takes the counter to exactly zero is the one that hands
    /// the node to the trigger queue.
    pub(crate) fn trigger(this: &Arc<Self>, graph: &Graph) {
        let prev = this.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "node triggered more often than it has dependencies");
        if prev == 1 {
            let node: Arc<dyn ProcessNode> = this.clone();
            graph.trigger(node);
        }
    }
}

impl ProcessNode for GraphNode {
    fn prep(&self, chain: ChainId) {
        let plan = self.chains[chain.index()].load();
        self.refcount.store(plan.init_refcount, Ordering::Release);
    }

    fn run(&self, chain: ChainId, graph: &Graph) {
        let cycle = graph.cycle();
        let outcome = self.processor.process(&cycle);
        graph.absorb_outcome(outcome);

        let plan = self.chains[chain.index()].load();
        if plan.activation_set.is_empty() {
            graph.reached_terminal_node();
        } else {
            for downstream in &plan.activation_set {
                GraphNode::trigger(downstream, graph);
            }
        }
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("name", &self.name())
            .field("refcount", &self.refcount.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
