//! The worker pool and per-cycle scheduling protocol.
//!
//! [`GraphScheduler`] owns a fixed pool of worker threads and the shared
//! [`Graph`] core they cooperate through. Once per audio callback period the
//! driver calls [`process_routes`](GraphScheduler::process_routes) (or
//! [`routes_no_roll`](GraphScheduler::routes_no_roll)); the pool executes the
//! current topology chain in dependency order across all cores and the call
//! returns when the cycle is complete. A control thread may rebuild the
//! topology at any time with [`rechain`](GraphScheduler::rechain); the swap
//! to the new chain happens only at a cycle boundary, never mid-cycle.
//!
//! # Protocol
//!
//! Three counting semaphores drive the handshake: `callback_start` (the
//! driver kicks off a cycle), `callback_done` (the pool reports completion),
//! and `execution` (idle workers park here). Workers pop ready nodes from the
//! lock-free trigger queue; a finishing node decrements its dependents'
//! counters and enqueues any that reach zero. When the last terminal node
//! completes, the finishing thread signals the driver, waits for the rest of
//! the pool to park, then blocks until the next cycle start — at which point
//! it performs the safe-point chain swap and seeds the next trigger set.
//!
//! Nothing on this path blocks on a held lock and nothing allocates in
//! steady state: the queue is pre-sized, chain snapshots are pre-built, and
//! the only try-lock guards the rare chain-pointer exchange.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cycle::{CycleContext, CycleParams, CycleResult, ProcessOutcome};
use crate::edges::{GraphEdges, node_key};
use crate::node::{ChainId, GraphNode, NodeChain, ProcessNode};
use crate::queue::BoundedQueue;
use crate::rt_task::RTTask;
use crate::sync::Semaphore;
use crate::{Error, Result};

/// Scheduler construction parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Total number of processing threads, including the audio callback
    /// thread itself; the scheduler spawns one fewer pool threads. `None`
    /// uses [`std::thread::available_parallelism`]. Must be at least 2.
    pub threads: Option<usize>,
    /// Trigger-queue capacity (rounded up to a power of two). Must cover the
    /// maximum number of concurrently-ready nodes; sized once, never grown
    /// while cycles run.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: None,
            queue_capacity: 1024,
        }
    }
}

/// Worker-pool lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// What the next cycle runs: the routing topology, or a batch of RT tasks.
const CYCLE_ROUTES: u8 = 0;
const CYCLE_TASKS: u8 = 1;

/// One double-buffered topology slot.
#[derive(Default)]
struct ChainData {
    /// Every node of the chain, prepped each cycle.
    nodes: Vec<Arc<GraphNode>>,
    /// Nodes with zero upstream dependencies, seeded at cycle start.
    init_triggers: Vec<Arc<GraphNode>>,
    /// Count of nodes with an empty activation set.
    n_terminal: u32,
}

/// Shared core of the scheduler: the trigger queue, the two topology chains,
/// cycle bookkeeping and the pool handshake. Every pool thread holds an
/// `Arc<Graph>`; nodes interact with it from inside
/// [`ProcessNode::run`].
pub struct Graph {
    trigger_queue: BoundedQueue<Arc<dyn ProcessNode>>,
    /// Tracked alongside the queue so wakeups can be bounded by queue depth.
    trigger_queue_size: AtomicU32,
    idle_workers: AtomicU32,
    /// Number of spawned pool threads (main loop + helpers).
    pool_size: usize,

    /// Countdown of terminal-node completions for the cycle in flight.
    terminal_remaining: AtomicU32,
    graph_empty: AtomicBool,
    terminate: AtomicBool,

    /// Idle workers park here.
    execution_sem: Semaphore,
    /// Signalled by the driver once per callback period.
    callback_start_sem: Semaphore,
    /// Signalled by the pool when the cycle completes.
    callback_done_sem: Semaphore,

    /// Exclusive guard for chain rebuild/swap. `rechain` holds it for the
    /// rebuild; the per-cycle swap only try-locks and defers on contention.
    swap_mutex: Mutex<()>,
    chains: [Mutex<ChainData>; 2],
    current_chain: AtomicUsize,
    /// Equal to `current_chain` when no rebuild is waiting.
    pending_chain: AtomicUsize,
    /// The slot that is neither current nor pending; the only slot `rechain`
    /// may write.
    setup_chain: AtomicUsize,

    cycle_kind: AtomicU8,
    pending_tasks: Mutex<Vec<Arc<RTTask>>>,
    cycle: CycleParams,
    cycle_status: AtomicI32,
    needs_disk_io: AtomicBool,
}

impl Graph {
    fn new(queue_capacity: usize, pool_size: usize) -> Self {
        Self {
            trigger_queue: BoundedQueue::new(queue_capacity),
            trigger_queue_size: AtomicU32::new(0),
            idle_workers: AtomicU32::new(0),
            pool_size,
            terminal_remaining: AtomicU32::new(0),
            graph_empty: AtomicBool::new(true),
            terminate: AtomicBool::new(false),
            execution_sem: Semaphore::new(0),
            callback_start_sem: Semaphore::new(0),
            callback_done_sem: Semaphore::new(0),
            swap_mutex: Mutex::new(()),
            chains: [Mutex::new(ChainData::default()), Mutex::new(ChainData::default())],
            current_chain: AtomicUsize::new(0),
            pending_chain: AtomicUsize::new(0),
            setup_chain: AtomicUsize::new(1),
            cycle_kind: AtomicU8::new(CYCLE_ROUTES),
            pending_tasks: Mutex::new(Vec::new()),
            cycle: CycleParams::default(),
            cycle_status: AtomicI32::new(0),
            needs_disk_io: AtomicBool::new(false),
        }
    }

    /// Parameters of the cycle in flight.
    pub(crate) fn cycle(&self) -> CycleContext {
        self.cycle.snapshot()
    }

    /// Folds one node's result into the cycle aggregate.
    pub(crate) fn absorb_outcome(&self, outcome: ProcessOutcome) {
        if outcome.status != 0 {
            self.cycle_status.store(outcome.status, Ordering::Relaxed);
        }
        if outcome.needs_disk_io {
            self.needs_disk_io.store(true, Ordering::Relaxed);
        }
    }

    /// Hands a now-runnable node to the worker pool.
    ///
    /// Wakes at most `min(idle workers, queue depth)` workers so a single
    /// new item never causes a thundering-herd wakeup.
    pub fn trigger(&self, node: Arc<dyn ProcessNode>) {
        self.trigger_queue_size.fetch_add(1, Ordering::Relaxed);
        let pushed = self.trigger_queue.push_back(node);
        debug_assert!(pushed, "trigger queue overcommitted; grow queue_capacity");
        if !pushed {
            self.trigger_queue_size.fetch_sub(1, Ordering::Relaxed);
        }
        self.wake_workers();
    }

    fn wake_workers(&self) {
        let idle = self.idle_workers.load(Ordering::Relaxed);
        let work = self.trigger_queue_size.load(Ordering::Relaxed);
        for _ in 0..idle.min(work) {
            self.execution_sem.signal();
        }
    }

    /// Reports the completion of a node with no downstream consumers.
    ///
    /// The thread that takes the countdown to zero owns the cycle boundary:
    /// it reports completion to the driver, waits for the rest of the pool
    /// to park, then sleeps until the next cycle start and sets that cycle
    /// up (chain swap included) before rejoining the pool as a worker.
    pub fn reached_terminal_node(&self) {
        let prev = self.terminal_remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "terminal completion without a cycle in flight");
        if prev != 1 {
            return;
        }
        loop {
            self.callback_done_sem.signal();

            // Make sure every other pool thread is parked before touching
            // per-node counters again. When cycles restart back-to-back
            // (freewheel/export) a worker may still be on its way to sleep.
            while self.idle_workers.load(Ordering::Acquire) + 1 < self.pool_size as u32 {
                if self.terminate.load(Ordering::Relaxed) {
                    return;
                }
                std::hint::spin_loop();
            }

            self.callback_start_sem.wait();
            if self.terminate.load(Ordering::Relaxed) {
                return;
            }

            if self.dispatch_cycle() {
                // Work is seeded; continue in run_one() via the worker loop.
                return;
            }
            // Empty cycle: the completion path fires with no triggers.
        }
    }

    /// Sets up the cycle that the driver just kicked off. Returns `false`
    /// when there is nothing to run (the completion path must fire at once).
    fn dispatch_cycle(&self) -> bool {
        if self.cycle_kind.load(Ordering::Acquire) == CYCLE_TASKS {
            self.seed_tasks()
        } else {
            self.prep();
            !self.graph_empty.load(Ordering::Relaxed)
        }
    }

    /// Per-cycle preparation: safe-point chain swap, counter reset, trigger
    /// seeding.
    fn prep(&self) {
        // Promote a pending chain, but never stall the audio path: if the
        // swap lock is contended (a rebuild is mid-flight), defer to the
        // next cycle.
        if let Some(_lock) = self.swap_mutex.try_lock() {
            let pending = self.pending_chain.load(Ordering::Relaxed);
            let current = self.current_chain.load(Ordering::Relaxed);
            if pending != current {
                self.setup_chain.store(current, Ordering::Relaxed);
                self.current_chain.store(pending, Ordering::Relaxed);
                trace!(chain = pending, "swapped to pending topology chain");
            }
        }

        let chain = self.current_chain.load(Ordering::Relaxed);
        let data = self.chains[chain].lock();

        let mut empty = true;
        for node in &data.nodes {
            node.prep(ChainId(chain));
            empty = false;
        }
        self.graph_empty.store(empty, Ordering::Relaxed);
        debug_assert!(
            empty != (data.n_terminal > 0),
            "topology must be empty exactly when it has no terminal nodes"
        );

        self.terminal_remaining
            .store(data.n_terminal, Ordering::Release);

        for node in &data.init_triggers {
            self.trigger_queue_size.fetch_add(1, Ordering::Relaxed);
            let triggered: Arc<dyn ProcessNode> = node.clone();
            let pushed = self.trigger_queue.push_back(triggered);
            debug_assert!(pushed, "trigger queue overcommitted; grow queue_capacity");
        }
        drop(data);

        // One batch wakeup for the whole initial trigger set.
        self.wake_workers();
    }

    /// Seeds a pending RT-task batch as a cycle of its own. Each task is
    /// both input and terminal.
    fn seed_tasks(&self) -> bool {
        let tasks = std::mem::take(&mut *self.pending_tasks.lock());
        if tasks.is_empty() {
            return false;
        }
        self.terminal_remaining
            .store(tasks.len() as u32, Ordering::Release);
        for task in tasks {
            self.trigger_queue_size.fetch_add(1, Ordering::Relaxed);
            let pushed = self.trigger_queue.push_back(task);
            debug_assert!(pushed, "trigger queue overcommitted; grow queue_capacity");
        }
        self.wake_workers();
        true
    }

    /// One worker step: pop a ready node (parking while none is available)
    /// and run it.
    fn run_one(&self) {
        let mut item = self.trigger_queue.pop_front();
        while item.is_none() {
            self.idle_workers.fetch_add(1, Ordering::Release);
            self.execution_sem.wait();
            if self.terminate.load(Ordering::Relaxed) {
                return;
            }
            self.idle_workers.fetch_sub(1, Ordering::Relaxed);
            item = self.trigger_queue.pop_front();
        }
        self.trigger_queue_size.fetch_sub(1, Ordering::Relaxed);

        let chain = ChainId(self.current_chain.load(Ordering::Relaxed));
        if let Some(node) = item {
            node.run(chain, self);
        }
    }

    /// Pool main loop: services cycle starts until the first non-empty
    /// cycle is dispatched, then becomes a plain worker. Later cycle
    /// boundaries are owned by whichever thread finishes the last terminal
    /// node (see [`reached_terminal_node`](Self::reached_terminal_node)).
    fn main_thread(&self) {
        loop {
            self.callback_start_sem.wait();
            if self.terminate.load(Ordering::Relaxed) {
                return;
            }
            if self.dispatch_cycle() {
                break;
            }
            self.callback_done_sem.signal();
        }
        while !self.terminate.load(Ordering::Relaxed) {
            self.run_one();
        }
    }

    /// Helper loop: pure worker.
    fn helper_thread(&self) {
        while !self.terminate.load(Ordering::Relaxed) {
            self.run_one();
        }
    }

    /// Drives one cycle through the pool and blocks until it completes.
    /// Callers serialize cycle entry points (one driver thread).
    fn render_cycle(&self, ctx: CycleContext) -> CycleResult {
        self.cycle.store(ctx);
        self.cycle_status.store(0, Ordering::Relaxed);
        self.needs_disk_io.store(false, Ordering::Relaxed);
        self.cycle_kind.store(CYCLE_ROUTES, Ordering::Release);

        self.callback_start_sem.signal();
        self.callback_done_sem.wait();

        CycleResult {
            status: self.cycle_status.load(Ordering::Relaxed),
            needs_disk_io: self.needs_disk_io.load(Ordering::Relaxed),
        }
    }

    /// Runs a batch of RT tasks through the pool as one cycle.
    fn run_tasks(&self, tasks: Vec<Arc<RTTask>>) {
        if tasks.is_empty() {
            return;
        }
        *self.pending_tasks.lock() = tasks;
        self.cycle_kind.store(CYCLE_TASKS, Ordering::Release);

        self.callback_start_sem.signal();
        self.callback_done_sem.wait();
    }

    /// Rebuilds the setup chain from `nodes` and `edges` and marks it
    /// pending. Holds the swap lock for the duration but never blocks the
    /// audio thread: only the slot that is neither current nor pending is
    /// written.
    fn rechain(&self, nodes: &[Arc<GraphNode>], edges: &GraphEdges) {
        let _lock = self.swap_mutex.lock();
        let setup = self.setup_chain.load(Ordering::Relaxed);
        let chain = ChainId(setup);

        let mut data = self.chains[setup].lock();
        data.nodes.clear();
        data.init_triggers.clear();
        data.n_terminal = 0;

        let mut members = HashSet::with_capacity(nodes.len());
        for node in nodes {
            members.insert(node_key(node));
        }

        let mut refcounts: HashMap<usize, u32> = HashMap::with_capacity(nodes.len());
        let mut activations: HashMap<usize, Vec<Arc<GraphNode>>> = HashMap::new();

        for node in nodes {
            for downstream in edges.feeds_from(node) {
                // Edges to nodes outside the supplied set do not exist, and
                // a node can never satisfy a dependency on itself.
                if !members.contains(&node_key(downstream)) || Arc::ptr_eq(downstream, node) {
                    continue;
                }
                activations
                    .entry(node_key(node))
                    .or_default()
                    .push(Arc::clone(downstream));
                *refcounts.entry(node_key(downstream)).or_insert(0) += 1;
            }
        }

        let mut seen = HashSet::with_capacity(nodes.len());
        for node in nodes {
            let key = node_key(node);
            // Duplicate entries in the node list collapse.
            if !seen.insert(key) {
                continue;
            }
            let init_refcount = refcounts.get(&key).copied().unwrap_or(0);
            let activation_set = activations.remove(&key).unwrap_or_default();

            if init_refcount == 0 {
                data.init_triggers.push(Arc::clone(node));
            }
            if activation_set.is_empty() {
                data.n_terminal += 1;
            }
            data.nodes.push(Arc::clone(node));
            node.install_chain(
                chain,
                NodeChain {
                    init_refcount,
                    activation_set,
                },
            );
        }

        debug!(
            chain = setup,
            nodes = data.nodes.len(),
            inputs = data.init_triggers.len(),
            terminals = data.n_terminal,
            "rebuilt topology chain"
        );
        drop(data);

        self.pending_chain.store(setup, Ordering::Release);
    }

    /// Writes the current chain as a Graphviz digraph. Offline diagnostic,
    /// not real-time safe (takes the chain-slot lock).
    fn plot(&self, path: &Path) -> Result<()> {
        let chain = ChainId(self.current_chain.load(Ordering::Relaxed));
        let data = self.chains[chain.index()].lock();

        let mut out = String::from("digraph routing {\n  rankdir = LR;\n  node [shape=box];\n");
        for node in &data.nodes {
            out.push_str(&format!(
                "  \"n{:x}\" [label=\"{}\\nin={}\"];\n",
                node_key(node),
                node.name(),
                node.init_refcount(chain),
            ));
        }
        for node in &data.nodes {
            for downstream in node.activation_set(chain) {
                out.push_str(&format!(
                    "  \"n{:x}\" -> \"n{:x}\";\n",
                    node_key(node),
                    node_key(&downstream),
                ));
            }
        }
        out.push_str("}\n");
        drop(data);

        std::fs::write(path, out)?;
        Ok(())
    }

    /// Logs the current chain (nodes, dependency counts, activation sets)
    /// at debug level.
    fn dump(&self) {
        let chain = ChainId(self.current_chain.load(Ordering::Relaxed));
        let data = self.chains[chain.index()].lock();
        debug!(
            chain = chain.index(),
            nodes = data.nodes.len(),
            terminals = data.n_terminal,
            "current topology chain"
        );
        for node in &data.nodes {
            let fed: Vec<&str> = data
                .nodes
                .iter()
                .filter(|other| {
                    other
                        .activation_set(chain)
                        .iter()
                        .any(|n| Arc::ptr_eq(n, node))
                })
                .map(|other| other.name())
                .collect();
            let feeds: Vec<String> = node
                .activation_set(chain)
                .iter()
                .map(|n| n.name().to_string())
                .collect();
            debug!(
                node = node.name(),
                init_refcount = node.init_refcount(chain),
                fed_by = ?fed,
                feeds = ?feeds,
                "node"
            );
        }
    }
}

/// The public orchestrator: owns the worker pool and the shared [`Graph`].
///
/// Entry points split by caller: the audio I/O driver calls
/// [`process_routes`](Self::process_routes) /
/// [`routes_no_roll`](Self::routes_no_roll) /
/// [`process_tasks`](Self::process_tasks) (serialized, once per callback
/// period); the non-real-time control thread calls
/// [`rechain`](Self::rechain), [`plot`](Self::plot), [`dump`](Self::dump)
/// and [`stop`](Self::stop).
pub struct GraphScheduler {
    core: Arc<Graph>,
    workers: Vec<JoinHandle<()>>,
    state: PoolState,
}

impl GraphScheduler {
    /// Starts the worker pool.
    ///
    /// Spawns `threads - 1` pool threads (the audio callback thread is the
    /// remaining processing thread). Thread creation failure is fatal: the
    /// partially started pool is drained and the error returned — the
    /// real-time path cannot operate without its workers.
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let threads = match config.threads {
            Some(n) if n < 2 => {
                return Err(Error::InvalidConfig(format!(
                    "need at least 2 processing threads, got {n}"
                )));
            }
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(2)
                .max(2),
        };
        let pool_size = threads - 1;

        let core = Arc::new(Graph::new(config.queue_capacity, pool_size));
        let mut scheduler = Self {
            core: Arc::clone(&core),
            workers: Vec::with_capacity(pool_size),
            state: PoolState::Starting,
        };

        for i in 0..pool_size {
            let core = Arc::clone(&core);
            let spawned = if i == 0 {
                std::thread::Builder::new()
                    .name("cauce-main".into())
                    .spawn(move || core.main_thread())
            } else {
                std::thread::Builder::new()
                    .name(format!("cauce-worker-{i}"))
                    .spawn(move || core.helper_thread())
            };
            match spawned {
                Ok(handle) => scheduler.workers.push(handle),
                Err(e) => {
                    scheduler.stop();
                    return Err(Error::ThreadSpawn(e));
                }
            }
        }

        debug!(
            threads = pool_size,
            queue_capacity = core.trigger_queue.capacity(),
            "graph scheduler started"
        );
        scheduler.state = PoolState::Running;
        Ok(scheduler)
    }

    /// Whether the pool is running.
    pub fn is_running(&self) -> bool {
        self.state == PoolState::Running
    }

    /// The chain slot currently executed by the pool.
    pub fn current_chain(&self) -> ChainId {
        ChainId(self.core.current_chain.load(Ordering::Relaxed))
    }

    /// Rebuilds the setup chain from a node list and edge relation and
    /// marks it pending; the pool picks it up at the next cycle boundary.
    ///
    /// Edges referencing nodes absent from `nodes`, and self-edges, are
    /// ignored. Duplicate node entries collapse.
    pub fn rechain(&self, nodes: &[Arc<GraphNode>], edges: &GraphEdges) {
        self.core.rechain(nodes, edges);
    }

    /// Processes one rolling cycle. Blocks until the graph has run.
    pub fn process_routes(&self, n_frames: u32, start_sample: i64, end_sample: i64) -> CycleResult {
        self.core.render_cycle(CycleContext {
            n_frames,
            start_sample,
            end_sample,
            rolling: true,
            non_rt_pending: false,
        })
    }

    /// Processes one no-roll cycle (transport stopped; nodes keep their
    /// ports silent/flushed). Blocks until the graph has run.
    pub fn routes_no_roll(
        &self,
        n_frames: u32,
        start_sample: i64,
        end_sample: i64,
        non_rt_pending: bool,
    ) -> CycleResult {
        self.core.render_cycle(CycleContext {
            n_frames,
            start_sample,
            end_sample,
            rolling: false,
            non_rt_pending,
        })
    }

    /// Runs a batch of [`RTTask`]s on the pool, blocking until all have
    /// completed. Called from the same context as the cycle entry points.
    pub fn process_tasks(&self, tasks: Vec<Arc<RTTask>>) {
        self.core.run_tasks(tasks);
    }

    /// Writes the current chain as a Graphviz digraph to `path`.
    pub fn plot(&self, path: impl AsRef<Path>) -> Result<()> {
        self.core.plot(path.as_ref())
    }

    /// Logs the current chain at debug level.
    pub fn dump(&self) {
        self.core.dump();
    }

    /// Stops the worker pool and joins every thread. Idempotent; also runs
    /// on drop, but callers tearing the engine down explicitly should call
    /// it themselves rather than rely on drop order.
    pub fn stop(&mut self) {
        if self.state == PoolState::Stopped {
            return;
        }
        self.state = PoolState::Draining;
        self.core.terminate.store(true, Ordering::Release);

        // Unblock whichever thread owns the cycle boundary, then every
        // parked worker.
        self.core.callback_start_sem.signal();
        for _ in 0..self.core.pool_size {
            self.core.execution_sem.signal();
        }

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.state = PoolState::Stopped;
        debug!("graph scheduler stopped");
    }
}

impl Drop for GraphScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
