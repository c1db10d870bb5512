//! Integration tests for the routing-graph scheduler.
//!
//! Each test drives the public API the way the audio engine does: build
//! nodes, describe connectivity with [`GraphEdges`], `rechain`, then run
//! cycles and assert on what ran and in which order. Log order is a valid
//! dependency witness: an upstream node pushes its log entry before it
//! triggers its dependents, so a dependent's entry can only appear later.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex};

use cauce_graph::{
    BoundedQueue, CycleContext, GraphEdges, GraphNode, GraphScheduler, ProcessOutcome, RTTask,
    RouteProcessor, SchedulerConfig,
};

type Log = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: String,
    log: Log,
}

impl RouteProcessor for Recorder {
    fn process(&self, _cycle: &CycleContext) -> ProcessOutcome {
        self.log.lock().push(self.name.clone());
        ProcessOutcome::default()
    }
    fn name(&self) -> &str {
        &self.name
    }
}

fn recorder(name: &str, log: &Log) -> Arc<GraphNode> {
    GraphNode::new(Arc::new(Recorder {
        name: name.to_string(),
        log: Arc::clone(log),
    }))
}

fn scheduler() -> GraphScheduler {
    GraphScheduler::new(&SchedulerConfig {
        threads: Some(4),
        queue_capacity: 256,
    })
    .expect("scheduler construction")
}

/// Runs one cycle and returns the names processed during it.
fn run_cycle(s: &GraphScheduler, log: &Log) -> Vec<String> {
    log.lock().clear();
    let result = s.process_routes(256, 0, 256);
    assert_eq!(result.status, 0);
    log.lock().clone()
}

fn position(log: &[String], name: &str) -> usize {
    log.iter()
        .position(|n| n == name)
        .unwrap_or_else(|| panic!("{name} did not run; log = {log:?}"))
}

// --- 3-node chain x -> y -> z ---

#[test]
fn chain_runs_in_dependency_order() {
    let s = scheduler();
    let log: Log = Log::default();
    let x = recorder("x", &log);
    let y = recorder("y", &log);
    let z = recorder("z", &log);

    let mut edges = GraphEdges::new();
    edges.add(&x, &y);
    edges.add(&y, &z);
    s.rechain(&[Arc::clone(&x), Arc::clone(&y), Arc::clone(&z)], &edges);

    let ran = run_cycle(&s, &log);
    assert_eq!(ran.len(), 3);
    assert!(position(&ran, "x") < position(&ran, "y"));
    assert!(position(&ran, "y") < position(&ran, "z"));

    // Input set {x}, terminal set {z}.
    let chain = s.current_chain();
    assert_eq!(x.init_refcount(chain), 0);
    assert_eq!(y.init_refcount(chain), 1);
    assert_eq!(z.init_refcount(chain), 1);
    assert_eq!(x.activation_set(chain).len(), 1);
    assert!(Arc::ptr_eq(&x.activation_set(chain)[0], &y));
    assert!(z.activation_set(chain).is_empty());
}

// --- Two disconnected nodes ---

#[test]
fn disconnected_nodes_both_run() {
    let s = scheduler();
    let log: Log = Log::default();
    let a = recorder("a", &log);
    let b = recorder("b", &log);

    s.rechain(&[Arc::clone(&a), Arc::clone(&b)], &GraphEdges::new());

    let mut ran = run_cycle(&s, &log);
    ran.sort();
    assert_eq!(ran, ["a", "b"]);

    // Both are input and terminal.
    let chain = s.current_chain();
    for node in [&a, &b] {
        assert_eq!(node.init_refcount(chain), 0);
        assert!(node.activation_set(chain).is_empty());
    }
}

// --- Empty topology supplied via rechain ---

#[test]
fn empty_rechain_completes_without_processing() {
    let s = scheduler();
    let log: Log = Log::default();
    let a = recorder("a", &log);
    s.rechain(&[a], &GraphEdges::new());
    assert_eq!(run_cycle(&s, &log).len(), 1);

    // Replace with an empty topology; cycles must still complete, with no
    // process() invocations.
    s.rechain(&[], &GraphEdges::new());
    assert!(run_cycle(&s, &log).is_empty());
    assert!(run_cycle(&s, &log).is_empty());
}

// --- Open-question edge handling ---

#[test]
fn edges_to_unknown_nodes_and_self_edges_are_ignored() {
    let s = scheduler();
    let log: Log = Log::default();
    let a = recorder("a", &log);
    let b = recorder("b", &log);
    let ghost = recorder("ghost", &log);

    let mut edges = GraphEdges::new();
    edges.add(&a, &b);
    edges.add(&a, &ghost); // not part of the node set below
    edges.add(&ghost, &b); // source outside the set
    edges.add(&b, &b); // self-edge can never be satisfied

    s.rechain(&[Arc::clone(&a), Arc::clone(&b)], &edges);
    let ran = run_cycle(&s, &log);
    assert_eq!(ran.len(), 2);
    assert!(position(&ran, "a") < position(&ran, "b"));

    let chain = s.current_chain();
    assert_eq!(b.init_refcount(chain), 1);
    assert_eq!(a.activation_set(chain).len(), 1);
    assert!(b.activation_set(chain).is_empty());
}

// --- Dependency completeness over repeated cycles (diamond) ---

#[test]
fn diamond_holds_ordering_across_many_cycles() {
    let s = scheduler();
    let log: Log = Log::default();
    let src = recorder("src", &log);
    let eq = recorder("eq", &log);
    let comp = recorder("comp", &log);
    let mix = recorder("mix", &log);

    let mut edges = GraphEdges::new();
    edges.add(&src, &eq);
    edges.add(&src, &comp);
    edges.add(&eq, &mix);
    edges.add(&comp, &mix);
    s.rechain(&[src, eq, comp, mix], &edges);

    for _ in 0..200 {
        let ran = run_cycle(&s, &log);
        assert_eq!(ran.len(), 4, "every node exactly once per cycle: {ran:?}");
        assert!(position(&ran, "src") < position(&ran, "eq"));
        assert!(position(&ran, "src") < position(&ran, "comp"));
        assert!(position(&ran, "eq") < position(&ran, "mix"));
        assert!(position(&ran, "comp") < position(&ran, "mix"));
    }
}

#[test]
fn wide_fan_runs_every_node() {
    let s = scheduler();
    let log: Log = Log::default();
    let nodes: Vec<_> = (0..32).map(|i| recorder(&format!("n{i}"), &log)).collect();
    s.rechain(&nodes, &GraphEdges::new());

    for _ in 0..20 {
        let ran = run_cycle(&s, &log);
        assert_eq!(ran.len(), 32);
    }
}

#[test]
fn deep_chain_runs_in_order() {
    let s = scheduler();
    let log: Log = Log::default();
    let nodes: Vec<_> = (0..64).map(|i| recorder(&format!("n{i:02}"), &log)).collect();
    let mut edges = GraphEdges::new();
    for pair in nodes.windows(2) {
        edges.add(&pair[0], &pair[1]);
    }
    s.rechain(&nodes, &edges);

    let ran = run_cycle(&s, &log);
    assert_eq!(ran.len(), 64);
    let mut sorted = ran.clone();
    sorted.sort();
    // A linear chain admits exactly one valid order.
    assert_eq!(ran, sorted);
}

// --- Idempotent rebuild ---

#[test]
fn rechain_twice_is_behaviorally_identical() {
    let s = scheduler();
    let log: Log = Log::default();
    let a = recorder("a", &log);
    let b = recorder("b", &log);
    let c = recorder("c", &log);

    let mut edges = GraphEdges::new();
    edges.add(&a, &b);
    edges.add(&a, &c);
    edges.add(&b, &c);

    let nodes = [Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)];

    s.rechain(&nodes, &edges);
    run_cycle(&s, &log);
    let first_chain = s.current_chain();
    let first: Vec<(u32, Vec<String>)> = nodes
        .iter()
        .map(|n| {
            let mut feeds: Vec<String> = n
                .activation_set(first_chain)
                .iter()
                .map(|m| m.name().to_string())
                .collect();
            feeds.sort();
            (n.init_refcount(first_chain), feeds)
        })
        .collect();

    s.rechain(&nodes, &edges);
    run_cycle(&s, &log);
    let second_chain = s.current_chain();
    assert_ne!(first_chain, second_chain, "rebuild lands in the other slot");
    let second: Vec<(u32, Vec<String>)> = nodes
        .iter()
        .map(|n| {
            let mut feeds: Vec<String> = n
                .activation_set(second_chain)
                .iter()
                .map(|m| m.name().to_string())
                .collect();
            feeds.sort();
            (n.init_refcount(second_chain), feeds)
        })
        .collect();

    assert_eq!(first, second);
}

// --- A rebuild never becomes visible mid-cycle ---

struct GatedSource {
    name: String,
    log: Log,
    entered: Arc<(Mutex<bool>, Condvar)>,
    release: Arc<(Mutex<bool>, Condvar)>,
}

impl RouteProcessor for GatedSource {
    fn process(&self, _cycle: &CycleContext) -> ProcessOutcome {
        self.log.lock().push(self.name.clone());
        {
            let (flag, cond) = &*self.entered;
            *flag.lock() = true;
            cond.notify_all();
        }
        let (flag, cond) = &*self.release;
        let mut released = flag.lock();
        while !*released {
            cond.wait(&mut released);
        }
        ProcessOutcome::default()
    }
    fn name(&self) -> &str {
        &self.name
    }
}

#[test]
fn rebuild_mid_cycle_takes_effect_at_next_prep() {
    let s = scheduler();
    let log: Log = Log::default();
    let entered = Arc::new((Mutex::new(false), Condvar::new()));
    let release = Arc::new((Mutex::new(false), Condvar::new()));

    let gate = GraphNode::new(Arc::new(GatedSource {
        name: "gate".to_string(),
        log: Arc::clone(&log),
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    }));
    let tail = recorder("tail", &log);
    let mut edges = GraphEdges::new();
    edges.add(&gate, &tail);
    s.rechain(&[gate, Arc::clone(&tail)], &edges);

    let replacement = recorder("replacement", &log);

    std::thread::scope(|scope| {
        let cycle = scope.spawn(|| s.process_routes(128, 0, 128));

        // Wait until the cycle is provably in flight.
        {
            let (flag, cond) = &*entered;
            let mut in_cycle = flag.lock();
            while !*in_cycle {
                cond.wait(&mut in_cycle);
            }
        }

        // Rebuild while the old chain is executing.
        s.rechain(&[Arc::clone(&replacement)], &GraphEdges::new());
        assert!(
            !log.lock().iter().any(|n| n == "replacement"),
            "pending topology must not run mid-cycle"
        );

        {
            let (flag, cond) = &*release;
            *flag.lock() = true;
            cond.notify_all();
        }
        let result = cycle.join().expect("cycle thread");
        assert_eq!(result.status, 0);
    });

    // The interrupted cycle ran the old chain only.
    {
        let ran = log.lock().clone();
        assert!(ran.iter().any(|n| n == "gate"));
        assert!(ran.iter().any(|n| n == "tail"));
        assert!(!ran.iter().any(|n| n == "replacement"));
    }

    // The next cycle swaps and runs the new chain only.
    let ran = run_cycle(&s, &log);
    assert_eq!(ran, ["replacement"]);
}

// --- Queue multiset under two producers and two consumers at capacity 4 ---

#[test]
fn queue_two_producers_two_consumers_capacity_four() {
    let mut q = BoundedQueue::new(2);
    q.reserve(4);
    let q = Arc::new(q);

    std::thread::scope(|scope| {
        for p in 0..2u32 {
            let q = Arc::clone(&q);
            scope.spawn(move || {
                for i in 0..2u32 {
                    while !q.push_back(p * 2 + i) {
                        std::thread::yield_now();
                    }
                }
            });
        }
        let poppers: Vec<_> = (0..2)
            .map(|_| {
                let q = Arc::clone(&q);
                scope.spawn(move || {
                    let mut got = Vec::new();
                    while got.len() < 2 {
                        if let Some(v) = q.pop_front() {
                            got.push(v);
                        } else {
                            std::thread::yield_now();
                        }
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<u32> = poppers
            .into_iter()
            .flat_map(|h| h.join().expect("popper"))
            .collect();
        all.sort_unstable();
        assert_eq!(all, [0, 1, 2, 3]);
    });
}

// --- RT tasks share the pool with route cycles ---

#[test]
fn rt_tasks_interleave_with_route_cycles() {
    let s = scheduler();
    let log: Log = Log::default();
    let node = recorder("route", &log);
    s.rechain(&[node], &GraphEdges::new());

    let counter = Arc::new(AtomicU32::new(0));
    for _ in 0..10 {
        assert_eq!(run_cycle(&s, &log), ["route"]);
        let c = Arc::clone(&counter);
        s.process_tasks(vec![
            RTTask::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }),
            RTTask::new(|| {}),
        ]);
    }
    assert_eq!(counter.load(Ordering::Relaxed), 10);
}

// --- Diagnostics ---

#[test]
fn plot_exports_nodes_and_edges() {
    let s = scheduler();
    let log: Log = Log::default();
    let src = recorder("src", &log);
    let out = recorder("out", &log);
    let mut edges = GraphEdges::new();
    edges.add(&src, &out);
    s.rechain(&[src, out], &edges);
    run_cycle(&s, &log);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("routing.dot");
    s.plot(&path).expect("plot");

    let dot = std::fs::read_to_string(&path).expect("read plot");
    assert!(dot.starts_with("digraph routing {"));
    assert!(dot.contains("label=\"src"));
    assert!(dot.contains("label=\"out"));
    assert!(dot.contains("->"));
}
