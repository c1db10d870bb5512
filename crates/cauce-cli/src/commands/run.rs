//! `cauce run` — drive offline cycles through a topology.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Args;

use cauce_graph::GraphScheduler;

use crate::topology::TopologyFile;

/// Arguments for the `run` subcommand.
#[derive(Args)]
pub struct RunArgs {
    /// Topology description (TOML)
    pub topology: PathBuf,

    /// Number of cycles to run
    #[arg(long, default_value_t = 1000)]
    pub cycles: u64,

    /// Frames per cycle
    #[arg(long, default_value_t = 256)]
    pub frames: u32,
}

/// Loads the topology, runs the requested number of cycles, and prints
/// timing statistics.
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let topo = TopologyFile::load(&args.topology)
        .with_context(|| format!("loading {}", args.topology.display()))?;
    let (nodes, edges) = topo.build()?;

    let scheduler = GraphScheduler::new(&topo.scheduler_config())?;
    scheduler.rechain(&nodes, &edges);
    tracing::debug!(nodes = nodes.len(), cycles = args.cycles, "starting offline run");

    let frames = i64::from(args.frames);
    let started = Instant::now();
    let mut failures = 0u64;
    for cycle in 0..args.cycles {
        let start_sample = cycle as i64 * frames;
        let result = scheduler.process_routes(args.frames, start_sample, start_sample + frames);
        if result.status != 0 {
            failures += 1;
        }
    }
    let elapsed = started.elapsed();

    println!(
        "{} nodes, {} cycles of {} frames",
        nodes.len(),
        args.cycles,
        args.frames
    );
    println!(
        "total {:?}, {:.1} us/cycle, {failures} failed cycles",
        elapsed,
        elapsed.as_secs_f64() * 1e6 / args.cycles.max(1) as f64
    );

    Ok(())
}
