//! `cauce plot` — export a topology as a Graphviz digraph.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use cauce_graph::GraphScheduler;

use crate::topology::TopologyFile;

/// Arguments for the `plot` subcommand.
#[derive(Args)]
pub struct PlotArgs {
    /// Topology description (TOML)
    pub topology: PathBuf,

    /// Output .dot file
    #[arg(short, long, default_value = "routing.dot")]
    pub output: PathBuf,
}

/// Builds the topology, runs a single no-roll cycle so the rebuilt chain
/// becomes current, and writes the Graphviz export.
pub fn run(args: PlotArgs) -> anyhow::Result<()> {
    let topo = TopologyFile::load(&args.topology)
        .with_context(|| format!("loading {}", args.topology.display()))?;
    let (nodes, edges) = topo.build()?;

    let scheduler = GraphScheduler::new(&topo.scheduler_config())?;
    scheduler.rechain(&nodes, &edges);
    scheduler.routes_no_roll(64, 0, 64, false);
    scheduler.dump();

    scheduler.plot(&args.output)?;
    println!(
        "wrote {} ({} nodes)",
        args.output.display(),
        nodes.len()
    );
    Ok(())
}
