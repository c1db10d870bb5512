//! Cauce CLI - offline diagnostics for the routing-graph scheduler.

mod commands;
mod topology;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cauce")]
#[command(author, version, about = "Routing-graph scheduler diagnostics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run offline cycles through a topology and report timings
    Run(commands::run::RunArgs),

    /// Export a topology as a Graphviz digraph
    Plot(commands::plot::PlotArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Plot(args) => commands::plot::run(args),
    }
}
