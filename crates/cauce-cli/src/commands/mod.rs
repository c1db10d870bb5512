//! CLI subcommands.

pub mod plot;
pub mod run;
