//! CLI struct definitions for the `maia` binary.
//!
//! Per-component subcommand types live beside their components; this file
//! only assembles them.

use crate::plugins::{hook, loader, routing_log, swarm};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "maia",
    version = env!("CARGO_PKG_VERSION"),
    about = "Intent classification, tiered context loading and agent routing for Maia."
)]
pub(crate) struct Cli {
    /// Maia root; defaults to $MAIA_ROOT, then ~/git/maia.
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Debug diagnostics on stderr (overrides MAIA_LOG).
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Intent analysis and tiered context loading
    #[clap(name = "context")]
    Context(loader::ContextCli),

    /// Routing suggestion log and acceptance metrics
    #[clap(name = "routing")]
    Routing(routing_log::RoutingCli),

    /// Agent gates, capability gaps and recommendations
    #[clap(name = "swarm")]
    Swarm(swarm::SwarmCli),

    /// Run the full pipeline for one user message
    #[clap(name = "hook")]
    Hook(hook::HookCli),

    /// Print the resolved root and effective configuration
    #[clap(name = "config")]
    Config,
}
