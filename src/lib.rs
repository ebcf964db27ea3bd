//! Maia routing core.
//!
//! Decides, for every user message, what context to load and which
//! specialist agent (if any) should handle it, then records that decision
//! so its quality can be measured.
//!
//! # Pipeline
//!
//! Strictly sequential within one invocation:
//!
//! 1. `intent`: regex classification into a domain, a confidence (match
//!    density) and a 1..=10 complexity.
//! 2. `swarm`: agent gates (`confidence >= 0.60 && complexity >= 3`), route
//!    planning, capability-gap logging (`confidence < 0.40`).
//! 3. `loader`: one of three context tiers, each with a hard token ceiling
//!    and a fallback to the tier below.
//! 4. `routing_log`: suggestion row plus later acceptance and daily metrics.
//!
//! # State
//!
//! Everything lives under `<root>/claude/data/`:
//!
//! - `routing_decisions.db`: suggestions, acceptance metrics, overrides
//! - `system_state.db`: phase index read by the loader
//! - `capability_gaps.json`, `agent_recommendations.json`
//! - `routing.events.jsonl`: broker audit trail
//!
//! The root comes from `--root`, `MAIA_ROOT`, or `~/git/maia`, and is
//! carried in an explicit [`core::store::Store`] handed to every component.
//!
//! # Examples
//!
//! ```bash
//! maia context analyze "review this python code for security issues"
//! maia hook "deploy a kubernetes cluster on aws with terraform" --json
//! maia routing recent 20
//! maia swarm gate '{"confidence": 0.87, "complexity": 5, "domain": "security"}'
//! ```

pub mod core;
pub mod plugins;

mod cli;

use cli::{Cli, Command};
use crate::core::{config::RoutingConfig, error::MaiaError, store, store::Store};
use crate::plugins::{hook, loader, routing_log, swarm};

use clap::Parser;

pub const LOG_ENV: &str = "MAIA_LOG";

/// Install the stderr diagnostics subscriber. Safe to call more than once.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("maia=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("maia=warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

/// Parse arguments, run one command, and return its exit code
/// (0 ok, 1 degraded, 2 critical).
pub fn run() -> Result<i32, MaiaError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let root = store::resolve_root(cli.root.as_deref())?;
    // The hook must never fail on a bad config file; every other command
    // reports it.
    let config = match &cli.command {
        Command::Hook(_) => RoutingConfig::load_or_default(&root),
        _ => RoutingConfig::load(&root)?,
    };
    let store = Store::new(root, config);

    match cli.command {
        Command::Context(c) => loader::run_context_cli(&store, c),
        Command::Routing(c) => routing_log::run_routing_cli(&store, c),
        Command::Swarm(c) => swarm::run_swarm_cli(&store, c),
        Command::Hook(c) => hook::run_hook_cli(&store, c),
        Command::Config => {
            let out = serde_json::json!({
                "root": store.root.display().to_string(),
                "config_path": RoutingConfig::config_path(&store.root).display().to_string(),
                "config": store.config,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(0)
        }
    }
}
