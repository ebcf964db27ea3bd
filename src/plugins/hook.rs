//! Pre-response hook pipeline.
//!
//! One invocation per user message: classify, gate and plan the route,
//! load context for the chosen tier, log the suggestion, record capability
//! gaps. Storage problems downgrade the outcome to degraded; they never
//! abort the pipeline.

use crate::core::error::MaiaError;
use crate::core::gate::Verdict;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::gaps::AgentRecommendation;
use crate::plugins::intent::{Classification, Classifier, PatternClassifier};
use crate::plugins::loader::{ContextLoader, Tier};
use crate::plugins::routing_log::RoutingLogger;
use crate::plugins::swarm::{self, RoutingPlan};
use clap::Parser;
use serde::Serialize;
use tracing::warn;

#[derive(Parser, Debug)]
#[clap(name = "hook", about = "Run the routing pipeline for one user message.")]
pub struct HookCli {
    /// The user message.
    pub query: String,
    /// Print a JSON envelope instead of the bare agent message.
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub tier: Tier,
    pub loading_strategy: String,
    pub token_count: usize,
    pub phases_loaded: Vec<u32>,
    pub degraded: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookOutcome {
    /// Set only when the agent gate passed and a suggestion row was written.
    pub query_hash: Option<String>,
    pub classification: Classification,
    pub invoke_swarm: bool,
    pub plan: RoutingPlan,
    pub agent_message: Option<String>,
    pub load: LoadSummary,
    pub gap_logged: bool,
    pub recommendation: Option<AgentRecommendation>,
    pub warnings: Vec<String>,
}

impl HookOutcome {
    pub fn verdict(&self) -> Verdict {
        if self.load.degraded || !self.warnings.is_empty() {
            Verdict::Degraded
        } else {
            Verdict::Pass
        }
    }
}

pub fn run_hook(store: &Store, classifier: &dyn Classifier, query: &str) -> HookOutcome {
    let decision = swarm::process_query(store, classifier, query);
    let mut warnings = Vec::new();

    let loader = ContextLoader::new(store, classifier);
    let outcome = loader.load_for_classification(query, &decision.classification);
    let loaded = outcome.result();
    let load = LoadSummary {
        tier: loaded.tier,
        loading_strategy: loaded.loading_strategy.clone(),
        token_count: loaded.token_count,
        phases_loaded: loaded.phases_loaded.clone(),
        degraded: outcome.is_degraded(),
        reasons: outcome.reasons().to_vec(),
    };

    // Only a suggestion the user was actually shown is logged.
    let mut query_hash = None;
    if decision.invoke_swarm && decision.plan.has_agent() {
        let logged = RoutingLogger::new(store).and_then(|logger| {
            logger.log_suggestion(query, &decision.classification, &decision.plan)
        });
        match logged {
            Ok(hash) => query_hash = Some(hash),
            Err(e) => {
                warn!(error = %e, "routing suggestion not logged");
                warnings.push(format!("routing suggestion not logged: {}", e));
            }
        }
    }

    HookOutcome {
        query_hash,
        classification: decision.classification,
        invoke_swarm: decision.invoke_swarm,
        plan: decision.plan,
        agent_message: decision.agent_message,
        load,
        gap_logged: decision.gap_logged,
        recommendation: decision.recommendation,
        warnings,
    }
}

pub fn run_hook_cli(store: &Store, cli: HookCli) -> Result<i32, MaiaError> {
    let classifier = PatternClassifier::from_config(&store.config.classifier);
    let outcome = run_hook(store, &classifier, &cli.query);
    let verdict = outcome.verdict();

    if cli.json {
        let envelope = time::command_envelope(
            "hook",
            &verdict.to_string(),
            serde_json::to_value(&outcome)?,
        );
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else if let Some(message) = &outcome.agent_message {
        println!("{}", message);
    }
    Ok(verdict.exit_code())
}
