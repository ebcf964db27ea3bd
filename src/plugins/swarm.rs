//! Agent / swarm routing.
//!
//! Decides whether a classified query should load a specialist agent,
//! plans the agent chain, and records capability gaps for queries nothing
//! in the registry covers well.

use crate::core::config::{RoutingConfig, SwarmConfig};
use crate::core::error::MaiaError;
use crate::core::gate::{CheckResult, GateReport, Severity};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::gaps::{AgentRecommendation, CapabilityGap, GapLedger};
use crate::plugins::intent::{Classification, Classifier, FULL_DOMAIN, PatternClassifier};
use crate::plugins::strategy;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

pub const AGENT_MARKER: &str = "AGENT";
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Gate input. Every field is optional so that partial hook payloads are
/// representable; a missing field fails whichever gate needs it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingSignal {
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Accepts integers or floats; a fractional value is floored.
    #[serde(default, deserialize_with = "complexity_from_number")]
    pub complexity: Option<u32>,
    #[serde(default, alias = "category")]
    pub domain: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

fn complexity_from_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(v) if v.is_finite() && v >= 0.0 => Ok(Some(v.floor().min(u32::MAX as f64) as u32)),
        Some(v) => Err(serde::de::Error::custom(format!(
            "complexity must be a non-negative number, got {}",
            v
        ))),
    }
}

impl RoutingSignal {
    /// Parse a hook payload. Anything that is not a JSON object with
    /// well-typed fields yields `None`.
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

impl From<&Classification> for RoutingSignal {
    fn from(c: &Classification) -> Self {
        Self {
            confidence: Some(c.confidence),
            complexity: Some(c.complexity),
            domain: Some(c.domain.clone()),
            domains: c.candidate_domains.clone(),
        }
    }
}

/// Inclusive on both thresholds; the domain plays no part.
pub fn should_invoke_swarm(signal: Option<&RoutingSignal>, cfg: &SwarmConfig) -> bool {
    let Some(signal) = signal else {
        return false;
    };
    match (signal.confidence, signal.complexity) {
        (Some(confidence), Some(complexity)) => {
            confidence >= cfg.min_confidence && complexity >= cfg.min_complexity
        }
        _ => false,
    }
}

/// Strictly below the gap threshold. A missing confidence is not a gap.
pub fn should_log_capability_gap(signal: Option<&RoutingSignal>, cfg: &SwarmConfig) -> bool {
    signal
        .and_then(|s| s.confidence)
        .is_some_and(|c| c < cfg.gap_confidence)
}

fn gap_domains(signal: &RoutingSignal) -> Vec<String> {
    if !signal.domains.is_empty() {
        return signal.domains.clone();
    }
    vec![signal
        .domain
        .clone()
        .unwrap_or_else(|| FULL_DOMAIN.to_string())]
}

/// Append a gap entry. Never fails; returns whether the entry was written.
pub fn log_capability_gap(store: &Store, signal: &RoutingSignal, query: &str) -> bool {
    let gap = CapabilityGap {
        query: query.to_string(),
        domains: gap_domains(signal),
        confidence: signal.confidence.unwrap_or(0.0),
        timestamp: time::now_rfc3339(),
    };
    match GapLedger::new(store).append_gap(gap) {
        Ok(()) => {
            debug!(domains = ?signal.domains, "capability gap logged");
            true
        }
        Err(e) => {
            warn!(error = %e, "capability gap not logged");
            false
        }
    }
}

/// Derive and record a recommendation for `domain` when its gaps cluster.
/// Storage failures yield `None`.
pub fn check_for_agent_recommendation(store: &Store, domain: &str) -> Option<AgentRecommendation> {
    let cfg = &store.config.swarm;
    let ledger = GapLedger::new(store);
    let rec = match ledger.recommendation_for(
        domain,
        cfg.recommendation_min_gaps,
        cfg.recommendation_window_days,
    ) {
        Ok(rec) => rec?,
        Err(e) => {
            warn!(error = %e, domain, "capability gap ledger unreadable");
            return None;
        }
    };
    match ledger.record_recommendation(&rec) {
        Ok(true) => info!(domain, count = rec.count, "new agent recommended"),
        Ok(false) => debug!(domain, "recommendation already recorded"),
        Err(e) => warn!(error = %e, domain, "recommendation not recorded"),
    }
    Some(rec)
}

fn valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn agent_definition_path(agent: &str) -> String {
    format!("{}/{}.md", schemas::AGENTS_DIR, agent)
}

/// Checks a loading message must pass before it is emitted.
pub fn validate_loading_message(message: &str, agent: &str) -> GateReport {
    let mut report = GateReport::new();
    let len = message.chars().count();
    report.push(CheckResult::check(
        "message_length",
        len < MAX_MESSAGE_CHARS,
        Severity::Error,
        format!("{} chars (limit {})", len, MAX_MESSAGE_CHARS),
    ));
    report.push(CheckResult::check(
        "agent_marker",
        message.contains(AGENT_MARKER),
        Severity::Error,
        format!("contains {} marker", AGENT_MARKER),
    ));
    report.push(CheckResult::check(
        "agent_name",
        valid_agent_name(agent) && message.contains(agent),
        Severity::Error,
        format!("names agent {}", agent),
    ));
    report.push(CheckResult::check(
        "definition_path",
        message.contains(&agent_definition_path(agent)),
        Severity::Error,
        format!("references {}", agent_definition_path(agent)),
    ));
    report
}

/// Message telling the assistant to load a specialist agent, or `None`
/// when no agent should load.
pub fn get_agent_loading_message(
    signal: Option<&RoutingSignal>,
    agent: Option<&str>,
    cfg: &SwarmConfig,
) -> Option<String> {
    if !should_invoke_swarm(signal, cfg) {
        return None;
    }
    let agent = agent.map(str::trim).filter(|a| !a.is_empty())?;
    let signal = signal?;

    let domain = signal.domain.as_deref().unwrap_or(FULL_DOMAIN);
    let message = format!(
        "🤖 {} LOADING: {}\nDomain: {} | confidence {:.2} | complexity {}\nLoad {} and follow its instructions for this request.",
        AGENT_MARKER,
        agent,
        domain,
        signal.confidence.unwrap_or(0.0),
        signal.complexity.unwrap_or(0),
        agent_definition_path(agent),
    );

    let report = validate_loading_message(&message, agent);
    if !report.is_acceptable() {
        let failed: Vec<&str> = report.failures().map(|c| c.name.as_str()).collect();
        warn!(agent, failed = ?failed, "agent loading message suppressed");
        return None;
    }
    Some(message)
}

// --- Route planning ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    SingleAgent,
    Swarm,
    PromptChain,
}

impl RoutingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingStrategy::SingleAgent => "single_agent",
            RoutingStrategy::Swarm => "swarm",
            RoutingStrategy::PromptChain => "prompt_chain",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "single_agent" => Some(RoutingStrategy::SingleAgent),
            "swarm" => Some(RoutingStrategy::Swarm),
            "prompt_chain" => Some(RoutingStrategy::PromptChain),
            _ => None,
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub agents: Vec<String>,
    pub initial_agent: Option<String>,
    pub strategy: RoutingStrategy,
    pub reasoning: String,
    pub confidence: f64,
}

impl RoutingPlan {
    pub fn has_agent(&self) -> bool {
        self.initial_agent.is_some()
    }
}

pub fn plan_route(c: &Classification, cfg: &RoutingConfig) -> RoutingPlan {
    let mut agents: Vec<String> = Vec::new();
    if c.domain != FULL_DOMAIN {
        let ordered = std::iter::once(c.domain.as_str())
            .chain(c.candidate_domains.iter().map(String::as_str));
        for domain in ordered {
            if agents.len() >= cfg.swarm.max_chain_agents {
                break;
            }
            if let Some(agent) = strategy::agent_for_domain(domain) {
                if !agents.iter().any(|a| a == agent) {
                    agents.push(agent.to_string());
                }
            }
        }
    }

    let (strategy, reasoning) = match agents.len() {
        0 => (
            RoutingStrategy::SingleAgent,
            format!("no specialist agent covers domain '{}'", c.domain),
        ),
        1 if c.complexity >= cfg.loader.deep_complexity => (
            RoutingStrategy::PromptChain,
            format!(
                "complexity {} needs staged work by {}",
                c.complexity, agents[0]
            ),
        ),
        1 => (
            RoutingStrategy::SingleAgent,
            format!("domain '{}' maps to {}", c.domain, agents[0]),
        ),
        n if c.complexity >= cfg.swarm.handoff_complexity => (
            RoutingStrategy::Swarm,
            format!(
                "{} domains matched at complexity {}; hand off across agents",
                n, c.complexity
            ),
        ),
        _ => (
            RoutingStrategy::SingleAgent,
            format!(
                "complexity {} below handoff threshold; primary domain '{}' leads",
                c.complexity, c.domain
            ),
        ),
    };

    // Below the handoff threshold only the primary agent is used.
    if strategy == RoutingStrategy::SingleAgent {
        agents.truncate(1);
    }

    RoutingPlan {
        initial_agent: agents.first().cloned(),
        agents,
        strategy,
        reasoning,
        confidence: c.confidence,
    }
}

// --- Full decision for one query ---

#[derive(Debug, Clone, Serialize)]
pub struct SwarmDecision {
    pub classification: Classification,
    pub invoke_swarm: bool,
    pub plan: RoutingPlan,
    pub agent_message: Option<String>,
    pub gap_logged: bool,
    pub recommendation: Option<AgentRecommendation>,
}

/// Classify, gate, plan and record gaps for one query. Never fails.
pub fn process_query(store: &Store, classifier: &dyn Classifier, query: &str) -> SwarmDecision {
    let classification = classifier.classify(query);
    let signal = RoutingSignal::from(&classification);
    let cfg = &store.config.swarm;

    let invoke_swarm = should_invoke_swarm(Some(&signal), cfg);
    let plan = plan_route(&classification, &store.config);
    let agent_message = if invoke_swarm {
        get_agent_loading_message(Some(&signal), plan.initial_agent.as_deref(), cfg)
    } else {
        None
    };

    let mut gap_logged = false;
    let mut recommendation = None;
    if should_log_capability_gap(Some(&signal), cfg) {
        gap_logged = log_capability_gap(store, &signal, query);
        if gap_logged {
            recommendation = gap_domains(&signal)
                .iter()
                .find_map(|d| check_for_agent_recommendation(store, d));
        }
    }

    debug!(
        domain = classification.domain.as_str(),
        invoke_swarm,
        strategy = plan.strategy.as_str(),
        gap_logged,
        "query processed"
    );

    SwarmDecision {
        classification,
        invoke_swarm,
        plan,
        agent_message,
        gap_logged,
        recommendation,
    }
}

// --- CLI ---

#[derive(Parser, Debug)]
#[clap(name = "swarm", about = "Agent routing gates, capability gaps and recommendations.")]
pub struct SwarmCli {
    #[clap(subcommand)]
    pub command: SwarmCommand,
}

#[derive(Subcommand, Debug)]
pub enum SwarmCommand {
    /// Classify, gate and plan one query.
    Process { query: String },
    /// Evaluate the gates for a JSON classification payload.
    Gate {
        json: String,
        /// Agent to load; defaults to the payload domain's specialist.
        #[clap(long)]
        agent: Option<String>,
    },
    /// List recorded capability gaps.
    Gaps {
        #[clap(long)]
        domain: Option<String>,
    },
    /// Check whether a domain's gaps warrant a new agent.
    Recommend { domain: String },
}

pub fn run_swarm_cli(store: &Store, cli: SwarmCli) -> Result<i32, MaiaError> {
    let cfg = &store.config.swarm;
    match cli.command {
        SwarmCommand::Process { query } => {
            let classifier = PatternClassifier::from_config(&store.config.classifier);
            let decision = process_query(store, &classifier, &query);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        SwarmCommand::Gate { json, agent } => {
            let signal = RoutingSignal::from_json(&json);
            let agent = agent.or_else(|| {
                signal
                    .as_ref()
                    .and_then(|s| s.domain.as_deref())
                    .and_then(strategy::agent_for_domain)
                    .map(str::to_string)
            });
            let out = serde_json::json!({
                "parsed": signal.is_some(),
                "invoke_swarm": should_invoke_swarm(signal.as_ref(), cfg),
                "capability_gap": should_log_capability_gap(signal.as_ref(), cfg),
                "agent": agent,
                "message": get_agent_loading_message(signal.as_ref(), agent.as_deref(), cfg),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        SwarmCommand::Gaps { domain } => {
            let ledger = GapLedger::new(store);
            let gaps = match domain {
                Some(d) => ledger.gaps_for_domain(&d)?,
                None => ledger.read_gaps()?,
            };
            println!("{}", serde_json::to_string_pretty(&gaps)?);
        }
        SwarmCommand::Recommend { domain } => {
            let rec = check_for_agent_recommendation(store, &domain);
            println!("{}", serde_json::to_string_pretty(&rec)?);
        }
    }
    Ok(0)
}
