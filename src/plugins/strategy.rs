//! Loading strategy registry (compiled into binary).
//!
//! Maps a classified domain to the bounded set of context resources worth
//! loading for it. Several domains share the same shape with different
//! resource lists; unknown domains resolve to the `full` strategy.

use crate::core::schemas;
use crate::plugins::intent::{Classification, FULL_DOMAIN};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum ResourceRef {
    /// A file relative to the Maia root.
    File(&'static str),
    /// Phase sections from the system state index.
    Phases(&'static [u32]),
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadingStrategy {
    pub name: &'static str,
    pub description: &'static str,
    pub domains: &'static [&'static str],
    pub resources: &'static [ResourceRef],
    pub expected_savings_pct: f64,
    /// Specialist agent for the domain, when one exists.
    pub agent: Option<&'static str>,
    /// When true the domain never escalates past the guaranteed minimum.
    pub minimal: bool,
}

const CORE_IDENTITY: ResourceRef = ResourceRef::File("claude/context/core/identity.md");
const CORE_PROTOCOL: ResourceRef =
    ResourceRef::File("claude/context/core/systematic_thinking_protocol.md");
const CORE_TOOLS: ResourceRef = ResourceRef::File("claude/context/tools/available.md");
const CORE_AGENTS: ResourceRef = ResourceRef::File("claude/context/core/agents.md");

static STRATEGIES: [LoadingStrategy; 9] = [
    LoadingStrategy {
        name: "minimal",
        description: "Greetings and trivial lookups need identity only",
        domains: &["simple"],
        resources: &[CORE_IDENTITY],
        expected_savings_pct: 90.0,
        agent: None,
        minimal: true,
    },
    LoadingStrategy {
        name: "security_focused",
        description: "Security principles, compliance notes and recent security phases",
        domains: &["security"],
        resources: &[
            CORE_IDENTITY,
            CORE_PROTOCOL,
            ResourceRef::File("claude/context/core/security_principles.md"),
            ResourceRef::File("claude/context/knowledge/security/compliance.md"),
            ResourceRef::Phases(&[113, 115]),
        ],
        expected_savings_pct: 72.0,
        agent: Some("security_specialist_agent"),
        minimal: false,
    },
    LoadingStrategy {
        name: "cloud_focused",
        description: "Cloud architecture standards and infrastructure phases",
        domains: &["cloud"],
        resources: &[
            CORE_IDENTITY,
            CORE_PROTOCOL,
            ResourceRef::File("claude/context/knowledge/cloud/architecture_standards.md"),
            ResourceRef::File("claude/context/knowledge/cloud/landing_zones.md"),
            ResourceRef::Phases(&[104, 118]),
        ],
        expected_savings_pct: 72.0,
        agent: Some("azure_architect_agent"),
        minimal: false,
    },
    LoadingStrategy {
        name: "technical_focused",
        description: "Tool inventory, development standards and engineering phases",
        domains: &["technical"],
        resources: &[
            CORE_IDENTITY,
            CORE_PROTOCOL,
            CORE_TOOLS,
            ResourceRef::File("claude/context/core/development_standards.md"),
            ResourceRef::Phases(&[107, 108]),
        ],
        expected_savings_pct: 65.0,
        agent: Some("software_engineer_agent"),
        minimal: false,
    },
    LoadingStrategy {
        name: "reliability_focused",
        description: "Runbooks, monitoring inventory and reliability phases",
        domains: &["sre"],
        resources: &[
            CORE_IDENTITY,
            CORE_TOOLS,
            ResourceRef::File("claude/context/knowledge/sre/runbooks.md"),
            ResourceRef::Phases(&[103, 111]),
        ],
        expected_savings_pct: 70.0,
        agent: Some("sre_principal_engineer_agent"),
        minimal: false,
    },
    LoadingStrategy {
        name: "financial_focused",
        description: "Personal finance profile and planning notes",
        domains: &["financial"],
        resources: &[
            CORE_IDENTITY,
            ResourceRef::File("claude/context/personal/financial_profile.md"),
        ],
        expected_savings_pct: 80.0,
        agent: Some("financial_advisor_agent"),
        minimal: false,
    },
    LoadingStrategy {
        name: "recruitment_focused",
        description: "Hiring rubric and interview scoring guidance",
        domains: &["recruitment"],
        resources: &[
            CORE_IDENTITY,
            ResourceRef::File("claude/context/knowledge/recruitment/rubric.md"),
            ResourceRef::Phases(&[97]),
        ],
        expected_savings_pct: 78.0,
        agent: Some("technical_recruitment_agent"),
        minimal: false,
    },
    LoadingStrategy {
        name: "personal_focused",
        description: "Personal profile, calendar and email conventions",
        domains: &["personal"],
        resources: &[
            CORE_IDENTITY,
            ResourceRef::File("claude/context/personal/profile.md"),
        ],
        expected_savings_pct: 82.0,
        agent: Some("personal_assistant_agent"),
        minimal: false,
    },
    LoadingStrategy {
        name: FULL_DOMAIN,
        description: "No targeting: load every core resource",
        domains: &[FULL_DOMAIN],
        resources: &[CORE_IDENTITY, CORE_PROTOCOL, CORE_TOOLS, CORE_AGENTS],
        expected_savings_pct: 0.0,
        agent: None,
        minimal: false,
    },
];

pub fn strategies() -> &'static [LoadingStrategy] {
    &STRATEGIES
}

fn full_strategy() -> &'static LoadingStrategy {
    &STRATEGIES[STRATEGIES.len() - 1]
}

/// Resolve a domain to its strategy. Unknown domains get `full`.
pub fn strategy_for_domain(domain: &str) -> &'static LoadingStrategy {
    STRATEGIES
        .iter()
        .find(|s| s.domains.contains(&domain))
        .unwrap_or_else(full_strategy)
}

/// Specialist agent registered for a domain.
pub fn agent_for_domain(domain: &str) -> Option<&'static str> {
    STRATEGIES
        .iter()
        .find(|s| s.domains.contains(&domain))
        .and_then(|s| s.agent)
}

/// True when `domain` resolves to something other than the `full` fallback.
pub fn has_targeted_strategy(domain: &str) -> bool {
    strategy_for_domain(domain).name != FULL_DOMAIN
}

/// Instruction block telling a downstream agent what to load for `c`.
pub fn instruction_block(c: &Classification) -> String {
    let s = strategy_for_domain(&c.domain);
    let mut out = String::from("DYNAMIC CONTEXT LOADING\n");
    out.push_str(&format!(
        "Domain: {} (confidence {:.2}, complexity {})\n",
        c.domain, c.confidence, c.complexity
    ));
    out.push_str(&format!("Strategy: {} - {}\n", s.name, s.description));
    out.push_str(&format!("Expected savings: {:.0}%\n", s.expected_savings_pct));

    out.push_str("Load these files:\n");
    for r in s.resources {
        if let ResourceRef::File(path) = r {
            out.push_str(&format!("  - {}\n", path));
        }
    }
    let phases: Vec<String> = s
        .resources
        .iter()
        .filter_map(|r| match r {
            ResourceRef::Phases(ns) => Some(ns.iter().map(|n| n.to_string())),
            ResourceRef::File(_) => None,
        })
        .flatten()
        .collect();
    if !phases.is_empty() {
        out.push_str(&format!(
            "Load these phases from {}: {}\n",
            schemas::SYSTEM_STATE_MD,
            phases.join(", ")
        ));
    }
    if let Some(agent) = s.agent {
        out.push_str(&format!(
            "Specialist agent: {}/{}.md\n",
            schemas::AGENTS_DIR,
            agent
        ));
    }
    out
}
