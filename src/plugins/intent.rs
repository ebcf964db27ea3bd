//! Heuristic intent classification.
//!
//! Scores free text against per-domain regex pattern sets. A domain's score
//! is the fraction of its patterns that match, so confidence is a match
//! density, not a calibrated probability. No I/O, no allocation beyond the
//! lowercased input and the result.

use crate::core::config::ClassifierConfig;
use crate::core::gate::{CheckResult, GateReport, Severity};
use crate::core::output;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default domain: no savings, maximum coverage.
pub const FULL_DOMAIN: &str = "full";

pub const MIN_COMPLEXITY: u32 = 1;
pub const MAX_COMPLEXITY: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub domain: String,
    /// Normalized match density in [0, 1].
    pub confidence: f64,
    /// 1..=10
    pub complexity: u32,
    /// Domains with a non-zero score, best first.
    pub candidate_domains: Vec<String>,
}

impl Classification {
    pub fn fallback(confidence: f64, complexity: u32) -> Self {
        Self {
            domain: FULL_DOMAIN.to_string(),
            confidence,
            complexity,
            candidate_domains: Vec::new(),
        }
    }
}

/// Anything that can turn a query into a [`Classification`].
///
/// Implementations must be pure: same input, same output, no side effects.
pub trait Classifier {
    fn classify(&self, text: &str) -> Classification;

    /// Every domain this classifier can return, `full` included.
    fn domains(&self) -> Vec<String>;
}

// --- Built-in pattern registry ---

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DomainPatterns {
    pub domain: &'static str,
    pub description: &'static str,
    pub patterns: &'static [&'static str],
}

static DOMAIN_PATTERNS: [DomainPatterns; 8] = [
    DomainPatterns {
        domain: "simple",
        description: "Greetings, small talk and one-line factual lookups",
        patterns: &[
            r"^\s*(hi|hello|hey|thanks|thank you|cheers|ok|okay)\b",
            r"\bwhat\s+is\s+\d+\s*[-+*/x]\s*\d+",
            r"\bwhat('s| is) the (time|date|day)\b",
            r"\bhow are you\b",
            r"^\s*(yes|no|sure|great|cool)\s*[.!?]?\s*$",
        ],
    },
    DomainPatterns {
        domain: "security",
        description: "Security review, vulnerabilities, identity and compliance",
        patterns: &[
            r"\bsecurity\b",
            r"\b(vulnerab\w*|cve|exploit\w*)\b",
            r"\b(auth\w*|oauth|sso|mfa)\b",
            r"\b(compliance|soc ?2|iso ?27001|essential eight)\b",
            r"\b(audit|review)\b.{0,40}\b(security|secure|issues?)\b",
        ],
    },
    DomainPatterns {
        domain: "cloud",
        description: "Cloud platforms, infrastructure as code and tenancy",
        patterns: &[
            r"\b(azure|aws|gcp|cloud)\b",
            r"\b(terraform|bicep|arm template|iac)\b",
            r"\b(kubernetes|k8s|aks|eks|container\w*)\b",
            r"\b(vnet|subnet|landing zone|tenant)\b",
            r"\b(cost optimi[sz]ation|finops|reserved instances?)\b",
        ],
    },
    DomainPatterns {
        domain: "technical",
        description: "Code, languages, tooling and software design",
        patterns: &[
            r"\b(code|coding|function|refactor|bug)\b",
            r"\b(python|rust|javascript|typescript|bash|sql)\b",
            r"\b(api|database|server|deploy\w*)\b",
            r"\b(implement|build|debug|test)\b",
            r"\b(architecture|design pattern|algorithm)\b",
            r"\b(git|ci|pipeline|docker)\b",
        ],
    },
    DomainPatterns {
        domain: "sre",
        description: "Reliability, incidents, monitoring and scheduled jobs",
        patterns: &[
            r"\b(incident|outage|downtime)\b",
            r"\b(monitor\w*|alert\w*|observability)\b",
            r"\b(latency|slo|sla|error budget)\b",
            r"\b(health ?check|uptime|on-?call)\b",
            r"\b(launchd|cron|daemon|service (is )?down)\b",
        ],
    },
    DomainPatterns {
        domain: "financial",
        description: "Budgets, investments and personal finance",
        patterns: &[
            r"\b(budget|invoice|expense\w*|tax)\b",
            r"\b(invest\w*|portfolio|super(annuation)?|shares?)\b",
            r"\b(salary|income|savings?)\b",
            r"\$\s?\d",
            r"\b(mortgage|loan|interest rate)\b",
        ],
    },
    DomainPatterns {
        domain: "recruitment",
        description: "Hiring, interviews and candidate assessment",
        patterns: &[
            r"\b(interview\w*|candidate\w*|recruit\w*)\b",
            r"\b(cv|resume|résumé)\b",
            r"\b(job (description|posting|application)|hiring)\b",
            r"\b(linkedin|cover letter)\b",
            r"\b(role fit|shortlist\w*|offer letter)\b",
        ],
    },
    DomainPatterns {
        domain: "personal",
        description: "Email, calendar, reminders and everyday organisation",
        patterns: &[
            r"\b(email|inbox|calendar|meeting)\b",
            r"\b(remind\w*|todo|to-do|schedule)\b",
            r"\b(family|travel|holiday|trip)\b",
            r"\b(note\w*|journal)\b",
            r"\b(focus|productivity|habit)\b",
        ],
    },
];

pub fn domain_patterns() -> &'static [DomainPatterns] {
    &DOMAIN_PATTERNS
}

// --- Complexity heuristic ---

const COMPLEXITY_INDICATORS: &[&str] = &[
    "analyze", "analyse", "compare", "evaluate", "implement", "design", "architecture",
    "refactor", "optimize", "integrate", "migrate", "review", "debug", "multiple",
    "trade-off", "step by step", "across",
];

const DEEP_INDICATORS: &[&str] = &[
    "strategic", "strategy", "complete redesign", "redesign", "overhaul", "end-to-end",
    "roadmap", "comprehensive", "from scratch", "enterprise-wide",
];

/// Estimate how involved a query is on a 1..=10 scale.
pub fn estimate_complexity(text: &str) -> u32 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return MIN_COMPLEXITY;
    }
    let lower = trimmed.to_lowercase();
    let mut score: u32 = 1;

    score += match trimmed.split_whitespace().count() {
        0..=3 => 0,
        4..=12 => 1,
        13..=40 => 2,
        _ => 3,
    };

    let indicators = COMPLEXITY_INDICATORS
        .iter()
        .filter(|i| lower.contains(*i))
        .count()
        .min(3);
    score += indicators as u32;

    let deep = DEEP_INDICATORS
        .iter()
        .filter(|i| lower.contains(*i))
        .count()
        .min(2);
    score += 3 * deep as u32;

    if trimmed.contains("```") {
        score += 2;
    }
    if trimmed.matches(['.', '?', '!']).count() >= 3 {
        score += 1;
    }

    score.clamp(MIN_COMPLEXITY, MAX_COMPLEXITY)
}

// --- Pattern classifier ---

struct CompiledDomain {
    name: String,
    patterns: Vec<Regex>,
}

pub struct PatternClassifier {
    domains: Vec<CompiledDomain>,
    confidence_floor: f64,
}

impl PatternClassifier {
    /// Built-in registry with the default confidence floor.
    pub fn new() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }

    /// Built-in registry plus any configured extra patterns. Extra patterns
    /// for a name that is not built in register a new domain.
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let mut table: Vec<(String, Vec<String>)> = DOMAIN_PATTERNS
            .iter()
            .map(|d| {
                (
                    d.domain.to_string(),
                    d.patterns.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect();

        for (domain, extra) in &config.extra_patterns {
            match table.iter_mut().find(|(name, _)| name == domain) {
                Some((_, patterns)) => patterns.extend(extra.iter().cloned()),
                None => table.push((domain.clone(), extra.clone())),
            }
        }

        Self::from_table(&table, config.confidence_floor)
    }

    /// Compile an arbitrary registry. Invalid patterns are skipped; a domain
    /// left with no valid pattern is dropped.
    pub fn from_table(table: &[(String, Vec<String>)], confidence_floor: f64) -> Self {
        let mut domains = Vec::with_capacity(table.len());
        for (name, raw_patterns) in table {
            if name == FULL_DOMAIN {
                continue;
            }
            let mut patterns = Vec::with_capacity(raw_patterns.len());
            for raw in raw_patterns {
                match RegexBuilder::new(raw).case_insensitive(true).build() {
                    Ok(re) => patterns.push(re),
                    Err(e) => warn!(domain = name.as_str(), pattern = raw.as_str(), error = %e, "skipping invalid intent pattern"),
                }
            }
            if patterns.is_empty() {
                warn!(domain = name.as_str(), "intent domain has no usable patterns");
                continue;
            }
            domains.push(CompiledDomain {
                name: name.clone(),
                patterns,
            });
        }
        Self {
            domains,
            confidence_floor,
        }
    }

    /// Per-domain normalized scores in registry order.
    pub fn scores(&self, text: &str) -> Vec<(&str, f64)> {
        let lower = text.to_lowercase();
        self.domains
            .iter()
            .map(|d| {
                let hits = d.patterns.iter().filter(|re| re.is_match(&lower)).count();
                (d.name.as_str(), hits as f64 / d.patterns.len() as f64)
            })
            .collect()
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for PatternClassifier {
    fn classify(&self, text: &str) -> Classification {
        let complexity = estimate_complexity(text);
        if text.trim().is_empty() || self.domains.is_empty() {
            return Classification::fallback(0.0, complexity);
        }

        let scores = self.scores(text);

        // First domain reaching the maximum wins ties.
        let mut best: Option<(&str, f64)> = None;
        for &(name, score) in &scores {
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((name, score));
            }
        }
        let (best_domain, best_score) = best.unwrap_or((FULL_DOMAIN, 0.0));

        let mut ranked: Vec<(&str, f64)> = scores.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let candidate_domains: Vec<String> = ranked.iter().map(|(n, _)| n.to_string()).collect();

        let confidence = best_score.clamp(0.0, 1.0);
        if best_score == 0.0 || best_score < self.confidence_floor {
            return Classification {
                candidate_domains,
                ..Classification::fallback(confidence, complexity)
            };
        }

        Classification {
            domain: best_domain.to_string(),
            confidence,
            complexity,
            candidate_domains,
        }
    }

    fn domains(&self) -> Vec<String> {
        let mut out: Vec<String> = self.domains.iter().map(|d| d.name.clone()).collect();
        out.push(FULL_DOMAIN.to_string());
        out
    }
}

// --- Labeled example suite ---

pub static LABELED_EXAMPLES: &[(&str, &str)] = &[
    ("hello there", "simple"),
    ("what is 2+2", "simple"),
    ("audit our azure tenant for security vulnerabilities", "security"),
    ("review this python code for security issues", "security"),
    ("deploy a kubernetes cluster on aws with terraform", "cloud"),
    ("debug this rust function that panics", "technical"),
    ("the api server had an outage and latency alerts fired overnight", "sre"),
    ("help me plan my budget and grow my savings", "financial"),
    ("review this candidate's resume before the interview", "recruitment"),
    ("reschedule my meeting and check my inbox", "personal"),
    ("xyzzy plugh frobnicate", FULL_DOMAIN),
];

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub report: GateReport,
}

/// Run the labeled examples through `classifier` and grade the result.
pub fn run_labeled_suite(classifier: &dyn Classifier) -> SuiteReport {
    let registered = classifier.domains();
    let mut report = GateReport::new();
    let mut correct = 0usize;

    for (text, expected) in LABELED_EXAMPLES {
        let c = classifier.classify(text);
        let in_range = (0.0..=1.0).contains(&c.confidence);
        let registered_domain = registered.contains(&c.domain);
        report.push(
            CheckResult::check(
                "classification_shape",
                in_range && registered_domain,
                Severity::Error,
                format!("'{}' -> {} ({:.2})", output::compact_line(text, 40), c.domain, c.confidence),
            ),
        );

        let hit = c.domain == *expected;
        if hit {
            correct += 1;
        }
        report.push(
            CheckResult::check(
                "labeled_example",
                hit,
                Severity::Warning,
                format!("'{}' expected {}", output::compact_line(text, 40), expected),
            )
            .with_evidence(format!("got {} with confidence {:.2}", c.domain, c.confidence)),
        );
    }

    let total = LABELED_EXAMPLES.len();
    let accuracy = if total == 0 { 0.0 } else { correct as f64 / total as f64 };
    report.push(CheckResult::check(
        "suite_accuracy",
        accuracy >= 0.5,
        Severity::Error,
        format!("{}/{} correct ({:.0}%)", correct, total, accuracy * 100.0),
    ));

    SuiteReport {
        total,
        correct,
        accuracy,
        report,
    }
}
