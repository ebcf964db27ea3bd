//! Check -> CheckResult -> verdict aggregation.
//!
//! A failed `Error` check is fatal for the whole report; a failed `Warning`
//! degrades it; `Info` checks are recorded but never change the verdict.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub severity: Severity,
    pub evidence: Vec<String>,
}

impl CheckResult {
    pub fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            severity: Severity::Info,
            evidence: Vec::new(),
        }
    }

    pub fn fail(name: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
            severity,
            evidence: Vec::new(),
        }
    }

    /// Build a result from a predicate; `severity` only matters on failure.
    pub fn check(name: &str, ok: bool, severity: Severity, message: impl Into<String>) -> Self {
        if ok {
            Self::pass(name, message)
        } else {
            Self::fail(name, severity, message)
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Degraded,
    Fail,
}

impl Verdict {
    /// Toolkit-wide exit code convention.
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Degraded => 1,
            Verdict::Fail => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Degraded => write!(f, "degraded"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateReport {
    pub checks: Vec<CheckResult>,
}

impl GateReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: CheckResult) {
        self.checks.push(result);
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn verdict(&self) -> Verdict {
        let worst = self
            .failures()
            .map(|c| c.severity)
            .max()
            .unwrap_or(Severity::Info);
        match worst {
            Severity::Error => Verdict::Fail,
            Severity::Warning => Verdict::Degraded,
            Severity::Info => Verdict::Pass,
        }
    }

    /// True unless an `Error` check failed.
    pub fn is_acceptable(&self) -> bool {
        self.verdict() != Verdict::Fail
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for c in &self.checks {
            let marker = if c.passed {
                "✓".bright_green()
            } else {
                match c.severity {
                    Severity::Error => "✗".bright_red(),
                    Severity::Warning => "⚠".bright_yellow(),
                    Severity::Info => "·".normal(),
                }
            };
            out.push_str(&format!("{} {}: {}\n", marker, c.name, c.message));
            for e in &c.evidence {
                out.push_str(&format!("    {}\n", e));
            }
        }
        out
    }
}
