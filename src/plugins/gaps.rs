//! Capability-gap ledger and new-agent recommendations.
//!
//! Low-confidence queries are appended to `claude/data/capability_gaps.json`.
//! When enough gaps for one domain cluster inside a rolling window, an
//! `AgentRecommendation` is derived and recorded in
//! `claude/data/agent_recommendations.json`. Both files are flat JSON
//! arrays that only ever grow.

use crate::core::error::MaiaError;
use crate::core::store::Store;
use crate::core::time;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityGap {
    pub query: String,
    pub domains: Vec<String>,
    pub confidence: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecommendation {
    pub domain: String,
    pub example_queries: Vec<String>,
    /// Total gaps recorded for the domain, not just the clustered ones.
    pub count: usize,
    pub created_at: String,
}

fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, MaiaError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn write_json_array<T: Serialize>(path: &Path, items: &[T]) -> Result<(), MaiaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(items)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Move an unreadable ledger aside so appends can continue.
fn quarantine(path: &Path) -> Result<PathBuf, MaiaError> {
    let aside = path.with_extension(format!("corrupt-{}.json", time::new_event_id()));
    fs::rename(path, &aside)?;
    Ok(aside)
}

pub struct GapLedger<'a> {
    store: &'a Store,
}

impl<'a> GapLedger<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn read_gaps(&self) -> Result<Vec<CapabilityGap>, MaiaError> {
        read_json_array(&self.store.gaps_path())
    }

    pub fn read_recommendations(&self) -> Result<Vec<AgentRecommendation>, MaiaError> {
        read_json_array(&self.store.recommendations_path())
    }

    pub fn append_gap(&self, gap: CapabilityGap) -> Result<(), MaiaError> {
        let path = self.store.gaps_path();
        let mut gaps = match self.read_gaps() {
            Ok(g) => g,
            Err(MaiaError::JsonError(e)) => {
                let aside = quarantine(&path)?;
                warn!(error = %e, moved_to = %aside.display(), "capability gap ledger unreadable; starting a new one");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        gaps.push(gap);
        write_json_array(&path, &gaps)
    }

    pub fn gaps_for_domain(&self, domain: &str) -> Result<Vec<CapabilityGap>, MaiaError> {
        Ok(self
            .read_gaps()?
            .into_iter()
            .filter(|g| g.domains.iter().any(|d| d == domain))
            .collect())
    }

    /// Derive a recommendation when at least `min_gaps` gaps for `domain`
    /// fall within any window of `window_days`.
    pub fn recommendation_for(
        &self,
        domain: &str,
        min_gaps: usize,
        window_days: i64,
    ) -> Result<Option<AgentRecommendation>, MaiaError> {
        let gaps = self.gaps_for_domain(domain)?;
        Ok(cluster_recommendation(domain, &gaps, min_gaps, window_days))
    }

    /// Append unless an equal-or-larger recommendation for the domain is
    /// already on file. Returns whether it was written.
    pub fn record_recommendation(&self, rec: &AgentRecommendation) -> Result<bool, MaiaError> {
        let mut existing = self.read_recommendations()?;
        if existing
            .iter()
            .any(|r| r.domain == rec.domain && r.count >= rec.count)
        {
            return Ok(false);
        }
        existing.push(rec.clone());
        write_json_array(&self.store.recommendations_path(), &existing)?;
        Ok(true)
    }
}

/// Sliding-window scan over timestamp-ordered gaps. Every query in the
/// densest window is kept as an example. Gaps whose timestamp does not
/// parse are ignored for clustering but still counted.
pub fn cluster_recommendation(
    domain: &str,
    gaps: &[CapabilityGap],
    min_gaps: usize,
    window_days: i64,
) -> Option<AgentRecommendation> {
    if min_gaps == 0 || gaps.len() < min_gaps {
        return None;
    }
    let mut dated: Vec<(DateTime<Utc>, &CapabilityGap)> = gaps
        .iter()
        .filter_map(|g| time::parse_ts(&g.timestamp).map(|ts| (ts, g)))
        .collect();
    dated.sort_by_key(|(ts, _)| *ts);

    let window = Duration::try_days(window_days)?;
    let mut best: Option<(usize, usize)> = None;
    let mut start = 0;
    for end in 0..dated.len() {
        while dated[end].0 - dated[start].0 > window {
            start += 1;
        }
        let size = end - start + 1;
        if best.is_none_or(|(s, e)| size > e - s + 1) {
            best = Some((start, end));
        }
    }

    let (s, e) = best?;
    if e - s + 1 < min_gaps {
        return None;
    }
    Some(AgentRecommendation {
        domain: domain.to_string(),
        example_queries: dated[s..=e]
            .iter()
            .map(|(_, g)| g.query.clone())
            .collect(),
        count: gaps.len(),
        created_at: time::now_rfc3339(),
    })
}
