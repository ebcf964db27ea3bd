//! Routing decision log.
//!
//! Records every routing suggestion, correlates it with what the user
//! actually did, and aggregates daily acceptance metrics per category.
//! All tables live in `claude/data/routing_decisions.db`.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::MaiaError;
use crate::core::store::Store;
use crate::core::time;
use crate::core::output;
use crate::plugins::intent::{Classification, Classifier, PatternClassifier};
use crate::plugins::swarm::{self, RoutingPlan};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

pub const QUERY_HASH_LEN: usize = 16;

/// Deterministic correlation key for a query text. Not unique per row.
pub fn query_hash(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(QUERY_HASH_LEN);
    hex
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideType {
    FullReject,
    PartialAccept,
    AgentSubstitution,
}

impl OverrideType {
    pub fn as_str(self) -> &'static str {
        match self {
            OverrideType::FullReject => "full_reject",
            OverrideType::PartialAccept => "partial_accept",
            OverrideType::AgentSubstitution => "agent_substitution",
        }
    }

    /// Empty overlap is a full reject; a strict non-empty subset of the
    /// suggestion is a partial accept; anything else is a substitution.
    pub fn classify(suggested: &[String], actual: &[String]) -> Self {
        let overlap = suggested.iter().filter(|s| actual.contains(s)).count();
        if overlap == 0 {
            OverrideType::FullReject
        } else if overlap < suggested.len() {
            OverrideType::PartialAccept
        } else {
            OverrideType::AgentSubstitution
        }
    }
}

impl fmt::Display for OverrideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRecord {
    pub id: i64,
    pub timestamp: String,
    pub query_hash: String,
    pub query_text: String,
    pub query_category: String,
    pub query_complexity: u32,
    pub intent_confidence: f64,
    pub candidate_domains: Vec<String>,
    pub suggested_agents: Vec<String>,
    pub initial_agent: Option<String>,
    pub strategy: String,
    pub reasoning: String,
    pub routing_confidence: f64,
    pub accepted: Option<bool>,
    pub actual_agents: Option<Vec<String>>,
    pub override_reason: Option<String>,
    pub acceptance_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceMetric {
    pub date: String,
    pub category: String,
    pub total_suggestions: i64,
    pub accepted_count: i64,
    pub rejected_count: i64,
    pub pending_count: i64,
    pub acceptance_rate: f64,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingStats {
    pub total: i64,
    pub accepted: i64,
    pub rejected: i64,
    pub pending: i64,
    pub acceptance_rate_7d: f64,
    pub acceptance_rate_30d: f64,
    pub by_category: Vec<(String, i64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Substitution {
    pub suggested: String,
    pub actual: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideSummary {
    pub days: i64,
    pub total: i64,
    pub by_type: Vec<(String, i64)>,
    pub top_substitutions: Vec<Substitution>,
}

fn to_json_list(items: &[String]) -> Result<String, MaiaError> {
    Ok(serde_json::to_string(items)?)
}

fn parse_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

const SUGGESTION_COLUMNS: &str = "id, timestamp, query_hash, query_text, query_category,
    query_complexity, intent_confidence, candidate_domains, suggested_agents, initial_agent,
    strategy, reasoning, routing_confidence, accepted, actual_agents, override_reason,
    acceptance_timestamp";

/// Start of a trailing window of `days`, as a stored timestamp.
fn window_start(days: i64) -> Result<String, MaiaError> {
    if days < 0 {
        return Err(MaiaError::ValidationError(format!(
            "window must be non-negative, got {} days",
            days
        )));
    }
    Duration::try_days(days)
        .and_then(|d| time::now().checked_sub_signed(d))
        .map(time::format_ts)
        .ok_or_else(|| {
            MaiaError::ValidationError(format!("window of {} days is out of range", days))
        })
}

fn suggestion_from_row(row: &Row<'_>) -> rusqlite::Result<SuggestionRecord> {
    let candidate_domains: String = row.get(7)?;
    let suggested_agents: String = row.get(8)?;
    let accepted: Option<i64> = row.get(13)?;
    let actual_agents: Option<String> = row.get(14)?;
    let complexity: i64 = row.get(5)?;
    Ok(SuggestionRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        query_hash: row.get(2)?,
        query_text: row.get(3)?,
        query_category: row.get(4)?,
        query_complexity: u32::try_from(complexity)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(5, complexity))?,
        intent_confidence: row.get(6)?,
        candidate_domains: parse_json_list(&candidate_domains),
        suggested_agents: parse_json_list(&suggested_agents),
        initial_agent: row.get(9)?,
        strategy: row.get(10)?,
        reasoning: row.get(11)?,
        routing_confidence: row.get(12)?,
        accepted: accepted.map(|a| a != 0),
        actual_agents: actual_agents.as_deref().map(parse_json_list),
        override_reason: row.get(15)?,
        acceptance_timestamp: row.get(16)?,
    })
}

fn rate(accepted: i64, resolved: i64) -> f64 {
    if resolved <= 0 {
        0.0
    } else {
        accepted as f64 / resolved as f64
    }
}

pub struct RoutingLogger {
    db_path: PathBuf,
    broker: DbBroker,
}

impl RoutingLogger {
    /// Opens (and if needed creates) the routing database under the store.
    pub fn new(store: &Store) -> Result<Self, MaiaError> {
        db::initialize_routing_db(store)?;
        Ok(Self {
            db_path: store.routing_db_path(),
            broker: DbBroker::new(store),
        })
    }

    pub fn log_suggestion(
        &self,
        query: &str,
        intent: &Classification,
        plan: &RoutingPlan,
    ) -> Result<String, MaiaError> {
        self.log_suggestion_at(query, intent, plan, time::now())
    }

    /// Same as `log_suggestion` with an explicit timestamp.
    pub fn log_suggestion_at(
        &self,
        query: &str,
        intent: &Classification,
        plan: &RoutingPlan,
        at: DateTime<Utc>,
    ) -> Result<String, MaiaError> {
        let hash = query_hash(query);
        let ts = time::format_ts(at);
        let candidates = to_json_list(&intent.candidate_domains)?;
        let agents = to_json_list(&plan.agents)?;

        self.broker
            .with_conn(&self.db_path, "routing.log_suggestion", |conn| {
                conn.execute(
                    "INSERT INTO routing_suggestions(
                        timestamp, query_hash, query_text, query_category, query_complexity,
                        intent_confidence, candidate_domains, suggested_agents, initial_agent,
                        strategy, reasoning, routing_confidence)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        ts,
                        hash,
                        query,
                        intent.domain,
                        intent.complexity as i64,
                        intent.confidence,
                        candidates,
                        agents,
                        plan.initial_agent,
                        plan.strategy.as_str(),
                        plan.reasoning,
                        plan.confidence
                    ],
                )?;
                recompute_in(conn, &time::day_of(at))?;
                Ok(())
            })?;
        debug!(hash = hash.as_str(), category = intent.domain.as_str(), "routing suggestion logged");
        Ok(hash)
    }

    /// Resolve the most recent open suggestion for `hash`. Returns false when
    /// there is nothing open to resolve; never inserts a suggestion row.
    pub fn log_actual_usage(
        &self,
        hash: &str,
        actual_agents: &[String],
        accepted: bool,
        override_reason: Option<&str>,
    ) -> Result<bool, MaiaError> {
        let actual_json = to_json_list(actual_agents)?;
        let now = time::now_rfc3339();

        self.broker
            .with_conn(&self.db_path, "routing.log_actual_usage", |conn| {
                let tx = conn.unchecked_transaction()?;
                let open: Option<(i64, String, String, String)> = tx
                    .query_row(
                        "SELECT id, timestamp, query_category, suggested_agents
                         FROM routing_suggestions
                         WHERE id = (
                            SELECT id FROM routing_suggestions
                            WHERE query_hash = ?1 AND acceptance_timestamp IS NULL
                            ORDER BY timestamp DESC, id DESC LIMIT 1)",
                        params![hash],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;
                let Some((id, ts, category, suggested_raw)) = open else {
                    return Ok(false);
                };

                tx.execute(
                    "UPDATE routing_suggestions
                     SET accepted = ?1, actual_agents = ?2, override_reason = ?3,
                         acceptance_timestamp = ?4
                     WHERE id = ?5 AND acceptance_timestamp IS NULL",
                    params![accepted as i64, actual_json, override_reason, now, id],
                )?;

                if !accepted {
                    let suggested = parse_json_list(&suggested_raw);
                    let kind = OverrideType::classify(&suggested, actual_agents);
                    tx.execute(
                        "INSERT INTO override_patterns(
                            suggestion_id, timestamp, query_category, suggested_agents,
                            actual_agents, override_type, override_reason)
                         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            id,
                            now,
                            category,
                            suggested_raw,
                            actual_json,
                            kind.as_str(),
                            override_reason
                        ],
                    )?;
                }

                let day = time::parse_ts(&ts)
                    .map(time::day_of)
                    .unwrap_or_else(|| ts.chars().take(10).collect());
                recompute_in(&tx, &day)?;
                tx.commit()?;
                Ok(true)
            })
    }

    /// Upsert the aggregate row of every category seen on `date`.
    /// Returns the number of categories written.
    pub fn recompute_metrics(&self, date: &str) -> Result<usize, MaiaError> {
        if time::parse_day(date).is_none() {
            return Err(MaiaError::ValidationError(format!(
                "expected YYYY-MM-DD, got '{}'",
                date
            )));
        }
        self.broker
            .with_conn(&self.db_path, "routing.recompute_metrics", |conn| {
                recompute_in(conn, date)
            })
    }

    /// Accepted share of resolved suggestions within the last `days`.
    /// Pending suggestions are not counted; no resolved rows gives 0.0.
    pub fn get_acceptance_rate(&self, category: Option<&str>, days: i64) -> Result<f64, MaiaError> {
        let cutoff = window_start(days)?;
        self.broker
            .with_conn(&self.db_path, "routing.acceptance_rate", |conn| {
                let (accepted, resolved): (Option<i64>, Option<i64>) = conn.query_row(
                    "SELECT SUM(accepted = 1), SUM(accepted IS NOT NULL)
                     FROM routing_suggestions
                     WHERE timestamp >= ?1 AND (?2 IS NULL OR query_category = ?2)",
                    params![cutoff, category],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok(rate(accepted.unwrap_or(0), resolved.unwrap_or(0)))
            })
    }

    pub fn recent(&self, n: usize) -> Result<Vec<SuggestionRecord>, MaiaError> {
        self.broker.with_conn(&self.db_path, "routing.recent", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM routing_suggestions ORDER BY timestamp DESC, id DESC LIMIT ?1",
                SUGGESTION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![n as i64], suggestion_from_row)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    pub fn suggestions_for_hash(&self, hash: &str) -> Result<Vec<SuggestionRecord>, MaiaError> {
        self.broker
            .with_conn(&self.db_path, "routing.by_hash", |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM routing_suggestions WHERE query_hash = ?1 ORDER BY timestamp, id",
                    SUGGESTION_COLUMNS
                ))?;
                let rows = stmt.query_map(params![hash], suggestion_from_row)?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(r?);
                }
                Ok(out)
            })
    }

    pub fn metrics(&self, date: Option<&str>) -> Result<Vec<AcceptanceMetric>, MaiaError> {
        self.broker.with_conn(&self.db_path, "routing.metrics", |conn| {
            let mut stmt = conn.prepare(
                "SELECT date, category, total_suggestions, accepted_count, rejected_count,
                        pending_count, acceptance_rate, updated_at
                 FROM acceptance_metrics
                 WHERE (?1 IS NULL OR date = ?1)
                 ORDER BY date DESC, category",
            )?;
            let rows = stmt.query_map(params![date], |row| {
                Ok(AcceptanceMetric {
                    date: row.get(0)?,
                    category: row.get(1)?,
                    total_suggestions: row.get(2)?,
                    accepted_count: row.get(3)?,
                    rejected_count: row.get(4)?,
                    pending_count: row.get(5)?,
                    acceptance_rate: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    pub fn stats(&self) -> Result<RoutingStats, MaiaError> {
        let (total, accepted, rejected, pending, by_category) =
            self.broker.with_conn(&self.db_path, "routing.stats", |conn| {
                let (total, accepted, rejected, pending): (i64, Option<i64>, Option<i64>, Option<i64>) =
                    conn.query_row(
                        "SELECT COUNT(*), SUM(accepted = 1), SUM(accepted = 0), SUM(accepted IS NULL)
                         FROM routing_suggestions",
                        [],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )?;
                let mut stmt = conn.prepare(
                    "SELECT query_category, COUNT(*) AS n FROM routing_suggestions
                     GROUP BY query_category ORDER BY n DESC, query_category",
                )?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let mut by_category: Vec<(String, i64)> = Vec::new();
                for r in rows {
                    by_category.push(r?);
                }
                Ok((
                    total,
                    accepted.unwrap_or(0),
                    rejected.unwrap_or(0),
                    pending.unwrap_or(0),
                    by_category,
                ))
            })?;
        Ok(RoutingStats {
            total,
            accepted,
            rejected,
            pending,
            acceptance_rate_7d: self.get_acceptance_rate(None, 7)?,
            acceptance_rate_30d: self.get_acceptance_rate(None, 30)?,
            by_category,
        })
    }

    /// Most frequent override kinds and suggested -> actual swaps.
    pub fn override_summary(&self, days: i64) -> Result<OverrideSummary, MaiaError> {
        let cutoff = window_start(days)?;
        self.broker
            .with_conn(&self.db_path, "routing.override_summary", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT override_type, COUNT(*) AS n FROM override_patterns
                     WHERE timestamp >= ?1 GROUP BY override_type ORDER BY n DESC, override_type",
                )?;
                let rows = stmt.query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let mut by_type: Vec<(String, i64)> = Vec::new();
                for r in rows {
                    by_type.push(r?);
                }
                let total: i64 = by_type.iter().map(|(_, n)| n).sum();

                let mut stmt = conn.prepare(
                    "SELECT suggested_agents, actual_agents FROM override_patterns
                     WHERE timestamp >= ?1",
                )?;
                let rows = stmt.query_map(params![cutoff], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut swaps: Vec<Substitution> = Vec::new();
                for r in rows {
                    let (s, a) = r?;
                    let suggested = parse_json_list(&s);
                    let actual = parse_json_list(&a);
                    for from in suggested.iter().filter(|x| !actual.contains(x)) {
                        for to in actual.iter().filter(|x| !suggested.contains(x)) {
                            match swaps.iter_mut().find(|w| &w.suggested == from && &w.actual == to) {
                                Some(w) => w.count += 1,
                                None => swaps.push(Substitution {
                                    suggested: from.clone(),
                                    actual: to.clone(),
                                    count: 1,
                                }),
                            }
                        }
                    }
                }
                swaps.sort_by(|a, b| {
                    b.count
                        .cmp(&a.count)
                        .then_with(|| a.suggested.cmp(&b.suggested))
                        .then_with(|| a.actual.cmp(&b.actual))
                });
                swaps.truncate(5);

                Ok(OverrideSummary {
                    days,
                    total,
                    by_type,
                    top_substitutions: swaps,
                })
            })
    }
}

fn recompute_in(conn: &Connection, date: &str) -> Result<usize, MaiaError> {
    let mut stmt = conn.prepare(
        "SELECT query_category, COUNT(*), SUM(accepted = 1), SUM(accepted = 0), SUM(accepted IS NULL)
         FROM routing_suggestions
         WHERE substr(timestamp, 1, 10) = ?1
         GROUP BY query_category",
    )?;
    let rows = stmt.query_map(params![date], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        ))
    })?;
    let mut aggregates = Vec::new();
    for r in rows {
        aggregates.push(r?);
    }

    let updated_at = time::now_rfc3339();
    for (category, total, accepted, rejected, pending) in &aggregates {
        conn.execute(
            "INSERT INTO acceptance_metrics(
                date, category, total_suggestions, accepted_count, rejected_count,
                pending_count, acceptance_rate, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(date, category) DO UPDATE SET
                total_suggestions = excluded.total_suggestions,
                accepted_count = excluded.accepted_count,
                rejected_count = excluded.rejected_count,
                pending_count = excluded.pending_count,
                acceptance_rate = excluded.acceptance_rate,
                updated_at = excluded.updated_at",
            params![
                date,
                category,
                total,
                accepted,
                rejected,
                pending,
                rate(*accepted, accepted + rejected),
                updated_at
            ],
        )?;
    }
    Ok(aggregates.len())
}

// --- CLI ---

#[derive(Parser, Debug)]
#[clap(name = "routing", about = "Routing suggestion log and acceptance metrics.")]
pub struct RoutingCli {
    #[clap(subcommand)]
    pub command: RoutingCommand,
}

#[derive(Subcommand, Debug)]
pub enum RoutingCommand {
    /// Log a sample suggestion and acceptance into a throwaway store.
    Test,
    /// 7-day and 30-day acceptance rates plus totals.
    Stats,
    /// Most recent suggestions.
    Recent {
        #[clap(default_value_t = 10)]
        n: usize,
    },
    /// Record what actually happened for a suggestion.
    Accept {
        hash: String,
        /// Agents actually used, comma separated.
        #[clap(long, value_delimiter = ',')]
        agents: Vec<String>,
        #[clap(long)]
        rejected: bool,
        #[clap(long)]
        reason: Option<String>,
    },
    /// Daily acceptance metrics.
    Metrics {
        /// YYYY-MM-DD; recomputes that day before printing.
        #[clap(long)]
        date: Option<String>,
    },
    /// Most frequent overrides.
    Overrides {
        #[clap(long, default_value_t = 30)]
        days: i64,
    },
}

fn accepted_marker(accepted: Option<bool>) -> colored::ColoredString {
    match accepted {
        Some(true) => "✓".bright_green(),
        Some(false) => "✗".bright_red(),
        None => "…".bright_yellow(),
    }
}

/// Round trip against a throwaway store under the temp dir.
fn self_test() -> Result<bool, MaiaError> {
    let root = std::env::temp_dir().join(format!("maia-routing-test-{}", time::new_event_id()));
    let store = Store::with_defaults(&root);
    let classifier = PatternClassifier::new();
    let query = "review this python code for security issues";
    let c = classifier.classify(query);
    let plan = swarm::plan_route(&c, &store.config);

    let logger = RoutingLogger::new(&store)?;
    let hash = logger.log_suggestion(query, &c, &plan)?;
    let resolved = logger.log_actual_usage(&hash, &plan.agents, true, None)?;
    let rows = logger.suggestions_for_hash(&hash)?;
    let rate = logger.get_acceptance_rate(Some(&c.domain), 7)?;

    println!("query_hash: {}", hash);
    println!("category:   {} ({:.2})", c.domain, c.confidence);
    println!("agents:     {}", output::agent_list(&plan.agents));
    println!("resolved:   {}", resolved);
    println!("rows:       {}", rows.len());
    println!("rate (7d):  {:.2}", rate);

    let ok = resolved && rows.len() == 1 && rows[0].accepted == Some(true) && rate == 1.0;
    if let Err(e) = std::fs::remove_dir_all(&root) {
        tracing::warn!(error = %e, root = %root.display(), "test store not removed");
    }
    Ok(ok)
}

pub fn run_routing_cli(store: &Store, cli: RoutingCli) -> Result<i32, MaiaError> {
    if let RoutingCommand::Test = cli.command {
        let ok = self_test()?;
        println!("{}", if ok { "✓ round trip ok".bright_green() } else { "✗ round trip failed".bright_red() });
        return Ok(if ok { 0 } else { 2 });
    }

    let logger = RoutingLogger::new(store)?;
    match cli.command {
        RoutingCommand::Test => {}
        RoutingCommand::Stats => {
            println!("{}", serde_json::to_string_pretty(&logger.stats()?)?);
        }
        RoutingCommand::Recent { n } => {
            for r in logger.recent(n)? {
                println!(
                    "{} {} {} [{}] {} {}",
                    accepted_marker(r.accepted),
                    r.timestamp,
                    r.query_hash,
                    r.query_category,
                    output::agent_list(&r.suggested_agents),
                    output::compact_line(&r.query_text, 60)
                );
            }
        }
        RoutingCommand::Accept {
            hash,
            agents,
            rejected,
            reason,
        } => {
            let agents: Vec<String> = agents
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            if !logger.log_actual_usage(&hash, &agents, !rejected, reason.as_deref())? {
                return Err(MaiaError::NotFound(format!(
                    "no open suggestion for hash {}",
                    hash
                )));
            }
            println!("{} {}", "✓".bright_green(), hash);
        }
        RoutingCommand::Metrics { date } => {
            if let Some(d) = &date {
                logger.recompute_metrics(d)?;
            }
            println!("{}", serde_json::to_string_pretty(&logger.metrics(date.as_deref())?)?);
        }
        RoutingCommand::Overrides { days } => {
            println!("{}", serde_json::to_string_pretty(&logger.override_summary(days)?)?);
        }
    }
    Ok(0)
}
