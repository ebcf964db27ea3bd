//! Tiered context loading.
//!
//! Every request commits to exactly one tier:
//! - Tier 0, guaranteed minimum: recent phase digest from the phase
//!   database, else from `SYSTEM_STATE.md`, else a compiled-in string.
//!   Never empty, at most `minimum_tokens`.
//! - Tier 1, intent-matched: the domain's strategy resources, else a
//!   keyword search over the phase index, else the most recent phases.
//! - Tier 2, deep context: strategy resources, search hits and recent
//!   phases together, hard-capped at `deep_tokens`.
//!
//! A tier that cannot be composed degrades to the tier below it. Tokens are
//! estimated as `ceil(chars / 4)`.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::MaiaError;
use crate::core::output;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::intent::{self, Classification, Classifier, PatternClassifier};
use crate::plugins::strategy::{self, LoadingStrategy, ResourceRef};
use clap::{Parser, Subcommand};
use colored::Colorize;
use regex::Regex;
use rusqlite::params;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const STATIC_MINIMUM: &str = "MAIA CORE CONTEXT (static fallback)
Identity: Maia, a personal AI assistant for engineering, cloud, security and personal productivity work.
Working protocol: understand the problem, explore options, recommend one, then act.
Agents live under claude/agents/ and tools under claude/tools/.
System state is unavailable right now; ask before assuming recent project history.";

const TRUNCATION_MARKER: &str = "\n[...truncated]";

/// Share of the store deadline a locked phase database may wait for. The
/// rest is left for the markdown and static fallbacks.
const SQLITE_BUSY_DIVISOR: u32 = 4;
const SEARCH_LIMIT: usize = 5;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "could", "does", "from", "have",
    "help", "into", "just", "like", "make", "more", "need", "only", "over", "please", "should",
    "some", "than", "that", "their", "them", "then", "there", "these", "they", "this", "what",
    "when", "where", "which", "while", "will", "with", "would", "your",
];

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Lowercased words of four or more characters, stopwords removed, in order.
pub fn significant_terms(query: &str) -> Vec<String> {
    let mut seen = FxHashSet::default();
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4 && !STOPWORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(|w| w.to_string())
        .collect()
}

// --- Phase sources ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub number: u32,
    pub title: String,
    pub status: String,
    pub summary: String,
    pub keywords: String,
    pub content: String,
}

impl Phase {
    pub fn digest_line(&self) -> String {
        let line = format!("Phase {}: {} [{}]", self.number, self.title, self.status);
        if self.summary.is_empty() {
            line
        } else {
            format!("{} - {}", line, output::compact_line(&self.summary, 80))
        }
    }

    pub fn section(&self) -> String {
        let body = if self.content.trim().is_empty() {
            &self.summary
        } else {
            &self.content
        };
        format!(
            "## Phase {}: {}\nStatus: {}\n{}",
            self.number,
            self.title,
            self.status,
            body.trim()
        )
    }

    fn term_hits(&self, terms: &[String]) -> usize {
        let haystack = format!("{} {} {}", self.title, self.keywords, self.summary).to_lowercase();
        terms.iter().filter(|t| haystack.contains(t.as_str())).count()
    }
}

/// Rank by matched-term count, then most recent phase first.
pub fn rank_phases(phases: Vec<Phase>, terms: &[String], limit: usize) -> Vec<Phase> {
    let mut scored: Vec<(usize, Phase)> = phases
        .into_iter()
        .map(|p| (p.term_hits(terms), p))
        .filter(|(hits, _)| *hits > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.number.cmp(&a.1.number)));
    scored.into_iter().take(limit).map(|(_, p)| p).collect()
}

/// Narrow read interface over a phase index.
pub trait PhaseSource {
    fn name(&self) -> &str;
    fn phases(&self, numbers: &[u32]) -> Result<Vec<Phase>, MaiaError>;
    fn search(&self, terms: &[String], limit: usize) -> Result<Vec<Phase>, MaiaError>;
    fn recent(&self, n: usize) -> Result<Vec<Phase>, MaiaError>;
}

pub struct SqlitePhaseSource {
    db_path: PathBuf,
    busy: Duration,
    broker: Option<DbBroker>,
}

impl SqlitePhaseSource {
    pub fn new(db_path: impl Into<PathBuf>, busy: Duration) -> Self {
        Self {
            db_path: db_path.into(),
            busy,
            broker: None,
        }
    }

    /// Audit every read through the store's broker.
    pub fn with_broker(mut self, broker: DbBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    fn query(&self, sql: &str, bind: &[&dyn rusqlite::ToSql]) -> Result<Vec<Phase>, MaiaError> {
        let read = |conn: &rusqlite::Connection| read_phases(conn, sql, bind);
        match &self.broker {
            Some(broker) => broker.with_read_conn(&self.db_path, "phases.read", self.busy, read),
            None => read(&db::db_connect_read_only(&self.db_path, self.busy)?),
        }
    }
}

/// Rows whose phase number does not fit a `u32` are skipped.
fn read_phases(
    conn: &rusqlite::Connection,
    sql: &str,
    bind: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Phase>, MaiaError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(bind, |row| {
        let number: i64 = row.get(0)?;
        Ok((
            number,
            Phase {
                number: 0,
                title: row.get(1)?,
                status: row.get(2)?,
                summary: row.get(3)?,
                keywords: row.get(4)?,
                content: row.get(5)?,
            },
        ))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (number, mut phase) = r?;
        match u32::try_from(number) {
            Ok(n) => {
                phase.number = n;
                out.push(phase);
            }
            Err(_) => warn!(phase_number = number, "skipping phase row with out-of-range number"),
        }
    }
    Ok(out)
}

const PHASE_COLUMNS: &str = "phase_number, title, status, summary, keywords, content";

impl PhaseSource for SqlitePhaseSource {
    fn name(&self) -> &str {
        "system_state.db"
    }

    fn phases(&self, numbers: &[u32]) -> Result<Vec<Phase>, MaiaError> {
        let mut out = Vec::new();
        let sql = format!("SELECT {} FROM phases WHERE phase_number = ?1", PHASE_COLUMNS);
        for n in numbers {
            out.extend(self.query(&sql, &[&(*n as i64)])?);
        }
        Ok(out)
    }

    fn search(&self, terms: &[String], limit: usize) -> Result<Vec<Phase>, MaiaError> {
        let all = self.query(&format!("SELECT {} FROM phases", PHASE_COLUMNS), &[])?;
        Ok(rank_phases(all, terms, limit))
    }

    fn recent(&self, n: usize) -> Result<Vec<Phase>, MaiaError> {
        self.query(
            &format!(
                "SELECT {} FROM phases ORDER BY phase_number DESC LIMIT ?1",
                PHASE_COLUMNS
            ),
            &[&(n as i64)],
        )
    }
}

/// Phase sections parsed from `## Phase N: Title` headings.
pub struct MarkdownPhaseSource {
    path: PathBuf,
}

fn phase_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^##\s+Phase\s+(\d+)\s*[:\-–]\s*(.+?)\s*$").expect("static regex")
    })
}

fn status_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\*{0,2}status\*{0,2}\s*:\s*\**\s*(.+?)\**\s*$").expect("static regex"))
}

fn finish_section<'t>(entry: Option<(Phase, Vec<&'t str>)>, phases: &mut Vec<Phase>) {
    if let Some((mut phase, lines)) = entry {
        phase.content = lines.join("\n").trim().to_string();
        phases.push(phase);
    }
}

pub fn parse_phase_markdown(text: &str) -> Vec<Phase> {
    let mut phases: Vec<Phase> = Vec::new();
    let mut current: Option<(Phase, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(caps) = phase_heading().captures(line) {
            finish_section(current.take(), &mut phases);
            let number = caps[1].parse::<u32>().unwrap_or(0);
            current = Some((
                Phase {
                    number,
                    title: caps[2].to_string(),
                    status: "unknown".to_string(),
                    summary: String::new(),
                    keywords: String::new(),
                    content: String::new(),
                },
                Vec::new(),
            ));
            continue;
        }
        if line.starts_with("## ") || line.starts_with("# ") {
            finish_section(current.take(), &mut phases);
            continue;
        }
        if let Some((phase, lines)) = current.as_mut() {
            if let Some(caps) = status_line().captures(line.trim()) {
                phase.status = caps[1].to_string();
            } else if phase.summary.is_empty() && !line.trim().is_empty() {
                phase.summary = output::compact_line(line.trim_start_matches(['-', '*', ' ']), 200);
            }
            lines.push(line);
        }
    }
    finish_section(current.take(), &mut phases);
    phases
}

impl MarkdownPhaseSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<Phase>, MaiaError> {
        if !self.path.exists() {
            return Err(MaiaError::StorageUnavailable(format!(
                "{} does not exist",
                self.path.display()
            )));
        }
        Ok(parse_phase_markdown(&fs::read_to_string(&self.path)?))
    }
}

impl PhaseSource for MarkdownPhaseSource {
    fn name(&self) -> &str {
        "SYSTEM_STATE.md"
    }

    fn phases(&self, numbers: &[u32]) -> Result<Vec<Phase>, MaiaError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|p| numbers.contains(&p.number))
            .collect())
    }

    fn search(&self, terms: &[String], limit: usize) -> Result<Vec<Phase>, MaiaError> {
        Ok(rank_phases(self.load()?, terms, limit))
    }

    fn recent(&self, n: usize) -> Result<Vec<Phase>, MaiaError> {
        let mut all = self.load()?;
        all.sort_by(|a, b| b.number.cmp(&a.number));
        all.truncate(n);
        Ok(all)
    }
}

/// Write one phase into the phase database (insert or replace).
pub fn upsert_phase(store: &Store, phase: &Phase) -> Result<(), MaiaError> {
    db::initialize_system_state_db(store)?;
    let broker = DbBroker::new(store);
    broker.with_conn(&store.system_state_db_path(), "phases.upsert", |conn| {
        conn.execute(
            "INSERT INTO phases(phase_number, title, status, summary, keywords, content, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(phase_number) DO UPDATE SET
                title = excluded.title, status = excluded.status, summary = excluded.summary,
                keywords = excluded.keywords, content = excluded.content, updated_at = excluded.updated_at",
            params![
                phase.number as i64,
                phase.title,
                phase.status,
                phase.summary,
                phase.keywords,
                phase.content,
                time::now_rfc3339()
            ],
        )?;
        Ok(())
    })
}

/// Import `SYSTEM_STATE.md` into the phase database. Returns phases written.
pub fn sync_markdown_to_db(store: &Store) -> Result<usize, MaiaError> {
    let path = store.system_state_md_path();
    let phases = parse_phase_markdown(&fs::read_to_string(&path)?);
    for p in &phases {
        let mut p = p.clone();
        if p.keywords.is_empty() {
            p.keywords = significant_terms(&p.title).join(" ");
        }
        upsert_phase(store, &p)?;
    }
    Ok(phases.len())
}

// --- Load results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    GuaranteedMinimum,
    IntentMatched,
    DeepContext,
}

impl Tier {
    pub fn level(self) -> u8 {
        match self {
            Tier::GuaranteedMinimum => 0,
            Tier::IntentMatched => 1,
            Tier::DeepContext => 2,
        }
    }

    fn below(self) -> Option<Tier> {
        match self {
            Tier::GuaranteedMinimum => None,
            Tier::IntentMatched => Some(Tier::GuaranteedMinimum),
            Tier::DeepContext => Some(Tier::IntentMatched),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextLoadResult {
    pub content: String,
    pub phases_loaded: Vec<u32>,
    pub token_count: usize,
    pub loading_strategy: String,
    pub tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Ready(ContextLoadResult),
    Degraded {
        result: ContextLoadResult,
        reasons: Vec<String>,
    },
}

impl LoadOutcome {
    fn from_parts(result: ContextLoadResult, reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            LoadOutcome::Ready(result)
        } else {
            LoadOutcome::Degraded { result, reasons }
        }
    }

    pub fn result(&self) -> &ContextLoadResult {
        match self {
            LoadOutcome::Ready(r) => r,
            LoadOutcome::Degraded { result, .. } => result,
        }
    }

    pub fn into_result(self) -> ContextLoadResult {
        match self {
            LoadOutcome::Ready(r) => r,
            LoadOutcome::Degraded { result, .. } => result,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, LoadOutcome::Degraded { .. })
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            LoadOutcome::Ready(_) => &[],
            LoadOutcome::Degraded { reasons, .. } => reasons,
        }
    }
}

/// Accumulates sections without ever exceeding a token ceiling. A section
/// that does not fit is truncated; once the budget is spent later sections
/// are rejected.
struct BudgetedContent {
    max_chars: usize,
    chars: usize,
    content: String,
    phases: Vec<u32>,
    seen_phases: FxHashSet<u32>,
    notes: Vec<String>,
}

impl BudgetedContent {
    fn new(ceiling_tokens: usize) -> Self {
        Self {
            max_chars: ceiling_tokens.saturating_mul(4),
            chars: 0,
            content: String::new(),
            phases: Vec::new(),
            seen_phases: FxHashSet::default(),
            notes: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.chars >= self.max_chars
    }

    fn push(&mut self, label: &str, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let sep = if self.content.is_empty() { "" } else { "\n\n" };
        let sep_chars = sep.chars().count();
        let remaining = self.max_chars.saturating_sub(self.chars);
        if remaining <= sep_chars {
            self.notes.push(format!("{} rejected: budget exhausted", label));
            return false;
        }
        let text_chars = text.chars().count();
        let room = remaining - sep_chars;
        let piece: String = if text_chars <= room {
            text.to_string()
        } else {
            let marker_chars = TRUNCATION_MARKER.chars().count();
            if room <= marker_chars {
                output::truncate_chars(text, room).to_string()
            } else {
                format!(
                    "{}{}",
                    output::truncate_chars(text, room - marker_chars),
                    TRUNCATION_MARKER
                )
            }
        };
        if piece.chars().count() < text_chars {
            self.notes.push(format!("{} truncated to fit budget", label));
        }
        self.content.push_str(sep);
        self.content.push_str(&piece);
        self.chars += sep_chars + piece.chars().count();
        true
    }

    fn push_phase(&mut self, phase: &Phase) -> bool {
        if !self.seen_phases.insert(phase.number) {
            return false;
        }
        let added = self.push(&format!("phase {}", phase.number), &phase.section());
        if added {
            self.phases.push(phase.number);
        }
        added
    }

    fn finish(self, loading_strategy: &str, tier: Tier) -> (ContextLoadResult, Vec<String>) {
        let token_count = estimate_tokens(&self.content);
        (
            ContextLoadResult {
                content: self.content,
                phases_loaded: self.phases,
                token_count,
                loading_strategy: loading_strategy.to_string(),
                tier,
            },
            self.notes,
        )
    }
}

// --- Loader ---

pub struct ContextLoader<'a> {
    store: &'a Store,
    classifier: &'a dyn Classifier,
    sources: Vec<Box<dyn PhaseSource + 'a>>,
}

impl<'a> ContextLoader<'a> {
    /// Loader over the phase database (primary) and `SYSTEM_STATE.md`
    /// (secondary) under the store root.
    pub fn new(store: &'a Store, classifier: &'a dyn Classifier) -> Self {
        let busy = Duration::from_millis(store.config.loader.store_deadline_ms) / SQLITE_BUSY_DIVISOR;
        let sources: Vec<Box<dyn PhaseSource + 'a>> = vec![
            Box::new(
                SqlitePhaseSource::new(store.system_state_db_path(), busy)
                    .with_broker(DbBroker::new(store)),
            ),
            Box::new(MarkdownPhaseSource::new(store.system_state_md_path())),
        ];
        Self::with_sources(store, classifier, sources)
    }

    pub fn with_sources(
        store: &'a Store,
        classifier: &'a dyn Classifier,
        sources: Vec<Box<dyn PhaseSource + 'a>>,
    ) -> Self {
        Self {
            store,
            classifier,
            sources,
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.store.config.loader.store_deadline_ms)
    }

    /// Run one backing-store call; overrunning `deadline` counts as failure.
    fn attempt<T>(
        &self,
        label: &str,
        deadline: Duration,
        f: impl FnOnce() -> Result<T, MaiaError>,
    ) -> Result<T, MaiaError> {
        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        if elapsed > deadline {
            return Err(MaiaError::StorageUnavailable(format!(
                "{} exceeded {}ms deadline ({}ms)",
                label,
                deadline.as_millis(),
                elapsed.as_millis()
            )));
        }
        result
    }

    /// First source that answers with a non-empty list wins. All sources
    /// share one deadline; once it is spent the remaining ones are skipped.
    fn from_sources(
        &self,
        op: &str,
        reasons: &mut Vec<String>,
        f: impl Fn(&dyn PhaseSource) -> Result<Vec<Phase>, MaiaError>,
    ) -> Vec<Phase> {
        let budget = self.deadline();
        let started = Instant::now();
        for source in &self.sources {
            let label = format!("{}.{}", source.name(), op);
            let spent = started.elapsed();
            if spent >= budget {
                reasons.push(format!("{} skipped: {}ms deadline spent", label, budget.as_millis()));
                break;
            }
            match self.attempt(&label, budget - spent, || f(source.as_ref())) {
                Ok(phases) if !phases.is_empty() => return phases,
                Ok(_) => reasons.push(format!("{} returned nothing", label)),
                Err(e) => reasons.push(format!("{} failed: {}", label, e)),
            }
        }
        Vec::new()
    }

    // --- Tier 0 ---

    /// Never empty, never over the minimum ceiling, never fails.
    pub fn load_guaranteed_minimum(&self) -> LoadOutcome {
        let cfg = &self.store.config.loader;
        let mut reasons = Vec::new();

        let recent = self.from_sources("recent", &mut reasons, |s| s.recent(cfg.recent_phases));

        let mut budget = BudgetedContent::new(cfg.minimum_tokens);
        let strategy = if recent.is_empty() {
            budget.push("static minimum", STATIC_MINIMUM);
            "guaranteed_minimum:static"
        } else {
            let mut digest = String::from("MAIA CORE CONTEXT (guaranteed minimum)\nRecent phases:");
            for p in &recent {
                digest.push_str("\n- ");
                digest.push_str(&p.digest_line());
            }
            budget.push("recent digest", &digest);
            budget.phases = recent.iter().map(|p| p.number).collect();
            "guaranteed_minimum"
        };

        let (result, _notes) = budget.finish(strategy, Tier::GuaranteedMinimum);
        if result.content.is_empty() {
            // Only reachable with a zero ceiling.
            reasons.push("minimum ceiling too small for any content".to_string());
            let content = "MAIA".to_string();
            return LoadOutcome::Degraded {
                result: ContextLoadResult {
                    token_count: estimate_tokens(&content),
                    content,
                    phases_loaded: Vec::new(),
                    loading_strategy: "guaranteed_minimum:static".to_string(),
                    tier: Tier::GuaranteedMinimum,
                },
                reasons,
            };
        }
        LoadOutcome::from_parts(result, reasons)
    }

    // --- Tier selection ---

    pub fn select_tier(&self, query: &str, c: &Classification) -> Tier {
        let cfg = &self.store.config.loader;
        let confident = c.confidence >= cfg.loading_threshold;
        let strategy = strategy::strategy_for_domain(&c.domain);

        if confident && c.complexity >= cfg.deep_complexity {
            Tier::DeepContext
        } else if strategy.minimal {
            Tier::GuaranteedMinimum
        } else if confident && strategy::has_targeted_strategy(&c.domain) {
            Tier::IntentMatched
        } else if significant_terms(query).len() >= cfg.search_min_terms {
            Tier::IntentMatched
        } else {
            Tier::GuaranteedMinimum
        }
    }

    // --- Tier 1 / Tier 2 composition ---

    fn read_resource_file(&self, relative: &str) -> Result<String, MaiaError> {
        let path: PathBuf = self.store.resolve(relative);
        self.attempt(relative, self.deadline(), || {
            let text = fs::read_to_string(&path).map_err(|e| {
                MaiaError::StorageUnavailable(format!("{}: {}", path.display(), e))
            })?;
            Ok(text)
        })
    }

    /// Returns true when at least one resource contributed content.
    fn load_strategy_resources(
        &self,
        s: &LoadingStrategy,
        budget: &mut BudgetedContent,
        reasons: &mut Vec<String>,
    ) -> bool {
        let mut loaded_any = false;
        for resource in s.resources {
            if budget.is_full() {
                reasons.push(format!("budget exhausted before {:?}", resource));
                break;
            }
            match resource {
                ResourceRef::File(rel) => match self.read_resource_file(rel) {
                    Ok(text) => {
                        let header = format!("# {}\n{}", file_label(rel), text);
                        loaded_any |= budget.push(rel, &header);
                    }
                    Err(e) => reasons.push(format!("resource skipped: {}", e)),
                },
                ResourceRef::Phases(numbers) => {
                    for p in self.from_sources("phases", reasons, |src| src.phases(numbers)) {
                        loaded_any |= budget.push_phase(&p);
                    }
                }
            }
        }
        loaded_any
    }

    fn compose_intent(
        &self,
        query: &str,
        c: &Classification,
        minimum: &ContextLoadResult,
    ) -> Result<(ContextLoadResult, Vec<String>), MaiaError> {
        let cfg = &self.store.config.loader;
        let mut reasons = Vec::new();
        let mut budget = BudgetedContent::new(cfg.intent_tokens);
        budget.push("guaranteed minimum", &minimum.content);

        let s = strategy::strategy_for_domain(&c.domain);
        if strategy::has_targeted_strategy(&c.domain)
            && self.load_strategy_resources(s, &mut budget, &mut reasons)
        {
            let (result, notes) = budget.finish(s.name, Tier::IntentMatched);
            reasons.extend(notes);
            return Ok((result, reasons));
        }

        let terms = significant_terms(query);
        let hits = if terms.is_empty() {
            Vec::new()
        } else {
            self.from_sources("search", &mut reasons, |src| src.search(&terms, SEARCH_LIMIT))
        };
        let (label, phases) = if hits.is_empty() {
            let recent = self.from_sources("recent", &mut reasons, |src| src.recent(cfg.recent_phases));
            ("recent_phases", recent)
        } else {
            ("keyword_search", hits)
        };

        if phases.is_empty() {
            return Err(MaiaError::StorageUnavailable(
                "no phase source could serve intent context".to_string(),
            ));
        }
        for p in &phases {
            budget.push_phase(p);
        }
        let (result, notes) = budget.finish(label, Tier::IntentMatched);
        reasons.extend(notes);
        Ok((result, reasons))
    }

    fn compose_deep(
        &self,
        query: &str,
        c: &Classification,
        minimum: &ContextLoadResult,
    ) -> Result<(ContextLoadResult, Vec<String>), MaiaError> {
        let cfg = &self.store.config.loader;
        let mut reasons = Vec::new();
        let mut budget = BudgetedContent::new(cfg.deep_tokens);
        budget.push("guaranteed minimum", &minimum.content);

        let s = strategy::strategy_for_domain(&c.domain);
        let mut loaded_any = self.load_strategy_resources(s, &mut budget, &mut reasons);

        let terms = significant_terms(query);
        if !terms.is_empty() && !budget.is_full() {
            for p in self.from_sources("search", &mut reasons, |src| src.search(&terms, SEARCH_LIMIT * 2)) {
                loaded_any |= budget.push_phase(&p);
            }
        }
        if !budget.is_full() {
            let n = cfg.recent_phases * 2;
            for p in self.from_sources("recent", &mut reasons, |src| src.recent(n)) {
                loaded_any |= budget.push_phase(&p);
            }
        }

        if !loaded_any {
            return Err(MaiaError::StorageUnavailable(
                "deep context found nothing beyond the minimum".to_string(),
            ));
        }
        let (result, notes) = budget.finish(&format!("deep_context:{}", s.name), Tier::DeepContext);
        reasons.extend(notes);
        Ok((result, reasons))
    }

    /// Load for an already-classified query. Never fails, never empty.
    pub fn load_for_classification(&self, query: &str, c: &Classification) -> LoadOutcome {
        let minimum = self.load_guaranteed_minimum();
        let mut reasons: Vec<String> = minimum.reasons().to_vec();
        let mut tier = self.select_tier(query, c);
        debug!(tier = tier.level(), domain = c.domain.as_str(), confidence = c.confidence, "context tier selected");

        loop {
            let composed = match tier {
                Tier::GuaranteedMinimum => break,
                Tier::IntentMatched => self.compose_intent(query, c, minimum.result()),
                Tier::DeepContext => self.compose_deep(query, c, minimum.result()),
            };
            match composed {
                Ok((result, notes)) if !result.content.is_empty() => {
                    reasons.extend(notes);
                    return LoadOutcome::from_parts(result, reasons);
                }
                Ok(_) => reasons.push(format!("tier {} produced no content", tier.level())),
                Err(e) => {
                    warn!(tier = tier.level(), error = %e, "context tier degraded");
                    reasons.push(format!("tier {} failed: {}", tier.level(), e));
                }
            }
            match tier.below() {
                Some(lower) => tier = lower,
                None => break,
            }
        }

        LoadOutcome::from_parts(minimum.into_result(), reasons)
    }

    /// Classify and load. Never fails, never empty.
    pub fn load_for_intent(&self, query: &str) -> LoadOutcome {
        let c = self.classifier.classify(query);
        self.load_for_classification(query, &c)
    }
}

fn file_label(rel: &str) -> &str {
    Path::new(rel)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(rel)
}

// --- CLI ---

#[derive(Parser, Debug)]
#[clap(name = "context", about = "Intent analysis and tiered context loading.")]
pub struct ContextCli {
    #[clap(subcommand)]
    pub command: ContextCommand,
}

#[derive(Subcommand, Debug)]
pub enum ContextCommand {
    /// Classify text and show the loading strategy it maps to.
    Analyze { text: String },
    /// Print the loading instruction block for text.
    Generate { text: String },
    /// Run the labeled classification suite.
    Test,
    /// Load context for text through the tier state machine.
    Load {
        text: String,
        #[clap(long)]
        json: bool,
    },
    /// Load only the guaranteed minimum.
    Minimum {
        #[clap(long)]
        json: bool,
    },
    /// Import SYSTEM_STATE.md phases into the phase database.
    Sync,
}

fn print_outcome(outcome: &LoadOutcome, json: bool) -> Result<i32, MaiaError> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        let r = outcome.result();
        println!("{}", r.content);
        eprintln!(
            "{} tier {} via {} ({} tokens)",
            "▸".bright_cyan(),
            r.tier.level(),
            r.loading_strategy,
            r.token_count
        );
        for reason in outcome.reasons() {
            eprintln!("{} {}", "⚠".bright_yellow(), reason);
        }
    }
    Ok(if outcome.is_degraded() { 1 } else { 0 })
}

pub fn run_context_cli(store: &Store, cli: ContextCli) -> Result<i32, MaiaError> {
    let classifier = PatternClassifier::from_config(&store.config.classifier);
    let loader = ContextLoader::new(store, &classifier);

    match cli.command {
        ContextCommand::Analyze { text } => {
            let c = classifier.classify(&text);
            let s = strategy::strategy_for_domain(&c.domain);
            let analysis = serde_json::json!({
                "domain": c.domain,
                "confidence": c.confidence,
                "complexity": c.complexity,
                "candidate_domains": c.candidate_domains,
                "strategy": s.name,
                "expected_savings_pct": s.expected_savings_pct,
                "agent": s.agent,
                "tier": loader.select_tier(&text, &c),
            });
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(0)
        }
        ContextCommand::Generate { text } => {
            print!("{}", strategy::instruction_block(&classifier.classify(&text)));
            Ok(0)
        }
        ContextCommand::Test => {
            let suite = intent::run_labeled_suite(&classifier);
            print!("{}", suite.report.render());
            println!(
                "accuracy: {}/{} ({:.0}%)",
                suite.correct,
                suite.total,
                suite.accuracy * 100.0
            );
            Ok(suite.report.verdict().exit_code())
        }
        ContextCommand::Load { text, json } => print_outcome(&loader.load_for_intent(&text), json),
        ContextCommand::Minimum { json } => print_outcome(&loader.load_guaranteed_minimum(), json),
        ContextCommand::Sync => {
            let written = sync_markdown_to_db(store)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "phases_written": written }))?
            );
            Ok(0)
        }
    }
}
