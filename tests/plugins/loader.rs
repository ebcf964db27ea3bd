use maia::core::broker::DbBroker;
use maia::core::error::MaiaError;
use maia::core::schemas::SYSTEM_STATE_DB_SCHEMA_PHASES;
use maia::core::store::Store;
use maia::plugins::intent::{Classification, Classifier, PatternClassifier};
use maia::plugins::loader::{
    estimate_tokens, sync_markdown_to_db, upsert_phase, ContextLoader, LoadOutcome, Phase,
    PhaseSource, SqlitePhaseSource, Tier,
};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::with_defaults(tmp.path());
    (tmp, store)
}

fn phase(number: u32, title: &str, keywords: &str, content: &str) -> Phase {
    Phase {
        number,
        title: title.to_string(),
        status: "complete".to_string(),
        summary: format!("{} summary", title),
        keywords: keywords.to_string(),
        content: content.to_string(),
    }
}

fn seed_phases(store: &Store) {
    upsert_phase(store, &phase(101, "Email RAG", "email inbox search", "Indexed the inbox.")).unwrap();
    upsert_phase(store, &phase(102, "Calendar sync", "calendar meeting", "Two-way sync.")).unwrap();
    upsert_phase(store, &phase(113, "Security hardening", "security audit", "Secrets moved to keychain.")).unwrap();
    upsert_phase(store, &phase(120, "Routing logger", "routing agents", "Suggestions are logged.")).unwrap();
}

fn write_file(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn assert_bounded(outcome: &LoadOutcome, ceiling: usize) {
    let r = outcome.result();
    assert!(!r.content.trim().is_empty(), "empty content via {}", r.loading_strategy);
    assert!(r.token_count <= ceiling, "{} tokens > {}", r.token_count, ceiling);
    assert_eq!(r.token_count, estimate_tokens(&r.content));
}

struct SlowSource;

impl PhaseSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }
    fn phases(&self, _numbers: &[u32]) -> Result<Vec<Phase>, MaiaError> {
        thread::sleep(Duration::from_millis(80));
        Ok(vec![phase(1, "Too late", "", "")])
    }
    fn search(&self, _terms: &[String], _limit: usize) -> Result<Vec<Phase>, MaiaError> {
        thread::sleep(Duration::from_millis(80));
        Ok(vec![phase(1, "Too late", "", "")])
    }
    fn recent(&self, _n: usize) -> Result<Vec<Phase>, MaiaError> {
        thread::sleep(Duration::from_millis(80));
        Ok(vec![phase(1, "Too late", "", "")])
    }
}

struct FixedSource(Vec<Phase>);

impl PhaseSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }
    fn phases(&self, numbers: &[u32]) -> Result<Vec<Phase>, MaiaError> {
        Ok(self.0.iter().filter(|p| numbers.contains(&p.number)).cloned().collect())
    }
    fn search(&self, _terms: &[String], _limit: usize) -> Result<Vec<Phase>, MaiaError> {
        Ok(Vec::new())
    }
    fn recent(&self, n: usize) -> Result<Vec<Phase>, MaiaError> {
        Ok(self.0.iter().take(n).cloned().collect())
    }
}

struct FixedClassifier(Classification);

impl Classifier for FixedClassifier {
    fn classify(&self, _text: &str) -> Classification {
        self.0.clone()
    }
    fn domains(&self) -> Vec<String> {
        vec![self.0.domain.clone()]
    }
}

#[test]
fn test_minimum_survives_total_storage_loss() {
    let (_tmp, store) = test_store();
    let classifier = PatternClassifier::new();
    let loader = ContextLoader::new(&store, &classifier);

    let started = Instant::now();
    let outcome = loader.load_guaranteed_minimum();
    assert!(started.elapsed() < Duration::from_millis(50));

    assert_bounded(&outcome, 200);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.result().loading_strategy, "guaranteed_minimum:static");
    assert_eq!(outcome.result().tier, Tier::GuaranteedMinimum);
}

#[test]
fn test_minimum_prefers_phase_database() {
    let (_tmp, store) = test_store();
    seed_phases(&store);
    let classifier = PatternClassifier::new();
    let outcome = ContextLoader::new(&store, &classifier).load_guaranteed_minimum();

    assert_bounded(&outcome, 200);
    assert!(!outcome.is_degraded(), "{:?}", outcome.reasons());
    assert_eq!(outcome.result().phases_loaded, vec![120, 113, 102]);
    assert!(outcome.result().content.contains("Routing logger"));
}

#[test]
fn test_minimum_falls_back_to_markdown() {
    let (tmp, store) = test_store();
    write_file(
        tmp.path(),
        "claude/context/SYSTEM_STATE.md",
        "# System State\n\n## Phase 7: Voice notes\n**Status**: complete\nTranscription works.\n\n## Phase 8: Backups\nStatus: in progress\n",
    );
    let classifier = PatternClassifier::new();
    let outcome = ContextLoader::new(&store, &classifier).load_guaranteed_minimum();

    assert_bounded(&outcome, 200);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.result().loading_strategy, "guaranteed_minimum");
    assert_eq!(outcome.result().phases_loaded, vec![8, 7]);
    assert!(outcome.result().content.contains("Backups"));
}

#[test]
fn test_corrupt_database_is_skipped() {
    let (tmp, store) = test_store();
    fs::create_dir_all(store.data_dir()).unwrap();
    fs::write(store.system_state_db_path(), b"this is not sqlite at all").unwrap();
    write_file(
        tmp.path(),
        "claude/context/SYSTEM_STATE.md",
        "## Phase 3: Fallback\nStatus: complete\n",
    );
    let classifier = PatternClassifier::new();
    let outcome = ContextLoader::new(&store, &classifier).load_guaranteed_minimum();
    assert_bounded(&outcome, 200);
    assert_eq!(outcome.result().phases_loaded, vec![3]);
}

#[test]
fn test_slow_source_counts_as_failure() {
    let (_tmp, store) = test_store();
    let classifier = PatternClassifier::new();
    let loader = ContextLoader::with_sources(
        &store,
        &classifier,
        vec![
            Box::new(SlowSource),
            Box::new(FixedSource(vec![phase(42, "Fast answer", "", "")])),
        ],
    );
    let outcome = loader.load_guaranteed_minimum();
    // The slow source spends the whole shared deadline, so later sources
    // are not tried at all.
    assert_eq!(outcome.result().loading_strategy, "guaranteed_minimum:static");
    assert!(outcome.result().phases_loaded.is_empty());
    assert!(outcome.reasons().iter().any(|r| r.contains("exceeded")));
    assert!(outcome.reasons().iter().any(|r| r.starts_with("fixed.recent skipped")));
}

#[test]
fn test_fast_failure_leaves_time_for_fallback() {
    let (_tmp, store) = test_store();
    let classifier = PatternClassifier::new();
    let loader = ContextLoader::with_sources(
        &store,
        &classifier,
        vec![
            Box::new(FixedSource(Vec::new())),
            Box::new(FixedSource(vec![phase(42, "Fast answer", "", "")])),
        ],
    );
    let outcome = loader.load_guaranteed_minimum();
    assert_eq!(outcome.result().phases_loaded, vec![42]);
}

#[test]
fn test_locked_database_stays_inside_minimum_budget() {
    let (_tmp, store) = test_store();
    fs::create_dir_all(store.data_dir()).unwrap();
    let holder = rusqlite::Connection::open(store.system_state_db_path()).unwrap();
    holder.execute_batch(SYSTEM_STATE_DB_SCHEMA_PHASES).unwrap();
    holder.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let classifier = PatternClassifier::new();
    let loader = ContextLoader::new(&store, &classifier);
    let started = Instant::now();
    let outcome = loader.load_guaranteed_minimum();
    let elapsed = started.elapsed();
    holder.execute_batch("COMMIT;").unwrap();

    assert!(elapsed < Duration::from_millis(50), "took {:?}", elapsed);
    assert_bounded(&outcome, 200);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.result().loading_strategy, "guaranteed_minimum:static");
}

#[test]
fn test_three_queries_take_three_paths() {
    let (tmp, store) = test_store();
    seed_phases(&store);
    write_file(tmp.path(), "claude/context/core/identity.md", "Maia identity.");
    write_file(
        tmp.path(),
        "claude/context/core/security_principles.md",
        "Least privilege. Secrets never in git.",
    );
    let classifier = PatternClassifier::new();
    let loader = ContextLoader::new(&store, &classifier);

    let greeting = loader.load_for_intent("hello there");
    let technical = loader.load_for_intent("review this python code for security issues");
    let nonsense = loader.load_for_intent("xyzzy plugh frobnicate");

    for outcome in [&greeting, &technical, &nonsense] {
        assert_bounded(outcome, 20_000);
    }

    assert_eq!(greeting.result().tier, Tier::GuaranteedMinimum);
    assert_eq!(greeting.result().loading_strategy, "guaranteed_minimum");

    assert_eq!(technical.result().tier, Tier::IntentMatched);
    assert_eq!(technical.result().loading_strategy, "security_focused");
    assert!(technical.result().content.contains("Least privilege"));
    assert!(technical.result().phases_loaded.contains(&113));

    assert_eq!(nonsense.result().tier, Tier::IntentMatched);
    assert_eq!(nonsense.result().loading_strategy, "recent_phases");
}

#[test]
fn test_keyword_search_finds_phase_by_terms() {
    let (_tmp, store) = test_store();
    seed_phases(&store);
    let classifier = PatternClassifier::new();
    let outcome = ContextLoader::new(&store, &classifier)
        .load_for_intent("whatever happened with routing agents lately");
    assert_eq!(outcome.result().loading_strategy, "keyword_search");
    assert!(outcome.result().phases_loaded.contains(&120));
}

#[test]
fn test_deep_context_is_capped() {
    let (_tmp, store) = test_store();
    let body = "Landing zone decision record. ".repeat(400);
    for n in 1..=40 {
        upsert_phase(&store, &phase(n, &format!("Azure work {}", n), "azure cloud landing terraform", &body)).unwrap();
    }
    let classifier = PatternClassifier::new();
    let outcome = ContextLoader::new(&store, &classifier).load_for_intent(
        "strategic complete redesign of our azure cloud landing zone architecture with terraform",
    );

    assert_bounded(&outcome, 20_000);
    let r = outcome.result();
    assert_eq!(r.tier, Tier::DeepContext);
    assert!(r.loading_strategy.starts_with("deep_context:"));
    assert!(r.token_count > 4_000);
    assert!(outcome.reasons().iter().any(|n| n.contains("budget")));
}

#[test]
fn test_oversized_resource_is_truncated_to_tier_ceiling() {
    let (tmp, store) = test_store();
    write_file(tmp.path(), "claude/context/core/identity.md", &"identity ".repeat(5_000));
    let classifier = PatternClassifier::new();
    let outcome = ContextLoader::new(&store, &classifier)
        .load_for_intent("review this python code for security issues");
    assert_bounded(&outcome, 4_000);
    assert_eq!(outcome.result().tier, Tier::IntentMatched);
    assert!(outcome.result().content.contains("[...truncated]"));
}

#[test]
fn test_failed_deep_tier_degrades_to_minimum() {
    let (_tmp, store) = test_store();
    let classifier = FixedClassifier(Classification {
        domain: "cloud".to_string(),
        confidence: 0.9,
        complexity: 9,
        candidate_domains: vec!["cloud".to_string()],
    });
    let loader = ContextLoader::with_sources(&store, &classifier, Vec::new());
    let outcome = loader.load_for_intent("anything at all");

    assert_bounded(&outcome, 200);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.result().tier, Tier::GuaranteedMinimum);
    assert!(outcome.reasons().iter().any(|r| r.starts_with("tier 2 failed")));
    assert!(outcome.reasons().iter().any(|r| r.starts_with("tier 1 failed")));
}

#[test]
fn test_markdown_sync_populates_database() {
    let (tmp, store) = test_store();
    write_file(
        tmp.path(),
        "claude/context/SYSTEM_STATE.md",
        "## Phase 1: Bootstrap\nStatus: complete\nFirst steps.\n\n## Phase 2: Routing\nStatus: complete\n",
    );
    assert_eq!(sync_markdown_to_db(&store).unwrap(), 2);
    // Idempotent.
    assert_eq!(sync_markdown_to_db(&store).unwrap(), 2);

    let source = SqlitePhaseSource::new(store.system_state_db_path(), Duration::from_millis(50));
    let recent = source.recent(5).unwrap();
    assert_eq!(recent.iter().map(|p| p.number).collect::<Vec<_>>(), vec![2, 1]);
    assert_eq!(recent[1].summary, "First steps.");

    let ops: Vec<String> = DbBroker::new(&store).read_events().into_iter().map(|e| e.op).collect();
    assert!(ops.contains(&"phases.upsert".to_string()));
}

#[test]
fn test_out_of_range_phase_numbers_are_skipped() {
    let (_tmp, store) = test_store();
    seed_phases(&store);
    let conn = rusqlite::Connection::open(store.system_state_db_path()).unwrap();
    conn.execute(
        "INSERT INTO phases(phase_number, title, status, summary, keywords, content, updated_at)
         VALUES(-5, 'Negative', 'complete', '', '', '', '2026-01-01T00:00:00Z'),
               (5000000000, 'Too big', 'complete', '', '', '', '2026-01-01T00:00:00Z')",
        [],
    )
    .unwrap();

    let source = SqlitePhaseSource::new(store.system_state_db_path(), Duration::from_millis(50))
        .with_broker(DbBroker::new(&store));
    let numbers: Vec<u32> = source.recent(10).unwrap().iter().map(|p| p.number).collect();
    assert_eq!(numbers, vec![120, 113, 102, 101]);

    let ops: Vec<String> = DbBroker::new(&store).read_events().into_iter().map(|e| e.op).collect();
    assert!(ops.contains(&"phases.read".to_string()));
}
