use chrono::Duration;
use maia::core::config::RoutingConfig;
use maia::core::db::db_connect;
use maia::core::error::MaiaError;
use maia::core::store::Store;
use maia::core::time;
use maia::plugins::intent::{Classification, Classifier, PatternClassifier};
use maia::plugins::routing_log::{query_hash, RoutingLogger};
use maia::plugins::swarm::{plan_route, RoutingPlan};
use tempfile::tempdir;

const SECURITY_QUERY: &str = "review this python code for security issues";

fn test_logger() -> (tempfile::TempDir, Store, RoutingLogger) {
    let tmp = tempdir().unwrap();
    let store = Store::with_defaults(tmp.path());
    let logger = RoutingLogger::new(&store).unwrap();
    (tmp, store, logger)
}

fn route(query: &str) -> (Classification, RoutingPlan) {
    let c = PatternClassifier::new().classify(query);
    let plan = plan_route(&c, &RoutingConfig::default());
    (c, plan)
}

fn names(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

fn count(store: &Store, sql: &str) -> i64 {
    let conn = db_connect(&store.routing_db_path()).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn test_accept_round_trip_leaves_one_accepted_row() {
    let (_tmp, _store, logger) = test_logger();
    let (c, plan) = route(SECURITY_QUERY);
    let hash = logger.log_suggestion(SECURITY_QUERY, &c, &plan).unwrap();
    assert_eq!(hash, query_hash(SECURITY_QUERY));

    assert!(logger.log_actual_usage(&hash, &plan.agents, true, None).unwrap());

    let rows = logger.suggestions_for_hash(&hash).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].accepted, Some(true));
    assert_eq!(rows[0].actual_agents.as_deref(), Some(plan.agents.as_slice()));
    assert!(rows[0].acceptance_timestamp.is_some());
    assert_eq!(rows[0].query_category, "security");
    assert_eq!(rows[0].suggested_agents, names(&["security_specialist_agent"]));
}

#[test]
fn test_unknown_hash_inserts_nothing() {
    let (_tmp, store, logger) = test_logger();
    assert!(!logger.log_actual_usage("0000000000000000", &[], true, None).unwrap());
    assert_eq!(count(&store, "SELECT COUNT(*) FROM routing_suggestions"), 0);
}

#[test]
fn test_latest_open_row_is_resolved_first() {
    let (_tmp, store, logger) = test_logger();
    let (c, plan) = route(SECURITY_QUERY);
    let earlier = time::now() - Duration::minutes(5);
    let hash = logger.log_suggestion_at(SECURITY_QUERY, &c, &plan, earlier).unwrap();
    logger.log_suggestion(SECURITY_QUERY, &c, &plan).unwrap();

    assert!(logger.log_actual_usage(&hash, &plan.agents, true, None).unwrap());
    let rows = logger.suggestions_for_hash(&hash).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].accepted, None);
    assert_eq!(rows[1].accepted, Some(true));

    // The next resolution reaches the older row; the resolved one is left alone.
    assert!(logger
        .log_actual_usage(&hash, &names(&["sre_principal_engineer_agent"]), false, Some("wrong team"))
        .unwrap());
    let rows = logger.suggestions_for_hash(&hash).unwrap();
    assert_eq!(rows[0].accepted, Some(false));
    assert_eq!(rows[0].override_reason.as_deref(), Some("wrong team"));
    assert_eq!(rows[1].accepted, Some(true));

    // Nothing open remains.
    assert!(!logger.log_actual_usage(&hash, &[], true, None).unwrap());
    assert_eq!(count(&store, "SELECT COUNT(*) FROM routing_suggestions"), 2);
}

#[test]
fn test_rejections_are_classified() {
    let (_tmp, store, logger) = test_logger();
    let base = Classification {
        domain: "cloud".to_string(),
        confidence: 0.6,
        complexity: 7,
        candidate_domains: names(&["cloud", "security"]),
    };
    let plan = plan_route(&base, &RoutingConfig::default());
    assert_eq!(
        plan.agents,
        names(&["azure_architect_agent", "security_specialist_agent"])
    );

    let cases = [
        ("q full", names(&["personal_assistant_agent"])),
        ("q partial", names(&["azure_architect_agent"])),
        ("q swap", names(&["azure_architect_agent", "security_specialist_agent", "sre_principal_engineer_agent"])),
    ];
    for (query, actual) in &cases {
        let hash = logger.log_suggestion(query, &base, &plan).unwrap();
        assert!(logger.log_actual_usage(&hash, actual, false, None).unwrap());
    }

    assert_eq!(count(&store, "SELECT COUNT(*) FROM override_patterns"), 3);
    let summary = logger.override_summary(30).unwrap();
    assert_eq!(summary.total, 3);
    let kinds: Vec<&str> = summary.by_type.iter().map(|(k, _)| k.as_str()).collect();
    assert!(kinds.contains(&"full_reject"));
    assert!(kinds.contains(&"partial_accept"));
    assert!(kinds.contains(&"agent_substitution"));
    assert!(summary
        .top_substitutions
        .iter()
        .any(|s| s.actual == "personal_assistant_agent"));
}

#[test]
fn test_accepted_usage_writes_no_override() {
    let (_tmp, store, logger) = test_logger();
    let (c, plan) = route(SECURITY_QUERY);
    let hash = logger.log_suggestion(SECURITY_QUERY, &c, &plan).unwrap();
    logger.log_actual_usage(&hash, &plan.agents, true, None).unwrap();
    assert_eq!(count(&store, "SELECT COUNT(*) FROM override_patterns"), 0);
}

#[test]
fn test_metric_recompute_is_idempotent() {
    let (_tmp, store, logger) = test_logger();
    let (c, plan) = route(SECURITY_QUERY);
    let hash = logger.log_suggestion(SECURITY_QUERY, &c, &plan).unwrap();
    logger.log_actual_usage(&hash, &plan.agents, true, None).unwrap();

    let today = time::today();
    assert_eq!(logger.recompute_metrics(&today).unwrap(), 1);
    assert_eq!(logger.recompute_metrics(&today).unwrap(), 1);
    assert_eq!(
        count(
            &store,
            "SELECT COUNT(*) FROM acceptance_metrics WHERE category = 'security'"
        ),
        1
    );

    let metrics = logger.metrics(Some(&today)).unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].total_suggestions, 1);
    assert_eq!(metrics[0].accepted_count, 1);
    assert_eq!(metrics[0].pending_count, 0);
    assert_eq!(metrics[0].acceptance_rate, 1.0);
}

#[test]
fn test_recompute_rejects_malformed_date() {
    let (_tmp, _store, logger) = test_logger();
    let err = logger.recompute_metrics("last week").unwrap_err();
    assert!(matches!(err, MaiaError::ValidationError(_)));
}

#[test]
fn test_acceptance_rate_by_category_and_window() {
    let (_tmp, _store, logger) = test_logger();
    let (c, plan) = route(SECURITY_QUERY);
    for (i, accepted) in [true, true, false].into_iter().enumerate() {
        let query = format!("{} #{}", SECURITY_QUERY, i);
        let hash = logger.log_suggestion(&query, &c, &plan).unwrap();
        logger.log_actual_usage(&hash, &plan.agents, accepted, None).unwrap();
    }
    // Outside the 7-day window.
    let old = time::now() - Duration::days(20);
    let hash = logger.log_suggestion_at("old one", &c, &plan, old).unwrap();
    logger.log_actual_usage(&hash, &[], false, None).unwrap();
    // Pending rows do not count.
    logger.log_suggestion("still pending", &c, &plan).unwrap();

    let rate7 = logger.get_acceptance_rate(Some("security"), 7).unwrap();
    assert!((rate7 - 2.0 / 3.0).abs() < 1e-9);
    let rate30 = logger.get_acceptance_rate(None, 30).unwrap();
    assert!((rate30 - 0.5).abs() < 1e-9);
    assert_eq!(logger.get_acceptance_rate(Some("financial"), 7).unwrap(), 0.0);

    let stats = logger.stats().unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.by_category, vec![("security".to_string(), 5)]);
}

#[test]
fn test_recent_is_newest_first() {
    let (_tmp, _store, logger) = test_logger();
    let (c, plan) = route(SECURITY_QUERY);
    let now = time::now();
    for (i, mins) in [30, 20, 10].into_iter().enumerate() {
        logger
            .log_suggestion_at(&format!("q{}", i), &c, &plan, now - Duration::minutes(mins))
            .unwrap();
    }
    let recent = logger.recent(2).unwrap();
    let texts: Vec<&str> = recent.iter().map(|r| r.query_text.as_str()).collect();
    assert_eq!(texts, vec!["q2", "q1"]);
}

#[test]
fn test_every_db_operation_is_audited() {
    let (_tmp, store, logger) = test_logger();
    let (c, plan) = route(SECURITY_QUERY);
    logger.log_suggestion(SECURITY_QUERY, &c, &plan).unwrap();
    let broker = maia::core::broker::DbBroker::new(&store);
    let ops: Vec<String> = broker.read_events().into_iter().map(|e| e.op).collect();
    assert!(ops.contains(&"routing.init".to_string()));
    assert!(ops.contains(&"routing.log_suggestion".to_string()));
}

#[test]
fn test_out_of_range_windows_are_rejected() {
    let (_tmp, _store, logger) = test_logger();
    assert!(matches!(
        logger.override_summary(200_000_000),
        Err(MaiaError::ValidationError(_))
    ));
    assert!(matches!(
        logger.get_acceptance_rate(None, i64::MAX),
        Err(MaiaError::ValidationError(_))
    ));
    assert!(matches!(
        logger.get_acceptance_rate(None, -1),
        Err(MaiaError::ValidationError(_))
    ));
    assert_eq!(logger.override_summary(0).unwrap().total, 0);
}

#[test]
fn test_negative_stored_complexity_is_not_read_back() {
    let (_tmp, store, logger) = test_logger();
    let (c, plan) = route(SECURITY_QUERY);
    logger.log_suggestion(SECURITY_QUERY, &c, &plan).unwrap();
    let conn = db_connect(&store.routing_db_path()).unwrap();
    conn.execute("UPDATE routing_suggestions SET query_complexity = -3", [])
        .unwrap();
    assert!(logger.recent(1).is_err());
}
