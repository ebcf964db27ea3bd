use maia::core::config::ClassifierConfig;
use maia::plugins::intent::{
    estimate_complexity, run_labeled_suite, Classification, Classifier, PatternClassifier,
    FULL_DOMAIN, LABELED_EXAMPLES,
};
use maia::plugins::strategy::strategy_for_domain;

fn assert_well_formed(c: &Classification, registered: &[String]) {
    assert!(
        (0.0..=1.0).contains(&c.confidence),
        "confidence {} out of range",
        c.confidence
    );
    assert!(
        registered.contains(&c.domain),
        "domain {} is not registered",
        c.domain
    );
    assert!((1..=10).contains(&c.complexity));
}

#[test]
fn test_classification_is_always_well_formed() {
    let classifier = PatternClassifier::new();
    let registered = classifier.domains();
    let long = "please refactor the database layer and add monitoring. ".repeat(80);
    let inputs = [
        "",
        "   \n\t ",
        "hello",
        "🦀🦀🦀 ünïcödé ß",
        "$$$ ??? !!!",
        "azure aws gcp cloud terraform bicep kubernetes landing zone finops",
        long.as_str(),
    ];
    for input in inputs {
        assert_well_formed(&classifier.classify(input), &registered);
    }
    for (text, _) in LABELED_EXAMPLES {
        assert_well_formed(&classifier.classify(text), &registered);
    }
}

#[test]
fn test_empty_input_falls_back_to_full() {
    let c = PatternClassifier::new().classify("   ");
    assert_eq!(c.domain, FULL_DOMAIN);
    assert_eq!(c.confidence, 0.0);
    assert_eq!(c.complexity, 1);
}

#[test]
fn test_trivial_arithmetic_is_simple() {
    let c = PatternClassifier::new().classify("what is 2+2");
    assert_eq!(c.domain, "simple");
    assert!((c.confidence - 0.2).abs() < 1e-9);
    assert_eq!(c.complexity, 1);
}

#[test]
fn test_security_review_outranks_technical() {
    let c = PatternClassifier::new().classify("review this python code for security issues");
    assert_eq!(c.domain, "security");
    assert!((c.confidence - 0.4).abs() < 1e-9);
    assert_eq!(c.complexity, 3);
    assert_eq!(c.candidate_domains, vec!["security", "technical"]);
}

#[test]
fn test_strategic_language_drives_complexity_up() {
    let c = PatternClassifier::new().classify(
        "strategic complete redesign of our azure cloud landing zone architecture with terraform",
    );
    assert_eq!(c.domain, "cloud");
    assert!((c.confidence - 0.6).abs() < 1e-9);
    assert_eq!(c.complexity, 10);
}

#[test]
fn test_complexity_is_clamped() {
    let wall = "strategic roadmap: analyze, compare, evaluate and redesign everything end-to-end. ".repeat(20);
    assert_eq!(estimate_complexity(&wall), 10);
    assert_eq!(estimate_complexity("hi"), 1);
}

#[test]
fn test_classification_is_deterministic() {
    let a = PatternClassifier::new();
    let b = PatternClassifier::new();
    for (text, _) in LABELED_EXAMPLES {
        assert_eq!(a.classify(text), b.classify(text));
        assert_eq!(a.classify(text), a.classify(text));
    }
}

#[test]
fn test_every_classified_domain_resolves_to_a_strategy() {
    let classifier = PatternClassifier::new();
    for (text, _) in LABELED_EXAMPLES {
        let c = classifier.classify(text);
        let s = strategy_for_domain(&c.domain);
        assert!(s.domains.contains(&c.domain.as_str()));
    }
}

#[test]
fn test_config_extra_patterns_register_new_domain() {
    let mut extra = std::collections::BTreeMap::new();
    extra.insert("astrology".to_string(), vec![r"\b(horoscope|zodiac)\b".to_string()]);
    let classifier = PatternClassifier::from_config(&ClassifierConfig {
        confidence_floor: 0.2,
        extra_patterns: extra,
    });
    let c = classifier.classify("what does my horoscope say");
    assert_eq!(c.domain, "astrology");
    assert_eq!(c.confidence, 1.0);
    // No strategy exists for it, so loading falls back to full coverage.
    assert_eq!(strategy_for_domain(&c.domain).name, FULL_DOMAIN);
}

#[test]
fn test_labeled_suite_passes() {
    let suite = run_labeled_suite(&PatternClassifier::new());
    assert_eq!(suite.total, LABELED_EXAMPLES.len());
    assert_eq!(suite.correct, suite.total);
    assert!(suite.report.is_acceptable());
}
