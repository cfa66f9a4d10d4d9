use super::*;
use crate::job::Outcome;
use crate::report::{Category, ParseMode};

fn answer(service: &str, summary: &str, points: &[&str], confidence: f64) -> NormalizedResponse {
    NormalizedResponse {
        service_id: service.to_string(),
        summary: summary.to_string(),
        key_points: points.iter().map(|p| p.to_string()).collect(),
        body: String::new(),
        confidence,
        category: Category::General,
        parse_mode: ParseMode::StructuredParsed,
        outcome: Outcome::Success,
        attempt_number: 1,
    }
}

fn failed(service: &str, outcome: Outcome, attempts: u32) -> NormalizedResponse {
    NormalizedResponse {
        service_id: service.to_string(),
        summary: format!("No response from {}", service),
        key_points: Vec::new(),
        body: String::new(),
        confidence: 0.0,
        category: Category::General,
        parse_mode: ParseMode::FallbackHeuristic,
        outcome,
        attempt_number: attempts,
    }
}

#[test]
fn test_shared_points_become_consensus() {
    let responses = vec![
        answer(
            "alpha",
            "Rust is memory safe.",
            &["The borrow checker prevents data races", "Cargo ships with the toolchain"],
            0.8,
        ),
        answer(
            "beta",
            "Rust is safe.",
            &["Borrow checker prevents data races in Rust"],
            0.7,
        ),
    ];

    let report = Aggregator::default().aggregate(Uuid::new_v4(), responses);

    assert_eq!(report.consensus.len(), 1);
    assert_eq!(report.consensus[0].statement, "The borrow checker prevents data races");
    assert_eq!(report.consensus[0].services, vec!["alpha", "beta"]);
    assert_eq!(report.attributed.len(), 1);
    assert_eq!(report.attributed[0].service_id, "alpha");
    assert_eq!(
        report.consensus_summary,
        "Consensus across 2 services: The borrow checker prevents data races."
    );
    assert!(report.disagreements.is_empty());
}

#[test]
fn test_opposite_claims_are_disagreements() {
    let responses = vec![
        answer("alpha", "Coffee is fine.", &["Coffee is healthy for adults"], 0.6),
        answer("beta", "Coffee is bad.", &["Coffee isn't healthy for adults"], 0.8),
    ];

    let report = Aggregator::default().aggregate(Uuid::new_v4(), responses);

    assert!(report.consensus.is_empty());
    assert!(report.attributed.is_empty());
    assert_eq!(report.disagreements.len(), 1);

    let disagreement = &report.disagreements[0];
    assert_eq!(disagreement.topic, "adult coffee healthy");
    assert_eq!(disagreement.positions[0].services, vec!["alpha"]);
    assert_eq!(disagreement.positions[1].services, vec!["beta"]);
    assert_eq!(
        report.consensus_summary,
        "No consensus; highest-confidence answer (beta): Coffee is bad. \
         Services disagree on: adult coffee healthy."
    );
}

#[test]
fn test_failures_keep_request_order() {
    let responses = vec![
        failed("gamma", Outcome::Timeout, 3),
        answer("alpha", "Only answer.", &["Paris is the capital of France"], 0.9),
        failed("beta", Outcome::AuthLost, 1),
    ];

    let report = Aggregator::default().aggregate(Uuid::new_v4(), responses);

    let ids: Vec<&str> = report
        .per_service_responses
        .iter()
        .map(|r| r.service_id.as_str())
        .collect();
    assert_eq!(ids, vec!["gamma", "alpha", "beta"]);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].service_id, "gamma");
    assert_eq!(report.failures[0].outcome, Outcome::Timeout);
    assert_eq!(report.failures[0].attempts, 3);
    assert_eq!(report.failures[1].service_id, "beta");
    assert_eq!(report.answered(), 1);
    assert_eq!(report.consensus_summary, "Only answer.");
}

#[test]
fn test_no_answers() {
    let report = Aggregator::default().aggregate(
        Uuid::new_v4(),
        vec![failed("alpha", Outcome::ElementNotFound, 2)],
    );

    assert_eq!(report.consensus_summary, "No service produced a response.");
    assert!(report.consensus.is_empty());
    assert!(report.attributed.is_empty());
}

#[test]
fn test_summary_stands_in_for_missing_points() {
    let responses = vec![
        answer("alpha", "Tokyo is the largest metropolitan area", &[], 0.5),
        answer("beta", "The largest metropolitan area is Tokyo", &[], 0.5),
    ];

    let report = Aggregator::default().aggregate(Uuid::new_v4(), responses);

    assert_eq!(report.consensus.len(), 1);
    assert_eq!(report.consensus[0].services, vec!["alpha", "beta"]);
}

#[test]
fn test_same_service_counts_once() {
    let responses = vec![answer(
        "alpha",
        "s",
        &["Rust has no garbage collector", "Rust has no garbage collector at all"],
        0.5,
    )];

    let report = Aggregator::default().aggregate(Uuid::new_v4(), responses);

    assert!(report.consensus.is_empty());
    assert_eq!(report.attributed.len(), 1);
}

#[test]
fn test_identical_input_gives_identical_report() {
    let job_id = Uuid::new_v4();
    let at = Utc::now();
    let responses = vec![
        answer("alpha", "a", &["Water boils at 100 degrees", "Ice floats on water"], 0.7),
        answer("beta", "b", &["Water boils at 100 degrees at sea level"], 0.6),
        failed("gamma", Outcome::Cancelled, 1),
    ];

    let aggregator = Aggregator::default();
    let first = aggregator.aggregate_at(job_id, responses.clone(), at);
    let second = aggregator.aggregate_at(job_id, responses, at);

    assert_eq!(first, second);
}

#[test]
fn test_claim_tokens() {
    let claim = Claim::parse("The servers don't restart nightly");
    assert!(claim.negated);
    assert!(claim.tokens.contains("server"));
    assert!(claim.tokens.contains("restart"));
    assert!(!claim.tokens.contains("the"));
}
