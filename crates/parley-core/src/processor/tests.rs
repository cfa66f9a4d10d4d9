use super::*;
use crate::job::Outcome;
use uuid::Uuid;

fn raw(text: &str) -> RawOutput {
    RawOutput::success(Uuid::new_v4(), "alpha", text.to_string(), 1)
}

fn processor() -> ResponseProcessor {
    ResponseProcessor::new(ProcessingConfig::default())
}

#[test]
fn test_delimited_block_is_preferred() {
    let text = "Water boils at 100 C at sea level.\n\n\
                <<<PARLEY_JSON\n\
                {\"summary\": \"Water boils at 100 C.\", \
                 \"key_points\": [\"Boils at 100 C at sea level\", \"Lower at altitude\"], \
                 \"confidence\": 0.9, \"category\": \"science\"}\n\
                PARLEY_JSON>>>";

    let response = processor().process(&raw(text));

    assert_eq!(response.parse_mode, ParseMode::StructuredParsed);
    assert_eq!(response.summary, "Water boils at 100 C.");
    assert_eq!(
        response.key_points,
        vec!["Boils at 100 C at sea level", "Lower at altitude"]
    );
    assert!((response.confidence - 0.9).abs() < f64::EPSILON);
    assert_eq!(response.category, Category::Science);
    assert_eq!(response.body, "Water boils at 100 C at sea level.");
    assert_eq!(response.outcome, Outcome::Success);
}

#[test]
fn test_fenced_json_is_accepted() {
    let text = "Answer text.\n```json\n{\"summary\": \"S\", \"key_points\": [\"a b\"]}\n```";

    let response = processor().process(&raw(text));

    assert_eq!(response.parse_mode, ParseMode::StructuredParsed);
    assert_eq!(response.summary, "S");
    assert_eq!(response.body, "Answer text.");
    assert!((response.confidence - 0.7).abs() < f64::EPSILON);
    assert_eq!(response.category, Category::General);
}

#[test]
fn test_bare_object_with_braces_in_strings() {
    let text = "Sure! {\"summary\": \"Brace {inside} string\", \"key_points\": [\"one two\"]} Thanks.";

    let response = processor().process(&raw(text));

    assert_eq!(response.parse_mode, ParseMode::StructuredParsed);
    assert_eq!(response.summary, "Brace {inside} string");
    assert!(response.body.starts_with("Sure!"));
    assert!(response.body.ends_with("Thanks."));
}

#[test]
fn test_schema_violation_falls_back() {
    let text = "Use a hash map for lookups.\n\
                <<<PARLEY_JSON\n{\"summary\": \"x\", \"key_points\": \"nope\"}\nPARLEY_JSON>>>";

    let response = processor().process(&raw(text));

    assert_eq!(response.parse_mode, ParseMode::FallbackHeuristic);
    assert!(!response.summary.is_empty());
    assert!(!response.body.contains(BLOCK_START));
}

#[test]
fn test_empty_summary_is_rejected() {
    let parsed = processor().parse_structured(
        "<<<PARLEY_JSON {\"summary\": \"  \", \"key_points\": []} PARLEY_JSON>>>",
    );
    assert!(matches!(parsed, Err(Error::MalformedStructuredResponse(_))));
}

#[test]
fn test_confidence_normalization() {
    let with = |value: &str| {
        let text = format!(
            "<<<PARLEY_JSON {{\"summary\": \"s\", \"key_points\": [], \"confidence\": {}}} PARLEY_JSON>>>",
            value
        );
        processor().process(&raw(&text)).confidence
    };

    assert!((with("85") - 0.85).abs() < 1e-9);
    assert_eq!(with("-2"), 0.0);
    assert_eq!(with("150"), 1.0);
}

#[test]
fn test_unknown_category_is_inferred() {
    let text = "<<<PARLEY_JSON {\"summary\": \"Add an index on the database server.\", \
                \"key_points\": [], \"category\": \"misc\"} PARLEY_JSON>>>";

    let response = processor().process(&raw(text));
    assert_eq!(response.category, Category::Technical);
}

#[test]
fn test_structured_points_are_deduplicated_and_capped() {
    let text = "<<<PARLEY_JSON {\"summary\": \"s\", \"key_points\": \
                [\"a\", \"b\", \"a\", \"c\", \"d\", \"e\", \"f\"]} PARLEY_JSON>>>";

    let response = processor().process(&raw(text));
    assert_eq!(response.key_points, vec!["a", "b", "c", "d", "e"]);
}

#[test]
fn test_fallback_uses_bullets() {
    let text = "Here are the main reasons.\n\n\
                - Compilers catch bugs early\n\
                - The borrow checker prevents races\n\
                * Zero-cost abstractions keep code fast\n\
                1. Cargo manages dependencies";

    let response = processor().process(&raw(text));

    assert_eq!(response.parse_mode, ParseMode::FallbackHeuristic);
    assert_eq!(response.summary, "Here are the main reasons.");
    assert_eq!(
        response.key_points,
        vec![
            "Compilers catch bugs early",
            "The borrow checker prevents races",
            "Zero-cost abstractions keep code fast",
            "Cargo manages dependencies",
        ]
    );
    assert!((response.confidence - 0.31).abs() < 1e-9);
    assert_eq!(response.category, Category::Technical);
}

#[test]
fn test_fallback_scores_sentences() {
    let processor = ResponseProcessor::new(ProcessingConfig {
        max_key_points: 2,
        ..ProcessingConfig::default()
    });
    let text = "Sleep matters. Adults should sleep 7 to 9 hours each night for good health. \
                Many people ignore this advice entirely today. \
                It is important to keep a regular schedule every day.";

    let response = processor.process(&raw(text));

    assert_eq!(
        response.key_points,
        vec![
            "Adults should sleep 7 to 9 hours each night for good health.",
            "It is important to keep a regular schedule every day.",
        ]
    );
    assert!(response.summary.starts_with("Sleep matters. Adults should sleep"));
    assert_eq!(response.category, Category::Health);
    assert!(response.confidence <= 0.45);
}

#[test]
fn test_fallback_summary_is_truncated() {
    let processor = ResponseProcessor::new(ProcessingConfig {
        summary_max_chars: 20,
        ..ProcessingConfig::default()
    });

    let response =
        processor.process(&raw("This sentence is clearly much longer than twenty characters"));

    assert!(response.summary.chars().count() <= 20);
    assert!(response.summary.ends_with('…'));
}

#[test]
fn test_empty_answer() {
    let response = processor().process(&raw("   \n "));

    assert_eq!(response.summary, "No content was returned.");
    assert_eq!(response.confidence, 0.0);
    assert!(response.key_points.is_empty());
}

#[test]
fn test_markup_only_answers_have_a_summary() {
    let inputs = [
        "**",
        "`",
        "__",
        "** __ `",
        "**\n\n``",
        "  \t\n ",
        "<<<PARLEY_JSON\nPARLEY_JSON>>>",
        "<<<PARLEY_JSON **PARLEY_JSON>>>",
    ];

    for input in inputs {
        let response = processor().process(&raw(input));
        assert_eq!(response.summary, "No content was returned.", "input {:?}", input);
        assert_eq!(response.confidence, 0.0, "input {:?}", input);
        assert_eq!(response.parse_mode, ParseMode::FallbackHeuristic);
    }
}

#[test]
fn test_failed_outcome_yields_record() {
    let output = RawOutput::failure(Uuid::new_v4(), "alpha", 3, Outcome::Timeout);

    let response = processor().process(&output);

    assert!(response.summary.contains("alpha"));
    assert_eq!(response.confidence, 0.0);
    assert_eq!(response.outcome, Outcome::Timeout);
    assert_eq!(response.attempt_number, 3);
    assert!(response.key_points.is_empty());
    assert!(!response.is_success());
}

#[test]
fn test_infer_category_ties_go_to_earlier() {
    assert_eq!(infer_category("code and money"), Category::Technical);
    assert_eq!(infer_category("nothing to see"), Category::General);
}

#[test]
fn test_split_sentences_keeps_decimals() {
    assert_eq!(
        split_sentences("Pi is 3.14 roughly. Yes!"),
        vec!["Pi is 3.14 roughly.", "Yes!"]
    );
}
