//! Normalized responses and aggregated reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::job::Outcome;

/// How a response was normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// A valid structured block was found
    StructuredParsed,
    /// Heuristic extraction from free text
    FallbackHeuristic,
}

/// Topic taxonomy for responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Software, hardware, engineering
    Technical,
    /// Natural sciences and maths
    Science,
    /// Medicine and wellbeing
    Health,
    /// Money, markets, business
    Finance,
    /// Law and regulation
    Legal,
    /// Writing, art, design
    Creative,
    /// Learning and teaching
    Education,
    /// Anything else
    General,
}

impl Category {
    /// All categories in tie-break order
    pub const ALL: [Category; 8] = [
        Category::Technical,
        Category::Science,
        Category::Health,
        Category::Finance,
        Category::Legal,
        Category::Creative,
        Category::Education,
        Category::General,
    ];

    /// Parse a label as produced by a service
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }

    /// Label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Science => "science",
            Self::Health => "health",
            Self::Finance => "finance",
            Self::Legal => "legal",
            Self::Creative => "creative",
            Self::Education => "education",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One service's answer in normalized form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Source service
    pub service_id: String,
    /// Short summary (never empty)
    pub summary: String,
    /// Independent claims
    pub key_points: Vec<String>,
    /// Full answer text without the structured block
    pub body: String,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Topic
    pub category: Category,
    /// How the response was parsed
    pub parse_mode: ParseMode,
    /// Outcome of the final dispatch attempt
    pub outcome: Outcome,
    /// Attempt that produced this response
    pub attempt_number: u32,
}

impl NormalizedResponse {
    /// Whether the service produced an answer
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// A claim made by two or more services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPoint {
    /// Representative wording (first occurrence in request order)
    pub statement: String,
    /// Agreeing services, in request order
    pub services: Vec<String>,
}

/// A claim made by a single service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedPoint {
    /// Source service
    pub service_id: String,
    /// Claim
    pub statement: String,
}

/// One side of a disagreement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Services holding the position
    pub services: Vec<String>,
    /// Representative wording
    pub statement: String,
}

/// Conflicting claims about the same topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disagreement {
    /// Shared topic words
    pub topic: String,
    /// Conflicting positions (at least two)
    pub positions: Vec<Position>,
}

/// A service that produced no answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceFailure {
    /// Service
    pub service_id: String,
    /// Final outcome
    pub outcome: Outcome,
    /// Attempts made
    pub attempts: u32,
}

/// Aggregated result of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedReport {
    /// Job identifier
    pub job_id: Uuid,
    /// Routed to the local processor
    #[serde(default)]
    pub confidential: bool,
    /// Consensus summary
    pub consensus_summary: String,
    /// Points shared by two or more services
    pub consensus: Vec<ConsensusPoint>,
    /// Conflicting points
    pub disagreements: Vec<Disagreement>,
    /// Points only one service made
    pub attributed: Vec<AttributedPoint>,
    /// Per-service responses in request order
    pub per_service_responses: Vec<NormalizedResponse>,
    /// Services that failed, in request order
    pub failures: Vec<ServiceFailure>,
    /// Report time
    pub generated_at: DateTime<Utc>,
}

impl AggregatedReport {
    /// Number of services that answered
    pub fn answered(&self) -> usize {
        self.per_service_responses.iter().filter(|r| r.is_success()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&ParseMode::StructuredParsed).unwrap(),
            "\"structured_parsed\""
        );
        assert_eq!(
            serde_json::to_string(&ParseMode::FallbackHeuristic).unwrap(),
            "\"fallback_heuristic\""
        );
    }
}
