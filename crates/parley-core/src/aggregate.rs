//! Cross-service aggregation
//!
//! Key points from all successful responses are clustered by token
//! overlap. Clusters backed by two or more services become consensus,
//! clusters with opposite polarity on the same topic become
//! disagreements, and the rest are attributed to their single source.
//! The output depends only on the input sequence, so identical inputs
//! give identical reports.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

use crate::config::AggregationConfig;
use crate::report::{
    AggregatedReport, AttributedPoint, ConsensusPoint, Disagreement, NormalizedResponse, Position,
    ServiceFailure,
};

const SUMMARY_POINTS: usize = 3;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "with", "this", "that", "these", "those", "from", "into",
    "was", "were", "been", "being", "have", "has", "had", "its", "you", "your", "our",
    "their", "they", "them", "can", "will", "would", "could", "should", "may", "might", "also",
    "than", "then", "there", "which", "what", "when", "where", "who", "how", "all", "any", "some",
    "more", "most", "such", "very", "just", "about", "over", "only", "each", "does", "did", "is",
    "use", "using",
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "cannot", "nothing", "neither", "nor", "without", "false",
    "incorrect",
];

/// Token view of one key point
#[derive(Debug, Clone)]
struct Claim {
    tokens: BTreeSet<String>,
    negated: bool,
}

impl Claim {
    fn parse(text: &str) -> Self {
        let lower = text.to_lowercase().replace("n't", " not");
        let mut tokens = BTreeSet::new();
        let mut negated = false;

        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            if NEGATIONS.contains(&word) {
                negated = true;
                continue;
            }
            if word.len() < 3 || STOPWORDS.contains(&word) {
                continue;
            }
            tokens.insert(stem(word).to_string());
        }
        Self { tokens, negated }
    }

    fn similarity(&self, other: &Claim) -> f64 {
        let union = self.tokens.union(&other.tokens).count();
        if union == 0 {
            return 0.0;
        }
        self.tokens.intersection(&other.tokens).count() as f64 / union as f64
    }
}

fn stem(word: &str) -> &str {
    if word.len() > 4 && word.ends_with('s') && !word.ends_with("ss") {
        &word[..word.len() - 1]
    } else {
        word
    }
}

#[derive(Debug)]
struct Cluster {
    claim: Claim,
    statement: String,
    services: Vec<String>,
}

/// Merges normalized responses into a report
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    config: AggregationConfig,
}

impl Aggregator {
    /// Create an aggregator
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Aggregate responses given in request order
    pub fn aggregate(&self, job_id: Uuid, responses: Vec<NormalizedResponse>) -> AggregatedReport {
        self.aggregate_at(job_id, responses, Utc::now())
    }

    /// Aggregate with a fixed report time
    pub fn aggregate_at(
        &self,
        job_id: Uuid,
        responses: Vec<NormalizedResponse>,
        generated_at: DateTime<Utc>,
    ) -> AggregatedReport {
        let clusters = self.cluster(&responses);

        let consensus: Vec<ConsensusPoint> = clusters
            .iter()
            .filter(|c| c.services.len() >= 2)
            .map(|c| ConsensusPoint {
                statement: c.statement.clone(),
                services: c.services.clone(),
            })
            .collect();

        let (disagreements, disputed) = self.disagreements(&clusters);

        let attributed = clusters
            .iter()
            .enumerate()
            .filter(|(idx, c)| c.services.len() == 1 && !disputed.contains(idx))
            .map(|(_, c)| AttributedPoint {
                service_id: c.services[0].clone(),
                statement: c.statement.clone(),
            })
            .collect();

        let failures = responses
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| ServiceFailure {
                service_id: r.service_id.clone(),
                outcome: r.outcome.clone(),
                attempts: r.attempt_number,
            })
            .collect();

        let consensus_summary = summarize(&responses, &consensus, &disagreements);
        debug!(
            job_id = %job_id,
            clusters = clusters.len(),
            consensus = consensus.len(),
            disagreements = disagreements.len(),
            "Aggregated responses"
        );

        AggregatedReport {
            job_id,
            confidential: false,
            consensus_summary,
            consensus,
            disagreements,
            attributed,
            per_service_responses: responses,
            failures,
            generated_at,
        }
    }

    fn cluster(&self, responses: &[NormalizedResponse]) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = Vec::new();

        for response in responses.iter().filter(|r| r.is_success()) {
            let points: Vec<&str> = if response.key_points.is_empty() {
                vec![response.summary.as_str()]
            } else {
                response.key_points.iter().map(String::as_str).collect()
            };

            for point in points {
                let claim = Claim::parse(point);
                if claim.tokens.is_empty() {
                    continue;
                }
                let matched = clusters.iter().position(|c| {
                    c.claim.negated == claim.negated
                        && c.claim.similarity(&claim) >= self.config.similarity_threshold
                });
                match matched {
                    Some(idx) => {
                        let cluster = &mut clusters[idx];
                        if !cluster.services.contains(&response.service_id) {
                            cluster.services.push(response.service_id.clone());
                        }
                    }
                    None => clusters.push(Cluster {
                        claim,
                        statement: point.to_string(),
                        services: vec![response.service_id.clone()],
                    }),
                }
            }
        }
        clusters
    }

    /// Opposite-polarity cluster pairs on a shared topic
    fn disagreements(&self, clusters: &[Cluster]) -> (Vec<Disagreement>, BTreeSet<usize>) {
        let mut found = Vec::new();
        let mut disputed = BTreeSet::new();

        for (i, left) in clusters.iter().enumerate() {
            for (j, right) in clusters.iter().enumerate().skip(i + 1) {
                if left.claim.negated == right.claim.negated {
                    continue;
                }
                let same_sources = left.services.len() == right.services.len()
                    && left.services.iter().all(|s| right.services.contains(s));
                if same_sources {
                    continue;
                }
                if left.claim.similarity(&right.claim) < self.config.contradiction_overlap {
                    continue;
                }

                let topic = left
                    .claim
                    .tokens
                    .intersection(&right.claim.tokens)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" ");
                found.push(Disagreement {
                    topic,
                    positions: vec![
                        Position {
                            services: left.services.clone(),
                            statement: left.statement.clone(),
                        },
                        Position {
                            services: right.services.clone(),
                            statement: right.statement.clone(),
                        },
                    ],
                });
                disputed.insert(i);
                disputed.insert(j);
            }
        }
        (found, disputed)
    }
}

fn summarize(
    responses: &[NormalizedResponse],
    consensus: &[ConsensusPoint],
    disagreements: &[Disagreement],
) -> String {
    let answered: Vec<&NormalizedResponse> = responses.iter().filter(|r| r.is_success()).collect();

    let mut summary = if !consensus.is_empty() {
        let services: BTreeSet<&str> = consensus
            .iter()
            .flat_map(|p| p.services.iter().map(String::as_str))
            .collect();
        let points: Vec<&str> = consensus
            .iter()
            .take(SUMMARY_POINTS)
            .map(|p| p.statement.trim().trim_end_matches('.'))
            .collect();
        format!(
            "Consensus across {} services: {}.",
            services.len(),
            points.join("; ")
        )
    } else {
        match answered.as_slice() {
            [] => return "No service produced a response.".to_string(),
            [only] => only.summary.clone(),
            many => {
                let mut best = many[0];
                for &candidate in &many[1..] {
                    if candidate.confidence > best.confidence {
                        best = candidate;
                    }
                }
                format!(
                    "No consensus; highest-confidence answer ({}): {}",
                    best.service_id, best.summary
                )
            }
        }
    };

    if !disagreements.is_empty() {
        let topics: Vec<&str> = disagreements.iter().map(|d| d.topic.as_str()).collect();
        summary.push_str(&format!(" Services disagree on: {}.", topics.join("; ")));
    }
    summary
}

#[cfg(test)]
mod tests;
