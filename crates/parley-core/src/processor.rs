//! Response normalization
//!
//! Turns raw service text into a [`NormalizedResponse`]. The structured
//! block requested by the prompt is preferred; when it is missing or fails
//! schema checks the text is summarised heuristically. Processing never
//! fails: every raw output yields a response.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::ProcessingConfig;
use crate::error::{Error, Result};
use crate::job::RawOutput;
use crate::prompt::{BLOCK_END, BLOCK_START};
use crate::report::{Category, NormalizedResponse, ParseMode};

mod scoring {
    pub const STRUCTURED_DEFAULT_CONFIDENCE: f64 = 0.7;
    pub const FALLBACK_BASE: f64 = 0.15;
    pub const FALLBACK_PER_POINT: f64 = 0.04;
    pub const FALLBACK_POINT_CAP: usize = 5;
    pub const FALLBACK_LENGTH_BONUS: f64 = 0.1;
    pub const FALLBACK_LENGTH_WORDS: usize = 40;
    pub const SENTENCE_BASE: f64 = 1.0;
    pub const DIGIT_BONUS: f64 = 0.5;
    pub const CUE_BONUS: f64 = 0.75;
    pub const POSITION_WEIGHT: f64 = 0.5;
    pub const MIN_SENTENCE_WORDS: usize = 4;
    pub const MAX_SENTENCE_WORDS: usize = 45;
}

mod taxonomy {
    use crate::report::Category;

    pub const KEYWORDS: &[(Category, &[&str])] = &[
        (
            Category::Technical,
            &[
                "code", "software", "api", "function", "compile", "compiler", "database",
                "server", "algorithm", "programming", "rust", "python", "javascript", "bug",
                "library", "framework", "linux", "network", "protocol", "memory", "cpu",
            ],
        ),
        (
            Category::Science,
            &[
                "physics", "chemistry", "biology", "energy", "atom", "molecule", "experiment",
                "theory", "planet", "species", "evolution", "quantum", "temperature",
                "equation", "climate", "gravity",
            ],
        ),
        (
            Category::Health,
            &[
                "health", "disease", "symptom", "symptoms", "doctor", "medicine", "medical",
                "treatment", "patient", "diet", "sleep", "exercise", "vaccine", "dose",
                "therapy",
            ],
        ),
        (
            Category::Finance,
            &[
                "money", "invest", "investment", "stock", "stocks", "market", "tax", "taxes",
                "bank", "loan", "interest", "inflation", "budget", "revenue", "price",
                "portfolio",
            ],
        ),
        (
            Category::Legal,
            &[
                "law", "legal", "court", "contract", "liability", "regulation", "statute",
                "rights", "lawsuit", "attorney", "jurisdiction", "compliance", "license",
            ],
        ),
        (
            Category::Creative,
            &[
                "story", "poem", "novel", "character", "design", "art", "music", "painting",
                "creative", "plot", "lyrics", "style",
            ],
        ),
        (
            Category::Education,
            &[
                "learn", "learning", "student", "students", "teacher", "course", "school",
                "university", "study", "exam", "curriculum", "lesson",
            ],
        ),
    ];
}

const NO_CONTENT: &str = "No content was returned.";

const CUE_WORDS: &[&str] = &[
    "important", "key", "must", "should", "recommend", "because", "therefore", "note",
    "critical", "essential", "main", "primary", "significant",
];

static BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•]|\d{1,2}[.)])\s+(.+?)\s*$").expect("BULLET is a compile-time constant")
});

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("FENCED_JSON is a compile-time constant")
});

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#{1,6}\s+").expect("HEADING is a compile-time constant"));

#[derive(Debug, Deserialize)]
struct StructuredBlock {
    summary: String,
    key_points: Vec<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    category: Option<String>,
}

/// Parsed structured block plus the surrounding answer text
#[derive(Debug)]
struct Extracted {
    block: StructuredBlock,
    body: String,
}

#[derive(Debug)]
struct Fields {
    summary: String,
    key_points: Vec<String>,
    body: String,
    confidence: f64,
    category: Category,
    parse_mode: ParseMode,
}

/// Normalizes raw outputs
#[derive(Debug, Clone, Default)]
pub struct ResponseProcessor {
    config: ProcessingConfig,
}

impl ResponseProcessor {
    /// Create a processor
    pub fn new(config: ProcessingConfig) -> Self {
        Self { config }
    }

    /// Normalize one raw output. Total: never fails.
    pub fn process(&self, raw: &RawOutput) -> NormalizedResponse {
        if !raw.outcome.is_success() {
            return NormalizedResponse {
                service_id: raw.service_id.clone(),
                summary: format!("No response from {}: {}", raw.service_id, raw.outcome),
                key_points: Vec::new(),
                body: String::new(),
                confidence: 0.0,
                category: Category::General,
                parse_mode: ParseMode::FallbackHeuristic,
                outcome: raw.outcome.clone(),
                attempt_number: raw.attempt_number,
            };
        }

        let fields = match self.parse_structured(&raw.raw_text) {
            Ok(extracted) => self.structured_fields(extracted),
            Err(e) => {
                debug!(service = %raw.service_id, error = %e, "Falling back to heuristic parsing");
                self.heuristic_fields(&raw.raw_text)
            }
        };

        NormalizedResponse {
            service_id: raw.service_id.clone(),
            summary: fields.summary,
            key_points: fields.key_points,
            body: fields.body,
            confidence: fields.confidence,
            category: fields.category,
            parse_mode: fields.parse_mode,
            outcome: raw.outcome.clone(),
            attempt_number: raw.attempt_number,
        }
    }

    fn parse_structured(&self, text: &str) -> Result<Extracted> {
        let candidates = [
            delimited_block(text),
            fenced_block(text),
            balanced_object(text),
        ];
        let mut last_error = Error::MalformedStructuredResponse("no structured block".to_string());

        for (start, end, json) in candidates.into_iter().flatten() {
            match serde_json::from_str::<StructuredBlock>(json) {
                Ok(block) if block.summary.trim().is_empty() => {
                    last_error = Error::MalformedStructuredResponse("empty summary".to_string());
                }
                Ok(block) => {
                    let body = format!("{}{}", &text[..start], &text[end..]).trim().to_string();
                    return Ok(Extracted { block, body });
                }
                Err(e) => last_error = Error::MalformedStructuredResponse(e.to_string()),
            }
        }
        Err(last_error)
    }

    fn structured_fields(&self, extracted: Extracted) -> Fields {
        let Extracted { block, body } = extracted;
        let body = if body.is_empty() {
            block.response.clone().unwrap_or_default()
        } else {
            body
        };

        let mut key_points = Vec::new();
        for point in block.key_points {
            let point = clean_line(&point);
            if !point.is_empty() && !key_points.contains(&point) {
                key_points.push(point);
            }
        }
        key_points.truncate(self.config.max_key_points);

        let confidence = match block.confidence {
            Some(c) if c > 1.0 && c <= 100.0 => c / 100.0,
            Some(c) => c.clamp(0.0, 1.0),
            None => scoring::STRUCTURED_DEFAULT_CONFIDENCE,
        };

        let summary = truncate(block.summary.trim(), self.config.summary_max_chars);
        let category = block
            .category
            .as_deref()
            .and_then(Category::from_label)
            .unwrap_or_else(|| infer_category(&format!("{} {}", summary, body)));

        Fields {
            summary,
            key_points,
            body,
            confidence,
            category,
            parse_mode: ParseMode::StructuredParsed,
        }
    }

    fn heuristic_fields(&self, text: &str) -> Fields {
        let body = strip_delimiters(text).trim().to_string();
        let summary = self.summarize(&body);
        if summary.is_empty() {
            return Fields {
                summary: NO_CONTENT.to_string(),
                key_points: Vec::new(),
                body,
                confidence: 0.0,
                category: Category::General,
                parse_mode: ParseMode::FallbackHeuristic,
            };
        }

        let key_points = self.key_points(&body);

        let words = body.split_whitespace().count();
        let mut confidence = scoring::FALLBACK_BASE
            + scoring::FALLBACK_PER_POINT * key_points.len().min(scoring::FALLBACK_POINT_CAP) as f64;
        if words >= scoring::FALLBACK_LENGTH_WORDS {
            confidence += scoring::FALLBACK_LENGTH_BONUS;
        }

        let category = infer_category(&body);
        Fields {
            summary,
            key_points,
            body,
            confidence,
            category,
            parse_mode: ParseMode::FallbackHeuristic,
        }
    }

    /// Leading sentences of the first prose paragraph
    fn summarize(&self, body: &str) -> String {
        let paragraph = body
            .split("\n\n")
            .map(|p| {
                p.lines()
                    .filter(|l| !BULLET.is_match(l))
                    .map(clean_line)
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .find(|p| !p.is_empty())
            .unwrap_or_else(|| body.lines().map(clean_line).find(|l| !l.is_empty()).unwrap_or_default());

        let mut summary = String::new();
        for sentence in split_sentences(&paragraph).into_iter().take(2) {
            if !summary.is_empty() && summary.len() + sentence.len() + 1 > self.config.summary_max_chars {
                break;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(&sentence);
        }
        if summary.is_empty() {
            summary = paragraph;
        }
        truncate(&summary, self.config.summary_max_chars)
    }

    /// Bullet items if the answer has a list, salient sentences otherwise
    fn key_points(&self, body: &str) -> Vec<String> {
        let limit = self.config.max_key_points;
        let mut points: Vec<String> = Vec::new();

        for line in body.lines() {
            if let Some(caps) = BULLET.captures(line) {
                let point = clean_line(&caps[1]);
                if point.split_whitespace().count() >= 2 && !points.contains(&point) {
                    points.push(point);
                }
            }
        }
        if !points.is_empty() {
            points.truncate(limit);
            return points;
        }

        let prose: String = body
            .lines()
            .filter(|l| !HEADING.is_match(l))
            .map(clean_line)
            .collect::<Vec<_>>()
            .join(" ");
        let sentences = split_sentences(&prose);
        let total = sentences.len().max(1) as f64;

        let mut scored: Vec<(usize, f64)> = sentences
            .iter()
            .enumerate()
            .filter_map(|(idx, sentence)| {
                let words = sentence.split_whitespace().count();
                if !(scoring::MIN_SENTENCE_WORDS..=scoring::MAX_SENTENCE_WORDS).contains(&words) {
                    return None;
                }
                let lower = sentence.to_lowercase();
                let mut score = scoring::SENTENCE_BASE;
                if sentence.chars().any(|c| c.is_ascii_digit()) {
                    score += scoring::DIGIT_BONUS;
                }
                if words_of(&lower).any(|w| CUE_WORDS.contains(&w)) {
                    score += scoring::CUE_BONUS;
                }
                score += (1.0 - idx as f64 / total) * scoring::POSITION_WEIGHT;
                Some((idx, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored.sort_by_key(|(idx, _)| *idx);

        for (idx, _) in scored {
            let sentence = sentences[idx].clone();
            if !points.contains(&sentence) {
                points.push(sentence);
            }
        }
        points
    }
}

/// Infer a category by keyword hits; ties go to the earlier category
pub fn infer_category(text: &str) -> Category {
    let lower = text.to_lowercase();
    let words: Vec<&str> = words_of(&lower).collect();

    let mut best = (Category::General, 0usize);
    for (category, keywords) in taxonomy::KEYWORDS {
        let hits = words.iter().filter(|w| keywords.contains(w)).count();
        if hits > best.1 {
            best = (*category, hits);
        }
    }
    best.0
}

fn words_of(lower: &str) -> impl Iterator<Item = &str> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn delimited_block(text: &str) -> Option<(usize, usize, &str)> {
    let start = text.rfind(BLOCK_START)?;
    let inner_start = start + BLOCK_START.len();
    let inner_end = inner_start + text[inner_start..].find(BLOCK_END)?;
    Some((start, inner_end + BLOCK_END.len(), text[inner_start..inner_end].trim()))
}

fn fenced_block(text: &str) -> Option<(usize, usize, &str)> {
    let caps = FENCED_JSON.captures_iter(text).last()?;
    let whole = caps.get(0)?;
    let json = caps.get(1)?;
    Some((whole.start(), whole.end(), json.as_str()))
}

/// Last top-level `{...}` span mentioning a summary
fn balanced_object(text: &str) -> Option<(usize, usize, &str)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = idx;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push((start, idx + 1));
                }
            }
            _ => {}
        }
    }

    spans
        .into_iter()
        .rev()
        .map(|(s, e)| (s, e, &text[s..e]))
        .find(|(_, _, json)| json.contains("\"summary\""))
}

fn strip_delimiters(text: &str) -> String {
    text.replace(BLOCK_START, "").replace(BLOCK_END, "")
}

fn clean_line(line: &str) -> String {
    let line = HEADING.replace(line, "");
    line.replace("**", "")
        .replace("__", "")
        .replace('`', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') && chars.peek().map_or(true, |c| c.is_whitespace()) {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out = out.trim_end().to_string();
    out.push('…');
    out
}

#[cfg(test)]
mod tests;
