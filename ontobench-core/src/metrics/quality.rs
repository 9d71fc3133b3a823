//! Heuristic answer-quality subscores.
//!
//! These are approximate triage signals computed from response length,
//! sentence count and keyword presence. They are not ground truth: scored
//! evaluation against gold answers lives in [`crate::evaluation`] and uses a
//! separate type.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::reasoning::{connector_count, extract_reasoning_steps, strip_think_blocks};
use crate::question::AnswerType;

static HEDGE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:maybe|perhaps|possibly|probably|might|unclear|not sure|uncertain|cannot determine|can't determine|i think|likely)\b",
    )
    .expect("invalid regex")
});

static BOOLEAN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:true|false)\b").expect("invalid regex"));

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]?").expect("invalid regex"));

/// Word count above which a direct-answer response loses clarity.
const DIRECT_ANSWER_WORDS: usize = 20;
/// Average sentence length (words) above which prose loses clarity.
const SENTENCE_WORDS: f64 = 25.0;

/// Approximate quality subscores, each in [0, 1].
///
/// Triage telemetry only; never compare with exact-match scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeuristicQuality {
    pub correctness: f64,
    pub completeness: f64,
    pub clarity: f64,
    pub logical_structure: f64,
    /// Mean of the four subscores
    pub overall: f64,
}

impl HeuristicQuality {
    /// Score a response, optionally against the row's expected answer.
    pub fn assess(response: &str, expected: Option<&str>, answer_type: AnswerType) -> Self {
        let answer = strip_think_blocks(response);
        if answer.is_empty() {
            return Self::default();
        }

        let correctness = match expected.filter(|e| !e.trim().is_empty()) {
            Some(expected) => answer_overlap(&answer, expected),
            None => hedging_confidence(&answer),
        };
        let completeness = completeness(&answer, answer_type);
        let clarity = clarity(&answer, answer_type);
        let logical_structure = logical_structure(response, &answer, answer_type);

        let overall = (correctness + completeness + clarity + logical_structure) / 4.0;
        Self {
            correctness,
            completeness,
            clarity,
            logical_structure,
            overall,
        }
    }
}

/// Lowercased answer items with brackets, quotes and trailing periods removed.
fn answer_set(text: &str) -> BTreeSet<String> {
    text.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|item| {
            item.trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .trim_end_matches('.')
                .trim()
                .to_lowercase()
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// 1.0 on an exact set match, Jaccard overlap otherwise.
fn answer_overlap(answer: &str, expected: &str) -> f64 {
    let got = answer_set(answer);
    let want = answer_set(expected);
    if got == want {
        return 1.0;
    }
    let union = got.union(&want).count();
    if union == 0 {
        return 0.0;
    }
    got.intersection(&want).count() as f64 / union as f64
}

fn hedging_confidence(answer: &str) -> f64 {
    let hedges = HEDGE_WORDS.find_iter(answer).count();
    (1.0 - 0.25 * hedges as f64).clamp(0.0, 1.0)
}

fn completeness(answer: &str, answer_type: AnswerType) -> f64 {
    match answer_type {
        AnswerType::Binary => {
            if BOOLEAN_TOKEN.is_match(answer) {
                1.0
            } else {
                0.0
            }
        }
        AnswerType::MultiChoice => {
            if answer_set(answer).is_empty() {
                0.0
            } else {
                1.0
            }
        }
        AnswerType::Other => (answer.chars().count() as f64 / 200.0).min(1.0),
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn clarity(answer: &str, answer_type: AnswerType) -> f64 {
    let words = word_count(answer);
    match answer_type {
        AnswerType::Binary | AnswerType::MultiChoice => {
            if words <= DIRECT_ANSWER_WORDS {
                1.0
            } else {
                DIRECT_ANSWER_WORDS as f64 / words as f64
            }
        }
        AnswerType::Other => {
            let sentences = SENTENCE
                .find_iter(answer)
                .filter(|s| !s.as_str().trim().is_empty())
                .count()
                .max(1);
            let average = words as f64 / sentences as f64;
            if average <= SENTENCE_WORDS {
                1.0
            } else {
                SENTENCE_WORDS / average
            }
        }
    }
}

fn logical_structure(response: &str, answer: &str, answer_type: AnswerType) -> f64 {
    let steps = extract_reasoning_steps(response).len();
    let connectors = connector_count(response);

    // A short direct answer is well structured for closed questions
    let direct = matches!(answer_type, AnswerType::Binary | AnswerType::MultiChoice)
        && word_count(answer) <= DIRECT_ANSWER_WORDS;
    if direct && steps == 0 {
        return 1.0;
    }

    let step_score = (steps as f64 / 3.0).min(1.0);
    let connector_score = (connectors as f64 / 2.0).min(1.0);
    0.5 * step_score + 0.5 * connector_score
}
