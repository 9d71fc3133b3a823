//! Best-effort reasoning-chain extraction.
//!
//! Descriptive telemetry only. Nothing in scoring reads these steps except
//! the logical-structure heuristic.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Maximum number of steps kept per response.
pub const MAX_REASONING_STEPS: usize = 20;
/// Steps this short or shorter are noise.
pub const MIN_STEP_CHARS: usize = 10;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>(.*?)(?:</think>|\z)").expect("invalid regex"));

static STEP_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:step\s*\d+\s*[:.)\-]|\d+\s*[.)]\s|[-*•]\s|(?:first|second|third|then|next|finally|lastly)\b)",
    )
    .expect("invalid regex")
});

static CONNECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:therefore|thus|hence|because|since|consequently|so that|which means|it follows)\b",
    )
    .expect("invalid regex")
});

static REASONING_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:we know|given that|this implies|implies that|based on|according to|by definition|subclass of|instance of|domain of|range of)\b",
    )
    .expect("invalid regex")
});

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("invalid regex"));

/// Whether a line or sentence carries a connector or reasoning phrase.
pub fn has_reasoning_marker(text: &str) -> bool {
    CONNECTOR.is_match(text) || REASONING_PHRASE.is_match(text)
}

/// Count connector words, used as a structure signal.
pub fn connector_count(text: &str) -> usize {
    CONNECTOR.find_iter(text).count()
}

/// Remove thinking blocks from a response, leaving the final answer.
pub fn strip_think_blocks(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

fn clean(candidate: &str) -> String {
    candidate
        .trim()
        .trim_start_matches(['-', '*', '•'])
        .trim()
        .to_string()
}

/// Extract an ordered, deduplicated list of reasoning steps.
///
/// Every line inside `<think>` blocks is a step. Outside them, a line
/// opening with a step marker is kept whole; other lines contribute the
/// sentences that carry a connector or reasoning phrase. Items of ten
/// characters or fewer are dropped and the list is capped.
pub fn extract_reasoning_steps(text: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    for block in THINK_BLOCK.captures_iter(text) {
        if let Some(inner) = block.get(1) {
            candidates.extend(inner.as_str().lines().map(clean));
        }
    }

    let outside = THINK_BLOCK.replace_all(text, "\n");
    for line in outside.lines() {
        if STEP_MARKER.is_match(line) {
            candidates.push(clean(line));
            continue;
        }
        for sentence in SENTENCE_END.split(line) {
            if has_reasoning_marker(sentence) {
                candidates.push(clean(sentence));
            }
        }
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|step| step.chars().count() > MIN_STEP_CHARS)
        .filter(|step| seen.insert(step.clone()))
        .take(MAX_REASONING_STEPS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_direct_answer_has_no_steps() {
        assert!(extract_reasoning_steps("TRUE").is_empty());
        assert!(extract_reasoning_steps("").is_empty());
    }

    #[test]
    fn test_numbered_steps_and_connectors() {
        let text = "1. Alice has a child named Bob.\n\
                    2. hasChild has domain Parent.\n\
                    Therefore Alice is a Parent. That is all.\n\
                    TRUE";
        let steps = extract_reasoning_steps(text);

        assert_eq!(
            steps,
            vec![
                "1. Alice has a child named Bob.".to_string(),
                "2. hasChild has domain Parent.".to_string(),
                "Therefore Alice is a Parent".to_string(),
            ]
        );
    }

    #[test]
    fn test_think_block_lines_come_first() {
        let text = "<think>\nThe question asks about Carol.\nCarol is an instance of Mother.\n</think>\nTRUE";
        let steps = extract_reasoning_steps(text);

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], "The question asks about Carol.");
        assert_eq!(strip_think_blocks(text), "TRUE");
    }

    #[test]
    fn test_short_items_dropped_and_duplicates_removed() {
        let text = "- Then yes\n- Because alice is a Person\n- Because alice is a Person";
        let steps = extract_reasoning_steps(text);
        assert_eq!(steps, vec!["Because alice is a Person".to_string()]);
    }

    #[test]
    fn test_steps_are_capped() {
        let text: String = (1..=30)
            .map(|i| format!("Step {}: derive fact number {}\n", i, i))
            .collect();
        let steps = extract_reasoning_steps(&text);
        assert_eq!(steps.len(), MAX_REASONING_STEPS);
        assert_eq!(steps[0], "Step 1: derive fact number 1");
    }

    #[test]
    fn test_unclosed_think_block() {
        let text = "<think>\nGiven that Dave is a Person, check parents";
        assert_eq!(
            extract_reasoning_steps(text),
            vec!["Given that Dave is a Person, check parents".to_string()]
        );
        assert_eq!(strip_think_blocks(text), "");
    }
}
