//! Confidence and entropy from token log-probabilities.
//!
//! Log-probabilities are converted with base 2 (`p = 2^logprob`) and clamped
//! to [0, 1]. Entropy is measured in bits over each token's renormalized top
//! alternatives.

use serde::{Deserialize, Serialize};

use crate::llm::TokenLogprob;

/// Confidence signals for one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    /// False when the provider returned no log-probabilities
    pub has_logprobs: bool,
    /// Mean token probability
    pub confidence_score: f64,
    /// Highest token probability
    pub top_token_probability: f64,
    /// `1 / (1 + variance)` of token probabilities; 1.0 below two tokens
    pub consistency_score: f64,
    /// Mean per-token entropy in bits, over tokens with alternatives
    pub entropy: f64,
    /// Mean per-token entropy divided by its maximum, in [0, 1]
    pub normalized_entropy: f64,
    /// Number of tokens that were scored
    pub scored_tokens: usize,
}

/// Probability of a base-2 log-probability, clamped to [0, 1].
pub fn logprob_to_probability(logprob: f64) -> f64 {
    if logprob.is_nan() {
        return 0.0;
    }
    logprob.exp2().clamp(0.0, 1.0)
}

/// Shannon entropy in bits of a distribution after renormalization.
///
/// Returns `None` when the weights sum to zero.
pub fn entropy_bits(weights: &[f64]) -> Option<f64> {
    let total: f64 = weights.iter().filter(|w| w.is_finite()).sum();
    if total <= 0.0 {
        return None;
    }
    let entropy = weights
        .iter()
        .filter(|w| w.is_finite() && **w > 0.0)
        .map(|w| {
            let q = w / total;
            -q * q.log2()
        })
        .sum::<f64>();
    Some(entropy.max(0.0))
}

impl ConfidenceMetrics {
    /// Metrics for a response without log-probabilities: every field zero.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Compute metrics from the provider's per-token log-probabilities.
    ///
    /// `None` means the provider returned nothing; an empty slice means it
    /// returned log-probabilities for zero tokens.
    pub fn from_logprobs(logprobs: Option<&[TokenLogprob]>) -> Self {
        let Some(tokens) = logprobs else {
            return Self::absent();
        };

        let probabilities: Vec<f64> = tokens
            .iter()
            .map(|t| logprob_to_probability(t.logprob))
            .collect();
        let n = probabilities.len();

        let (confidence_score, top_token_probability) = if n == 0 {
            (0.0, 0.0)
        } else {
            let mean = probabilities.iter().sum::<f64>() / n as f64;
            let max = probabilities.iter().copied().fold(0.0, f64::max);
            (mean, max)
        };

        let consistency_score = if n < 2 {
            1.0
        } else {
            let mean = confidence_score;
            let variance =
                probabilities.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n as f64;
            1.0 / (1.0 + variance)
        };

        let mut entropies = Vec::new();
        let mut normalized = Vec::new();
        for token in tokens {
            let weights: Vec<f64> = token
                .top_logprobs
                .iter()
                .map(|alt| logprob_to_probability(alt.logprob))
                .collect();
            if let Some(h) = entropy_bits(&weights) {
                entropies.push(h);
                let max_bits = (weights.len() as f64).log2();
                normalized.push(if max_bits > 0.0 {
                    (h / max_bits).clamp(0.0, 1.0)
                } else {
                    0.0
                });
            }
        }

        Self {
            has_logprobs: true,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            top_token_probability,
            consistency_score,
            entropy: mean(&entropies),
            normalized_entropy: mean(&normalized),
            scored_tokens: n,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_absent_logprobs_are_all_zero() {
        let metrics = ConfidenceMetrics::from_logprobs(None);
        assert!(!metrics.has_logprobs);
        assert_eq!(metrics.confidence_score, 0.0);
        assert_eq!(metrics.top_token_probability, 0.0);
        assert_eq!(metrics.consistency_score, 0.0);
        assert_eq!(metrics.entropy, 0.0);
        assert_eq!(metrics.scored_tokens, 0);
    }

    #[test]
    fn test_zero_and_one_token_consistency() {
        let empty = ConfidenceMetrics::from_logprobs(Some(&[]));
        assert!(empty.has_logprobs);
        assert_eq!(empty.consistency_score, 1.0);

        let one = [TokenLogprob::new("TRUE", -1.0)];
        let metrics = ConfidenceMetrics::from_logprobs(Some(&one));
        assert_eq!(metrics.consistency_score, 1.0);
        assert!(approx(metrics.confidence_score, 0.5));
        assert!(approx(metrics.top_token_probability, 0.5));
    }

    #[test]
    fn test_mean_max_and_consistency() {
        let tokens = [TokenLogprob::new("a", 0.0), TokenLogprob::new("b", -1.0)];
        let metrics = ConfidenceMetrics::from_logprobs(Some(&tokens));

        // p = [1.0, 0.5]; mean 0.75; variance 0.0625
        assert!(approx(metrics.confidence_score, 0.75));
        assert!(approx(metrics.top_token_probability, 1.0));
        assert!(approx(metrics.consistency_score, 1.0 / 1.0625));
        assert_eq!(metrics.scored_tokens, 2);
    }

    #[test]
    fn test_entropy_over_renormalized_alternatives() {
        // Two equally likely alternatives: exactly one bit
        let tokens = [TokenLogprob::new("TRUE", -1.0)
            .with_alternative("TRUE", -1.0)
            .with_alternative("FALSE", -1.0)];
        let metrics = ConfidenceMetrics::from_logprobs(Some(&tokens));
        assert!(approx(metrics.entropy, 1.0));
        assert!(approx(metrics.normalized_entropy, 1.0));

        // A token without alternatives does not dilute the mean
        let tokens = [
            tokens[0].clone(),
            TokenLogprob::new(".", 0.0),
        ];
        let metrics = ConfidenceMetrics::from_logprobs(Some(&tokens));
        assert!(approx(metrics.entropy, 1.0));
    }

    #[test]
    fn test_positive_logprob_is_clamped() {
        assert_eq!(logprob_to_probability(3.0), 1.0);
        assert_eq!(logprob_to_probability(f64::NEG_INFINITY), 0.0);
        assert_eq!(logprob_to_probability(f64::NAN), 0.0);
        assert_eq!(entropy_bits(&[0.0, 0.0]), None);
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        fn token() -> impl Strategy<Value = TokenLogprob> {
            (
                -30.0f64..2.0,
                prop::collection::vec(-30.0f64..2.0, 0..6),
            )
                .prop_map(|(logprob, alts)| {
                    alts.into_iter()
                        .enumerate()
                        .fold(TokenLogprob::new("t", logprob), |t, (i, lp)| {
                            t.with_alternative(format!("alt{}", i), lp)
                        })
                })
        }

        proptest! {
            /// Every score stays in [0, 1] whatever the provider returns.
            #[test]
            fn scores_are_in_unit_interval(tokens in prop::collection::vec(token(), 0..40)) {
                let m = ConfidenceMetrics::from_logprobs(Some(&tokens));
                for value in [
                    m.confidence_score,
                    m.top_token_probability,
                    m.consistency_score,
                    m.normalized_entropy,
                ] {
                    prop_assert!((0.0..=1.0).contains(&value), "{} out of range in {:?}", value, m);
                }
                prop_assert!(m.entropy >= 0.0);
                prop_assert!(m.entropy <= 5.0f64.log2() + 1e-9);
            }

            /// Fewer than two tokens always means perfect consistency.
            #[test]
            fn consistency_is_one_below_two_tokens(tokens in prop::collection::vec(token(), 0..2)) {
                let m = ConfidenceMetrics::from_logprobs(Some(&tokens));
                prop_assert_eq!(m.consistency_score, 1.0);
            }
        }
    }
}
