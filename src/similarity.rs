//! Sentence similarity scoring
//!
//! The alignment step only needs "score a candidate against a set of
//! references", expressed by [`SentenceScorer`]. The scorer shipped here is
//! multi-reference sentence BLEU:
//! - modified (clipped) n-gram precision for orders 1..=max_order, where a
//!   candidate n-gram is clipped to its highest count in any one reference
//! - uniform-weight geometric mean of the (smoothed) precisions
//! - optional brevity penalty against the closest reference length
//!
//! Returns a score from 0.0 to 1.0.

use crate::corpus::Sentence;
use crate::error::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scores one candidate sentence against a set of references.
///
/// Implementations must be pure: same input, same bits out. Empty inputs
/// score 0 rather than failing.
pub trait SentenceScorer: Send + Sync {
    fn score(&self, candidate: &Sentence, references: &[Sentence]) -> f64;
}

impl<F> SentenceScorer for F
where
    F: Fn(&Sentence, &[Sentence]) -> f64 + Send + Sync,
{
    fn score(&self, candidate: &Sentence, references: &[Sentence]) -> f64 {
        self(candidate, references)
    }
}

/// Constant K of Chen & Cherry's length-scaled smoothing
const CHEN_CHERRY_K: f64 = 5.0;
/// Numerator substituted for zero matches by epsilon smoothing
const EPSILON: f64 = 0.1;

/// Replacement policy for zero n-gram precisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Smoothing {
    /// Leave zeros in place; any zero precision gives a score of 0
    None,
    /// Zero match counts become a small epsilon
    Epsilon,
    /// Add one to matches and total of every order above unigrams
    AddOne,
    /// Add one to matches and total of every order, unigrams included
    AddOneAll,
    /// Each successive zero precision becomes 1 / (2^k * total)
    Nist,
    /// Like `Nist`, scaled by the log of the candidate length
    #[default]
    ChenCherry,
}

impl Smoothing {
    /// Whether a candidate without a single unigram match scores 0 outright
    fn requires_unigram_match(self) -> bool {
        !matches!(self, Smoothing::AddOneAll)
    }

    fn apply(self, orders: &[NgramPrecision], candidate_len: usize) -> Vec<f64> {
        match self {
            Smoothing::None => orders.iter().map(NgramPrecision::value).collect(),
            Smoothing::Epsilon => orders
                .iter()
                .map(|p| {
                    if p.matches == 0 {
                        EPSILON / p.denominator()
                    } else {
                        p.value()
                    }
                })
                .collect(),
            Smoothing::AddOne => orders
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    if i == 0 {
                        p.value()
                    } else {
                        (p.matches as f64 + 1.0) / (p.denominator() + 1.0)
                    }
                })
                .collect(),
            Smoothing::AddOneAll => orders
                .iter()
                .map(|p| (p.matches as f64 + 1.0) / (p.total as f64 + 1.0))
                .collect(),
            Smoothing::Nist => {
                let mut inverse = 1.0;
                orders
                    .iter()
                    .map(|p| {
                        if p.matches == 0 {
                            inverse *= 2.0;
                            1.0 / (inverse * p.denominator())
                        } else {
                            p.value()
                        }
                    })
                    .collect()
            }
            Smoothing::ChenCherry => {
                // A one-token candidate would give ln(1) = 0; use the smallest
                // length for which the scale is defined.
                let log_len = (candidate_len.max(2) as f64).ln();
                let mut zeros_seen = 0;
                orders
                    .iter()
                    .map(|p| {
                        if p.matches == 0 {
                            zeros_seen += 1;
                            let numerator =
                                1.0 / (2f64.powi(zeros_seen) * CHEN_CHERRY_K / log_len);
                            numerator / p.denominator()
                        } else {
                            p.value()
                        }
                    })
                    .collect()
            }
        }
    }
}

fn default_max_order() -> usize {
    4
}

fn default_brevity_penalty() -> bool {
    true
}

/// Construction-time choice of BLEU variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Highest n-gram order
    #[serde(default = "default_max_order")]
    pub max_order: usize,
    /// Zero-precision smoothing method
    #[serde(default)]
    pub smoothing: Smoothing,
    /// Multiply by the brevity penalty
    #[serde(default = "default_brevity_penalty")]
    pub brevity_penalty: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self::multi_bleu()
    }
}

impl ScorerConfig {
    /// Multi-reference BLEU-4 with brevity penalty and Chen & Cherry smoothing
    pub fn multi_bleu() -> Self {
        ScorerConfig {
            max_order: default_max_order(),
            smoothing: Smoothing::ChenCherry,
            brevity_penalty: true,
        }
    }

    /// Geometric mean of add-one smoothed precisions, no brevity penalty.
    ///
    /// Plain BLEU punishes short, on-topic candidates harder than long
    /// off-topic ones when references differ in length; this variant
    /// ranks clusters by precision alone.
    pub fn bleu_without_bp(max_order: usize) -> Self {
        ScorerConfig {
            max_order,
            smoothing: Smoothing::AddOneAll,
            brevity_penalty: false,
        }
    }

    pub fn build(&self) -> MetricsResult<BleuScorer> {
        BleuScorer::new(self.clone())
    }
}

/// Clipped matches and candidate n-gram count for one order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NgramPrecision {
    pub matches: usize,
    pub total: usize,
}

impl NgramPrecision {
    /// Totals of zero are treated as one so the ratio stays defined
    fn denominator(&self) -> f64 {
        self.total.max(1) as f64
    }

    pub fn value(&self) -> f64 {
        self.matches as f64 / self.denominator()
    }
}

/// Every intermediate quantity of one BLEU computation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BleuBreakdown {
    pub orders: Vec<NgramPrecision>,
    pub precisions: Vec<f64>,
    pub candidate_len: usize,
    pub reference_len: usize,
    pub brevity_penalty: f64,
    pub score: f64,
}

impl BleuBreakdown {
    fn zero(orders: Vec<NgramPrecision>, candidate_len: usize, reference_len: usize) -> Self {
        BleuBreakdown {
            precisions: vec![0.0; orders.len()],
            orders,
            candidate_len,
            reference_len,
            brevity_penalty: 0.0,
            score: 0.0,
        }
    }
}

/// Multi-reference sentence BLEU
#[derive(Debug, Clone)]
pub struct BleuScorer {
    config: ScorerConfig,
}

impl Default for BleuScorer {
    fn default() -> Self {
        BleuScorer {
            config: ScorerConfig::default(),
        }
    }
}

impl BleuScorer {
    pub fn new(config: ScorerConfig) -> MetricsResult<Self> {
        if config.max_order == 0 {
            return Err(MetricsError::malformed("BLEU max_order must be at least 1"));
        }
        Ok(BleuScorer { config })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn breakdown(&self, candidate: &Sentence, references: &[Sentence]) -> BleuBreakdown {
        let candidate = candidate.tokens();
        let reference_len = closest_reference_length(candidate.len(), references);

        if candidate.is_empty() || references.iter().all(Sentence::is_empty) {
            let orders = vec![NgramPrecision { matches: 0, total: 0 }; self.config.max_order];
            return BleuBreakdown::zero(orders, candidate.len(), reference_len);
        }

        let orders: Vec<NgramPrecision> = (1..=self.config.max_order)
            .map(|n| modified_precision(candidate, references, n))
            .collect();

        if orders[0].matches == 0 && self.config.smoothing.requires_unigram_match() {
            return BleuBreakdown::zero(orders, candidate.len(), reference_len);
        }

        let precisions = self.config.smoothing.apply(&orders, candidate.len());

        let brevity_penalty = if self.config.brevity_penalty {
            brevity_penalty(candidate.len(), reference_len)
        } else {
            1.0
        };

        let score = if precisions.iter().any(|&p| p <= 0.0) {
            0.0
        } else {
            let weight = 1.0 / precisions.len() as f64;
            let log_sum: f64 = precisions.iter().map(|p| weight * p.ln()).sum();
            brevity_penalty * log_sum.exp()
        };

        BleuBreakdown {
            orders,
            precisions,
            candidate_len: candidate.len(),
            reference_len,
            brevity_penalty,
            score,
        }
    }
}

impl SentenceScorer for BleuScorer {
    fn score(&self, candidate: &Sentence, references: &[Sentence]) -> f64 {
        self.breakdown(candidate, references).score
    }
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for ngram in tokens.windows(n) {
        *counts.entry(ngram).or_insert(0) += 1;
    }
    counts
}

/// Clipped n-gram precision against the per-n-gram maximum over references
fn modified_precision(candidate: &[String], references: &[Sentence], n: usize) -> NgramPrecision {
    let candidate_counts = ngram_counts(candidate, n);

    let mut max_reference_counts: HashMap<&[String], usize> = HashMap::new();
    for reference in references {
        for (ngram, count) in ngram_counts(reference.tokens(), n) {
            let entry = max_reference_counts.entry(ngram).or_insert(0);
            *entry = (*entry).max(count);
        }
    }

    let mut matches = 0;
    let mut total = 0;
    for (ngram, count) in candidate_counts {
        total += count;
        let reference_count = max_reference_counts.get(ngram).copied().unwrap_or(0);
        matches += count.min(reference_count);
    }

    NgramPrecision { matches, total }
}

/// Reference length closest to the candidate's; ties go to the shorter reference
fn closest_reference_length(candidate_len: usize, references: &[Sentence]) -> usize {
    references
        .iter()
        .map(Sentence::len)
        .min_by_key(|&len| (len.abs_diff(candidate_len), len))
        .unwrap_or(0)
}

fn brevity_penalty(candidate_len: usize, reference_len: usize) -> f64 {
    if candidate_len > reference_len {
        1.0
    } else if candidate_len == 0 {
        0.0
    } else {
        (1.0 - reference_len as f64 / candidate_len as f64).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Sentence {
        Sentence::from_text(text)
    }

    fn refs(texts: &[&str]) -> Vec<Sentence> {
        texts.iter().map(|t| s(t)).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_identical_sentence_scores_one() {
        let scorer = BleuScorer::default();
        let score = scorer.score(&s("the quick brown fox jumps"), &refs(&["the quick brown fox jumps"]));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_empty_candidate_scores_zero() {
        let scorer = BleuScorer::default();
        assert_eq!(scorer.score(&s(""), &refs(&["hello world"])), 0.0);
    }

    #[test]
    fn test_empty_references_score_zero() {
        let scorer = BleuScorer::default();
        assert_eq!(scorer.score(&s("hello world"), &[]), 0.0);
        assert_eq!(scorer.score(&s("hello world"), &refs(&["", "  "])), 0.0);
    }

    #[test]
    fn test_no_unigram_match_scores_zero() {
        let scorer = BleuScorer::default();
        assert_eq!(scorer.score(&s("apple orange"), &refs(&["dog cat"])), 0.0);
    }

    #[test]
    fn test_clipping_against_reference_counts() {
        // "the the the" against "the cat": only one "the" may match
        let p = modified_precision(&s("the the the").tokens().to_vec(), &refs(&["the cat"]), 1);
        assert_eq!(p, NgramPrecision { matches: 1, total: 3 });
    }

    #[test]
    fn test_clipping_uses_max_over_references() {
        let p = modified_precision(
            &s("the the the").tokens().to_vec(),
            &refs(&["the cat", "the the dog"]),
            1,
        );
        assert_eq!(p, NgramPrecision { matches: 2, total: 3 });
    }

    #[test]
    fn test_closest_reference_length_ties_to_shorter() {
        assert_eq!(closest_reference_length(3, &refs(&["a b", "a b c d"])), 2);
        assert_eq!(closest_reference_length(3, &refs(&["a b c d e", "a b c d"])), 4);
        assert_eq!(closest_reference_length(3, &[]), 0);
    }

    #[test]
    fn test_brevity_penalty() {
        assert_eq!(brevity_penalty(5, 3), 1.0);
        assert_eq!(brevity_penalty(3, 3), 1.0);
        assert!(approx(brevity_penalty(2, 4), (-1.0f64).exp()));
        assert_eq!(brevity_penalty(0, 4), 0.0);
    }

    #[test]
    fn test_chen_cherry_short_candidate() {
        // "i agree" vs "totally agree": p1 = 1/2, no higher-order matches
        let scorer = BleuScorer::default();
        let b = scorer.breakdown(&s("i agree"), &refs(&["totally agree"]));
        let ln2 = 2f64.ln();
        assert_eq!(b.orders[0], NgramPrecision { matches: 1, total: 2 });
        assert!(approx(b.precisions[1], ln2 / 10.0));
        assert!(approx(b.precisions[2], ln2 / 20.0));
        assert!(approx(b.precisions[3], ln2 / 40.0));
        assert_eq!(b.brevity_penalty, 1.0);
        let expected = (0.5 * (ln2 / 10.0) * (ln2 / 20.0) * (ln2 / 40.0)).powf(0.25);
        assert!(approx(b.score, expected));
    }

    #[test]
    fn test_chen_cherry_single_token_candidate_is_nonzero() {
        let scorer = BleuScorer::default();
        let score = scorer.score(&s("just"), &refs(&["just forget it"]));
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_no_smoothing_collapses_to_zero() {
        let scorer = ScorerConfig {
            smoothing: Smoothing::None,
            ..ScorerConfig::default()
        }
        .build()
        .unwrap();
        assert_eq!(scorer.score(&s("i agree"), &refs(&["totally agree"])), 0.0);
    }

    #[test]
    fn test_epsilon_smoothing() {
        let scorer = ScorerConfig {
            smoothing: Smoothing::Epsilon,
            ..ScorerConfig::default()
        }
        .build()
        .unwrap();
        let b = scorer.breakdown(&s("i agree"), &refs(&["totally agree"]));
        assert_eq!(b.precisions, vec![0.5, 0.1, 0.1, 0.1]);
    }

    #[test]
    fn test_nist_smoothing() {
        let scorer = ScorerConfig {
            smoothing: Smoothing::Nist,
            ..ScorerConfig::default()
        }
        .build()
        .unwrap();
        let b = scorer.breakdown(&s("i agree"), &refs(&["totally agree"]));
        assert_eq!(b.precisions, vec![0.5, 0.5, 0.25, 0.125]);
    }

    #[test]
    fn test_add_one_smoothing_skips_unigrams() {
        let scorer = ScorerConfig {
            smoothing: Smoothing::AddOne,
            ..ScorerConfig::default()
        }
        .build()
        .unwrap();
        let b = scorer.breakdown(&s("i agree"), &refs(&["totally agree"]));
        assert_eq!(b.precisions, vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_bleu_without_bp() {
        let scorer = ScorerConfig::bleu_without_bp(4).build().unwrap();
        let b = scorer.breakdown(&s("i agree"), &refs(&["totally agree"]));
        // (1+1)/(2+1), (0+1)/(1+1), (0+1)/(0+1), (0+1)/(0+1)
        assert!(approx(b.precisions[0], 2.0 / 3.0));
        assert_eq!(&b.precisions[1..], &[0.5, 1.0, 1.0]);
        assert_eq!(b.brevity_penalty, 1.0);
        assert!(approx(b.score, (2.0f64 / 3.0 * 0.5).powf(0.25)));
    }

    #[test]
    fn test_without_bp_keeps_score_for_disjoint_candidate() {
        let scorer = ScorerConfig::bleu_without_bp(4).build().unwrap();
        assert!(scorer.score(&s("apple orange"), &refs(&["dog cat"])) > 0.0);
    }

    #[test]
    fn test_brevity_penalty_switch_changes_ranking() {
        // short candidate, two clusters of references of very different length
        let hypothesis = s("the workaholics should be fun .");
        let long_refs = refs(&[
            "rogen and goldberg are producing a movie that is being written and acted by the workaholics guys",
            "i think rogen is producing a movie from workaholics guys , should be fun !",
        ]);
        let short_refs = refs(&[
            "he s also in top five by chris rock",
            "he has an important role in the top five and it s hilarious",
        ]);

        let without_bp = ScorerConfig::bleu_without_bp(4).build().unwrap();
        assert!(without_bp.score(&hypothesis, &long_refs) > without_bp.score(&hypothesis, &short_refs));

        let with_bp = BleuScorer::default();
        let b = with_bp.breakdown(&hypothesis, &long_refs);
        assert_eq!(b.reference_len, 15);
        assert!(b.brevity_penalty < 0.25);
    }

    #[test]
    fn test_order_longer_than_candidate() {
        let scorer = BleuScorer::default();
        let b = scorer.breakdown(&s("hello world"), &refs(&["hello world"]));
        assert_eq!(b.orders[2], NgramPrecision { matches: 0, total: 0 });
        assert!(b.score > 0.0 && b.score < 1.0);
    }

    #[test]
    fn test_zero_max_order_rejected() {
        let config = ScorerConfig {
            max_order: 0,
            ..ScorerConfig::default()
        };
        assert!(config.build().is_err());
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: ScorerConfig = serde_yaml::from_str("smoothing: nist").unwrap();
        assert_eq!(config.max_order, 4);
        assert_eq!(config.smoothing, Smoothing::Nist);
        assert!(config.brevity_penalty);

        let config: ScorerConfig =
            serde_yaml::from_str("{max_order: 5, smoothing: add-one-all, brevity_penalty: false}")
                .unwrap();
        assert_eq!(config, ScorerConfig::bleu_without_bp(5));
    }

    #[test]
    fn test_closure_is_a_scorer() {
        let by_length = |c: &Sentence, _: &[Sentence]| c.len() as f64 / 10.0;
        assert_eq!(SentenceScorer::score(&by_length, &s("a b c"), &[]), 0.3);
    }

    #[test]
    fn test_score_in_unit_range() {
        let scorer = BleuScorer::default();
        let cases = [
            ("the cat sat on the mat", "the cat is on the mat"),
            ("a b c d e f g", "a"),
            ("a", "a b c d e f g"),
            ("x y z", "z y x"),
        ];
        for (c, r) in cases {
            let score = scorer.score(&s(c), &refs(&[r]));
            assert!((0.0..=1.0).contains(&score), "{} vs {} gave {}", c, r, score);
        }
    }
}
