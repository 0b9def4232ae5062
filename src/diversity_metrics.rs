//! Diversity metrics over aligned hypotheses
//!
//! For one query:
//! - MaxBLEU: mean over hypotheses of the score against the best cluster
//! - MDS (mean diversity score): covered clusters / all clusters
//! - PDS (probabilistic diversity score): references in covered clusters /
//!   all references
//!
//! A corpus score is the unweighted mean of per-query scores.

use crate::alignment::{Aligner, Alignment};
use crate::corpus::{Corpus, HypothesisSet, ReferenceGroup};
use crate::error::{MetricsError, MetricsResult};
use crate::similarity::{BleuScorer, SentenceScorer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The (mds, pds, max_bleu) triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub mds: f64,
    pub pds: f64,
    pub max_bleu: f64,
}

impl Score {
    /// Component-wise arithmetic mean, summed in slice order. `None` for an empty slice.
    pub fn mean(scores: &[Score]) -> Option<Score> {
        if scores.is_empty() {
            return None;
        }
        let n = scores.len() as f64;
        let (mds, pds, max_bleu) = scores.iter().fold((0.0, 0.0, 0.0), |acc, s| {
            (acc.0 + s.mds, acc.1 + s.pds, acc.2 + s.max_bleu)
        });
        Some(Score {
            mds: mds / n,
            pds: pds / n,
            max_bleu: max_bleu / n,
        })
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MaxBLEU: {:.6}, MDS: {:.6}, PDS: {:.6}",
            self.max_bleu, self.mds, self.pds
        )
    }
}

// ============================================================================
// Per-query metrics
// ============================================================================

/// The alignment must have been computed against `group`.
fn check_alignment(alignment: &Alignment, group: &ReferenceGroup) -> MetricsResult<()> {
    if group.is_empty() {
        return Err(MetricsError::EmptyCollection("reference group"));
    }
    if alignment.n_clusters() != group.len() {
        return Err(MetricsError::malformed(format!(
            "alignment covers {} clusters but the reference group has {}",
            alignment.n_clusters(),
            group.len()
        )));
    }
    Ok(())
}

/// Fraction of clusters hit by at least one hypothesis
pub fn mean_diversity_score(alignment: &Alignment, group: &ReferenceGroup) -> MetricsResult<f64> {
    check_alignment(alignment, group)?;
    Ok(alignment.covered_clusters().len() as f64 / group.len() as f64)
}

/// Fraction of reference sentences that sit in a covered cluster
pub fn probabilistic_diversity_score(
    alignment: &Alignment,
    group: &ReferenceGroup,
) -> MetricsResult<f64> {
    check_alignment(alignment, group)?;
    let covered: usize = alignment
        .covered_clusters()
        .into_iter()
        .filter_map(|i| group.cluster(i))
        .map(|c| c.len())
        .sum();
    Ok(covered as f64 / group.n_references() as f64)
}

/// Combine an existing alignment into a [`Score`].
pub fn score_from_alignment(alignment: &Alignment, group: &ReferenceGroup) -> MetricsResult<Score> {
    check_alignment(alignment, group)?;
    if alignment.is_empty() {
        return Err(MetricsError::EmptyCollection("hypothesis set"));
    }
    let max_bleu = alignment.best_scores().sum::<f64>() / alignment.len() as f64;
    Ok(Score {
        mds: mean_diversity_score(alignment, group)?,
        pds: probabilistic_diversity_score(alignment, group)?,
        max_bleu,
    })
}

/// A query's score together with the alignment it was computed from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub score: Score,
    pub alignment: Alignment,
}

impl<S: SentenceScorer> Aligner<S> {
    /// Score one hypothesis set against its reference group.
    ///
    /// The reference group is checked first, then the hypothesis set; both
    /// must be non-empty.
    pub fn score_query(
        &self,
        hypotheses: &HypothesisSet,
        group: &ReferenceGroup,
    ) -> MetricsResult<Score> {
        self.report_query(hypotheses, group).map(|r| r.score)
    }

    pub fn report_query(
        &self,
        hypotheses: &HypothesisSet,
        group: &ReferenceGroup,
    ) -> MetricsResult<QueryReport> {
        if group.is_empty() {
            return Err(MetricsError::EmptyCollection("reference group"));
        }
        if hypotheses.is_empty() {
            return Err(MetricsError::EmptyCollection("hypothesis set"));
        }
        let alignment = self.align_all(hypotheses, group)?;
        let score = score_from_alignment(&alignment, group)?;
        Ok(QueryReport { score, alignment })
    }
}

/// Free-function form of [`Aligner::score_query`]
pub fn score_hypothesis_set<S: SentenceScorer>(
    aligner: &Aligner<S>,
    hypotheses: &HypothesisSet,
    group: &ReferenceGroup,
) -> MetricsResult<Score> {
    aligner.score_query(hypotheses, group)
}

// ============================================================================
// Corpus aggregation
// ============================================================================

/// Macro-averaged corpus score plus the per-query scores it was built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusScore {
    pub score: Score,
    pub per_query: Vec<Score>,
}

/// Scores every query of a corpus and averages the results.
#[derive(Debug, Clone)]
pub struct CorpusAggregator<S = BleuScorer> {
    aligner: Aligner<S>,
    parallel: bool,
}

impl Default for CorpusAggregator<BleuScorer> {
    fn default() -> Self {
        CorpusAggregator::new(Aligner::default())
    }
}

impl<S: SentenceScorer> CorpusAggregator<S> {
    pub fn new(aligner: Aligner<S>) -> Self {
        CorpusAggregator {
            aligner,
            parallel: true,
        }
    }

    /// Toggle the rayon per-query loop. Results are identical either way.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn aligner(&self) -> &Aligner<S> {
        &self.aligner
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn compute(
        &self,
        hypotheses: &[HypothesisSet],
        references: &[ReferenceGroup],
    ) -> MetricsResult<CorpusScore> {
        self.compute_observed(hypotheses, references, |_| {})
    }

    pub fn compute_corpus(&self, corpus: &Corpus) -> MetricsResult<CorpusScore> {
        self.compute(corpus.hypotheses(), corpus.references())
    }

    /// Like [`compute`](Self::compute), calling `on_query` with the index of
    /// each query once it has been scored (in completion order).
    pub fn compute_observed<F>(
        &self,
        hypotheses: &[HypothesisSet],
        references: &[ReferenceGroup],
        on_query: F,
    ) -> MetricsResult<CorpusScore>
    where
        F: Fn(usize) + Sync,
    {
        if hypotheses.len() != references.len() {
            return Err(MetricsError::LengthMismatch {
                hypotheses: hypotheses.len(),
                references: references.len(),
            });
        }
        if hypotheses.is_empty() {
            return Err(MetricsError::EmptyCollection("corpus"));
        }

        let score_one = |i: usize| -> MetricsResult<Score> {
            let group = &references[i];
            let score = self
                .aligner
                .score_query(&hypotheses[i], group)
                .map_err(|e| e.in_query(i, group.query()))?;
            debug!(
                "query {}: mds={:.4} pds={:.4} max_bleu={:.4}",
                i, score.mds, score.pds, score.max_bleu
            );
            on_query(i);
            Ok(score)
        };

        // collected in index order, so the first error reported is the lowest failing index
        let results: Vec<MetricsResult<Score>> = if self.parallel {
            (0..hypotheses.len()).into_par_iter().map(score_one).collect()
        } else {
            (0..hypotheses.len()).map(score_one).collect()
        };
        let per_query = results.into_iter().collect::<MetricsResult<Vec<_>>>()?;

        let score = Score::mean(&per_query).ok_or(MetricsError::EmptyCollection("corpus"))?;
        Ok(CorpusScore { score, per_query })
    }
}
