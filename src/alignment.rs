//! Hypothesis-to-cluster alignment
//!
//! A hypothesis is aligned to the reference cluster it scores highest
//! against. Ties go to the lowest cluster index so that published numbers
//! are reproducible.

use crate::corpus::{HypothesisSet, ReferenceGroup, Sentence};
use crate::error::{MetricsError, MetricsResult};
use crate::similarity::{BleuScorer, SentenceScorer};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

/// The winning cluster for one hypothesis and the score it won with
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterAlignment {
    pub cluster: usize,
    pub score: f64,
}

/// Index and value of the first maximum. NaN never wins.
pub fn best_cluster(scores: &[f64]) -> Option<ClusterAlignment> {
    let mut best: Option<ClusterAlignment> = None;
    for (cluster, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some(b) if score <= b.score => {}
            _ => best = Some(ClusterAlignment { cluster, score }),
        }
    }
    best
}

/// Applies a [`SentenceScorer`] across the clusters of a reference group
#[derive(Debug, Clone, Default)]
pub struct Aligner<S = BleuScorer> {
    scorer: S,
}

impl<S: SentenceScorer> Aligner<S> {
    pub fn new(scorer: S) -> Self {
        Aligner { scorer }
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    /// One similarity score per cluster, in cluster order
    pub fn cluster_scores(&self, hypothesis: &Sentence, group: &ReferenceGroup) -> Vec<f64> {
        group
            .clusters()
            .iter()
            .map(|cluster| self.scorer.score(hypothesis, cluster.members()))
            .collect()
    }

    pub fn align(
        &self,
        hypothesis: &Sentence,
        group: &ReferenceGroup,
    ) -> MetricsResult<ClusterAlignment> {
        if group.is_empty() {
            return Err(MetricsError::EmptyCollection("reference group"));
        }
        let scores = self.cluster_scores(hypothesis, group);
        Ok(best_cluster(&scores).unwrap_or_else(|| {
            warn!(
                "no usable score for hypothesis \"{}\" over {} clusters, aligning to cluster 0",
                hypothesis,
                scores.len()
            );
            ClusterAlignment {
                cluster: 0,
                score: 0.0,
            }
        }))
    }

    pub fn align_all(
        &self,
        hypotheses: &HypothesisSet,
        group: &ReferenceGroup,
    ) -> MetricsResult<Alignment> {
        if group.is_empty() {
            return Err(MetricsError::EmptyCollection("reference group"));
        }
        let entries = hypotheses
            .iter()
            .map(|h| self.align(h, group))
            .collect::<MetricsResult<Vec<_>>>()?;
        Ok(Alignment {
            entries,
            n_clusters: group.len(),
        })
    }

    /// Group hypotheses by the cluster they align to. Every cluster index is
    /// present in the result, possibly with no hypotheses.
    pub fn cluster_hypotheses<'h>(
        &self,
        hypotheses: &'h HypothesisSet,
        group: &ReferenceGroup,
    ) -> MetricsResult<Vec<Vec<&'h Sentence>>> {
        let alignment = self.align_all(hypotheses, group)?;
        Ok(alignment.group(hypotheses))
    }
}

/// Per-hypothesis alignment against one reference group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alignment {
    entries: Vec<ClusterAlignment>,
    n_clusters: usize,
}

impl Alignment {
    pub fn entries(&self) -> &[ClusterAlignment] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of clusters in the group this alignment was computed against
    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn cluster_of(&self, hypothesis: usize) -> Option<usize> {
        self.entries.get(hypothesis).map(|e| e.cluster)
    }

    /// Distinct cluster indices hit by at least one hypothesis
    pub fn covered_clusters(&self) -> BTreeSet<usize> {
        self.entries.iter().map(|e| e.cluster).collect()
    }

    pub fn best_scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|e| e.score)
    }

    pub fn group<'h>(&self, hypotheses: &'h HypothesisSet) -> Vec<Vec<&'h Sentence>> {
        let mut clusters = vec![Vec::new(); self.n_clusters];
        for (entry, hypothesis) in self.entries.iter().zip(hypotheses.iter()) {
            clusters[entry.cluster].push(hypothesis);
        }
        clusters
    }
}
