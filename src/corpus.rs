//! Data model and shape adapters
//!
//! Raw inputs come in two shapes:
//! - hypothesis files: one line per query, hypotheses separated by an
//!   end-of-sentence marker (default `</s>`)
//! - reference files: a JSON object `{query: {cluster_id: [reference, ...]}}`
//!
//! This module turns both into tokenized, ordered value objects. Nothing here
//! is mutated after construction.

use crate::error::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Default end-of-sentence marker separating hypotheses on one line
pub const DEFAULT_EOS: &str = "</s>";

// ============================================================================
// Sentences
// ============================================================================

/// An ordered sequence of opaque tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sentence(Vec<String>);

impl Sentence {
    pub fn new(tokens: Vec<String>) -> Self {
        Sentence(tokens)
    }

    /// Tokenize by whitespace
    pub fn from_text(text: &str) -> Self {
        Sentence(text.split_whitespace().map(str::to_string).collect())
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for Sentence {
    fn from(tokens: Vec<String>) -> Self {
        Sentence(tokens)
    }
}

impl From<&str> for Sentence {
    fn from(text: &str) -> Self {
        Sentence::from_text(text)
    }
}

impl AsRef<[String]> for Sentence {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

// ============================================================================
// References
// ============================================================================

/// Mutually paraphrastic references. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceCluster {
    members: Vec<Sentence>,
}

impl ReferenceCluster {
    pub fn new(members: Vec<Sentence>) -> MetricsResult<Self> {
        if members.is_empty() {
            return Err(MetricsError::malformed("reference cluster has no members"));
        }
        Ok(ReferenceCluster { members })
    }

    pub fn members(&self) -> &[Sentence] {
        &self.members
    }

    /// Number of reference sentences in the cluster
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// How cluster identifiers from a reference file are ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterOrdering {
    /// Integer ids ascending, then any non-integer id (e.g. `"null"`) by string order
    #[default]
    NumericThenLexical,
    /// Every id must parse as an integer
    StrictNumeric,
}

/// Sort key: integers first by value, then everything else by string.
/// The raw id breaks ties between equal integers such as `"1"` and `"01"`.
fn cluster_sort_key(id: &str) -> (u8, i64, &str) {
    match id.trim().parse::<i64>() {
        Ok(n) => (0, n, id),
        Err(_) => (1, 0, id),
    }
}

/// Order cluster ids for a reference group
pub fn order_cluster_ids<'a>(
    ids: impl IntoIterator<Item = &'a str>,
    ordering: ClusterOrdering,
) -> MetricsResult<Vec<&'a str>> {
    let mut ids: Vec<&str> = ids.into_iter().collect();

    if ordering == ClusterOrdering::StrictNumeric {
        if let Some(bad) = ids.iter().find(|id| id.trim().parse::<i64>().is_err()) {
            return Err(MetricsError::malformed(format!(
                "cluster id {:?} is not an integer",
                bad
            )));
        }
    }

    ids.sort_by(|a, b| cluster_sort_key(a).cmp(&cluster_sort_key(b)));
    Ok(ids)
}

/// The ordered clusters of references for one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceGroup {
    query: Option<String>,
    clusters: Vec<ReferenceCluster>,
}

impl ReferenceGroup {
    pub fn new(clusters: Vec<ReferenceCluster>) -> Self {
        ReferenceGroup {
            query: None,
            clusters,
        }
    }

    pub fn with_query(query: impl Into<String>, clusters: Vec<ReferenceCluster>) -> Self {
        ReferenceGroup {
            query: Some(query.into()),
            clusters,
        }
    }

    /// Build a group from already tokenized clusters. Any empty cluster is rejected.
    pub fn from_sentences(clusters: Vec<Vec<Sentence>>) -> MetricsResult<Self> {
        let clusters = clusters
            .into_iter()
            .map(ReferenceCluster::new)
            .collect::<MetricsResult<Vec<_>>>()?;
        Ok(ReferenceGroup::new(clusters))
    }

    /// Adapt one `{cluster_id: [reference, ...]}` object.
    pub fn from_json(
        value: &Value,
        query: Option<&str>,
        ordering: ClusterOrdering,
    ) -> MetricsResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            MetricsError::malformed(format!(
                "reference group{} must be a JSON object of clusters",
                describe_query(query)
            ))
        })?;

        let ids = order_cluster_ids(object.keys().map(String::as_str), ordering)?;

        let mut clusters = Vec::with_capacity(ids.len());
        for id in ids {
            clusters.push(cluster_from_json(id, &object[id], query)?);
        }

        Ok(ReferenceGroup {
            query: query.map(str::to_string),
            clusters,
        })
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn clusters(&self) -> &[ReferenceCluster] {
        &self.clusters
    }

    pub fn cluster(&self, index: usize) -> Option<&ReferenceCluster> {
        self.clusters.get(index)
    }

    /// Number of clusters
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Total number of reference sentences across clusters
    pub fn n_references(&self) -> usize {
        self.clusters.iter().map(ReferenceCluster::len).sum()
    }
}

fn describe_query(query: Option<&str>) -> String {
    query.map(|q| format!(" for query {:?}", q)).unwrap_or_default()
}

fn cluster_from_json(id: &str, value: &Value, query: Option<&str>) -> MetricsResult<ReferenceCluster> {
    let items = value.as_array().ok_or_else(|| {
        MetricsError::malformed(format!(
            "cluster {:?}{} must be a list of strings",
            id,
            describe_query(query)
        ))
    })?;

    let members = items
        .iter()
        .map(|item| {
            item.as_str().map(Sentence::from_text).ok_or_else(|| {
                MetricsError::malformed(format!(
                    "cluster {:?}{} contains a non-string reference",
                    id,
                    describe_query(query)
                ))
            })
        })
        .collect::<MetricsResult<Vec<_>>>()?;

    ReferenceCluster::new(members).map_err(|_| {
        MetricsError::malformed(format!(
            "cluster {:?}{} has no references",
            id,
            describe_query(query)
        ))
    })
}

impl fmt::Display for ReferenceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "query: {}", self.query.as_deref().unwrap_or("-"))?;
        for (i, cluster) in self.clusters.iter().enumerate() {
            writeln!(f, "cluster-{}:", i)?;
            for (j, reference) in cluster.members.iter().enumerate() {
                writeln!(f, "  {}: {}", j, reference)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Hypotheses
// ============================================================================

/// Candidate sentences generated for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HypothesisSet {
    hypotheses: Vec<Sentence>,
}

impl HypothesisSet {
    pub fn new(hypotheses: Vec<Sentence>) -> Self {
        HypothesisSet { hypotheses }
    }

    /// Split one line on `eos` and tokenize each piece.
    ///
    /// Pieces that are blank (e.g. after a trailing marker) become empty
    /// sentences; they score 0 against every cluster.
    pub fn from_line(line: &str, eos: &str) -> MetricsResult<Self> {
        if eos.is_empty() {
            return Err(MetricsError::malformed("end-of-sentence marker must not be empty"));
        }
        Ok(HypothesisSet {
            hypotheses: line.split(eos).map(Sentence::from_text).collect(),
        })
    }

    pub fn hypotheses(&self) -> &[Sentence] {
        &self.hypotheses
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sentence> {
        self.hypotheses.iter()
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    /// Copy of this set without empty sentences
    pub fn without_empty(&self) -> Self {
        HypothesisSet {
            hypotheses: self
                .hypotheses
                .iter()
                .filter(|h| !h.is_empty())
                .cloned()
                .collect(),
        }
    }
}

impl From<Vec<Sentence>> for HypothesisSet {
    fn from(hypotheses: Vec<Sentence>) -> Self {
        HypothesisSet::new(hypotheses)
    }
}

impl<'a> IntoIterator for &'a HypothesisSet {
    type Item = &'a Sentence;
    type IntoIter = std::slice::Iter<'a, Sentence>;

    fn into_iter(self) -> Self::IntoIter {
        self.hypotheses.iter()
    }
}

impl fmt::Display for HypothesisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hypothesis) in self.hypotheses.iter().enumerate() {
            writeln!(f, "{}: {}", i, hypothesis)?;
        }
        Ok(())
    }
}

/// Parse a whole hypothesis file, one [`HypothesisSet`] per line
pub fn parse_hypothesis_corpus(text: &str, eos: &str) -> MetricsResult<Vec<HypothesisSet>> {
    text.lines()
        .map(|line| HypothesisSet::from_line(line, eos))
        .collect()
}

/// Parse a query file: one query key per line, surrounding whitespace removed
pub fn parse_query_lines(text: &str) -> Vec<String> {
    text.lines().map(|line| line.trim().to_string()).collect()
}

// ============================================================================
// Corpora
// ============================================================================

/// All reference groups of a reference file, in file order and addressable by query
#[derive(Debug, Clone, Default)]
pub struct ReferenceCorpus {
    groups: Vec<ReferenceGroup>,
    by_query: HashMap<String, usize>,
}

impl ReferenceCorpus {
    pub fn from_json_str(text: &str, ordering: ClusterOrdering) -> MetricsResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| MetricsError::malformed(format!("invalid reference JSON: {}", e)))?;
        Self::from_json(&value, ordering)
    }

    pub fn from_json(value: &Value, ordering: ClusterOrdering) -> MetricsResult<Self> {
        let object: &Map<String, Value> = value.as_object().ok_or_else(|| {
            MetricsError::malformed("reference file must be a JSON object keyed by query")
        })?;

        let groups = object
            .iter()
            .map(|(query, group)| ReferenceGroup::from_json(group, Some(query), ordering))
            .collect::<MetricsResult<Vec<_>>>()?;

        debug!("Adapted {} reference groups", groups.len());
        Ok(Self::from_groups(groups))
    }

    pub fn from_groups(groups: Vec<ReferenceGroup>) -> Self {
        let by_query = groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.query().map(|q| (q.to_string(), i)))
            .collect();
        ReferenceCorpus { groups, by_query }
    }

    pub fn groups(&self) -> &[ReferenceGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<ReferenceGroup> {
        self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Query keys in file order
    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().filter_map(ReferenceGroup::query)
    }

    /// Look a group up by query: exact key first, then the lowercased key
    pub fn get(&self, query: &str) -> Option<&ReferenceGroup> {
        self.by_query
            .get(query)
            .or_else(|| self.by_query.get(&query.to_lowercase()))
            .map(|&i| &self.groups[i])
    }
}

/// Hypothesis sets paired index-by-index with reference groups
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    hypotheses: Vec<HypothesisSet>,
    references: Vec<ReferenceGroup>,
}

impl Corpus {
    /// Pair by position: line i of the hypothesis file with the i-th group of
    /// the reference file. Lengths are checked when the corpus is scored.
    pub fn positional(hypotheses: Vec<HypothesisSet>, references: ReferenceCorpus) -> Self {
        Corpus {
            hypotheses,
            references: references.into_groups(),
        }
    }

    /// Pair by query key: line i of the query file names the group for line i
    /// of the hypothesis file.
    pub fn keyed(
        hypotheses: Vec<HypothesisSet>,
        queries: &[String],
        references: &ReferenceCorpus,
    ) -> MetricsResult<Self> {
        if queries.len() != hypotheses.len() {
            return Err(MetricsError::malformed(format!(
                "query file has {} lines but hypothesis file has {}",
                queries.len(),
                hypotheses.len()
            )));
        }

        let groups = queries
            .iter()
            .enumerate()
            .map(|(line, query)| {
                references.get(query).cloned().ok_or_else(|| {
                    MetricsError::malformed(format!(
                        "query file line {}: no reference group for {:?}",
                        line + 1,
                        query
                    ))
                })
            })
            .collect::<MetricsResult<Vec<_>>>()?;

        Ok(Corpus {
            hypotheses,
            references: groups,
        })
    }

    pub fn hypotheses(&self) -> &[HypothesisSet] {
        &self.hypotheses
    }

    pub fn references(&self) -> &[ReferenceGroup] {
        &self.references
    }

    /// Number of queries (hypothesis side)
    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    /// Drop empty hypotheses from every set
    pub fn without_empty_hypotheses(self) -> Self {
        Corpus {
            hypotheses: self.hypotheses.iter().map(HypothesisSet::without_empty).collect(),
            references: self.references,
        }
    }
}
