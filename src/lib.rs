//! LSDSCC metrics - diversity-oriented evaluation for response generation
//!
//! Scores a generation system that produces several responses per query
//! against references grouped into semantic clusters, reporting MaxBLEU,
//! MDS and PDS.

pub mod alignment;
pub mod corpus;
pub mod diversity_metrics;
pub mod error;
pub mod similarity;

pub use alignment::{best_cluster, Aligner, Alignment, ClusterAlignment};
pub use corpus::{
    order_cluster_ids, parse_hypothesis_corpus, parse_query_lines, ClusterOrdering, Corpus,
    HypothesisSet, ReferenceCluster, ReferenceCorpus, ReferenceGroup, Sentence, DEFAULT_EOS,
};
pub use diversity_metrics::{
    mean_diversity_score, probabilistic_diversity_score, score_from_alignment,
    score_hypothesis_set, CorpusAggregator, CorpusScore, QueryReport, Score,
};
pub use error::{ErrorKind, MetricsError, MetricsResult};
pub use similarity::{BleuBreakdown, BleuScorer, NgramPrecision, ScorerConfig, SentenceScorer, Smoothing};

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// Public Types
// ============================================================================

/// How input files are turned into hypothesis sets and reference groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Marker separating hypotheses on one line
    #[serde(default = "default_eos")]
    pub eos: String,
    /// Ordering rule for cluster ids in the reference file
    #[serde(default)]
    pub cluster_ordering: ClusterOrdering,
    /// Drop empty hypothesis segments instead of scoring them as 0
    #[serde(default)]
    pub drop_empty_hypotheses: bool,
}

fn default_eos() -> String {
    DEFAULT_EOS.to_string()
}
fn default_parallel() -> bool {
    true
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            eos: default_eos(),
            cluster_ordering: ClusterOrdering::default(),
            drop_empty_hypotheses: false,
        }
    }
}

/// Configuration for evaluating one system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Name of the evaluated system
    #[serde(default)]
    pub name: Option<String>,
    /// One line per query, hypotheses separated by the eos marker
    pub hypothesis_file: String,
    /// JSON object `{query: {cluster_id: [reference, ...]}}`
    pub reference_file: String,
    /// Optional query file pairing hypothesis lines with reference keys
    #[serde(default)]
    pub query_file: Option<String>,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    /// Score queries on the rayon pool
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

/// A system in a multi-system scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    pub hypothesis_file: String,
}

/// A complete scenario configuration for YAML-based comparisons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Reference file shared by every system
    pub reference_file: String,
    #[serde(default)]
    pub query_file: Option<String>,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Systems to evaluate, in report order
    pub systems: Vec<SystemConfig>,
}

/// Outcome of evaluating one system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub name: Option<String>,
    /// Macro-average over queries
    pub score: Score,
    pub per_query: Vec<Score>,
    pub n_queries: usize,
    pub n_hypotheses: usize,
    pub n_clusters: usize,
    pub n_references: usize,
    pub duration_secs: f64,
}

impl EvaluationResult {
    pub fn hypotheses_per_query(&self) -> f64 {
        ratio(self.n_hypotheses, self.n_queries)
    }

    pub fn clusters_per_query(&self) -> f64 {
        ratio(self.n_clusters, self.n_queries)
    }
}

// ============================================================================
// Statistics
// ============================================================================

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

// ============================================================================
// Dataset Loading
// ============================================================================

pub async fn load_hypothesis_file(path: &str, loader: &LoaderConfig) -> Result<Vec<HypothesisSet>> {
    info!("Loading hypotheses from: {}", path);
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read hypothesis file: {}", path))?;

    let sets = parse_hypothesis_corpus(&content, &loader.eos)
        .with_context(|| format!("Failed to parse hypothesis file: {}", path))?;

    let empty: usize = sets
        .iter()
        .map(|s| s.iter().filter(|h| h.is_empty()).count())
        .sum();
    if empty > 0 {
        warn!(
            "{} empty hypothesis segment(s) in {} ({})",
            empty,
            path,
            if loader.drop_empty_hypotheses {
                "dropped"
            } else {
                "scored as 0"
            }
        );
    }

    info!("Loaded {} hypothesis sets", sets.len());
    Ok(sets)
}

pub async fn load_reference_file(path: &str, loader: &LoaderConfig) -> Result<ReferenceCorpus> {
    info!("Loading references from: {}", path);
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read reference file: {}", path))?;

    let references = ReferenceCorpus::from_json_str(&content, loader.cluster_ordering)
        .with_context(|| format!("Failed to parse reference file: {}", path))?;

    info!("Loaded {} reference groups", references.len());
    Ok(references)
}

pub async fn load_query_file(path: &str) -> Result<Vec<String>> {
    info!("Loading queries from: {}", path);
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read query file: {}", path))?;
    let queries = parse_query_lines(&content);
    info!("Loaded {} queries", queries.len());
    Ok(queries)
}

/// Pair hypothesis sets with reference groups, by query key when `queries`
/// is given and by position otherwise.
pub fn pair_corpus(
    hypotheses: Vec<HypothesisSet>,
    references: ReferenceCorpus,
    queries: Option<&[String]>,
    loader: &LoaderConfig,
) -> Result<Corpus> {
    let corpus = match queries {
        Some(queries) => Corpus::keyed(hypotheses, queries, &references)?,
        None => Corpus::positional(hypotheses, references),
    };
    Ok(if loader.drop_empty_hypotheses {
        corpus.without_empty_hypotheses()
    } else {
        corpus
    })
}

/// Load and pair everything an evaluation needs
pub async fn load_corpus(config: &EvaluationConfig) -> Result<Corpus> {
    let references = load_reference_file(&config.reference_file, &config.loader).await?;
    let hypotheses = load_hypothesis_file(&config.hypothesis_file, &config.loader).await?;
    let queries = match &config.query_file {
        Some(path) => Some(load_query_file(path).await?),
        None => None,
    };
    pair_corpus(hypotheses, references, queries.as_deref(), &config.loader)
}

/// Write the query keys of a reference file, one per line, in file order
pub async fn write_query_file(
    reference_file: &str,
    output_path: &str,
    loader: &LoaderConfig,
) -> Result<usize> {
    let references = load_reference_file(reference_file, loader).await?;
    let mut content = String::new();
    for query in references.queries() {
        content.push_str(query);
        content.push('\n');
    }

    if let Some(parent) = std::path::Path::new(output_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(output_path, content)
        .await
        .with_context(|| format!("Failed to write query file: {}", output_path))?;

    info!("Wrote {} queries to: {}", references.len(), output_path);
    Ok(references.len())
}

// ============================================================================
// Evaluation Runner
// ============================================================================

/// Score an already paired corpus. The CPU-bound work runs on the blocking pool.
pub async fn evaluate_corpus(
    name: Option<String>,
    corpus: Corpus,
    scorer: &ScorerConfig,
    parallel: bool,
) -> Result<EvaluationResult> {
    let aggregator = CorpusAggregator::new(Aligner::new(scorer.build()?)).with_parallel(parallel);

    let n_queries = corpus.len();
    let n_hypotheses: usize = corpus.hypotheses().iter().map(HypothesisSet::len).sum();
    let n_clusters: usize = corpus.references().iter().map(ReferenceGroup::len).sum();
    let n_references: usize = corpus
        .references()
        .iter()
        .map(ReferenceGroup::n_references)
        .sum();
    debug!(
        "Evaluating {} queries ({} hypotheses, {} clusters, {} references)",
        n_queries, n_hypotheses, n_clusters, n_references
    );

    let progress = ProgressBar::new(n_queries as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
            )?
            .progress_chars("#>-"),
    );

    let start_time = Instant::now();
    let bar = progress.clone();
    let scored = tokio::task::spawn_blocking(move || {
        aggregator.compute_observed(corpus.hypotheses(), corpus.references(), |_| bar.inc(1))
    })
    .await
    .context("Evaluation task failed")?;
    progress.finish_and_clear();
    let scored = scored?;

    Ok(EvaluationResult {
        name,
        score: scored.score,
        per_query: scored.per_query,
        n_queries,
        n_hypotheses,
        n_clusters,
        n_references,
        duration_secs: start_time.elapsed().as_secs_f64(),
    })
}

pub async fn run_evaluation(config: &EvaluationConfig) -> Result<EvaluationResult> {
    let corpus = load_corpus(config).await?;
    evaluate_corpus(config.name.clone(), corpus, &config.scorer, config.parallel).await
}

/// Run a complete scenario (multiple systems against one reference file)
pub async fn run_scenario(scenario: &Scenario) -> Result<Vec<EvaluationResult>> {
    info!("Running scenario: {}", scenario.name);
    if let Some(desc) = &scenario.description {
        info!("Description: {}", desc);
    }

    if scenario.systems.is_empty() {
        return Err(anyhow!("Scenario {} lists no systems", scenario.name));
    }

    // Load references once for all systems
    let references = load_reference_file(&scenario.reference_file, &scenario.loader).await?;
    let queries = match &scenario.query_file {
        Some(path) => Some(load_query_file(path).await?),
        None => None,
    };

    let mut results = Vec::new();

    for system in &scenario.systems {
        info!("Evaluating system: {} ({})", system.name, system.hypothesis_file);

        let hypotheses = load_hypothesis_file(&system.hypothesis_file, &scenario.loader).await?;
        let corpus = pair_corpus(
            hypotheses,
            references.clone(),
            queries.as_deref(),
            &scenario.loader,
        )
        .with_context(|| format!("Failed to pair corpus for system: {}", system.name))?;

        let result = evaluate_corpus(
            Some(system.name.clone()),
            corpus,
            &scenario.scorer,
            scenario.parallel,
        )
        .await
        .with_context(|| format!("Evaluation failed for system: {}", system.name))?;
        results.push(result);
    }

    Ok(results)
}

// ============================================================================
// Results Display
// ============================================================================

pub fn write_result<W: Write>(out: &mut W, result: &EvaluationResult) -> std::io::Result<()> {
    if let Some(name) = &result.name {
        writeln!(out, "============ {} ============", name)?;
    }
    writeln!(out, "============ Diversity Evaluation Result ============")?;
    writeln!(out, "Queries:                                 {}", result.n_queries)?;
    writeln!(out, "Hypotheses:                              {}", result.n_hypotheses)?;
    writeln!(
        out,
        "Avg hypotheses per query:                {:.2}",
        result.hypotheses_per_query()
    )?;
    writeln!(out, "Reference clusters:                      {}", result.n_clusters)?;
    writeln!(
        out,
        "Avg clusters per query:                  {:.2}",
        result.clusters_per_query()
    )?;
    writeln!(out, "References:                              {}", result.n_references)?;
    writeln!(
        out,
        "Evaluation duration (s):                 {:.2}",
        result.duration_secs
    )?;
    writeln!(out, "{:-^51}", "Scores")?;
    writeln!(out, "MaxBLEU:                                 {:.6}", result.score.max_bleu)?;
    writeln!(out, "MDS:                                     {:.6}", result.score.mds)?;
    writeln!(out, "PDS:                                     {:.6}", result.score.pds)?;
    writeln!(out, "{}", "=".repeat(51))?;
    Ok(())
}

pub fn print_result(result: &EvaluationResult) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout);
    if let Err(e) = write_result(&mut stdout, result) {
        warn!("Failed to print result: {}", e);
    }
}

/// Index of the highest value; ties go to the earlier system. `None` when every value is 0.
fn find_winner(values: &[f64]) -> Option<usize> {
    if values.iter().all(|&v| v == 0.0) {
        return None;
    }
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if v <= b => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

pub fn write_comparison<W: Write>(out: &mut W, results: &[EvaluationResult]) -> std::io::Result<()> {
    let names: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| r.name.clone().unwrap_or_else(|| format!("System {}", i + 1)))
        .collect();

    let separator = "=".repeat(80);
    let col_width = 12;
    let metric_width = 16;

    writeln!(out, "{}", separator)?;
    writeln!(out, "Comparison: {}", names.join(" vs "))?;
    writeln!(out, "{}", separator)?;

    write!(out, "{:<width$}", "Metric", width = metric_width)?;
    for name in &names {
        write!(out, " | {:<width$}", name, width = col_width)?;
    }
    writeln!(out, " | Winner")?;

    let total_width = metric_width + (col_width + 3) * names.len() + 10;
    writeln!(out, "{}", "-".repeat(total_width))?;

    let rows: [(&str, fn(&Score) -> f64); 3] = [
        ("MaxBLEU", |s| s.max_bleu),
        ("MDS", |s| s.mds),
        ("PDS", |s| s.pds),
    ];
    for (label, metric) in rows {
        let values: Vec<f64> = results.iter().map(|r| metric(&r.score)).collect();
        write!(out, "{:<width$}", label, width = metric_width)?;
        for v in &values {
            write!(out, " | {:<width$}", format!("{:.6}", v), width = col_width)?;
        }
        match find_winner(&values) {
            Some(idx) => writeln!(out, " | {}", names[idx])?,
            None => writeln!(out, " | -")?,
        }
    }

    writeln!(out, "{}", separator)?;
    Ok(())
}

pub fn print_comparison(results: &[EvaluationResult]) {
    if results.len() < 2 {
        if results.len() == 1 {
            println!("\n(Need at least 2 systems to show comparison)");
        }
        return;
    }
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout);
    if let Err(e) = write_comparison(&mut stdout, results) {
        warn!("Failed to print comparison: {}", e);
    }
}

/// Render one query: its reference clusters, then the hypotheses aligned to each
pub fn format_query_clusters<S: SentenceScorer>(
    aligner: &Aligner<S>,
    hypotheses: &HypothesisSet,
    group: &ReferenceGroup,
) -> MetricsResult<String> {
    let report = aligner.report_query(hypotheses, group)?;
    let grouped = report.alignment.group(hypotheses);

    let mut text = group.to_string();
    text.push_str("aligned hypotheses:\n");
    for (i, members) in grouped.iter().enumerate() {
        text.push_str(&format!("cluster-{}: {}\n", i, members.len()));
        for hypothesis in members {
            text.push_str(&format!("  {}\n", hypothesis));
        }
    }
    text.push_str(&format!("{}\n", report.score));
    Ok(text)
}

// ============================================================================
// Scenario Files
// ============================================================================

/// Substitute `${VAR}` references; every unset variable is reported at once
fn expand_env_vars(s: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;
    let mut missing_vars = Vec::new();

    let expanded = re.replace_all(s, |caps: &regex::Captures| match std::env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => {
            missing_vars.push(caps[1].to_string());
            String::new()
        }
    });

    if !missing_vars.is_empty() {
        return Err(anyhow!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        ));
    }

    Ok(expanded.into_owned())
}

/// Expand environment variables in every path of a scenario
pub fn expand_scenario_env_vars(mut scenario: Scenario) -> Result<Scenario> {
    scenario.reference_file = expand_env_vars(&scenario.reference_file)?;
    if let Some(path) = &scenario.query_file {
        scenario.query_file = Some(expand_env_vars(path)?);
    }
    for system in &mut scenario.systems {
        system.hypothesis_file = expand_env_vars(&system.hypothesis_file)?;
    }
    Ok(scenario)
}

pub fn load_scenario_from_file(path: &str) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {}", path))?;
    let scenario: Scenario = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse scenario file: {}", path))?;
    expand_scenario_env_vars(scenario)
}

/// Generate a timestamped output filename
pub fn generate_output_filename(scenario_name: &str, output_dir: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let safe_name = scenario_name.replace([' ', '/'], "_").to_lowercase();
    format!("{}/{}_{}.txt", output_dir, safe_name, timestamp)
}

/// Save evaluation results to a file
pub fn save_results_to_file(
    results: &[EvaluationResult],
    scenario_name: &str,
    output_path: &str,
) -> Result<()> {
    if let Some(parent) = std::path::Path::new(output_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::File::create(output_path)
        .with_context(|| format!("Failed to create results file: {}", output_path))?;

    writeln!(file, "# Diversity Evaluation: {}", scenario_name)?;
    writeln!(
        file,
        "# Generated: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(file, "#")?;
    writeln!(file)?;

    for result in results {
        write_result(&mut file, result)?;
        writeln!(file)?;
    }

    if results.len() > 1 {
        write_comparison(&mut file, results)?;
    }

    info!("Results saved to: {}", output_path);
    Ok(())
}
