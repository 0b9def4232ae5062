use lsdscc::{
    load_scenario_from_file, run_evaluation, run_scenario, save_results_to_file, Aligner,
    ClusterOrdering, CorpusAggregator, ErrorKind, EvaluationConfig, HypothesisSet, LoaderConfig,
    MetricsError, ReferenceGroup, ScorerConfig, Sentence,
};

const REFERENCES: &str = "tests/data/reference.json";

fn config(hypothesis_file: &str) -> EvaluationConfig {
    EvaluationConfig {
        name: None,
        hypothesis_file: hypothesis_file.to_string(),
        reference_file: REFERENCES.to_string(),
        query_file: None,
        loader: LoaderConfig::default(),
        scorer: ScorerConfig::default(),
        parallel: true,
    }
}

fn metrics_error(err: &anyhow::Error) -> &MetricsError {
    err.downcast_ref::<MetricsError>()
        .expect("error should carry a MetricsError")
}

/// Positional pairing over the fixture corpus
#[tokio::test]
async fn test_positional_evaluation() {
    let result = run_evaluation(&config("tests/data/hypothesis.txt"))
        .await
        .expect("evaluation should succeed");

    assert_eq!(result.n_queries, 3);
    assert_eq!(result.n_hypotheses, 5);
    assert_eq!(result.n_clusters, 7);
    assert_eq!(result.n_references, 11);
    assert_eq!(result.per_query.len(), 3);

    // every cluster of "do you agree" is hit
    assert_eq!(result.per_query[0].mds, 1.0);
    assert_eq!(result.per_query[0].pds, 1.0);
    // two of three single-reference clusters; the "null" cluster sorts last and is missed
    assert!((result.per_query[1].mds - 2.0 / 3.0).abs() < 1e-12);
    assert!((result.per_query[1].pds - 2.0 / 3.0).abs() < 1e-12);
    // cluster "2" comes before cluster "10" and holds the exact hypothesis
    assert_eq!(result.per_query[2].mds, 0.5);
    assert!((result.per_query[2].pds - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(result.per_query[2].max_bleu, 1.0);

    let expected_mds = (1.0 + 2.0 / 3.0 + 0.5) / 3.0;
    let expected_pds = (1.0 + 2.0 / 3.0 + 2.0 / 3.0) / 3.0;
    assert!((result.score.mds - expected_mds).abs() < 1e-12);
    assert!((result.score.pds - expected_pds).abs() < 1e-12);
    assert!(result.score.max_bleu > 0.0 && result.score.max_bleu <= 1.0);
}

/// Query-keyed pairing must give the same numbers as positional pairing
#[tokio::test]
async fn test_keyed_matches_positional() {
    let positional = run_evaluation(&config("tests/data/hypothesis.txt"))
        .await
        .unwrap();

    let mut keyed = config("tests/data/hypothesis_keyed.txt");
    keyed.query_file = Some("tests/data/query.txt".to_string());
    let keyed = run_evaluation(&keyed).await.expect("keyed evaluation should succeed");

    assert_eq!(keyed.per_query.len(), 3);
    assert_eq!(keyed.per_query[0], positional.per_query[2]);
    assert_eq!(keyed.per_query[1], positional.per_query[0]);
    assert_eq!(keyed.per_query[2], positional.per_query[1]);
    assert!((keyed.score.mds - positional.score.mds).abs() < 1e-12);
    assert!((keyed.score.pds - positional.score.pds).abs() < 1e-12);
    assert!((keyed.score.max_bleu - positional.score.max_bleu).abs() < 1e-12);
}

#[tokio::test]
async fn test_sequential_matches_parallel() {
    let parallel = run_evaluation(&config("tests/data/hypothesis.txt"))
        .await
        .unwrap();
    let mut sequential = config("tests/data/hypothesis.txt");
    sequential.parallel = false;
    let sequential = run_evaluation(&sequential).await.unwrap();

    assert_eq!(parallel.score, sequential.score);
    assert_eq!(parallel.per_query, sequential.per_query);
}

#[tokio::test]
async fn test_empty_segments_scored_or_dropped() {
    let base = run_evaluation(&config("tests/data/hypothesis.txt"))
        .await
        .unwrap();

    let kept = run_evaluation(&config("tests/data/hypothesis_trailing.txt"))
        .await
        .unwrap();
    assert_eq!(kept.n_hypotheses, 8);
    // empty segments land in cluster 0, which is already covered
    assert_eq!(kept.score.mds, base.score.mds);
    assert!(kept.score.max_bleu < base.score.max_bleu);

    let mut dropped = config("tests/data/hypothesis_trailing.txt");
    dropped.loader.drop_empty_hypotheses = true;
    let dropped = run_evaluation(&dropped).await.unwrap();
    assert_eq!(dropped.n_hypotheses, 5);
    assert_eq!(dropped.score, base.score);
}

#[tokio::test]
async fn test_strict_cluster_ids_reject_null() {
    let mut strict = config("tests/data/hypothesis.txt");
    strict.loader.cluster_ordering = ClusterOrdering::StrictNumeric;
    let err = run_evaluation(&strict).await.unwrap_err();
    assert_eq!(metrics_error(&err).kind(), ErrorKind::MalformedInput);
}

#[tokio::test]
async fn test_length_mismatch_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.txt");
    std::fs::write(&path, "i agree </s> no way\n").unwrap();

    let err = run_evaluation(&config(path.to_str().unwrap()))
        .await
        .unwrap_err();
    let metrics = metrics_error(&err);
    assert_eq!(metrics.kind(), ErrorKind::LengthMismatch);
    assert_eq!(metrics.query_index(), None);
}

#[tokio::test]
async fn test_empty_query_names_offending_index() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.txt");
    std::fs::write(&path, "i agree\n</s>\nit is free software\n").unwrap();

    let mut cfg = config(path.to_str().unwrap());
    cfg.loader.drop_empty_hypotheses = true;
    let err = run_evaluation(&cfg).await.unwrap_err();
    let metrics = metrics_error(&err);
    assert_eq!(metrics.kind(), ErrorKind::EmptyCollection);
    assert_eq!(metrics.query_index(), Some(1));
    assert!(err.to_string().contains("what should we do tonight"));
}

#[tokio::test]
async fn test_scenario_comparison() {
    let scenario = load_scenario_from_file("tests/data/scenario.yaml").expect("scenario should parse");
    assert_eq!(scenario.systems.len(), 2);
    assert!(!scenario.parallel);

    let results = run_scenario(&scenario).await.expect("scenario should run");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].name.as_deref(), Some("diverse"));
    assert!(results[0].score.mds > results[1].score.mds);
    assert!(results[0].score.pds > results[1].score.pds);

    // repetitive: 1/2, 1/3 and 1/2 of the clusters
    let expected = (0.5 + 1.0 / 3.0 + 0.5) / 3.0;
    assert!((results[1].score.mds - expected).abs() < 1e-12);

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("nested").join("report.txt");
    save_results_to_file(&results, &scenario.name, output.to_str().unwrap()).unwrap();
    let report = std::fs::read_to_string(&output).unwrap();
    assert!(report.starts_with("# Diversity Evaluation: Fixture Comparison"));
    assert!(report.contains("Comparison: diverse vs repetitive"));
    let mds_row = report.lines().find(|l| l.starts_with("MDS")).unwrap();
    assert!(mds_row.ends_with("| diverse"));
}

#[tokio::test]
async fn test_scenario_env_expansion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.yaml");
    std::fs::write(
        &path,
        "name: env\nreference_file: ${LSDSCC_IT_DATA}/reference.json\nsystems:\n  - name: a\n    hypothesis_file: ${LSDSCC_IT_DATA}/hypothesis.txt\n",
    )
    .unwrap();

    std::env::set_var("LSDSCC_IT_DATA", "tests/data");
    let scenario = load_scenario_from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(scenario.reference_file, "tests/data/reference.json");
    assert_eq!(scenario.systems[0].hypothesis_file, "tests/data/hypothesis.txt");
    assert!(scenario.parallel);

    let results = run_scenario(&scenario).await.unwrap();
    assert_eq!(results.len(), 1);
}

/// End-to-end use of the engine without files
#[test]
fn test_library_api_end_to_end() {
    let group = ReferenceGroup::from_sentences(vec![
        vec![Sentence::from("totally agree")],
        vec![Sentence::from("go and watch the new series")],
    ])
    .unwrap();
    let hyps = HypothesisSet::from_line("i agree </s> go and watch star war", "</s>").unwrap();

    let aligner: Aligner = Aligner::default();
    let single = aligner.score_query(&hyps, &group).unwrap();
    assert_eq!(single.mds, 1.0);
    assert_eq!(single.pds, 1.0);

    let aggregator: CorpusAggregator = CorpusAggregator::default();
    let corpus = aggregator.compute(&[hyps], &[group]).unwrap();
    assert_eq!(corpus.score, single);
}
