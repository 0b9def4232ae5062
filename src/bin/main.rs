use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lsdscc::{
    format_query_clusters, generate_output_filename, load_corpus, load_scenario_from_file,
    print_comparison, print_result, run_evaluation, run_scenario, save_results_to_file,
    write_query_file, Aligner, ClusterOrdering, EvaluationConfig, LoaderConfig, ScorerConfig,
    Smoothing, DEFAULT_EOS,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lsdscc-metrics")]
#[command(about = "Diversity metrics (MaxBLEU, MDS, PDS) for multi-response generation")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Reference file: JSON object {query: {cluster_id: [reference, ...]}}
    #[arg(long, short, env = "LSDSCC_REFERENCE_FILE", global = true)]
    reference_file: Option<String>,

    /// Hypothesis file used when no subcommand is given
    #[arg(long = "hypothesis-file", env = "LSDSCC_HYPOTHESIS_FILE", global = true)]
    default_hypothesis_file: Option<String>,

    /// Query file pairing hypothesis lines with reference keys (positional pairing otherwise)
    #[arg(long, short, global = true)]
    query_file: Option<String>,

    /// Marker separating hypotheses on one line
    #[arg(long, default_value = DEFAULT_EOS, global = true)]
    eos: String,

    /// Highest n-gram order used by BLEU
    #[arg(long, default_value = "4", global = true)]
    max_order: usize,

    /// Smoothing for zero n-gram precisions
    #[arg(long, value_enum, global = true)]
    smoothing: Option<SmoothingArg>,

    /// Score without the brevity penalty (defaults smoothing to add-one-all)
    #[arg(long, global = true)]
    no_brevity_penalty: bool,

    /// Reject cluster ids that are not integers
    #[arg(long, global = true)]
    strict_cluster_ids: bool,

    /// Drop empty hypothesis segments instead of scoring them as 0
    #[arg(long, global = true)]
    drop_empty: bool,

    /// Score queries one at a time instead of on the thread pool
    #[arg(long, global = true)]
    sequential: bool,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate one hypothesis file (default behavior)
    Run {
        /// One line per query, hypotheses separated by the eos marker
        hypothesis_file: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare several systems from a YAML scenario file
    Scenario {
        /// Path to the YAML scenario file
        #[arg(required = true)]
        file: String,

        /// Output directory for results (default: ./output)
        #[arg(long, short, default_value = "output")]
        output_dir: String,

        /// Skip saving results to file
        #[arg(long)]
        no_save: bool,
    },
    /// Write the reference file's query keys, one per line, in file order
    Queries {
        /// Output path for the query file
        output: String,
    },
    /// Show one query's clusters and the hypotheses aligned to each
    Clusters {
        hypothesis_file: String,

        /// Zero-based query index
        #[arg(long, short, default_value = "0")]
        index: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SmoothingArg {
    None,
    Epsilon,
    AddOne,
    AddOneAll,
    Nist,
    ChenCherry,
}

impl From<SmoothingArg> for Smoothing {
    fn from(arg: SmoothingArg) -> Self {
        match arg {
            SmoothingArg::None => Smoothing::None,
            SmoothingArg::Epsilon => Smoothing::Epsilon,
            SmoothingArg::AddOne => Smoothing::AddOne,
            SmoothingArg::AddOneAll => Smoothing::AddOneAll,
            SmoothingArg::Nist => Smoothing::Nist,
            SmoothingArg::ChenCherry => Smoothing::ChenCherry,
        }
    }
}

impl Args {
    fn reference_file(&self) -> Result<String> {
        self.reference_file
            .clone()
            .ok_or_else(|| anyhow!("--reference-file is required"))
    }

    fn loader(&self) -> LoaderConfig {
        LoaderConfig {
            eos: self.eos.clone(),
            cluster_ordering: if self.strict_cluster_ids {
                ClusterOrdering::StrictNumeric
            } else {
                ClusterOrdering::NumericThenLexical
            },
            drop_empty_hypotheses: self.drop_empty,
        }
    }

    fn scorer(&self) -> ScorerConfig {
        let mut config = if self.no_brevity_penalty {
            ScorerConfig::bleu_without_bp(self.max_order)
        } else {
            ScorerConfig {
                max_order: self.max_order,
                ..ScorerConfig::multi_bleu()
            }
        };
        if let Some(smoothing) = self.smoothing {
            config.smoothing = smoothing.into();
        }
        config
    }

    fn evaluation(&self, hypothesis_file: String) -> Result<EvaluationConfig> {
        Ok(EvaluationConfig {
            name: None,
            hypothesis_file,
            reference_file: self.reference_file()?,
            query_file: self.query_file.clone(),
            loader: self.loader(),
            scorer: self.scorer(),
            parallel: !self.sequential,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if args.verbose {
            "debug".to_string()
        } else {
            "warn".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(&filter)
        .with_writer(std::io::stderr)
        .init();

    match &args.command {
        Some(Commands::Scenario {
            file,
            output_dir,
            no_save,
        }) => run_scenario_command(file, output_dir, *no_save).await,
        Some(Commands::Queries { output }) => {
            let count = write_query_file(&args.reference_file()?, output, &args.loader()).await?;
            println!("Wrote {} queries to {}", count, output);
            Ok(())
        }
        Some(Commands::Clusters {
            hypothesis_file,
            index,
        }) => show_clusters(&args, hypothesis_file, *index).await,
        Some(Commands::Run {
            hypothesis_file,
            json,
        }) => {
            let file = hypothesis_file
                .clone()
                .or_else(|| args.default_hypothesis_file.clone());
            run_single_evaluation(&args, file, *json).await
        }
        None => run_single_evaluation(&args, args.default_hypothesis_file.clone(), false).await,
    }
}

async fn run_scenario_command(file: &str, output_dir: &str, no_save: bool) -> Result<()> {
    info!("Loading scenario from: {}", file);
    let scenario = load_scenario_from_file(file)?;

    let results = run_scenario(&scenario).await?;

    for result in &results {
        print_result(result);
    }

    if results.len() > 1 {
        print_comparison(&results);
    }

    if !no_save {
        let output_path = generate_output_filename(&scenario.name, output_dir);
        save_results_to_file(&results, &scenario.name, &output_path)?;
    }

    Ok(())
}

async fn run_single_evaluation(args: &Args, hypothesis_file: Option<String>, json: bool) -> Result<()> {
    let hypothesis_file =
        hypothesis_file.ok_or_else(|| anyhow!("a hypothesis file is required (run <FILE>)"))?;
    let config = args.evaluation(hypothesis_file)?;

    info!(
        "Evaluating {} against {} (max order {}, smoothing {:?}, brevity penalty {})",
        config.hypothesis_file,
        config.reference_file,
        config.scorer.max_order,
        config.scorer.smoothing,
        config.scorer.brevity_penalty
    );

    let result = run_evaluation(&config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    Ok(())
}

async fn show_clusters(args: &Args, hypothesis_file: &str, index: usize) -> Result<()> {
    let config = args.evaluation(hypothesis_file.to_string())?;
    let corpus = load_corpus(&config).await?;

    let (hypotheses, group) = corpus
        .hypotheses()
        .get(index)
        .zip(corpus.references().get(index))
        .ok_or_else(|| {
            anyhow!(
                "query index {} out of range ({} hypothesis sets, {} reference groups)",
                index,
                corpus.hypotheses().len(),
                corpus.references().len()
            )
        })?;

    let aligner = Aligner::new(config.scorer.build()?);
    print!("{}", format_query_clusters(&aligner, hypotheses, group)?);
    Ok(())
}
