use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use kgqa_signatures::dataset::{self, DatasetRecord, FixedAnswers, FixedLinks};
use kgqa_signatures::evaluation::Evaluator;
use kgqa_signatures::graph::edge_list::triples_to_edge_list;
use kgqa_signatures::{logging, BackendConfig, Error, GraphService, Result, Settings, SignatureEngine};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer every question of a dataset and report precision
    Evaluate {
        #[arg(long, value_enum, default_value_t = DatasetKind::Debug)]
        dataset: DatasetKind,

        /// Dataset file (required unless --dataset debug)
        #[arg(long)]
        input: Option<PathBuf>,

        /// JSON-lines file with model answers, paired line by line with the dataset
        #[arg(long)]
        predictions: Option<PathBuf>,

        /// Use an in-memory graph from this edge list (overrides config file)
        #[arg(long, env = "KGQA_EDGE_LIST")]
        edge_list: Option<PathBuf>,

        /// Concurrent candidate fetches (overrides config file)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Convert `subject property object` numeric triples to an LGL edge list
    TriplesToLgl {
        input: PathBuf,
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DatasetKind {
    Debug,
    SimpleQuestions,
    Mintaka,
    Mkqa,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    match args.command {
        Command::Evaluate { dataset, input, predictions, edge_list, workers } => {
            // Load configuration
            let mut settings = match &args.config {
                Some(path) => Settings::load(path)?,
                None => Settings::load_or_default()?,
            };
            settings.apply_env()?;

            // Apply CLI overrides
            if let Some(edge_list) = edge_list {
                settings.backend = BackendConfig::Local { edge_list };
            }
            if let Some(workers) = workers {
                settings.aggregation.workers = workers;
            }

            let records = load_records(dataset, input, predictions)?;
            let engine = SignatureEngine::<dyn GraphService>::from_settings(&settings).await?;

            // the debug questions carry their own predictions; these only
            // matter for records that lack them
            let debug = dataset::debug_records().swap_remove(0);
            let evaluator = Evaluator::new(&engine)
                .with_answer_generator(FixedAnswers(debug.predicted_answers.unwrap_or_default()))
                .with_entity_linker(FixedLinks {
                    question: debug.question_entity,
                    answers: debug.predicted_answer_entities.unwrap_or_default(),
                });

            let report = evaluator.evaluate(records).await;
            engine.shutdown().await?;
            let report = report?;

            println!(
                "Precision: {:.4} ({} correct of {}, {} skipped)",
                report.precision(),
                report.correct,
                report.evaluated,
                report.skipped
            );
        }
        Command::TriplesToLgl { input, output } => {
            let reader = BufReader::new(File::open(&input)?);
            let mut writer = BufWriter::new(File::create(&output)?);
            let stats = triples_to_edge_list(reader, &mut writer)?;
            writer.flush()?;
            println!("{} triples -> {} nodes, {} edges", stats.triples, stats.nodes, stats.edges);
        }
    }

    Ok(())
}

fn load_records(
    kind: DatasetKind,
    input: Option<PathBuf>,
    predictions: Option<PathBuf>,
) -> Result<Vec<DatasetRecord>> {
    let predictions = predictions.map(|path| dataset::load_llm_results(path)).transpose()?;
    let predictions = predictions.as_deref();
    let require = |input: Option<PathBuf>| {
        input.ok_or_else(|| Error::Config(format!("--input is required for --dataset {kind:?}")))
    };

    match kind {
        DatasetKind::Debug => Ok(dataset::debug_records()),
        DatasetKind::SimpleQuestions => dataset::load_simple_questions(require(input)?, predictions),
        DatasetKind::Mintaka => dataset::load_mintaka(require(input)?, predictions),
        DatasetKind::Mkqa => dataset::load_mkqa(require(input)?, predictions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_evaluate_mkqa_args() {
        let args = Args::try_parse_from([
            "kgqa-signatures",
            "evaluate",
            "--dataset",
            "mkqa",
            "--input",
            "mkqa.jsonl",
            "--edge-list",
            "wikidata_lgl.txt",
        ])
        .unwrap();
        let Command::Evaluate { dataset, input, edge_list, .. } = args.command else {
            panic!("expected evaluate");
        };
        assert!(matches!(dataset, DatasetKind::Mkqa));
        assert_eq!(input, Some(PathBuf::from("mkqa.jsonl")));
        assert_eq!(edge_list, Some(PathBuf::from("wikidata_lgl.txt")));
    }

    #[test]
    fn test_file_datasets_require_input() {
        let err = load_records(DatasetKind::Mkqa, None, None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
