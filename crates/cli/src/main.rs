use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use extract::{
    ExtractionStore, Extractor, GenerationPort, OllamaClient, OpenAiClient, ParsedReview,
    RecordParser, RetryPolicy, RetryingGenerator,
};
use graph::{GraphMerger, GraphStore, MemoryGraphStore, Neo4jStore};
use ingest::{DatasetReader, JsonlLog};
use summarize::{ReduceScheduler, SummaryMode};

mod config;

use config::{Backend, ModelConfig, PipelineConfig};

/// Review opinion graph and aspect summary pipeline
#[derive(Parser, Debug)]
#[command(name = "reviewgraph")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "REVIEWGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "graph=debug". RUST_LOG takes precedence
    #[arg(long, global = true, env = "REVIEWGRAPH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Dataset schema: space or amasum
    #[arg(long, global = true)]
    dataset: Option<String>,

    #[arg(long, global = true, env = "REVIEWGRAPH_MODEL")]
    model_name: Option<String>,

    /// Isolation key of the graph
    #[arg(long, global = true)]
    exp_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate raw opinion extractions for every review of a dataset
    Extract {
        /// Dataset file
        #[arg(long)]
        input_path: PathBuf,
        /// Extraction log, appended to and resumed from
        #[arg(long)]
        output_path: PathBuf,
        #[arg(long)]
        save_every: Option<usize>,
    },
    /// Parse an extraction log into opinion tuples
    Parse {
        /// Extraction log
        #[arg(long)]
        input_path: PathBuf,
        /// Parsed review log, overwritten
        #[arg(long)]
        output_path: PathBuf,
    },
    /// Merge parsed reviews into the graph
    Merge {
        /// Parsed review log
        #[arg(long)]
        input_path: PathBuf,
        #[arg(long)]
        workers: Option<usize>,
        /// Merge into an in-memory graph instead of Neo4j
        #[arg(long)]
        dry_run: bool,
    },
    /// Summarize every entity per aspect
    Summarize {
        /// Dataset file
        #[arg(long)]
        input_path: PathBuf,
        /// Summary log, appended to and resumed from
        #[arg(long)]
        output_path: PathBuf,
        /// zeroshot, fewshot or cot
        #[arg(long)]
        mode: Option<SummaryMode>,
        /// Reduce reviews in groups of this size instead of one call over all reviews
        #[arg(long)]
        group_size: Option<usize>,
        #[arg(long)]
        save_every: Option<usize>,
        #[arg(long)]
        max_reviews: Option<usize>,
    },
}

impl Cli {
    /// Layer command-line flags over the file configuration.
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(file) = &self.log_file {
            config.log_file = Some(file.clone());
        }
        if let Some(dataset) = &self.dataset {
            config.dataset = dataset.clone();
        }
        if let Some(model) = &self.model_name {
            config.model.name = model.clone();
        }
        if let Some(exp_name) = &self.exp_name {
            config.exp_name = exp_name.clone();
        }

        match &self.command {
            Command::Extract { save_every, .. } => {
                if let Some(n) = save_every {
                    config.extraction.save_every = *n;
                }
            }
            Command::Merge { workers, .. } => {
                if let Some(n) = workers {
                    config.merge.workers = *n;
                }
            }
            Command::Summarize {
                mode,
                group_size,
                save_every,
                max_reviews,
                ..
            } => {
                if let Some(mode) = mode {
                    config.summarization.mode = *mode;
                }
                if group_size.is_some() {
                    config.summarization.group_size = *group_size;
                }
                if let Some(n) = save_every {
                    config.summarization.save_every = *n;
                }
                if max_reviews.is_some() {
                    config.summarization.max_reviews = *max_reviews;
                }
            }
            Command::Parse { .. } => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    let schema = config.validate()?;

    init_logging(&config.log_level, config.log_file.as_deref())?;
    info!(dataset = %schema.name, exp_name = %config.exp_name, model = %config.model.name, "Starting");

    match cli.command {
        Command::Extract {
            input_path,
            output_path,
            ..
        } => {
            let reviews = ingest::ingest_reviews(&input_path, &schema).await?;
            info!(reviews = reviews.len(), "Loaded reviews");

            let extractor = Extractor::new(
                build_generator(&config.model),
                schema.format,
                config.extraction.sampling.clone(),
            );
            let store = ExtractionStore::new(output_path);
            let report = extractor
                .run(&reviews, &store, config.extraction.save_every)
                .await?;
            print_report(&report)?;
        }

        Command::Parse {
            input_path,
            output_path,
        } => {
            let records = ExtractionStore::new(input_path).read_all().await?;
            let parser = RecordParser::new(&schema)?;
            let (parsed, stats) = parser.parse_records(&records);

            JsonlLog::new(&output_path)
                .write_all(&parsed)
                .await
                .context("Failed to write parsed reviews")?;

            info!(
                records = stats.records,
                tuples = stats.tuples,
                invalid_blocks = stats.rejected_total(),
                mismatched_blocks = stats.mismatched,
                empty_reviews = stats.empty_records,
                path = %output_path.display(),
                "Parsing finished"
            );
            print_report(&stats)?;
        }

        Command::Merge {
            input_path,
            dry_run,
            ..
        } => {
            let parsed: Vec<ParsedReview> = JsonlLog::new(&input_path).read_all().await?;
            let entities = graph::group_by_entity(parsed);
            info!(entities = entities.len(), "Loaded parsed reviews");

            let store: Arc<dyn GraphStore> = if dry_run {
                info!("Dry run, merging into an in-memory graph");
                Arc::new(MemoryGraphStore::new())
            } else {
                let neo4j = Neo4jStore::connect(
                    &config.neo4j.uri,
                    &config.neo4j.user,
                    &config.neo4j.password,
                )
                .await?;
                neo4j.init_schema().await?;
                Arc::new(neo4j)
            };

            let merger = Arc::new(
                GraphMerger::new(Arc::clone(&store), schema, config.exp_name.clone())
                    .with_workers(config.merge.workers),
            );
            let report = merger.run(entities).await?;

            let stats = store.stats(&config.exp_name).await?;
            info!(
                entities = stats.entities,
                aspects = stats.aspects,
                features = stats.features,
                opinions = stats.opinions,
                "Graph stats"
            );
            print_report(&report)?;
        }

        Command::Summarize {
            input_path,
            output_path,
            ..
        } => {
            let entities = DatasetReader::read_entities(&input_path, schema.format).await?;
            let scheduler =
                ReduceScheduler::new(build_generator(&config.model), config.summarization.job())?;
            let report = scheduler
                .run(&entities, &schema, &JsonlLog::new(output_path))
                .await?;
            print_report(&report)?;
        }
    }

    Ok(())
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(format!("Failed to open log file: {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn build_generator(model: &ModelConfig) -> Arc<dyn GenerationPort> {
    let policy = RetryPolicy::new(model.max_retries, Duration::from_secs(model.retry_wait_secs));
    let timeout = Duration::from_secs(model.request_timeout_secs);

    match model.backend() {
        Backend::Ollama => {
            let backend = OllamaClient::new(model.base_url(), model.name.clone());
            Arc::new(RetryingGenerator::new(backend, policy, timeout))
        }
        Backend::OpenAi => {
            let api_key = model
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            let backend = OpenAiClient::new(model.base_url(), model.name.clone(), api_key);
            Arc::new(RetryingGenerator::new(backend, policy, timeout))
        }
    }
}

fn print_report<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
