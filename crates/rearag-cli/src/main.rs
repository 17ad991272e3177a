//! rearag - retrieval-augmented reasoning agent CLI

mod config;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rearag_agent::{Agent, RagClient};
use rearag_ai::{HttpGenerator, HttpRetriever, PromptSet};
use rearag_data::store::load_questions;
use rearag_data::{BatchBuilder, TraceConstructor, clean_traces};

use crate::config::Config;

/// rearag - retrieval-augmented reasoning agent
#[derive(Parser, Debug)]
#[command(name = "rearag")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: $REARAG_CONFIG_PATH, ./rearag.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a question with the reasoning agent
    Infer {
        question: String,
        /// Print the reasoning chain as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Construct reasoning traces for a question set
    Build {
        /// Input glob patterns, replacing `build.input_files`
        #[arg(short, long)]
        input: Vec<String>,
        /// Output JSONL file
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        n_sample: Option<usize>,
        #[arg(long)]
        num_workers: Option<usize>,
    },
    /// Validate constructed traces and keep the valid ones
    Clean {
        /// Trace JSONL file
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Directory for the clean and validity files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Query the retriever
    Search {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Send a single user prompt to the answer generation endpoint
    Generate { prompt: String },
    /// Write an example config file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("rearag=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rearag=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = Config::config_path(args.config.as_deref());
    let mut config = Config::load(&config_path)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, stopping...");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Command::Infer { question, json } => infer(&config, &question, json, cancel).await,
        Command::Build {
            input,
            output,
            n_sample,
            num_workers,
        } => {
            if !input.is_empty() {
                config.build.input_files = input;
            }
            if let Some(output) = output {
                config.build.output_dir = output.parent().map(PathBuf::from).unwrap_or_default();
                config.build.output_file = output
                    .file_name()
                    .context("--output must name a file")?
                    .to_string_lossy()
                    .into_owned();
            }
            if let Some(n) = n_sample {
                config.build.n_sample = n;
            }
            if let Some(n) = num_workers {
                config.build.num_workers = n;
            }
            build(&config, cancel).await
        }
        Command::Clean { input, output_dir } => {
            let input = input.unwrap_or_else(|| config.clean.input_path());
            if let Some(dir) = output_dir {
                config.clean.output_dir = dir;
            }
            clean(&config, &input)
        }
        Command::Search { query, top_k } => {
            if let Some(k) = top_k {
                config.rag.top_k = k;
            }
            search(&config, &query).await
        }
        Command::Generate { prompt } => generate(&config, &prompt).await,
        Command::InitConfig => init_config(&config_path),
    }
}

fn init_config(path: &Path) -> Result<()> {
    if Config::init(path)? {
        println!("Created config file at: {}", path.display());
    } else {
        println!("Config file already exists at: {}", path.display());
    }
    Ok(())
}

fn rag_client(config: &Config, prompts: Arc<PromptSet>) -> Result<Arc<RagClient>> {
    let endpoints = &config.endpoints;
    let generator = HttpGenerator::new(endpoints.generation_api.as_str(), endpoints.generation_timeout())
        .context("creating answer generation client")?;
    let retriever = HttpRetriever::new(endpoints.retriever_api.as_str(), endpoints.retrieval_timeout())
        .context("creating retriever client")?;
    Ok(Arc::new(RagClient::new(
        Arc::new(generator),
        Arc::new(retriever),
        config.rag.template.build(),
        prompts,
        config.rag.to_rag_config(),
    )))
}

async fn infer(config: &Config, question: &str, json: bool, cancel: CancellationToken) -> Result<()> {
    let prompts = Arc::new(config.prompts.prompt_set()?);
    let rag = rag_client(config, prompts)?;
    let endpoints = &config.endpoints;
    let model = HttpGenerator::new(endpoints.agent_api.as_str(), endpoints.generation_timeout())
        .context("creating agent model client")?;

    let mut agent = Agent::new(
        config.agent.to_agent_config(),
        Arc::new(model),
        config.agent.template.build(),
        rag,
    )
    .with_cancel_token(cancel);

    let handle = (!json).then(|| {
        let mut receiver = agent.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                if let Some(line) = utils::event_line(&event) {
                    println!("{line}");
                }
                if event.is_terminal() {
                    break;
                }
            }
        })
    });

    let outcome = agent.run(question).await;
    if let Some(handle) = handle {
        let _ = handle.await;
    }

    if json {
        let chain = agent.state().map(|s| s.reasoning_chain()).unwrap_or_default();
        println!("{}", serde_json::to_string_pretty(chain)?);
    }

    match outcome.answer {
        Some(answer) => {
            println!("\nFinal answer:\n{}", answer.trim());
            Ok(())
        }
        None => bail!(
            "no answer: {} after {} iterations and {} retries",
            utils::stop_reason_str(outcome.stop_reason),
            outcome.iterations,
            outcome.retries
        ),
    }
}

async fn build(config: &Config, cancel: CancellationToken) -> Result<()> {
    let build = &config.build;
    let questions =
        load_questions(&build.input_files, build.n_sample).context("loading input questions")?;
    if questions.is_empty() {
        bail!("no questions found in {:?}", build.input_files);
    }

    let prompts = Arc::new(config.prompts.prompt_set()?);
    let rag = rag_client(config, prompts)?;
    let model = HttpGenerator::new(build.llm_api(&config.endpoints), config.endpoints.generation_timeout())
        .context("creating construction model client")?;
    let constructor = TraceConstructor::new(
        Arc::new(model),
        build.template.build(),
        rag,
        build.to_construction_config(),
    );

    let builder = BatchBuilder::new(constructor, build.to_build_config()).with_cancel_token(cancel);
    let report = builder.run(questions).await.context("building traces")?;
    println!(
        "Built {} traces ({} with a conversation, {} skipped) into {}",
        report.persisted,
        report.with_conversation,
        report.skipped,
        build.output_path().display()
    );
    Ok(())
}

fn clean(config: &Config, input: &Path) -> Result<()> {
    let clean = &config.clean;
    let summary = clean_traces(input, &clean.validity_path(), &clean.clean_path())
        .with_context(|| format!("cleaning {}", input.display()))?;
    println!(
        "{} of {} traces valid ({} rejected)",
        summary.valid, summary.total, summary.invalid
    );
    println!("  clean:    {}", clean.clean_path().display());
    println!("  validity: {}", clean.validity_path().display());
    Ok(())
}

async fn search(config: &Config, query: &str) -> Result<()> {
    let rag = rag_client(config, Arc::new(PromptSet::default()))?;
    let docs = rag.search(query).await.context("searching")?;
    for (i, doc) in docs.iter().enumerate() {
        println!("Document {}:\n{}\n", i + 1, doc.contents);
    }
    Ok(())
}

async fn generate(config: &Config, prompt: &str) -> Result<()> {
    let rag = rag_client(config, Arc::new(PromptSet::default()))?;
    let text = rag.generate(prompt).await.context("generating")?;
    println!("{}", text.trim());
    Ok(())
}
