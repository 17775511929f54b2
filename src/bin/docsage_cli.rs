//! Command-line entrypoint for one-off runs of each workflow.
//!
//! `analyze` and `compare` print the pipeline result as JSON. `chat` indexes the given documents
//! and answers questions read line by line from stdin until EOF or `exit`.
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docsage::service::{AnalysisRequest, ComparisonRequest, DocumentService, PipelineApi};
use docsage::{config, logging, prompts::PromptRegistry};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "docsage-cli", about = "Run docsage pipelines from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize documents and extract keywords.
    Analyze {
        /// Files or directories to analyze.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Compare document set A with document set B.
    Compare {
        /// Files or directories in set A.
        #[arg(long = "a", required = true, num_args = 1..)]
        paths_a: Vec<PathBuf>,
        /// Files or directories in set B.
        #[arg(long = "b", required = true, num_args = 1..)]
        paths_b: Vec<PathBuf>,
        /// `holistic_compare` or `compare_docs`.
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Ask questions about documents interactively.
    Chat {
        /// Files or directories to index; the configured chat directory when omitted.
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::init_config().context("failed to load settings")?;
    logging::init_tracing(&settings, "docsage-cli");
    let prompts = Arc::new(PromptRegistry::from_env().context("failed to load prompt catalog")?);
    let service = DocumentService::new(settings, prompts).context("failed to build service")?;

    match cli.command {
        Command::Analyze { paths } => {
            let outcome = service
                .run_analysis(AnalysisRequest {
                    paths,
                    session_id: None,
                })
                .await
                .context("analysis failed")?;
            print_json(&outcome)
        }
        Command::Compare {
            paths_a,
            paths_b,
            strategy,
        } => {
            let outcome = service
                .run_comparison(ComparisonRequest {
                    paths_a,
                    paths_b,
                    strategy,
                    session_id: None,
                })
                .await
                .context("comparison failed")?;
            print_json(&outcome)
        }
        Command::Chat { paths } => chat(&service, paths).await,
    }
}

async fn chat(service: &DocumentService, paths: Vec<PathBuf>) -> Result<()> {
    let session = service
        .start_chat(paths)
        .await
        .context("failed to start chat session")?;
    if session.documents_indexed == 0 {
        bail!("no documents were indexed; pass files or directories to chat about");
    }
    eprintln!(
        "Indexed {} chunks. Ask a question, or type 'exit' to quit.",
        session.documents_indexed
    );

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        let response = service.query(&session.session_id, question).await?;
        stdout
            .write_all(format!("{}\n\n", response.answer).as_bytes())
            .await?;
    }

    service.end_chat(&session.session_id).await?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to encode result")?;
    println!("{rendered}");
    Ok(())
}
