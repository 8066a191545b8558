//! `sentinel`: ingest documents and ask guarded questions from the terminal.
//!
//! ```text
//! sentinel ingest handbook.md policies.txt
//! sentinel ask "How many vacation days do I get?" --with handbook.md --stream
//! sentinel delete 3f2b...
//! ```
//!
//! With the default in-memory vector store nothing survives the process, so
//! `ask --with` ingests the given files first. Files are identified by their
//! canonical path: ingesting a file again replaces its earlier chunks.

mod logging;
mod settings;

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sentinel_rag::{
    AnswerEvent, IngestionPipeline, MetadataFilter, ProviderSet, Query, RunStatus, SourceRef,
    load_document,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::settings::{DEFAULT_CONFIG_FILE, Settings};

#[derive(Parser, Debug)]
#[command(name = "sentinel", version, about = "Guarded retrieval-augmented question answering")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed and store documents.
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Answer a question from the stored documents.
    Ask {
        question: String,
        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
        /// Candidates to retrieve before reranking.
        #[arg(long)]
        top_k: Option<usize>,
        /// Ingest these files before asking.
        #[arg(long = "with", value_name = "FILE")]
        with_files: Vec<PathBuf>,
        /// Only search chunks from this file name.
        #[arg(long)]
        filename: Option<String>,
    },
    /// Remove a document's chunks from the store.
    Delete { document_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = settings::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    settings.log.json |= cli.json_logs;
    logging::init(&settings.log)?;

    let providers = ProviderSet::connect(&settings.providers, &settings.rag).await?;
    match cli.command {
        Command::Ingest { files } => {
            let pipeline = providers.ingestion_pipeline(settings.rag.clone())?;
            ingest_files(&pipeline, &files, settings.rag.max_document_bytes).await
        }
        Command::Ask { question, stream, top_k, with_files, filename } => {
            if !with_files.is_empty() {
                let pipeline = providers.ingestion_pipeline(settings.rag.clone())?;
                ingest_files(&pipeline, &with_files, settings.rag.max_document_bytes).await?;
            }
            let mut query = Query::new(question);
            if let Some(top_k) = top_k {
                query = query.with_top_k(top_k);
            }
            if let Some(filename) = filename {
                query = query.with_filter(MetadataFilter::new().eq("filename", filename));
            }
            if stream {
                ask_streaming(&providers, &settings, query).await
            } else {
                ask(&providers, &settings, query).await
            }
        }
        Command::Delete { document_id } => {
            let pipeline = providers.ingestion_pipeline(settings.rag.clone())?;
            let removed = pipeline.delete_document(&document_id).await?;
            println!("removed {removed} chunks of {document_id}");
            Ok(())
        }
    }
}

/// Ingest each file under an id derived from its path, replacing whatever
/// an earlier run stored for the same file.
async fn ingest_files(
    pipeline: &IngestionPipeline,
    files: &[PathBuf],
    max_bytes: usize,
) -> anyhow::Result<()> {
    for path in files {
        let document = load_document(path, max_bytes)
            .await
            .with_context(|| format!("loading {}", path.display()))?;
        let replaced = pipeline.delete_document(document.id()).await?;
        if replaced > 0 {
            info!(document.id = %document.id(), replaced, "replacing previously ingested chunks");
        }

        let mut report = pipeline.ingest(&document).await?;
        if let Some((batch_index, error)) =
            report.failed_batch.as_ref().map(|f| (f.batch_index, f.error.to_string()))
        {
            warn!(
                document.id = %report.document_id,
                batch_index,
                %error,
                "ingestion stopped early, resuming from the failed batch"
            );
            report = pipeline.resume(&document, report).await?;
        }
        if let Some(failure) = &report.failed_batch {
            anyhow::bail!(
                "ingesting {} failed at batch {} of {}: {}; {} chunks stored under {}",
                path.display(),
                failure.batch_index,
                report.batches_total,
                failure.error,
                report.chunks_stored,
                report.document_id
            );
        }
        println!("{}  {}  {} chunks", report.document_id, path.display(), report.chunks_stored);
    }
    Ok(())
}

async fn ask(providers: &ProviderSet, settings: &Settings, query: Query) -> anyhow::Result<()> {
    let orchestrator = providers.query_orchestrator(settings.rag.clone())?;
    let outcome = orchestrator.answer(query).await?;
    info!(run_id = %outcome.run_id, status = %outcome.status, "answered");

    println!("{}", outcome.answer);
    print_sources(&outcome.sources);
    if outcome.status != RunStatus::Done {
        eprintln!("status: {}", outcome.status);
    }
    Ok(())
}

async fn ask_streaming(
    providers: &ProviderSet,
    settings: &Settings,
    query: Query,
) -> anyhow::Result<()> {
    let orchestrator = providers.query_orchestrator(settings.rag.clone())?;
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut events = orchestrator.answer_stream(query, cancel)?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            AnswerEvent::Fragment(fragment) => {
                write!(stdout, "{fragment}")?;
                stdout.flush()?;
            }
            AnswerEvent::Done { sources } => {
                println!();
                print_sources(&sources);
            }
            AnswerEvent::Blocked { stage, message } => {
                println!();
                println!("{message}");
                eprintln!("status: blocked at {stage}");
            }
            AnswerEvent::Failed { stage, message } => {
                println!();
                println!("{message}");
                eprintln!("status: failed at {stage}");
            }
            AnswerEvent::Cancelled => {
                println!();
                eprintln!("status: cancelled");
            }
        }
    }
    Ok(())
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!();
    for (n, source) in sources.iter().enumerate() {
        println!(
            "[{}] {} (chunk {}, score {:.3})",
            n + 1,
            source.filename.as_deref().unwrap_or(&source.document_id),
            source.chunk_index,
            source.score
        );
    }
}
