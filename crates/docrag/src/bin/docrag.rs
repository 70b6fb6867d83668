//! docrag command line
//!
//! Run with: cargo run -p docrag --features cli -- <command>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docrag::config::EmbeddingBackend;
use docrag::{EmbeddingFuser, RagConfig, RagEngine};

#[derive(Parser)]
#[command(name = "docrag", version, about = "Document ingestion and retrieval")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Collection directory (overrides the configuration)
    #[arg(long, global = true)]
    persist_dir: Option<PathBuf>,

    /// Use the offline hashing encoders instead of ONNX models
    #[arg(long, global = true)]
    hashing: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one or more documents
    Ingest {
        /// Files to ingest (.pdf, .pptx, .txt, .md)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Skip files whose exact content is already stored
        #[arg(long)]
        skip_existing: bool,
    },
    /// Show the closest chunks for a question
    Query {
        question: String,

        /// Number of hits
        #[arg(short)]
        k: Option<usize>,

        /// Print hits as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the assembled context for a question
    Context {
        question: String,

        /// Number of chunks
        #[arg(short)]
        k: Option<usize>,
    },
    /// List ingested sources
    Sources,
    /// Remove every chunk of a source
    Purge { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docrag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let default_k = config.retrieval.default_k;

    let engine = if config.embeddings.backend == EmbeddingBackend::Hashing {
        let fuser = Arc::new(EmbeddingFuser::hashing(&config.embeddings));
        RagEngine::with_fuser(config, fuser)?
    } else {
        RagEngine::new(config).await?
    };

    match cli.command {
        Command::Ingest {
            files,
            skip_existing,
        } => ingest(&engine, &files, skip_existing).await?,

        Command::Query { question, k, json } => {
            let hits = engine.query(&question, k.unwrap_or(default_k)).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                eprintln!("No results found.");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "\n{}. {} p.{} (score: {:.4})",
                        i + 1,
                        style(hit.source()).bold(),
                        hit.page(),
                        hit.score
                    );
                    println!("   {}", preview(&hit.text, 160));
                }
            }
        }

        Command::Context { question, k } => {
            let context = engine
                .get_context_for_question(&question, k.unwrap_or(default_k))
                .await;
            print!("{}", context);
        }

        Command::Sources => {
            let sources = engine.list_ingested_sources().await;
            if sources.is_empty() {
                eprintln!("No documents ingested in {}", engine.persist_location().display());
            }
            for source in sources {
                println!("{:>6}  {}", source.chunk_count, source.name);
            }
        }

        Command::Purge { name } => {
            let removed = engine.purge_source(&name).await?;
            println!("Removed {} chunks of {}", removed, style(&name).bold());
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<RagConfig> {
    let mut config = match &cli.config {
        Some(path) => RagConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RagConfig::default(),
    };
    if let Some(dir) = &cli.persist_dir {
        config.storage.persist_dir = dir.clone();
    }
    if cli.hashing {
        config.embeddings.backend = EmbeddingBackend::Hashing;
    }
    config.validate()?;
    Ok(config)
}

async fn ingest(engine: &RagEngine, files: &[PathBuf], skip_existing: bool) -> anyhow::Result<()> {
    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let mut failed = 0usize;
    for path in files {
        let filename = file_name(path);
        bar.set_message(filename.clone());

        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

        if skip_existing && engine.is_ingested(&filename, &bytes).await? {
            bar.println(format!("{} {} (already ingested)", style("skip").dim(), filename));
            bar.inc(1);
            continue;
        }

        match engine.ingest(bytes, &filename).await {
            Ok(report) => bar.println(format!(
                "{} {} ({} pages, {} chunks)",
                style("ok").green(),
                report.filename,
                report.pages,
                report.chunks_ingested
            )),
            Err(e) => {
                failed += 1;
                bar.println(format!("{} {}: {}", style("failed").red(), filename, e));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!(
        "Collection: {}",
        style(engine.persist_location().display()).cyan()
    );
    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, files.len());
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
