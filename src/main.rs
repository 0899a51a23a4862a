use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use repolens_core::{Config, Engine, QueryOptions};
use repolens_index::IndexError;
use repolens_index::cache::{IndexSource, LoadedIndex, StaleDecision, StaleIndex};
use repolens_index::indexer::BuildProgress;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "repolens",
    version,
    about = "Index a source tree with embeddings and assemble token-budgeted prompts from it"
)]
struct Cli {
    /// Configuration file (falls back to REPOLENS_CONFIG, then config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the index for a repository, or confirm the cached one is fresh
    Index {
        path: PathBuf,
        /// Rebuild even if the cached index is fresh
        #[arg(long)]
        rebuild: bool,
    },
    /// Print the prompt assembled for a question about a repository
    Query {
        path: PathBuf,
        question: String,
        /// Number of chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Send the whole codebase if it fits the prompt budget
        #[arg(long)]
        all: bool,
        /// What to do when the cached index is out of date
        #[arg(long, value_enum, default_value_t = OnStale::Ask)]
        on_stale: OnStale,
    },
    /// List recently indexed repositories
    Recent,
    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OnStale {
    /// Ask on a terminal, rebuild otherwise
    Ask,
    Rebuild,
    Reuse,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.command {
        Command::Index { path, rebuild } => run_index(config, &path, rebuild).await,
        Command::Query {
            path,
            question,
            top_k,
            all,
            on_stale,
        } => run_query(config, &path, &question, top_k, all, on_stale).await,
        Command::Recent => {
            let engine = Engine::from_config(config);
            let recent = engine.recent();
            if recent.is_empty() {
                eprintln!("no recent repositories");
            }
            for repo in recent {
                println!("{repo}");
            }
            Ok(())
        }
        Command::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_index(config: Config, path: &Path, rebuild: bool) -> anyhow::Result<()> {
    let engine = Engine::from_config(config);

    let loaded = if rebuild {
        let handle = engine.spawn_build(path.to_path_buf())?;
        cancel_on_ctrl_c(handle.cancellation_token());
        let reporter = spawn_progress_reporter(handle.progress.clone());
        let result = engine.finish_build(handle).await;
        let _ = reporter.await;
        result
    } else {
        let cancel = CancellationToken::new();
        cancel_on_ctrl_c(cancel.clone());
        open_with_progress(&engine, path, OnStale::Rebuild, &cancel).await
    };

    let loaded = cancelled_or(loaded)?;
    println!("{}", describe(&loaded));
    Ok(())
}

async fn run_query(
    config: Config,
    path: &Path,
    question: &str,
    top_k: Option<usize>,
    all: bool,
    on_stale: OnStale,
) -> anyhow::Result<()> {
    if top_k == Some(0) {
        bail!("--top-k must be greater than 0");
    }
    let options = QueryOptions {
        top_k: top_k.unwrap_or(config.retrieval.top_k),
        include_all: all || config.retrieval.include_all,
    };
    let engine = Engine::from_config(config);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let loaded = cancelled_or(open_with_progress(&engine, path, on_stale, &cancel).await)?;
    eprintln!("{}", describe(&loaded));

    let outcome = unless_cancelled(&cancel, engine.query(&loaded, question, options))
        .await?
        .context("failed to build prompt")?;
    if let Some(warning) = &outcome.warning {
        eprintln!("warning: {warning}");
    }
    for chunk in &outcome.selected {
        tracing::debug!(
            file = %chunk.file_path,
            chunk = chunk.chunk_index,
            similarity = chunk.similarity,
            "selected"
        );
    }
    eprintln!(
        "{} chunks selected, ~{} prompt tokens",
        outcome.selected.len(),
        outcome.prompt_tokens
    );
    println!("{}", outcome.prompt);
    Ok(())
}

async fn open_with_progress<P>(
    engine: &Engine<P>,
    path: &Path,
    on_stale: OnStale,
    cancel: &CancellationToken,
) -> repolens_index::Result<LoadedIndex>
where
    P: repolens_llm::EmbeddingProvider + 'static,
{
    let (tx, rx) = watch::channel(BuildProgress::default());
    let reporter = spawn_progress_reporter(rx);
    let interactive = std::io::stdin().is_terminal();
    let result = engine
        .open(path, |stale| decide_stale(on_stale, interactive, stale), Some(&tx), cancel)
        .await;
    drop(tx);
    let _ = reporter.await;
    result
}

fn decide_stale(on_stale: OnStale, interactive: bool, stale: &StaleIndex) -> StaleDecision {
    match on_stale {
        OnStale::Rebuild => StaleDecision::Rebuild,
        OnStale::Reuse => StaleDecision::UseStale,
        OnStale::Ask if !interactive => {
            tracing::info!("stdin is not a terminal, rebuilding stale index");
            StaleDecision::Rebuild
        }
        OnStale::Ask => {
            let answer = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "The repository changed since it was indexed ({} chunks cached). Rebuild?",
                    stale.cached.len()
                ))
                .default(true)
                .interact();
            match answer {
                Ok(true) => StaleDecision::Rebuild,
                Ok(false) => StaleDecision::UseStale,
                Err(e) => {
                    tracing::warn!("prompt failed, rebuilding: {e}");
                    StaleDecision::Rebuild
                }
            }
        }
    }
}

fn cancelled_or(result: repolens_index::Result<LoadedIndex>) -> anyhow::Result<LoadedIndex> {
    match result {
        Err(IndexError::Cancelled) => bail!("indexing cancelled; the previous index was kept"),
        other => Ok(other?),
    }
}

fn describe(loaded: &LoadedIndex) -> String {
    match &loaded.source {
        IndexSource::Fresh => format!(
            "index for {} is up to date ({} chunks)",
            loaded.repo,
            loaded.index.len()
        ),
        IndexSource::Stale => format!(
            "using out-of-date index for {} ({} chunks)",
            loaded.repo,
            loaded.index.len()
        ),
        IndexSource::Built(report) => format!(
            "indexed {}: {} chunks embedded from {}/{} files, {} files skipped, {} chunks failed ({} ms)",
            loaded.repo,
            report.chunks_embedded,
            report.files_indexed,
            report.files_total,
            report.files_skipped,
            report.chunks_failed,
            report.duration_ms
        ),
    }
}

/// First ctrl-c cancels `cancel`, a second one exits with status 130.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received ctrl-c, stopping (press again to exit now)");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            std::process::exit(130);
        }
    });
}

async fn unless_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> anyhow::Result<F::Output> {
    tokio::select! {
        out = fut => Ok(out),
        () = cancel.cancelled() => bail!("interrupted"),
    }
}

fn spawn_progress_reporter(mut rx: watch::Receiver<BuildProgress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut printed = false;
        while rx.changed().await.is_ok() {
            let p = rx.borrow_and_update().clone();
            if p.files_total == 0 {
                continue;
            }
            eprint!(
                "\rindexing {}/{} files, {} chunks",
                p.files_done, p.files_total, p.chunks_embedded
            );
            printed = true;
        }
        if printed {
            eprintln!();
        }
    })
}

fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("REPOLENS_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
