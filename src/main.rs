//! # repo-qa CLI
//!
//! Ask natural-language questions about a Git repository.
//!
//! ## Usage
//!
//! ```bash
//! repo-qa --config ./config/repo-qa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repo-qa serve` | Start the HTTP server (landing page, `/analyze`, `/ask`) |
//! | `repo-qa analyze <url>` | Fetch, chunk and index a repository |
//! | `repo-qa chat <url>` | Analyze, then answer questions read from stdin |
//! | `repo-qa status` | List repositories recorded in the cache status file |
//!
//! `serve`, `analyze` and `chat` need `OPENAI_API_KEY` in the environment.
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use repo_qa::cache::CacheTracker;
use repo_qa::config::{load_config, Config};
use repo_qa::index::IndexStore;
use repo_qa::models::RetrievedChunk;
use repo_qa::pipeline::{Pipeline, Reply};
use repo_qa::server::run_server;

const DEFAULT_CONFIG_PATH: &str = "./config/repo-qa.toml";

#[derive(Parser)]
#[command(
    name = "repo-qa",
    about = "Ask natural-language questions about a Git repository",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/repo-qa.toml`; built-in defaults apply when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Fetch, chunk and index a repository, reusing an existing index.
    Analyze {
        /// Repository URL, e.g. `https://github.com/owner/repo`.
        url: String,
    },

    /// Analyze a repository, then answer questions read from stdin.
    ///
    /// Type `exit` or send EOF to quit.
    Chat {
        /// Repository URL, e.g. `https://github.com/owner/repo`.
        url: String,
    },

    /// List repositories recorded as indexed.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            let pipeline = Pipeline::from_config(cfg).context("Failed to start pipeline")?;
            run_server(Arc::new(pipeline)).await?;
        }
        Commands::Analyze { url } => {
            let pipeline = Pipeline::from_config(cfg).context("Failed to start pipeline")?;
            let outcome = pipeline.analyze(&url).await?;
            println!("Repository: {}", outcome.repository_id);
            println!("Chunks:     {}", outcome.chunk_count);
            println!(
                "Index:      {}",
                if outcome.reused { "reused" } else { "built" }
            );
        }
        Commands::Chat { url } => {
            let pipeline = Pipeline::from_config(cfg).context("Failed to start pipeline")?;
            let outcome = pipeline.analyze(&url).await?;
            println!(
                "{} ready ({} chunks). Ask a question, or type `exit`.",
                outcome.repository_id, outcome.chunk_count
            );
            chat_loop(&pipeline, &outcome.repository_id).await?;
        }
        Commands::Status => {
            print_status(&cfg)?;
        }
    }

    Ok(())
}

/// An explicit `--config` must exist; the default path is optional.
fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                load_config(path)
            } else {
                tracing::debug!("no config file at {}, using defaults", DEFAULT_CONFIG_PATH);
                Ok(Config::default())
            }
        }
    }
}

async fn chat_loop(pipeline: &Pipeline, repository_id: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        match pipeline.ask(Some(repository_id), Some(line)).await {
            Ok(Reply::Answer(answer)) => {
                println!("{}\n", answer.text);
                let paths = source_paths(&answer.sources);
                if !paths.is_empty() {
                    println!("Sources: {}\n", paths.join(", "));
                }
            }
            Ok(Reply::Notice(message)) => println!("{}\n", message),
            Err(e) => eprintln!("Error: {}\n", e),
        }
    }

    Ok(())
}

/// Distinct source paths in retrieval order.
fn source_paths(sources: &[RetrievedChunk]) -> Vec<&str> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .map(|s| s.source_path.as_str())
        .filter(|path| seen.insert(*path))
        .collect()
}

fn print_status(cfg: &Config) -> anyhow::Result<()> {
    let cache = CacheTracker::open(cfg.paths.status_file.clone())
        .context("Failed to read cache status")?;
    let store = IndexStore::new(cfg.paths.index_dir.clone());
    let entries = cache.entries();

    if entries.is_empty() {
        println!("No repositories indexed yet ({}).", cache.path().display());
        return Ok(());
    }

    println!("{:<60} {:<8} INDEX FILE", "REPOSITORY", "INDEXED");
    for (repository, indexed) in entries {
        let path = store.path_for(&repository);
        let file = if path.is_file() {
            path.display().to_string()
        } else {
            "(missing)".to_string()
        };
        println!("{:<60} {:<8} {}", repository, indexed, file);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrieved(path: &str, seq: i64) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: format!("{}#{}", path, seq),
            source_path: path.to_string(),
            sequence_index: seq,
            text: String::new(),
            score: 0.0,
        }
    }

    #[test]
    fn test_source_paths_are_distinct_in_order() {
        let sources = vec![
            retrieved("src/lib.rs", 0),
            retrieved("README.md", 0),
            retrieved("src/lib.rs", 3),
            retrieved("src/main.rs", 1),
            retrieved("README.md", 2),
        ];
        assert_eq!(
            source_paths(&sources),
            vec!["src/lib.rs", "README.md", "src/main.rs"]
        );
        assert!(source_paths(&[]).is_empty());
    }
}
