//! embedpool - pooled sentence embeddings
//!
//! Entry point for the `embedpool` command-line tool.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use embedpool::metrics::init_metrics;
use embedpool::observability::init_tracing;
use embedpool::{Config, EmbeddingPool};
use serde::Serialize;

/// embedpool - pooled sentence embeddings
#[derive(Parser, Debug)]
#[command(name = "embedpool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory for the model cache
    #[arg(short, long, env = "EMBEDPOOL_DATA_DIR", default_value = "./data", global = true)]
    data_dir: std::path::PathBuf,

    /// Number of parallel embedding workers (default: CPU cores)
    #[arg(long, env = "EMBEDPOOL_POOL_SIZE", global = true)]
    pool_size: Option<usize>,

    /// Seconds to wait for an idle worker
    #[arg(long, env = "EMBEDPOOL_CHECKOUT_TIMEOUT_SECS", default_value = "60", global = true)]
    checkout_timeout_secs: u64,

    /// Token length texts are truncated to
    #[arg(long, env = "EMBEDPOOL_MAX_SEQUENCE_LENGTH", default_value = "256", global = true)]
    max_sequence_length: usize,

    /// Texts per inference call
    #[arg(long, env = "EMBEDPOOL_BATCH_SIZE", default_value = "32", global = true)]
    batch_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "EMBEDPOOL_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "EMBEDPOOL_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and unpack the model if it is not cached yet
    Fetch,

    /// Embed texts given as arguments, or one per stdin line
    Embed {
        /// Texts to embed
        texts: Vec<String>,
    },
}

impl Cli {
    /// Library configuration described by the flags.
    fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            data_dir: self.data_dir.clone(),
            log_level: self.log_level.clone(),
            pool_size: self.pool_size.unwrap_or(defaults.pool_size),
            checkout_timeout: Duration::from_secs(self.checkout_timeout_secs),
            max_sequence_length: self.max_sequence_length,
            batch_size: self.batch_size,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRecord<'a> {
    index: usize,
    text: &'a str,
    embedding: &'a [f32],
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);

    let config = cli.config();

    tracing::debug!(?config, "Configuration loaded");
    config.validate()?;

    match cli.command {
        Command::Fetch => fetch(&config),
        Command::Embed { texts } => embed(&config, texts),
    }
}

fn fetch(config: &Config) -> anyhow::Result<()> {
    let artifact = config.artifact();
    artifact.ensure()?;
    println!("model:     {}", artifact.model_path().display());
    println!("tokenizer: {}", artifact.tokenizer_path().display());
    Ok(())
}

fn embed(config: &Config, mut texts: Vec<String>) -> anyhow::Result<()> {
    if texts.is_empty() {
        for line in io::stdin().lock().lines() {
            texts.push(line.context("failed to read stdin")?);
        }
    }
    if texts.is_empty() {
        anyhow::bail!("no texts given on the command line or stdin");
    }

    init_metrics();
    let pool = EmbeddingPool::from_config(config)?;
    let vectors = pool.generate(&texts)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (index, (text, embedding)) in texts.iter().zip(&vectors).enumerate() {
        let record = EmbeddingRecord {
            index,
            text,
            embedding,
        };
        serde_json::to_writer(&mut out, &record).context("failed to write output")?;
        writeln!(out)?;
    }

    tracing::info!(texts = texts.len(), "Embeddings written");
    Ok(())
}
