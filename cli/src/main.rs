//! MedRAG command-line interface.
//!
//! # Commands
//!
//! - `build`: index a JSON-lines corpus and persist a snapshot
//! - `stats`: describe the most recent snapshot
//! - `query`: retrieve cited passages for a query embedding
//!
//! Logs go to stderr and are controlled by `RUST_LOG` (default `info`);
//! command output is JSON on stdout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use medrag_retrieval::{MedicalRetrieval, QueryFilters, QueryRequest, RetrievalConfig, Specialty};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

mod corpus;

/// Build, inspect and query medical-literature retrieval indexes.
#[derive(Parser)]
#[command(name = "medrag", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot directory, overriding the configuration.
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Index a JSON-lines corpus and persist a snapshot.
    Build {
        /// One `DocumentRecord` per line.
        corpus: PathBuf,
    },
    /// Describe the most recent snapshot.
    Stats,
    /// Retrieve cited passages for a query embedding.
    Query(QueryArgs),
}

#[derive(Args)]
struct QueryArgs {
    /// Query embedding as a JSON array, or `@path` to a file holding one.
    embedding: String,

    /// Maximum number of passages.
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Minimum confidence in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    min_confidence: f32,

    /// Restrict to a specialty; repeatable.
    #[arg(long = "specialty")]
    specialties: Vec<Specialty>,

    /// Earliest publication year.
    #[arg(long)]
    from_year: Option<i32>,

    /// Latest publication year.
    #[arg(long)]
    to_year: Option<i32>,
}

impl QueryArgs {
    fn filters(&self) -> QueryFilters {
        let mut filters = QueryFilters::default();
        if !self.specialties.is_empty() {
            filters = filters.with_specialties(self.specialties.iter().copied());
        }
        if self.from_year.is_some() || self.to_year.is_some() {
            filters = filters.with_years(
                self.from_year.unwrap_or(i32::MIN),
                self.to_year.unwrap_or(i32::MAX),
            );
        }
        filters
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let service = open(&cli.common)?;
    match cli.command {
        Command::Build { corpus } => build(&service, &corpus),
        Command::Stats => {
            service.load_latest().context("loading latest snapshot")?;
            print_json(&service.stats())
        }
        Command::Query(args) => query(&service, &args),
    }
}

fn open(common: &CommonArgs) -> Result<MedicalRetrieval> {
    let mut config = match &common.config {
        Some(path) => RetrievalConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => RetrievalConfig::default(),
    };
    if let Some(dir) = &common.snapshot_dir {
        config.store.snapshot_dir = dir.clone();
    }
    Ok(MedicalRetrieval::from_config(config)?)
}

fn build(service: &MedicalRetrieval, corpus: &Path) -> Result<()> {
    let records = corpus::read_records(corpus)?;
    info!("Read {} records from {}", records.len(), corpus.display());

    // Continue the generation sequence of any existing snapshots.
    if let Err(err) = service.load_latest() {
        info!("Starting a fresh snapshot sequence: {err}");
    }
    service.rebuild(records).context("building index")?;
    let path = service.persist().context("persisting index")?;

    print_json(&serde_json::json!({
        "snapshot": path,
        "stats": service.stats(),
    }))
}

fn query(service: &MedicalRetrieval, args: &QueryArgs) -> Result<()> {
    service.load_latest().context("loading latest snapshot")?;

    let embedding = corpus::read_embedding(&args.embedding)?;
    let request = QueryRequest::new(embedding, args.top_k)
        .with_filters(args.filters())
        .with_min_confidence(args.min_confidence);
    let response = service.query(&request)?;
    print_json(&response)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
