//! Fits a topic model to a sparse-vector text corpus.
//!
//! ```text
//! fit --input corpus.txt --output model -d 5000 -k 20 --kprime 30 --alpha0 1.0
//! ```
//!
//! writes `model.alpha` and `model.beta`.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tf_moments::io::{read_documents, split_documents};
use tf_moments::{Config, Pipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(about = "Method-of-moments topic model fit")]
struct Args {
    /// Corpus file, one `id num_unique tok:count ...` record per line.
    #[arg(long)]
    input: PathBuf,

    /// Output prefix; `.alpha` and `.beta` are appended.
    #[arg(long)]
    output: PathBuf,

    /// Vocabulary size.
    #[arg(short = 'd', long = "d")]
    dim_d: usize,

    /// Number of topics.
    #[arg(short = 'k', long = "k")]
    dim_k: usize,

    /// Intermediate whitening rank.
    #[arg(long = "kprime")]
    dim_kprime: usize,

    #[arg(long, default_value_t = 1.0)]
    alpha0: f64,

    #[arg(long, default_value_t = Config::DEFAULT_RHO)]
    rho: f64,

    #[arg(long, default_value_t = Config::DEFAULT_TOLERANCE)]
    tolerance: f64,

    /// Zero runs ALS until convergence.
    #[arg(long, default_value_t = Config::DEFAULT_MAX_ITERATIONS)]
    max_iterations: usize,

    #[arg(long, default_value_t = 4)]
    partitions: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::new(
        args.dim_d,
        args.dim_k,
        args.dim_kprime,
        args.alpha0,
        args.partitions,
    )
    .with_rho(args.rho)
    .with_tolerance(args.tolerance)
    .with_max_iterations(args.max_iterations);
    let pipeline = Pipeline::new(config).context("invalid configuration")?;

    let file = File::open(&args.input)
        .with_context(|| format!("cannot open {}", args.input.display()))?;
    let documents = read_documents(BufReader::new(file))
        .with_context(|| format!("cannot read corpus {}", args.input.display()))?;
    info!(documents = documents.len(), input = %args.input.display(), "corpus loaded");

    let estimate = pipeline.run(split_documents(documents, args.partitions))?;

    let (alpha, beta) = estimate
        .write_to(&args.output)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    info!(alpha = %alpha.display(), beta = %beta.display(), "estimate written");
    Ok(())
}
