//! Draws a synthetic corpus with known topics, fits it and reports how well
//! each true topic is recovered.

use anyhow::Result;
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tf_moments::io::split_documents;
use tf_moments::synthetic::SyntheticCorpus;
use tf_moments::{Config, Matrix, Pipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(about = "Fit a synthetic corpus and report topic recovery")]
struct Args {
    #[arg(short = 'd', long = "d", default_value_t = 100)]
    dim_d: usize,

    #[arg(short = 'k', long = "k", default_value_t = 5)]
    dim_k: usize,

    #[arg(long = "kprime", default_value_t = 8)]
    dim_kprime: usize,

    #[arg(long, default_value_t = 0.5)]
    alpha0: f64,

    #[arg(long, default_value_t = 2000)]
    documents: usize,

    /// Tokens per document.
    #[arg(long, default_value_t = 100)]
    length: usize,

    #[arg(long, default_value_t = 3)]
    partitions: usize,

    #[arg(long, default_value_t = 200)]
    max_iterations: usize,

    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Also write the corpus in the `fit` input format.
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let corpus = SyntheticCorpus::generate(
        args.dim_d,
        args.dim_k,
        args.alpha0,
        args.documents,
        args.length,
        args.seed,
    )?;
    info!(documents = corpus.documents.len(), "synthetic corpus drawn");

    if let Some(path) = &args.dump {
        let mut out = BufWriter::new(File::create(path)?);
        for doc in &corpus.documents {
            write!(out, "{} {}", doc.id(), doc.len())?;
            for token in doc.tokens() {
                write!(out, " {}:{}", token.id, token.count)?;
            }
            writeln!(out)?;
        }
        out.flush()?;
    }

    let config = Config::new(
        args.dim_d,
        args.dim_k,
        args.dim_kprime,
        args.alpha0,
        args.partitions,
    )
    .with_max_iterations(args.max_iterations);
    let estimate = Pipeline::new(config)?.run(split_documents(corpus.documents, args.partitions))?;

    for (topic, (distance, matched)) in recovery(&corpus.beta, &estimate.beta).into_iter().enumerate() {
        println!("true topic {topic}: closest estimate {matched}, L1 distance {distance:.4}");
    }
    println!("alpha: {:?}", estimate.alpha.data());
    Ok(())
}

/// For each true topic, the closest estimated topic by L1 distance.
fn recovery(truth: &Matrix, estimate: &Matrix) -> Vec<(f64, usize)> {
    (0..truth.cols())
        .map(|t| {
            let target = truth.column(t);
            (0..estimate.cols())
                .map(|e| {
                    let distance = estimate
                        .column(e)
                        .iter()
                        .zip(&target)
                        .map(|(a, b)| (a - b).abs())
                        .sum::<f64>();
                    (distance, e)
                })
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .unwrap_or((f64::INFINITY, 0))
        })
        .collect()
}
