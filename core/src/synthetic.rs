//! Synthetic LDA corpora with known topics, for tests, benches and demos.

use crate::config::ConfigError;
use crate::document::Document;
use crate::matrix::Matrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Gamma;
use std::collections::BTreeMap;

/// Dirichlet concentration of each topic-word distribution.
const TOPIC_CONCENTRATION: f64 = 0.5;

/// A generated corpus and the parameters it was drawn from.
#[derive(Debug, Clone)]
pub struct SyntheticCorpus {
    pub documents: Vec<Document>,
    /// True topic-word distributions, `dim_d x dim_k`, columns on the simplex.
    pub beta: Matrix,
    /// Per-topic Dirichlet concentration used for document mixtures.
    pub alpha: Vec<f64>,
}

impl SyntheticCorpus {
    /// Draws `num_docs` documents of `doc_len` tokens each.
    ///
    /// Topics come from `Dirichlet(0.5)` over the vocabulary, document
    /// mixtures from a symmetric `Dirichlet(alpha0 / dim_k)`. Identical
    /// arguments give identical corpora.
    pub fn generate(
        dim_d: usize,
        dim_k: usize,
        alpha0: f64,
        num_docs: usize,
        doc_len: usize,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        if dim_d == 0 {
            return Err(ConfigError::ZeroDimension { name: "d" });
        }
        if dim_k == 0 {
            return Err(ConfigError::ZeroDimension { name: "k" });
        }
        let mixture = gamma(alpha0 / dim_k as f64, "alpha0")?;
        let topic = gamma(TOPIC_CONCENTRATION, "topic concentration")?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut beta = Matrix::zeros([dim_d, dim_k]);
        let mut topics = Vec::with_capacity(dim_k);
        for c in 0..dim_k {
            let column = dirichlet(&mut rng, &topic, dim_d);
            for (r, &v) in column.iter().enumerate() {
                beta[(r, c)] = v;
            }
            topics.push(cumulative(&column));
        }

        let documents = (0..num_docs)
            .map(|n| {
                let theta = cumulative(&dirichlet(&mut rng, &mixture, dim_k));
                let mut counts: BTreeMap<u32, f64> = BTreeMap::new();
                for _ in 0..doc_len {
                    let z = draw(&mut rng, &theta);
                    let word = draw(&mut rng, &topics[z]);
                    *counts.entry(word as u32).or_insert(0.0) += 1.0;
                }
                Document::from_pairs(n as u64, counts)
            })
            .collect();

        Ok(Self {
            documents,
            beta,
            alpha: vec![alpha0 / dim_k as f64; dim_k],
        })
    }
}

fn gamma(shape: f64, name: &'static str) -> Result<Gamma<f64>, ConfigError> {
    Gamma::new(shape, 1.0).map_err(|_| ConfigError::OutOfRange {
        name,
        requirement: "positive and finite",
        value: shape,
    })
}

/// Normalised gamma draws. If every draw underflows, all mass goes to one
/// uniformly chosen coordinate.
fn dirichlet(rng: &mut StdRng, gamma: &Gamma<f64>, n: usize) -> Vec<f64> {
    let mut draws: Vec<f64> = (0..n).map(|_| rng.sample(gamma)).collect();
    let total: f64 = draws.iter().sum();
    if total > 0.0 {
        draws.iter_mut().for_each(|v| *v /= total);
    } else {
        let pick = rng.random_range(0..n);
        draws.iter_mut().enumerate().for_each(|(i, v)| *v = if i == pick { 1.0 } else { 0.0 });
    }
    draws
}

fn cumulative(p: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    p.iter()
        .map(|v| {
            acc += v;
            acc
        })
        .collect()
}

/// Inverse-CDF draw from a cumulative distribution.
fn draw(rng: &mut StdRng, cdf: &[f64]) -> usize {
    let total = cdf.last().copied().unwrap_or(0.0);
    let u = rng.random::<f64>() * total;
    cdf.partition_point(|&c| c <= u).min(cdf.len().saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_shapes_and_simplex() {
        let corpus = SyntheticCorpus::generate(30, 3, 0.5, 25, 40, 7).unwrap();
        assert_eq!(corpus.documents.len(), 25);
        assert_eq!(corpus.beta.shape(), &[30, 3]);
        for c in 0..3 {
            let column = corpus.beta.column(c);
            assert!(column.iter().all(|&v| v >= 0.0));
            assert!((column.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        for doc in &corpus.documents {
            assert_eq!(doc.total_count(), 40.0);
            assert!(doc.tokens().iter().all(|t| (t.id as usize) < 30));
            assert!(doc.tokens().windows(2).all(|w| w[0].id < w[1].id));
        }
        assert!((corpus.alpha.iter().sum::<f64>() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = SyntheticCorpus::generate(10, 2, 0.1, 5, 8, 99).unwrap();
        let b = SyntheticCorpus::generate(10, 2, 0.1, 5, 8, 99).unwrap();
        assert_eq!(a.documents, b.documents);
        assert_eq!(a.beta, b.beta);
    }

    #[test]
    fn test_generate_rejects_bad_parameters() {
        assert!(matches!(
            SyntheticCorpus::generate(10, 2, 0.0, 5, 8, 1),
            Err(ConfigError::OutOfRange { name: "alpha0", .. })
        ));
        assert!(matches!(
            SyntheticCorpus::generate(10, 0, 1.0, 5, 8, 1),
            Err(ConfigError::ZeroDimension { name: "k" })
        ));
    }

    #[test]
    fn test_draw_follows_cdf() {
        let mut rng = StdRng::seed_from_u64(3);
        let cdf = cumulative(&[0.0, 1.0, 0.0]);
        for _ in 0..100 {
            assert_eq!(draw(&mut rng, &cdf), 1);
        }
    }
}
