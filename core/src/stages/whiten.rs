//! Whitening: two passes that learn the projection `ω` (d x k) and the
//! scale vector `σ` from streaming second-moment statistics.
//!
//! Round 0 projects onto a seeded Gaussian `d x k'` matrix and
//! orthonormalises the result. Round 1 projects onto that basis, then
//! eigen-decomposes `YᵗY` to pick the top `k` directions.

use super::StageGroup;
use crate::config::Config;
use crate::distributed::{
    CollectiveError, ElementwiseSum, GroupBuilder, MasterEndpoint, Summable, WorkerEndpoint,
};
use crate::document::Document;
use crate::error::{PipelineError, Result};
use crate::linalg::{gaussian, orthogonalize, symmetric_eigen};
use crate::matrix::{Matrix, MatrixError};
use crate::partition::Partition;
use std::ops::Range;
use tracing::{debug, info};

/// Seed of the initial projection. Master and workers draw it independently.
pub const SEED_OMEGA: u64 = 1412218259;

const ROUNDS: usize = 2;

/// Added to `σ` before dividing by it.
const SIGMA_EPSILON: f64 = 1e-12;

/// One worker's contribution to a whitening round.
#[derive(Debug, Clone, PartialEq)]
pub struct WhitenStats {
    pub examples: usize,
    /// Sum over documents of `x / |x|` (length `d`).
    pub mu_x: Vec<f64>,
    /// Sum over documents of `(x xᵗ - diag(x)) ω / (|x| (|x| - 1))` (d x cols(ω)).
    pub y: Matrix,
}

impl Summable for WhitenStats {
    fn try_sum(self, other: Self) -> std::result::Result<Self, MatrixError> {
        Ok(Self {
            examples: self.examples + other.examples,
            mu_x: self.mu_x.try_sum(other.mu_x)?,
            y: self.y.try_sum(other.y)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WhitenedMaster {
    pub omega: Matrix,
    pub sigma: Vec<f64>,
    pub examples: usize,
}

#[derive(Debug, Clone)]
pub struct WhitenedWorker {
    pub documents: Vec<Document>,
    pub range: Range<usize>,
    pub omega: Matrix,
}

pub type WhitenGroup =
    StageGroup<Matrix, WhitenStats, Partition, WhitenedMaster, Partition, WhitenedWorker>;

pub fn group(workers: usize) -> std::result::Result<WhitenGroup, CollectiveError> {
    let group = GroupBuilder::new("whiten", workers)
        .broadcast()
        .reduce(ElementwiseSum)
        .finalize()?;
    Ok(StageGroup::new(group, master, worker))
}

/// Accumulates one pass of whitening statistics over `documents`.
///
/// Documents with fewer than two tokens in total still count as examples but
/// add nothing to `mu_x` or `y`.
pub fn statistics(documents: &[Document], omega: &Matrix) -> WhitenStats {
    let cols = omega.cols();
    let mut mu_x = vec![0.0; omega.rows()];
    let mut y = Matrix::zeros([omega.rows(), cols]);
    let mut x_omega = vec![0.0; cols];

    for doc in documents {
        x_omega.iter_mut().for_each(|v| *v = 0.0);
        for token in doc.tokens() {
            let row = omega.row(token.id as usize);
            for (acc, &w) in x_omega.iter_mut().zip(row) {
                *acc += w * token.count;
            }
        }

        let total = doc.total_count();
        if total < 2.0 {
            continue;
        }
        let denom = 1.0 / (total * (total - 1.0));

        for token in doc.tokens() {
            let id = token.id as usize;
            let scale = token.count * denom;
            let omega_row = omega.row(id);
            for ((y_v, &xo), &w) in y.row_mut(id).iter_mut().zip(&x_omega).zip(omega_row) {
                *y_v += (xo - w) * scale;
            }
            mu_x[id] += token.count / total;
        }
    }

    WhitenStats {
        examples: documents.len(),
        mu_x,
        y,
    }
}

/// Turns the round-1 projection `y` (d x k') into the final `ω` (d x k) and `σ`.
///
/// `σ = max(eig(YᵗY), 0)^¼`; `ω = Y V / σ`, restricted to the `k` columns with
/// the largest `σ`, each flipped so its first entry is non-negative.
pub fn whitening_basis(y: &Matrix, k: usize) -> Result<(Matrix, Vec<f64>)> {
    let (eigenvalues, eigenvectors) = symmetric_eigen(&y.gram()?)?;
    let sigma_all: Vec<f64> = eigenvalues
        .iter()
        .map(|&e| e.max(0.0).sqrt().sqrt())
        .collect();

    let mut projected = y.matmul(&eigenvectors)?;
    for r in 0..projected.rows() {
        for (v, &s) in projected.row_mut(r).iter_mut().zip(&sigma_all) {
            *v /= s + SIGMA_EPSILON;
        }
    }

    let mut order: Vec<usize> = (0..sigma_all.len()).collect();
    order.sort_by(|&a, &b| sigma_all[b].total_cmp(&sigma_all[a]));
    order.truncate(k);

    let mut omega = projected.select_columns(&order)?;
    let sigma = order.iter().map(|&i| sigma_all[i]).collect();

    for j in 0..omega.cols() {
        if omega.rows() > 0 && omega[(0, j)] < 0.0 {
            let flipped: Vec<f64> = omega.column(j).iter().map(|v| -v).collect();
            omega.set_column(j, &flipped)?;
        }
    }

    Ok((omega, sigma))
}

pub fn master(
    _partition: Partition,
    endpoint: &mut MasterEndpoint<Matrix, WhitenStats>,
    config: &Config,
) -> Result<WhitenedMaster> {
    let alpha0 = config.alpha0();
    let mut omega = gaussian(config.dim_d(), config.dim_kprime(), SEED_OMEGA);
    let mut sigma = Vec::new();
    let mut examples = 0;

    for round in 0..ROUNDS {
        let stats = endpoint.reduce()?;
        examples = stats.examples;
        debug!(round, examples, "whiten: statistics reduced");
        if examples == 0 {
            return Err(PipelineError::Degenerate("no documents to whiten"));
        }

        let n = examples as f64;
        let mut y = stats.y;
        y.scale_in_place((1.0 + alpha0) / n);

        if alpha0 > 0.0 {
            let mu: Vec<f64> = stats.mu_x.iter().map(|v| v / n).collect();
            let mu_omega = omega.left_multiply(&mu)?;
            y.add_scaled(&Matrix::outer(&mu, &mu_omega), -alpha0)?;
        }

        if round == 0 {
            omega = orthogonalize(&y);
        } else {
            (omega, sigma) = whitening_basis(&y, config.dim_k())?;
        }

        endpoint.broadcast(omega.clone())?;
    }

    info!(examples, sigma = ?sigma, "whiten: projection ready");
    Ok(WhitenedMaster {
        omega,
        sigma,
        examples,
    })
}

pub fn worker(
    partition: Partition,
    endpoint: &mut WorkerEndpoint<Matrix, WhitenStats>,
    config: &Config,
) -> Result<WhitenedWorker> {
    let Partition { documents, range } = partition;
    let mut omega = gaussian(config.dim_d(), config.dim_kprime(), SEED_OMEGA);

    for round in 0..ROUNDS {
        let stats = statistics(&documents, &omega);
        debug!(round, examples = stats.examples, "whiten: sending statistics");
        endpoint.send(stats)?;
        omega = endpoint.receive()?.as_ref().clone();
    }

    Ok(WhitenedWorker {
        documents,
        range,
        omega,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn max_abs_diff(a: &Matrix, b: &Matrix) -> f64 {
        assert_eq!(a.shape(), b.shape());
        a.data()
            .iter()
            .zip(b.data())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    /// Runs `master` against one scripted worker that sends `rounds` and
    /// records every projection it is sent back.
    fn drive_master(config: &Config, rounds: Vec<WhitenStats>) -> (Vec<Matrix>, WhitenedMaster) {
        let group = GroupBuilder::<Matrix, WhitenStats>::new("whiten", 1)
            .broadcast()
            .reduce(ElementwiseSum)
            .finalize()
            .unwrap();

        thread::scope(|s| {
            let worker = s.spawn(|| {
                let mut ep = group.join_worker().unwrap();
                rounds
                    .into_iter()
                    .map(|stats| {
                        ep.send(stats).unwrap();
                        ep.receive().unwrap().as_ref().clone()
                    })
                    .collect::<Vec<_>>()
            });

            let mut ep = group.join_master().unwrap();
            let partition = Partition {
                documents: Vec::new(),
                range: 0..config.dim_k(),
            };
            let out = master(partition, &mut ep, config).unwrap();
            (worker.join().unwrap(), out)
        })
    }

    #[test]
    fn test_master_applies_dirichlet_correction() {
        // d = 3, k' = 2, k = 1, α0 = 0.5, two examples.
        let config = Config::new(3, 1, 2, 0.5, 1);
        let mu_x = vec![1.0, 0.6, 0.4];
        let round0 = WhitenStats {
            examples: 2,
            mu_x: mu_x.clone(),
            y: Matrix::new(vec![0.4, 0.1, 0.2, 0.3, 0.1, 0.5], [3, 2]).unwrap(),
        };
        let round1 = WhitenStats {
            examples: 2,
            mu_x,
            y: Matrix::new(vec![0.3, -0.1, 0.2, 0.4, 0.6, 0.1], [3, 2]).unwrap(),
        };

        // Y (1 + α0) / n - α0 μ (μᵗ ω), with μ = mu_x / n.
        let corrected = |stats: &WhitenStats, omega: &Matrix| {
            let n = stats.examples as f64;
            let mu: Vec<f64> = stats.mu_x.iter().map(|v| v / n).collect();
            let mut y = Matrix::zeros([3, 2]);
            for r in 0..3 {
                for c in 0..2 {
                    let mu_omega: f64 = (0..3).map(|s| mu[s] * omega[(s, c)]).sum();
                    y[(r, c)] = stats.y[(r, c)] * 1.5 / 2.0 - 0.5 * mu[r] * mu_omega;
                }
            }
            y
        };

        let (received, out) = drive_master(&config, vec![round0.clone(), round1.clone()]);
        assert_eq!(received.len(), 2);

        let initial = gaussian(3, 2, SEED_OMEGA);
        let projection = orthogonalize(&corrected(&round0, &initial));
        assert!(max_abs_diff(&received[0], &projection) < 1e-12);

        // Dropping the correction gives a visibly different basis.
        let uncorrected = orthogonalize(&round0.y.scale(0.75));
        assert!(max_abs_diff(&received[0], &uncorrected) > 1e-2);

        let (omega, sigma) = whitening_basis(&corrected(&round1, &projection), 1).unwrap();
        assert!(max_abs_diff(&received[1], &omega) < 1e-10);
        assert!(max_abs_diff(&out.omega, &omega) < 1e-10);
        assert!((out.sigma[0] - sigma[0]).abs() < 1e-10);
        assert_eq!(out.examples, 2);
    }

    #[test]
    fn test_master_rejects_empty_corpus() {
        let config = Config::new(3, 1, 2, 0.5, 1);
        let group = GroupBuilder::<Matrix, WhitenStats>::new("whiten", 1)
            .broadcast()
            .reduce(ElementwiseSum)
            .finalize()
            .unwrap();

        let err = thread::scope(|s| {
            s.spawn(|| {
                let mut ep = group.join_worker().unwrap();
                ep.send(statistics(&[], &gaussian(3, 2, SEED_OMEGA))).unwrap();
            });
            let mut ep = group.join_master().unwrap();
            let partition = Partition {
                documents: Vec::new(),
                range: 0..1,
            };
            master(partition, &mut ep, &config).unwrap_err()
        });
        assert!(matches!(err, PipelineError::Degenerate(_)), "{err}");
    }

    #[test]
    fn test_statistics_single_document() {
        // d = 3, identity projection so Y is the raw second-moment estimate.
        let omega = Matrix::identity(3);
        let doc = Document::from_pairs(0, [(0, 2.0), (2, 1.0)]);
        let stats = statistics(&[doc], &omega);

        assert_eq!(stats.examples, 1);
        // x = [2, 0, 1], |x| = 3, denom = 1/6
        // (x xᵗ - diag(x)) = [[2, 0, 2], [0, 0, 0], [2, 0, 0]]
        let expected = [2.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        for (a, b) in stats.y.data().iter().zip(expected) {
            assert!((a - b / 6.0).abs() < 1e-12);
        }
        assert!((stats.mu_x[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((stats.mu_x[2] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_documents_only_count_as_examples() {
        let omega = Matrix::identity(2);
        let docs = vec![
            Document::from_pairs(0, [(1, 1.0)]),
            Document::new(1, vec![]),
        ];
        let stats = statistics(&docs, &omega);
        assert_eq!(stats.examples, 2);
        assert!(stats.mu_x.iter().all(|&v| v == 0.0));
        assert_eq!(stats.y.sum(), 0.0);
    }

    #[test]
    fn test_stats_sum() {
        let omega = Matrix::identity(2);
        let a = statistics(&[Document::from_pairs(0, [(0, 1.0), (1, 1.0)])], &omega);
        let b = statistics(&[Document::from_pairs(1, [(0, 3.0)])], &omega);
        let total = a.clone().try_sum(b.clone()).unwrap();
        assert_eq!(total.examples, 2);
        assert_eq!(total.mu_x, vec![1.5, 0.5]);
        assert_eq!(total.y, (&a.y + &b.y).unwrap());
    }

    #[test]
    fn test_whitening_basis_orders_and_signs() {
        let y = gaussian(6, 4, 5);
        let (omega, sigma) = whitening_basis(&y, 3).unwrap();

        assert_eq!(omega.shape(), &[6, 3]);
        assert_eq!(sigma.len(), 3);
        assert!(sigma.windows(2).all(|w| w[0] >= w[1]));
        assert!((0..3).all(|j| omega[(0, j)] >= 0.0));

        // Columns of Y V / σ are orthogonal with squared norm σ⁴ / σ² = σ².
        let g = omega.gram().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { sigma[i] * sigma[i] } else { 0.0 };
                assert!((g[(i, j)] - expected).abs() < 1e-8);
            }
        }
    }
}
