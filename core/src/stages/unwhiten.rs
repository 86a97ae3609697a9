//! Maps the factorization back to vocabulary space.
//!
//! Master only. Workers join the group so the topology is complete, then
//! return without exchanging anything.

use super::{FactorizedMaster, FactorizedWorker, StageGroup};
use crate::config::Config;
use crate::distributed::{CollectiveError, ElementwiseSum, GroupBuilder, MasterEndpoint, WorkerEndpoint};
use crate::error::{PipelineError, Result};
use crate::linalg::{norm2, simplex_projection, solve_positive};
use crate::matrix::Matrix;
use tracing::{debug, info};

/// ADMM penalty.
pub const ADMM_RHO: f64 = 1.0;
pub const ADMM_ITERATIONS: usize = 20;

/// Ridge added to `ωᵗω`, relative to its mean diagonal.
const GRAM_RIDGE: f64 = 1e-10;

/// The fitted model.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// Dirichlet concentration per topic, `1 x k`, summing to `alpha0`.
    pub alpha: Matrix,
    /// Topic-word distributions, `d x k`, one column per topic on the simplex.
    pub beta: Matrix,
}

impl Estimate {
    pub fn num_topics(&self) -> usize {
        self.beta.cols()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.beta.rows()
    }
}

pub type UnwhitenGroup = StageGroup<(), (), FactorizedMaster, Estimate, FactorizedWorker, ()>;

pub fn group(workers: usize) -> std::result::Result<UnwhitenGroup, CollectiveError> {
    let group = GroupBuilder::new("unwhiten", workers)
        .broadcast()
        .reduce(ElementwiseSum)
        .finalize()?;
    Ok(StageGroup::new(group, master, worker))
}

/// `α0 · λ⁻² / Σ λ⁻²`.
pub fn dirichlet_alpha(lambda: &[f64], alpha0: f64) -> Result<Vec<f64>> {
    if lambda.iter().any(|&l| l == 0.0 || !l.is_finite()) {
        return Err(PipelineError::Degenerate(
            "factor column with zero or non-finite norm",
        ));
    }
    let hat: Vec<f64> = lambda.iter().map(|l| 1.0 / (l * l)).collect();
    let total: f64 = hat.iter().sum();
    Ok(hat.into_iter().map(|h| alpha0 * h / total).collect())
}

/// Projects `v` onto the probability simplex by ADMM consensus between an
/// unconstrained quadratic step and an exact simplex projection.
pub fn unwhiten_topic(v: &[f64]) -> Vec<f64> {
    let n = v.len();
    let mut z = vec![0.0; n];
    let mut u = vec![0.0; n];

    for _ in 0..ADMM_ITERATIONS {
        let mu: Vec<f64> = v
            .iter()
            .zip(z.iter().zip(&u))
            .map(|(&vi, (&zi, &ui))| (vi + ADMM_RHO * (zi - ui)) / (ADMM_RHO + 1.0))
            .collect();
        let shifted: Vec<f64> = mu.iter().zip(&u).map(|(m, ui)| m + ui).collect();
        z = simplex_projection(&shifted);
        u.iter_mut()
            .zip(mu.iter().zip(&z))
            .for_each(|(ui, (m, zi))| *ui += m - zi);
    }
    z
}

/// Picks the projection of `column` or of `-column`, whichever lands closer
/// to the column it came from.
pub fn resolve_topic(column: &[f64]) -> Vec<f64> {
    let negated: Vec<f64> = column.iter().map(|x| -x).collect();
    let positive = unwhiten_topic(column);
    let negative = unwhiten_topic(&negated);

    let distance = |projected: &[f64], target: &[f64]| {
        let diff: Vec<f64> = projected.iter().zip(target).map(|(p, t)| p - t).collect();
        norm2(&diff)
    };
    if distance(&positive, column) < distance(&negative, &negated) {
        positive
    } else {
        negative
    }
}

/// `F = ω (ωᵗω)⁻¹ A diag(λ)`: the topic directions in vocabulary space.
pub fn unwhiten_factors(omega: &Matrix, a: &Matrix, lambda: &[f64]) -> Result<Matrix> {
    let mut gram = omega.gram()?;
    let k = gram.rows();
    if k > 0 {
        let mean_diagonal = (0..k).map(|i| gram[(i, i)]).sum::<f64>() / k as f64;
        gram.add_to_diagonal(GRAM_RIDGE * mean_diagonal);
    }
    let scaled = a.matmul(&Matrix::from_diagonal(lambda))?;
    Ok(omega.matmul(&solve_positive(&gram, &scaled)?)?)
}

pub fn master(
    input: FactorizedMaster,
    _endpoint: &mut MasterEndpoint<(), ()>,
    config: &Config,
) -> Result<Estimate> {
    let FactorizedMaster {
        omega,
        a,
        lambda,
        iterations,
    } = input;

    let alpha = dirichlet_alpha(&lambda, config.alpha0())?;
    let f = unwhiten_factors(&omega, &a, &lambda)?;
    debug!(rows = f.rows(), cols = f.cols(), "unwhiten: factors mapped back");

    let mut beta = Matrix::zeros([f.rows(), f.cols()]);
    for c in 0..f.cols() {
        beta.set_column(c, &resolve_topic(&f.column(c)))?;
    }

    info!(topics = alpha.len(), als_iterations = iterations, "unwhiten: estimate ready");
    Ok(Estimate {
        alpha: Matrix::row_vector(alpha),
        beta,
    })
}

pub fn worker(
    _input: FactorizedWorker,
    _endpoint: &mut WorkerEndpoint<(), ()>,
    _config: &Config,
) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirichlet_alpha_sums_to_alpha0() {
        let alpha = dirichlet_alpha(&[1.0, 2.0, 0.5], 0.3).unwrap();
        assert!((alpha.iter().sum::<f64>() - 0.3).abs() < 1e-12);
        // Smaller norms get larger weight.
        assert!(alpha[2] > alpha[0] && alpha[0] > alpha[1]);
        assert!((alpha[0] / alpha[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_dirichlet_alpha_rejects_zero_norm() {
        let err = dirichlet_alpha(&[1.0, 0.0], 1.0).unwrap_err();
        assert!(matches!(err, PipelineError::Degenerate(_)));
    }

    #[test]
    fn test_unwhiten_topic_lands_on_simplex() {
        let z = unwhiten_topic(&[0.4, -1.3, 2.2, 0.05, 0.0]);
        assert!(z.iter().all(|&x| x >= 0.0));
        assert!((z.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unwhiten_topic_keeps_simplex_points() {
        // Fixed iteration count, so only approximately.
        let v = [0.2, 0.5, 0.3];
        let z = unwhiten_topic(&v);
        for (a, b) in z.iter().zip(&v) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_resolve_topic_picks_sign() {
        let column = [-0.1, -0.7, -0.2];
        let z = resolve_topic(&column);
        assert!((z[1] - 0.7).abs() < 1e-5);
        assert!(z[1] > z[2] && z[2] > z[0]);
    }

    #[test]
    fn test_unwhiten_factors_inverts_orthonormal_projection() {
        // ω with orthonormal columns: (ωᵗω)⁻¹ = I, so F = ω A diag(λ).
        let omega = Matrix::new(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0], [3, 2]).unwrap();
        let a = Matrix::identity(2);
        let f = unwhiten_factors(&omega, &a, &[2.0, 3.0]).unwrap();
        let expected = [2.0, 0.0, 0.0, 3.0, 0.0, 0.0];
        for (x, y) in f.data().iter().zip(&expected) {
            assert!((x - y).abs() < 1e-8);
        }
    }
}
