//! Alternating least squares over the distributed third-moment tensor.
//!
//! The master owns the three `k x k` factors `A`, `B`, `C` and cycles through
//! the modes `A, B, C`. Each round it broadcasts the two fixed factors and
//! collects freshly solved rows of the third from the workers, each of which
//! holds a band of tensor rows. [`Frame::End`](crate::distributed::Frame)
//! closes the loop, after which the master broadcasts the sign-corrected `A`.

use super::{StageGroup, ThirdMomentMaster, ThirdMomentWorker};
use crate::config::Config;
use crate::distributed::{CollectiveError, Concat, GroupBuilder, MasterEndpoint, WorkerEndpoint};
use crate::error::{PipelineError, Result};
use crate::linalg::{gaussian, khatri_rao_rows, normalize_columns, orthogonalize, pinv, sign};
use crate::matrix::Matrix;
use tracing::{debug, info, trace, warn};

pub const SEED_B: u64 = 1412218460;
pub const SEED_C: u64 = 2048512343;

/// `[target, first, second]` for each mode: the factor being solved for and
/// the two fixed factors it is solved against.
pub const ABC_ORDER: [[usize; 3]; 3] = [[0, 2, 1], [1, 0, 2], [2, 1, 0]];

const FACTOR_NAMES: [char; 3] = ['A', 'B', 'C'];

/// Solved rows tagged with their global row index.
pub type RowBatch = Vec<(usize, Vec<f64>)>;

#[derive(Debug, Clone)]
pub enum AlsModel {
    /// Solve for the factor `ABC_ORDER[mode][0]` given the two others.
    Factors {
        mode: usize,
        first: Matrix,
        second: Matrix,
    },
    /// The sign-corrected `A`, sent once after the loop.
    Final(Matrix),
}

#[derive(Debug, Clone)]
pub struct FactorizedMaster {
    pub omega: Matrix,
    pub a: Matrix,
    /// Column norms of `A` from its last update.
    pub lambda: Vec<f64>,
    /// Number of completed `A` updates.
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct FactorizedWorker {
    pub a: Matrix,
}

pub type AlsGroup =
    StageGroup<AlsModel, RowBatch, ThirdMomentMaster, FactorizedMaster, ThirdMomentWorker, FactorizedWorker>;

pub fn group(workers: usize) -> std::result::Result<AlsGroup, CollectiveError> {
    let group = GroupBuilder::new("als", workers)
        .broadcast()
        .reduce(Concat)
        .finalize()?;
    Ok(StageGroup::new(group, master, worker))
}

/// `‖current - previous‖ / ‖current‖ < tolerance`.
///
/// Always false without a previous snapshot. A zero `current` counts as
/// converged only if `previous` is zero too.
pub fn converged(previous: Option<&Matrix>, current: &Matrix, tolerance: f64) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    let Ok(delta) = current - previous else {
        return false;
    };
    let norm = current.frobenius_norm();
    if norm == 0.0 {
        return delta.frobenius_norm() == 0.0;
    }
    delta.frobenius_norm() / norm < tolerance
}

/// Resolves the sign ambiguity of each latent column by majority over the
/// first-row signs of the three factors, rewriting columns of `A` only.
///
/// Returns the columns where no two-against-one majority exists.
pub fn fix_signs(factors: &mut [Matrix; 3]) -> Result<Vec<usize>> {
    let [a, b, c] = factors;
    let mut unresolved = Vec::new();
    if a.rows() == 0 {
        return Ok(unresolved);
    }

    for col in 0..a.cols() {
        let s = [sign(a[(0, col)]), sign(b[(0, col)]), sign(c[(0, col)])];
        if s[0] == s[1] && s[0] == s[2] {
            continue;
        }
        if s[0] == s[2] {
            a.set_column(col, &b.column(col))?;
        } else if s[0] == s[1] {
            a.set_column(col, &c.column(col))?;
        } else {
            unresolved.push(col);
        }
    }
    Ok(unresolved)
}

/// Solves the ridge-regularised normal equations for the rows of the target
/// factor held in `slice`, whose first row is global row `start`.
pub fn solve_rows(
    slice: &Matrix,
    start: usize,
    first: &Matrix,
    second: &Matrix,
    rho: f64,
) -> Result<RowBatch> {
    let k = first.cols();
    let mut gram = (&second.gram()? * &first.gram()?)?;
    let ridge = rho * (&gram * &gram)?.sum() / k as f64;
    gram.add_to_diagonal(ridge);
    let inverse = pinv(&gram)?;

    let rows = khatri_rao_rows(slice, first, second)?.matmul(&inverse)?;
    trace!(start, rows = rows.rows(), ridge, "als: rows solved");
    Ok((0..rows.rows())
        .map(|i| (start + i, rows.row(i).to_vec()))
        .collect())
}

pub fn master(
    input: ThirdMomentMaster,
    endpoint: &mut MasterEndpoint<AlsModel, RowBatch>,
    config: &Config,
) -> Result<FactorizedMaster> {
    let k = config.dim_k();
    let max_iterations = config.max_iterations();
    let mut factors = [
        Matrix::zeros([k, k]),
        orthogonalize(&gaussian(k, k, SEED_B)),
        orthogonalize(&gaussian(k, k, SEED_C)),
    ];
    let mut lambdas = [vec![0.0; k], vec![0.0; k], vec![0.0; k]];
    let mut previous: Option<Matrix> = None;

    let mut mode = 2;
    let mut iterations = 0;
    while max_iterations == 0 || iterations < max_iterations {
        mode = (mode + 1) % 3;
        let [target, first, second] = ABC_ORDER[mode];

        if mode == 0 {
            iterations += 1;
            if converged(previous.as_ref(), &factors[target], config.tolerance()) {
                break;
            }
            previous = Some(factors[target].clone());
        }

        endpoint.broadcast(AlsModel::Factors {
            mode,
            first: factors[first].clone(),
            second: factors[second].clone(),
        })?;

        let rows = endpoint.reduce()?;
        let active = &mut factors[target];
        for (index, row) in rows {
            active.set_row(index, &row)?;
        }
        lambdas[target] = normalize_columns(active);
        if mode != 0 {
            *active = orthogonalize(active);
        }
        debug!(
            iteration = iterations,
            factor = %FACTOR_NAMES[target],
            lambda = ?lambdas[target],
            "als: factor updated"
        );
    }

    endpoint.broadcast_end()?;

    let unresolved = fix_signs(&mut factors)?;
    if !unresolved.is_empty() {
        warn!(
            columns = ?unresolved,
            "als: no sign majority across factors; columns left as solved"
        );
    }

    let [a, _, _] = factors;
    endpoint.broadcast(AlsModel::Final(a.clone()))?;
    info!(iterations, "als: factorization complete");

    let [lambda, _, _] = lambdas;
    Ok(FactorizedMaster {
        omega: input.omega,
        a,
        lambda,
        iterations,
    })
}

pub fn worker(
    input: ThirdMomentWorker,
    endpoint: &mut WorkerEndpoint<AlsModel, RowBatch>,
    config: &Config,
) -> Result<FactorizedWorker> {
    let ThirdMomentWorker { range, slice } = input;

    let mut sweeps = 0;
    while let Some(model) = endpoint.receive_until_end()? {
        let AlsModel::Factors {
            mode,
            first,
            second,
        } = model.as_ref()
        else {
            return Err(unexpected("factor"));
        };
        if *mode == 0 {
            sweeps += 1;
        }
        let rows = solve_rows(&slice, range.start, first, second, config.rho())?;
        endpoint.send(rows)?;
    }

    let a = match endpoint.receive()?.as_ref() {
        AlsModel::Final(a) => a.clone(),
        AlsModel::Factors { .. } => return Err(unexpected("final factor")),
    };
    debug!(worker = endpoint.index(), sweeps, "als: worker finished");

    Ok(FactorizedWorker { a })
}

fn unexpected(expected: &'static str) -> PipelineError {
    PipelineError::UnexpectedPayload {
        stage: "als",
        expected,
    }
}
