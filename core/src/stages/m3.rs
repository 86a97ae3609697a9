//! Third moment: the Dirichlet-corrected `k x k x k` tensor in whitened space.
//!
//! The tensor is stored as a `k x k²` matrix; entry `(i, j, l)` is at row `i`,
//! column `j·k + l`. Workers build partial sums over their documents, the
//! master averages them and broadcasts the result, and each worker keeps only
//! the rows in its assigned range.

use super::{FirstMomentMaster, FirstMomentWorker, StageGroup};
use crate::config::Config;
use crate::distributed::{
    CollectiveError, ElementwiseSum, GroupBuilder, MasterEndpoint, Summable, WorkerEndpoint,
};
use crate::error::{PipelineError, Result};
use crate::matrix::{Matrix, MatrixError};
use rayon::prelude::*;
use std::ops::Range;
use tracing::debug;

/// Documents shorter than this carry no third-order information.
pub const MIN_VALID_COUNT: f64 = 3.0;

/// What the master broadcasts during the M3 stage.
#[derive(Debug, Clone)]
pub enum M3Model {
    FirstMoment(Vec<f64>),
    Tensor(Matrix),
}

/// One worker's contribution: how many documents it used and its partial sum.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentPartial {
    pub valid_examples: f64,
    pub t: Matrix,
}

impl Summable for MomentPartial {
    fn try_sum(self, other: Self) -> std::result::Result<Self, MatrixError> {
        Ok(Self {
            valid_examples: self.valid_examples + other.valid_examples,
            t: self.t.try_sum(other.t)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ThirdMomentMaster {
    pub omega: Matrix,
}

/// A worker's band of the averaged, corrected tensor.
#[derive(Debug, Clone)]
pub struct ThirdMomentWorker {
    pub range: Range<usize>,
    pub slice: Matrix,
}

pub type ThirdMomentGroup = StageGroup<
    M3Model,
    MomentPartial,
    FirstMomentMaster,
    ThirdMomentMaster,
    FirstMomentWorker,
    ThirdMomentWorker,
>;

pub fn group(workers: usize) -> std::result::Result<ThirdMomentGroup, CollectiveError> {
    let group = GroupBuilder::new("m3", workers)
        .broadcast()
        .reduce(ElementwiseSum)
        .finalize()?;
    Ok(StageGroup::new(group, master, worker))
}

/// Partial third-moment sum over whitened documents `wc` with lengths `counts`.
///
/// Only documents with at least [`MIN_VALID_COUNT`] tokens contribute.
pub fn partial_moment(wc: &Matrix, counts: &[f64], m1: &[f64], alpha0: f64) -> MomentPartial {
    let k = m1.len();
    let valid: Vec<(&[f64], f64, f64)> = counts
        .iter()
        .enumerate()
        .filter(|&(_, &len)| len >= MIN_VALID_COUNT)
        .map(|(n, &len)| {
            let s2 = alpha0 * (alpha0 + 1.0) / (2.0 * len * (len - 1.0));
            let s3 = (alpha0 + 1.0) * (alpha0 + 2.0) / (2.0 * len * (len - 1.0) * (len - 2.0));
            (wc.row(n), s2, s3)
        })
        .collect();

    let mut t = Matrix::zeros([k, k * k]);
    if k > 0 {
        t.data_mut()
            .par_chunks_mut(k * k)
            .enumerate()
            .for_each(|(i, row)| {
                for &(w, s2, s3) in &valid {
                    let wi = w[i];
                    let m1i = m1[i];
                    for j in 0..k {
                        let wj = w[j];
                        let m1j = m1[j];
                        let band = &mut row[j * k..(j + 1) * k];
                        for (l, cell) in band.iter_mut().enumerate() {
                            let wl = w[l];
                            *cell += s3 * wi * wj * wl
                                - s2 * (m1i * wj * wl + wi * m1j * wl + wi * wj * m1[l]);
                        }

                        let cross = -s3 * wi * wj;
                        row[i * k + j] += cross + s2 * wi * m1j;
                        row[j * k + i] += cross + s2 * wi * m1j;
                        row[j * k + j] += cross + s2 * m1i * wj;
                        row[i * k + i] += 2.0 * s3 * wi;
                    }
                }
            });
    }

    MomentPartial {
        valid_examples: valid.len() as f64,
        t,
    }
}

/// Adds `α0² · m1_i · m1_j · m1_l` to the rows `range` held in `slice`.
pub fn add_mean_correction(slice: &mut Matrix, range: Range<usize>, m1: &[f64], alpha0: f64) {
    let k = m1.len();
    let a2 = alpha0 * alpha0;
    for (offset, i) in range.enumerate() {
        let row = slice.row_mut(offset);
        for j in 0..k {
            for l in 0..k {
                row[j * k + l] += a2 * m1[i] * m1[j] * m1[l];
            }
        }
    }
}

pub fn master(
    input: FirstMomentMaster,
    endpoint: &mut MasterEndpoint<M3Model, MomentPartial>,
    _config: &Config,
) -> Result<ThirdMomentMaster> {
    endpoint.broadcast(M3Model::FirstMoment(input.m1))?;

    let partial = endpoint.reduce()?;
    debug!(valid = partial.valid_examples, "m3: partial tensors reduced");
    if partial.valid_examples == 0.0 {
        return Err(PipelineError::Degenerate(
            "no document has three or more tokens",
        ));
    }

    let t = partial.t.scale(1.0 / partial.valid_examples);
    endpoint.broadcast(M3Model::Tensor(t))?;

    Ok(ThirdMomentMaster { omega: input.omega })
}

pub fn worker(
    input: FirstMomentWorker,
    endpoint: &mut WorkerEndpoint<M3Model, MomentPartial>,
    config: &Config,
) -> Result<ThirdMomentWorker> {
    let FirstMomentWorker {
        range,
        whitened,
        counts,
    } = input;

    let m1 = match endpoint.receive()?.as_ref() {
        M3Model::FirstMoment(m1) => m1.clone(),
        M3Model::Tensor(_) => return Err(unexpected("first moment")),
    };

    let partial = partial_moment(&whitened, &counts, &m1, config.alpha0());
    debug!(valid = partial.valid_examples, "m3: sending partial tensor");
    endpoint.send(partial)?;

    let mut slice = match endpoint.receive()?.as_ref() {
        M3Model::Tensor(t) => t.select_rows(range.clone())?,
        M3Model::FirstMoment(_) => return Err(unexpected("tensor")),
    };
    add_mean_correction(&mut slice, range.clone(), &m1, config.alpha0());

    Ok(ThirdMomentWorker { range, slice })
}

fn unexpected(expected: &'static str) -> PipelineError {
    PipelineError::UnexpectedPayload {
        stage: "m3",
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::gaussian;

    fn entry(t: &Matrix, k: usize, i: usize, j: usize, l: usize) -> f64 {
        t[(i, j * k + l)]
    }

    #[test]
    fn test_short_documents_are_skipped() {
        let wc = Matrix::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let partial = partial_moment(&wc, &[2.0, 1.0], &[0.1, 0.2], 0.5);
        assert_eq!(partial.valid_examples, 0.0);
        assert_eq!(partial.t.sum(), 0.0);
    }

    #[test]
    fn test_partial_moment_is_symmetric() {
        let k = 3;
        let wc = gaussian(5, k, 3);
        let counts = [3.0, 5.0, 2.0, 10.0, 4.0];
        let m1 = [0.3, -0.1, 0.2];
        let partial = partial_moment(&wc, &counts, &m1, 0.7);

        assert_eq!(partial.valid_examples, 4.0);
        for i in 0..k {
            for j in 0..k {
                for l in 0..k {
                    let v = entry(&partial.t, k, i, j, l);
                    assert!((v - entry(&partial.t, k, i, l, j)).abs() < 1e-12);
                    assert!((v - entry(&partial.t, k, j, i, l)).abs() < 1e-12);
                    assert!((v - entry(&partial.t, k, l, j, i)).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_partial_moment_single_coordinate() {
        // k = 1, one document of length 3 with wc = [w], m1 = [m].
        let (w, m, a, len) = (2.0, 0.5, 1.0, 3.0);
        let wc = Matrix::new(vec![w], [1, 1]).unwrap();
        let partial = partial_moment(&wc, &[len], &[m], a);

        let s2 = a * (a + 1.0) / (2.0 * len * (len - 1.0));
        let s3 = (a + 1.0) * (a + 2.0) / (2.0 * len * (len - 1.0) * (len - 2.0));
        let expected = s3 * w * w * w - 3.0 * s2 * m * w * w
            + 3.0 * (-s3 * w * w)
            + 3.0 * s2 * w * m
            + 2.0 * s3 * w;
        assert!((partial.t[(0, 0)] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_mean_correction_only_touches_assigned_rows() {
        let k = 2;
        let m1 = [1.0, 2.0];
        let mut slice = Matrix::zeros([1, k * k]);
        add_mean_correction(&mut slice, 1..2, &m1, 3.0);
        // Row i = 1: 9 * m1[1] * m1[j] * m1[l]
        assert_eq!(slice.row(0), &[18.0, 36.0, 36.0, 72.0]);
    }

    #[test]
    fn test_partials_sum() {
        let a = MomentPartial {
            valid_examples: 2.0,
            t: Matrix::identity(2),
        };
        let b = MomentPartial {
            valid_examples: 1.0,
            t: Matrix::identity(2),
        };
        let total = a.try_sum(b).unwrap();
        assert_eq!(total.valid_examples, 3.0);
        assert_eq!(total.t.data(), &[2.0, 0.0, 0.0, 2.0]);
    }

    fn m3_group(workers: usize) -> crate::distributed::CollectiveGroup<M3Model, MomentPartial> {
        GroupBuilder::new("m3", workers)
            .broadcast()
            .reduce(ElementwiseSum)
            .finalize()
            .unwrap()
    }

    fn master_input(m1: Vec<f64>) -> FirstMomentMaster {
        FirstMomentMaster {
            omega: Matrix::identity(2),
            examples: 5,
            m1,
        }
    }

    #[test]
    fn test_master_averages_and_redistributes_tensor() {
        let config = Config::new(3, 2, 2, 0.5, 1);
        let group = m3_group(1);
        let t = Matrix::new(vec![4.0, 8.0, 8.0, 12.0, 8.0, 12.0, 12.0, 16.0], [2, 4]).unwrap();

        let received = std::thread::scope(|s| {
            let worker = s.spawn(|| {
                let mut ep = group.join_worker().unwrap();
                match ep.receive().unwrap().as_ref() {
                    M3Model::FirstMoment(m1) => assert_eq!(m1, &vec![0.5, -0.5]),
                    M3Model::Tensor(_) => panic!("expected the first moment"),
                }
                ep.send(MomentPartial {
                    valid_examples: 4.0,
                    t: t.clone(),
                })
                .unwrap();
                match ep.receive().unwrap().as_ref() {
                    M3Model::Tensor(t) => t.clone(),
                    M3Model::FirstMoment(_) => panic!("expected the tensor"),
                }
            });
            let mut ep = group.join_master().unwrap();
            let out = master(master_input(vec![0.5, -0.5]), &mut ep, &config).unwrap();
            assert_eq!(out.omega, Matrix::identity(2));
            worker.join().unwrap()
        });

        assert_eq!(received, t.scale(0.25));
    }

    #[test]
    fn test_master_without_valid_examples_is_degenerate() {
        let config = Config::new(3, 2, 2, 0.5, 1);
        let group = m3_group(1);

        let err = std::thread::scope(|s| {
            s.spawn(|| {
                let mut ep = group.join_worker().unwrap();
                ep.receive().unwrap();
                ep.send(MomentPartial {
                    valid_examples: 0.0,
                    t: Matrix::zeros([2, 4]),
                })
                .unwrap();
            });
            let mut ep = group.join_master().unwrap();
            master(master_input(vec![0.0, 0.0]), &mut ep, &config).unwrap_err()
        });
        assert!(matches!(err, PipelineError::Degenerate(_)), "{err}");
    }
}
