//! First moment of the whitened documents.

use super::{StageGroup, WhitenedMaster, WhitenedWorker};
use crate::config::Config;
use crate::distributed::{CollectiveError, ElementwiseSum, GroupBuilder, MasterEndpoint, WorkerEndpoint};
use crate::document::Document;
use crate::error::Result;
use crate::matrix::{Matrix, MatrixError};
use std::ops::Range;
use tracing::debug;

/// Relative shift applied to `σ` before it is used as a divisor.
const SIGMA_SHIFT: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct FirstMomentMaster {
    pub omega: Matrix,
    pub examples: usize,
    pub m1: Vec<f64>,
}

/// Whitened documents kept for the third-moment stage.
#[derive(Debug, Clone)]
pub struct FirstMomentWorker {
    pub range: Range<usize>,
    /// One row per document: `Σ ω[token] · count / σ`.
    pub whitened: Matrix,
    /// Total token count of each document.
    pub counts: Vec<f64>,
}

pub type FirstMomentGroup =
    StageGroup<Vec<f64>, Vec<f64>, WhitenedMaster, FirstMomentMaster, WhitenedWorker, FirstMomentWorker>;

pub fn group(workers: usize) -> std::result::Result<FirstMomentGroup, CollectiveError> {
    let group = GroupBuilder::new("m1", workers)
        .broadcast()
        .reduce(ElementwiseSum)
        .finalize()?;
    Ok(StageGroup::new(group, master, worker))
}

/// Projects each document through `omega`, divides by `sigma`, and returns
/// the whitened rows, per-document counts and the partial sum of `wc / |x|`.
pub fn whiten_documents(
    documents: &[Document],
    omega: &Matrix,
    sigma: &[f64],
) -> Result<(Matrix, Vec<f64>, Vec<f64>)> {
    let k = omega.cols();
    if sigma.len() != k {
        return Err(MatrixError::ShapeMismatch {
            expected: vec![k],
            got: vec![sigma.len()],
        }
        .into());
    }

    let mut whitened = Matrix::zeros([documents.len(), k]);
    let mut counts = Vec::with_capacity(documents.len());
    let mut m1 = vec![0.0; k];

    for (n, doc) in documents.iter().enumerate() {
        let row = whitened.row_mut(n);
        for token in doc.tokens() {
            for (acc, &w) in row.iter_mut().zip(omega.row(token.id as usize)) {
                *acc += w * token.count;
            }
        }
        row.iter_mut().zip(sigma).for_each(|(v, s)| *v /= s);

        let total = doc.total_count();
        if total > 0.0 {
            m1.iter_mut().zip(row.iter()).for_each(|(m, v)| *m += v / total);
        }
        counts.push(total);
    }

    Ok((whitened, counts, m1))
}

pub fn master(
    input: WhitenedMaster,
    endpoint: &mut MasterEndpoint<Vec<f64>, Vec<f64>>,
    _config: &Config,
) -> Result<FirstMomentMaster> {
    let WhitenedMaster {
        omega,
        sigma,
        examples,
    } = input;

    endpoint.broadcast(sigma)?;
    let sum = endpoint.reduce()?;
    let m1: Vec<f64> = sum.iter().map(|v| v / examples as f64).collect();

    debug!(m1 = ?m1, "m1: first moment ready");
    Ok(FirstMomentMaster {
        omega,
        examples,
        m1,
    })
}

pub fn worker(
    input: WhitenedWorker,
    endpoint: &mut WorkerEndpoint<Vec<f64>, Vec<f64>>,
    _config: &Config,
) -> Result<FirstMomentWorker> {
    let WhitenedWorker {
        documents,
        range,
        omega,
    } = input;

    let received = endpoint.receive()?;
    let shift = received.first().copied().unwrap_or(0.0) * SIGMA_SHIFT;
    let sigma: Vec<f64> = received.iter().map(|s| s + shift).collect();

    let (whitened, counts, m1) = whiten_documents(&documents, &omega, &sigma)?;
    debug!(documents = counts.len(), "m1: sending partial first moment");
    endpoint.send(m1)?;

    Ok(FirstMomentWorker {
        range,
        whitened,
        counts,
    })
}
