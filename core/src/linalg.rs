//! Numeric primitives shared by the stage protocols.
//!
//! Dense decompositions (SVD, symmetric eigen, Cholesky) go through
//! `nalgebra`; everything that is a straight loop over rows stays on
//! [`Matrix`] and the kernels crate.

use crate::matrix::{Matrix, MatrixError, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Singular values below this are treated as zero by [`pinv`].
pub const PINV_TOLERANCE: f64 = 1e-6;

/// A `rows x cols` matrix of standard normal draws from a fixed seed.
///
/// Identical seeds give identical matrices on every participant, which is
/// how master and workers agree on the initial whitening projection without
/// exchanging it.
pub fn gaussian(rows: usize, cols: usize, seed: u64) -> Matrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..rows * cols)
        .map(|_| rng.sample::<f64, _>(StandardNormal))
        .collect();
    Matrix::from_raw(data, [rows, cols])
}

/// Gram-Schmidt orthonormalisation of the columns of `a`.
///
/// Each projection is applied twice, which keeps the result orthonormal to
/// working precision even for nearly dependent columns. A column that
/// vanishes after projection is left at zero.
pub fn orthogonalize(a: &Matrix) -> Matrix {
    let cols = a.cols();
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(cols);

    for j in 0..cols {
        let mut y = a.column(j);
        for q in &basis {
            for _ in 0..2 {
                let proj = dot(q, &y);
                y.iter_mut().zip(q).for_each(|(yi, qi)| *yi -= proj * qi);
            }
        }
        let norm = dot(&y, &y).sqrt();
        if norm > 0.0 {
            y.iter_mut().for_each(|v| *v /= norm);
        }
        basis.push(y);
    }

    let mut out = Matrix::zeros(*a.shape());
    for (j, col) in basis.iter().enumerate() {
        for (r, &v) in col.iter().enumerate() {
            out[(r, j)] = v;
        }
    }
    out
}

/// Scales every column of `a` to unit L2 norm and returns the original norms.
///
/// Zero columns are left untouched and report a norm of zero.
pub fn normalize_columns(a: &mut Matrix) -> Vec<f64> {
    let cols = a.cols();
    let mut norms = vec![0.0; cols];
    for r in 0..a.rows() {
        for (n, &v) in norms.iter_mut().zip(a.row(r)) {
            *n += v * v;
        }
    }
    norms.iter_mut().for_each(|n| *n = n.sqrt());

    for r in 0..a.rows() {
        for (v, &n) in a.row_mut(r).iter_mut().zip(&norms) {
            if n > 0.0 {
                *v /= n;
            }
        }
    }
    norms
}

/// Moore-Penrose pseudo-inverse via SVD.
///
/// Singular values with magnitude below [`PINV_TOLERANCE`] are zeroed rather
/// than inverted, so ill-conditioned directions drop out silently.
pub fn pinv(a: &Matrix) -> Result<Matrix> {
    let svd = to_nalgebra(a).svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| MatrixError::Decomposition("SVD did not return U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| MatrixError::Decomposition("SVD did not return V^T".to_string()))?;

    let s_inv = svd.singular_values.map(|s| {
        if s.abs() < PINV_TOLERANCE {
            0.0
        } else {
            1.0 / s
        }
    });
    let out = v_t.transpose() * DMatrix::from_diagonal(&s_inv) * u.transpose();
    Ok(from_nalgebra(&out))
}

/// Eigen-decomposition of a symmetric matrix.
///
/// Returns the eigenvalues and a matrix whose column `i` is the eigenvector
/// for eigenvalue `i`. Order is whatever the solver produced.
pub fn symmetric_eigen(a: &Matrix) -> Result<(Vec<f64>, Matrix)> {
    if a.rows() != a.cols() {
        return Err(MatrixError::ShapeMismatch {
            expected: vec![a.rows(), a.rows()],
            got: a.shape().to_vec(),
        });
    }
    let eigen = SymmetricEigen::new(to_nalgebra(a));
    let values = eigen.eigenvalues.iter().copied().collect();
    Ok((values, from_nalgebra(&eigen.eigenvectors)))
}

/// Solves `a x = b` for symmetric positive-definite `a` via Cholesky.
pub fn solve_positive(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    if a.rows() != a.cols() || a.rows() != b.rows() {
        return Err(MatrixError::ShapeMismatch {
            expected: vec![a.rows(), b.cols()],
            got: b.shape().to_vec(),
        });
    }
    let chol = to_nalgebra(a)
        .cholesky()
        .ok_or(MatrixError::NotPositiveDefinite)?;
    Ok(from_nalgebra(&chol.solve(&to_nalgebra(b))))
}

/// Row `i` of the result is `[first[:,c]ᵗ · T_i · second[:,c]]_c`, where `T_i`
/// is row `i` of `slice` read as a `k x k` matrix.
pub fn khatri_rao_rows(slice: &Matrix, first: &Matrix, second: &Matrix) -> Result<Matrix> {
    let k = first.cols();
    if first.shape() != &[k, k] || second.shape() != &[k, k] {
        return Err(MatrixError::ShapeMismatch {
            expected: vec![k, k],
            got: second.shape().to_vec(),
        });
    }
    let out = tf_moments_kernels::cpu_khatri_rao(
        slice.data(),
        first.data(),
        second.data(),
        slice.rows(),
        k,
    )?;
    Matrix::new(out, [slice.rows(), k])
}

/// Euclidean projection onto the probability simplex.
///
/// Sorts a copy in descending order, finds the last position whose value
/// still exceeds its cumulative-mean threshold `(cumsum_j - 1) / (j + 1)`,
/// then shifts by that threshold and clips at zero. The result is
/// non-negative and sums to one for any finite input.
pub fn simplex_projection(v: &[f64]) -> Vec<f64> {
    if v.is_empty() {
        return Vec::new();
    }

    let mut mu = v.to_vec();
    mu.sort_by(|a, b| b.total_cmp(a));

    let mut cumsum = 0.0;
    let theta: Vec<f64> = mu
        .iter()
        .enumerate()
        .map(|(j, &m)| {
            cumsum += m;
            (cumsum - 1.0) / (j as f64 + 1.0)
        })
        .collect();

    let mut j = mu.len() - 1;
    while j > 0 && mu[j] <= theta[j] {
        j -= 1;
    }

    v.iter().map(|&x| (x - theta[j]).max(0.0)).collect()
}

/// Three-valued sign: `-1`, `0` or `1`. Unlike `f64::signum`, zero maps to zero.
pub fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn to_nalgebra(a: &Matrix) -> DMatrix<f64> {
    DMatrix::from_row_slice(a.rows(), a.cols(), a.data())
}

fn from_nalgebra(m: &DMatrix<f64>) -> Matrix {
    let (rows, cols) = m.shape();
    let data = (0..rows)
        .flat_map(|r| (0..cols).map(move |c| m[(r, c)]))
        .collect();
    Matrix::from_raw(data, [rows, cols])
}
