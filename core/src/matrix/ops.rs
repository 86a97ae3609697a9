//! Matrix arithmetic.
//!
//! Element-wise operators are implemented on references and return
//! `Result<Matrix>` because shapes are only known at runtime:
//!
//! ```rust
//! use tf_moments::Matrix;
//!
//! let a = Matrix::new(vec![1.0, 2.0], [1, 2]).unwrap();
//! let b = Matrix::new(vec![3.0, 4.0], [1, 2]).unwrap();
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.data(), &[4.0, 6.0]);
//! ```
//!
//! `*` is the Hadamard (element-wise) product. Use [`Matrix::matmul`] for
//! the matrix product, which delegates to the `tf-moments-kernels` crate.

use super::{Matrix, MatrixError, Result};

use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};

/// Implements an element-wise binary operator for `&Matrix`.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl $trait for &Matrix {
            type Output = Result<Matrix>;

            fn $method(self, rhs: Self) -> Self::Output {
                if self.shape != rhs.shape {
                    return Err(MatrixError::ShapeMismatch {
                        expected: self.shape.to_vec(),
                        got: rhs.shape.to_vec(),
                    });
                }

                let mut out = Matrix::zeros(self.shape);
                out.data
                    .par_iter_mut()
                    .zip(self.data.par_iter())
                    .zip(rhs.data.par_iter())
                    .for_each(|((o, a), b)| {
                        *o = a.$method(*b);
                    });

                Ok(out)
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

impl Matrix {
    /// Applies `f` to every element.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let mut out = Matrix::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .for_each(|(o, i)| *o = f(*i));
        out
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map(|x| x * factor)
    }

    pub fn scale_in_place(&mut self, factor: f64) {
        self.data.iter_mut().for_each(|x| *x *= factor);
    }

    /// `self += factor * other`, in place.
    pub fn add_scaled(&mut self, other: &Matrix, factor: f64) -> Result<()> {
        if self.shape != other.shape {
            return Err(MatrixError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: other.shape.to_vec(),
            });
        }
        self.data
            .iter_mut()
            .zip(&other.data)
            .for_each(|(a, b)| *a += factor * b);
        Ok(())
    }

    /// Matrix product `[m, k] x [k, n] -> [m, n]`.
    pub fn matmul(&self, rhs: &Matrix) -> Result<Matrix> {
        let out_data =
            tf_moments_kernels::cpu_matmul(&self.data, &rhs.data, &self.shape, &rhs.shape)?;
        Matrix::new(out_data, [self.shape[0], rhs.shape[1]])
    }

    pub fn transpose(&self) -> Result<Matrix> {
        let out_data = tf_moments_kernels::cpu_transpose(&self.data, &self.shape)?;
        Matrix::new(out_data, [self.shape[1], self.shape[0]])
    }

    /// `selfᵗ · self`.
    pub fn gram(&self) -> Result<Matrix> {
        self.transpose()?.matmul(self)
    }

    /// Outer product `u vᵗ`.
    pub fn outer(u: &[f64], v: &[f64]) -> Matrix {
        let mut out = Matrix::zeros([u.len(), v.len()]);
        out.data
            .par_chunks_mut(v.len().max(1))
            .zip(u.par_iter())
            .for_each(|(row, &ui)| {
                for (o, &vj) in row.iter_mut().zip(v) {
                    *o = ui * vj;
                }
            });
        out
    }

    /// `v · self` for a row vector `v` of length `rows`.
    pub fn left_multiply(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.shape[0] {
            return Err(MatrixError::ShapeMismatch {
                expected: vec![self.shape[0]],
                got: vec![v.len()],
            });
        }
        let mut out = vec![0.0; self.shape[1]];
        for (r, &w) in v.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            for (o, &x) in out.iter_mut().zip(self.row(r)) {
                *o += w * x;
            }
        }
        Ok(out)
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Frobenius norm: the L2 norm of all entries.
    pub fn frobenius_norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    pub fn add_to_diagonal(&mut self, value: f64) {
        let n = self.shape[0].min(self.shape[1]);
        for i in 0..n {
            self[(i, i)] += value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elementwise_ops() {
        let a = Matrix::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        let b = Matrix::new(vec![2.0, 2.0, 2.0, 2.0], [2, 2]).unwrap();

        assert_eq!((&a - &b).unwrap().data(), &[-1.0, 0.0, 1.0, 2.0]);
        assert_eq!((&a * &b).unwrap().data(), &[2.0, 4.0, 6.0, 8.0]);
        assert_eq!((&a / &b).unwrap().data(), &[0.5, 1.0, 1.5, 2.0]);

        let c = Matrix::zeros([1, 4]);
        assert!(matches!(&a + &c, Err(MatrixError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_matmul_and_transpose() {
        let a = Matrix::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let at = a.transpose().unwrap();
        assert_eq!(at.shape(), &[3, 2]);

        let g = a.gram().unwrap();
        assert_eq!(g.shape(), &[3, 3]);
        assert_eq!(g.row(0), &[17.0, 22.0, 27.0]);

        assert!(a.matmul(&a).is_err());
    }

    #[test]
    fn test_outer_and_left_multiply() {
        let o = Matrix::outer(&[1.0, 2.0], &[3.0, 4.0, 5.0]);
        assert_eq!(o.row(1), &[6.0, 8.0, 10.0]);

        let v = o.left_multiply(&[1.0, 1.0]).unwrap();
        assert_eq!(v, vec![9.0, 12.0, 15.0]);
        assert!(o.left_multiply(&[1.0]).is_err());
    }

    #[test]
    fn test_norm_and_diagonal() {
        let mut m = Matrix::new(vec![3.0, 0.0, 0.0, 4.0], [2, 2]).unwrap();
        assert!((m.frobenius_norm() - 5.0).abs() < 1e-12);

        m.add_to_diagonal(1.0);
        assert_eq!(m.data(), &[4.0, 0.0, 0.0, 5.0]);

        let mut acc = Matrix::zeros([2, 2]);
        acc.add_scaled(&m, 0.5).unwrap();
        assert_eq!(acc.data(), &[2.0, 0.0, 0.0, 2.5]);
    }
}
