//! Dense row-major `f64` matrix.
//!
//! Every quantity exchanged between pipeline stages (projection `ω`, the moment
//! tensor slices, the ALS factors, the final `alpha`/`beta`) is a [`Matrix`].
//! Vectors are plain `Vec<f64>`; a matrix is always two-dimensional.
//!
//! ```rust
//! use tf_moments::Matrix;
//!
//! let m = Matrix::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
//! assert_eq!(m.shape(), &[2, 3]);
//! assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
//! assert_eq!(m[(0, 2)], 3.0);
//! ```
//!
//! Layout is row-major: entry `(r, c)` lives at `data[r * cols + c]`.

use std::fmt;
use std::ops::{Index, IndexMut};
use thiserror::Error;

pub mod ops;

/// Error type for matrix operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// An index is out of bounds for the given shape.
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    /// A Cholesky factorization was requested for a matrix that is not positive definite.
    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,
    /// A decomposition did not produce the requested factors.
    #[error("Decomposition failed: {0}")]
    Decomposition(String),
}

pub type Result<T> = std::result::Result<T, MatrixError>;

impl From<tf_moments_kernels::KernelError> for MatrixError {
    fn from(e: tf_moments_kernels::KernelError) -> Self {
        match e {
            tf_moments_kernels::KernelError::ShapeMismatch { expected, got } => {
                MatrixError::ShapeMismatch { expected, got }
            }
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct Matrix {
    shape: [usize; 2],
    data: Vec<f64>,
}

impl Matrix {
    /// Creates a matrix from row-major data.
    ///
    /// # Errors
    ///
    /// Returns `MatrixError::ShapeMismatch` if `data.len()` is not `rows * cols`.
    pub fn new(data: Vec<f64>, shape: [usize; 2]) -> Result<Self> {
        let size = shape[0] * shape[1];
        if data.len() != size {
            return Err(MatrixError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    /// Wraps data whose length is already known to match `shape`.
    pub(crate) fn from_raw(data: Vec<f64>, shape: [usize; 2]) -> Self {
        debug_assert_eq!(data.len(), shape[0] * shape[1]);
        Self { shape, data }
    }

    pub fn zeros(shape: [usize; 2]) -> Self {
        Self {
            shape,
            data: vec![0.0; shape[0] * shape[1]],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut out = Self::zeros([n, n]);
        for i in 0..n {
            out.data[i * n + i] = 1.0;
        }
        out
    }

    /// Builds a square matrix with `diag` on the diagonal.
    pub fn from_diagonal(diag: &[f64]) -> Self {
        let n = diag.len();
        let mut out = Self::zeros([n, n]);
        for (i, &v) in diag.iter().enumerate() {
            out.data[i * n + i] = v;
        }
        out
    }

    /// Builds a `1 x n` matrix from a vector.
    pub fn row_vector(values: Vec<f64>) -> Self {
        let n = values.len();
        Self {
            shape: [1, n],
            data: values,
        }
    }

    pub const fn shape(&self) -> &[usize; 2] {
        &self.shape
    }

    pub const fn rows(&self) -> usize {
        self.shape[0]
    }

    pub const fn cols(&self) -> usize {
        self.shape[1]
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checked element access.
    pub fn get(&self, row: usize, col: usize) -> Result<f64> {
        if row >= self.shape[0] || col >= self.shape[1] {
            return Err(MatrixError::IndexOutOfBounds {
                index: vec![row, col],
                shape: self.shape.to_vec(),
            });
        }
        Ok(self.data[row * self.shape[1] + col])
    }

    pub fn row(&self, r: usize) -> &[f64] {
        let c = self.shape[1];
        &self.data[r * c..(r + 1) * c]
    }

    pub fn row_mut(&mut self, r: usize) -> &mut [f64] {
        let c = self.shape[1];
        &mut self.data[r * c..(r + 1) * c]
    }

    /// Overwrites row `r`.
    ///
    /// # Errors
    ///
    /// `IndexOutOfBounds` when `r` is past the last row, `ShapeMismatch` when
    /// `values` is not exactly one row long.
    pub fn set_row(&mut self, r: usize, values: &[f64]) -> Result<()> {
        if r >= self.shape[0] {
            return Err(MatrixError::IndexOutOfBounds {
                index: vec![r],
                shape: self.shape.to_vec(),
            });
        }
        if values.len() != self.shape[1] {
            return Err(MatrixError::ShapeMismatch {
                expected: vec![self.shape[1]],
                got: vec![values.len()],
            });
        }
        self.row_mut(r).copy_from_slice(values);
        Ok(())
    }

    pub fn column(&self, c: usize) -> Vec<f64> {
        let cols = self.shape[1];
        (0..self.shape[0])
            .map(|r| self.data[r * cols + c])
            .collect()
    }

    pub fn set_column(&mut self, c: usize, values: &[f64]) -> Result<()> {
        if c >= self.shape[1] {
            return Err(MatrixError::IndexOutOfBounds {
                index: vec![c],
                shape: self.shape.to_vec(),
            });
        }
        if values.len() != self.shape[0] {
            return Err(MatrixError::ShapeMismatch {
                expected: vec![self.shape[0]],
                got: vec![values.len()],
            });
        }
        let cols = self.shape[1];
        for (r, &v) in values.iter().enumerate() {
            self.data[r * cols + c] = v;
        }
        Ok(())
    }

    /// Copies the contiguous band of rows `range` into a new matrix.
    pub fn select_rows(&self, range: std::ops::Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.shape[0] {
            return Err(MatrixError::IndexOutOfBounds {
                index: vec![range.start, range.end],
                shape: self.shape.to_vec(),
            });
        }
        let c = self.shape[1];
        Ok(Self {
            shape: [range.len(), c],
            data: self.data[range.start * c..range.end * c].to_vec(),
        })
    }

    /// Copies the given columns, in the given order, into a new matrix.
    pub fn select_columns(&self, columns: &[usize]) -> Result<Self> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= self.shape[1]) {
            return Err(MatrixError::IndexOutOfBounds {
                index: vec![bad],
                shape: self.shape.to_vec(),
            });
        }
        let rows = self.shape[0];
        let mut out = Self::zeros([rows, columns.len()]);
        for r in 0..rows {
            let src = self.row(r);
            for (dst, &c) in out.row_mut(r).iter_mut().zip(columns) {
                *dst = src[c];
            }
        }
        Ok(out)
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.shape[1] + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.shape[1] + c]
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("shape", &self.shape)
            .field("data", &self.data)
            .finish()
    }
}
