//! Associative combiners for the reduce channel.

use crate::matrix::{Matrix, MatrixError};

/// Folds two worker contributions into one.
///
/// Implementations must be associative and commutative: the master combines
/// contributions in whatever order they arrive.
pub trait Reducer<T>: Send + Sync {
    fn combine(&self, acc: T, next: T) -> Result<T, MatrixError>;
}

/// Values that can be added element by element.
pub trait Summable: Sized {
    fn try_sum(self, other: Self) -> Result<Self, MatrixError>;
}

impl Summable for f64 {
    fn try_sum(self, other: Self) -> Result<Self, MatrixError> {
        Ok(self + other)
    }
}

impl Summable for Vec<f64> {
    fn try_sum(mut self, other: Self) -> Result<Self, MatrixError> {
        if self.len() != other.len() {
            return Err(MatrixError::ShapeMismatch {
                expected: vec![self.len()],
                got: vec![other.len()],
            });
        }
        self.iter_mut().zip(&other).for_each(|(a, b)| *a += b);
        Ok(self)
    }
}

impl Summable for Matrix {
    fn try_sum(mut self, other: Self) -> Result<Self, MatrixError> {
        self.add_scaled(&other, 1.0)?;
        Ok(self)
    }
}

impl Summable for () {
    fn try_sum(self, _other: Self) -> Result<Self, MatrixError> {
        Ok(())
    }
}

/// Element-wise sum of [`Summable`] contributions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementwiseSum;

impl<T: Summable> Reducer<T> for ElementwiseSum {
    fn combine(&self, acc: T, next: T) -> Result<T, MatrixError> {
        acc.try_sum(next)
    }
}

/// Unordered collection append. Only valid when the consumer does not care
/// about element order, e.g. rows tagged with their global index.
#[derive(Debug, Clone, Copy, Default)]
pub struct Concat;

impl<T> Reducer<Vec<T>> for Concat {
    fn combine(&self, mut acc: Vec<T>, next: Vec<T>) -> Result<Vec<T>, MatrixError> {
        acc.extend(next);
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold<T: Clone, R: Reducer<T>>(r: &R, items: &[T]) -> T {
        let mut iter = items.iter().cloned();
        let first = iter.next().unwrap();
        iter.fold(first, |acc, x| r.combine(acc, x).unwrap())
    }

    #[test]
    fn test_elementwise_sum_is_order_independent() {
        let parts = vec![
            vec![0.1, 1e-3, 7.0],
            vec![2.5, -4.0, 1e-9],
            vec![-0.3, 0.25, 3.0],
            vec![1e6, 0.0, -1.0],
        ];
        let forward = fold(&ElementwiseSum, &parts);

        let orders = [[3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
        for order in orders {
            let permuted: Vec<_> = order.iter().map(|&i| parts[i].clone()).collect();
            let total = fold(&ElementwiseSum, &permuted);
            for (a, b) in forward.iter().zip(&total) {
                assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_matrix_sum_rejects_shape_mismatch() {
        let a = Matrix::zeros([2, 2]);
        let b = Matrix::zeros([2, 3]);
        assert!(matches!(
            ElementwiseSum.combine(a, b),
            Err(MatrixError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_concat_is_order_independent_as_a_set() {
        let parts = vec![vec![(2, 'c')], vec![(0, 'a'), (1, 'b')], vec![(3, 'd')]];
        let mut forward = fold(&Concat, &parts);
        let mut backward = fold(&Concat, &[parts[2].clone(), parts[1].clone(), parts[0].clone()]);
        forward.sort();
        backward.sort();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 4);
    }
}
