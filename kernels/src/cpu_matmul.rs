use crate::{check_len, KernelElem, Result};
use rayon::prelude::*;

/// CPU matrix multiplication `[m, k] x [k, n] -> [m, n]`.
///
/// The right-hand side is transposed first so both operands of every dot
/// product are read sequentially.
pub fn cpu_matmul<T>(
    lhs_data: &[T],
    rhs_data: &[T],
    lhs_shape: &[usize; 2],
    rhs_shape: &[usize; 2],
) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let [m, k] = *lhs_shape;
    let n = rhs_shape[1];

    if k != rhs_shape[0] {
        return Err(crate::KernelError::ShapeMismatch {
            expected: vec![k],
            got: vec![rhs_shape[0]],
        });
    }
    check_len(lhs_data.len(), lhs_shape)?;
    check_len(rhs_data.len(), rhs_shape)?;

    let mut out_data = vec![T::zero(); m * n];
    if m == 0 || n == 0 {
        return Ok(out_data);
    }

    let rhs_t_data = super::cpu_transpose::cpu_transpose(rhs_data, rhs_shape)?;

    out_data
        .as_mut_slice()
        .par_chunks_mut(n)
        .enumerate()
        .for_each(|(row, out_row)| {
            let a_slice = &lhs_data[row * k..(row + 1) * k];
            for (col, out_elem) in out_row.iter_mut().enumerate() {
                let b_t_slice = &rhs_t_data[col * k..(col + 1) * k];
                let mut sum = T::zero();
                for (&val_a, &val_b) in a_slice.iter().zip(b_t_slice.iter()) {
                    sum += val_a * val_b;
                }
                *out_elem = sum;
            }
        });

    Ok(out_data)
}
