use crate::{check_len, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Contracts a band of a symmetric third-order tensor against two factors.
///
/// `slice` is `[rows, k*k]`; row `i` holds the `k x k` matrix `T_i` in
/// row-major order (entry `(j, l)` at column `j*k + l`). `first` and `second`
/// are `[k, k]`. The result is `[rows, k]` with
///
/// ```text
/// out[i][c] = first[:, c]ᵗ · T_i · second[:, c]
/// ```
///
/// which is row `i` of `T_(1) · (second ⊙ first)`, the Khatri-Rao right-hand
/// side of the ALS normal equations.
pub fn cpu_khatri_rao<T>(
    slice: &[T],
    first: &[T],
    second: &[T],
    rows: usize,
    k: usize,
) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(slice.len(), &[rows, k * k])?;
    check_len(first.len(), &[k, k])?;
    if second.len() != first.len() {
        return Err(KernelError::ShapeMismatch {
            expected: vec![k, k],
            got: vec![second.len()],
        });
    }

    let mut out = vec![T::zero(); rows * k];
    if rows == 0 || k == 0 {
        return Ok(out);
    }

    out.as_mut_slice()
        .par_chunks_mut(k)
        .enumerate()
        .for_each(|(i, out_row)| {
            let t_i = &slice[i * k * k..(i + 1) * k * k];
            for (c, out_elem) in out_row.iter_mut().enumerate() {
                let mut acc = T::zero();
                for a in 0..k {
                    let fa = first[a * k + c];
                    if fa == T::zero() {
                        continue;
                    }
                    let t_row = &t_i[a * k..(a + 1) * k];
                    let mut inner = T::zero();
                    for (b, &t) in t_row.iter().enumerate() {
                        inner += t * second[b * k + c];
                    }
                    acc += fa * inner;
                }
                *out_elem = acc;
            }
        });

    Ok(out)
}
