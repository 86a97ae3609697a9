use crate::{check_len, KernelElem, Result};
use rayon::prelude::*;

/// CPU transpose `[m, n] -> [n, m]`, parallel over output rows.
pub fn cpu_transpose<T>(data: &[T], shape: &[usize; 2]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(data.len(), shape)?;
    let [m, n] = *shape;
    let mut out_data = vec![T::zero(); m * n];
    if m == 0 || n == 0 {
        return Ok(out_data);
    }

    // Output row `col` is input column `col`.
    out_data
        .as_mut_slice()
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(col, out_row)| {
            for (r, out_elem) in out_row.iter_mut().enumerate() {
                *out_elem = data[r * n + col];
            }
        });

    Ok(out_data)
}
