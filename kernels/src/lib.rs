//! Slice-level CPU kernels used by `tf-moments`.
//!
//! Every kernel takes flat row-major buffers plus explicit shapes and returns
//! a freshly allocated output buffer. Work is split over output rows with
//! `rayon`.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_khatri_rao;
pub mod cpu_matmul;
pub mod cpu_transpose;

pub use cpu_khatri_rao::cpu_khatri_rao;
pub use cpu_matmul::cpu_matmul;
pub use cpu_transpose::cpu_transpose;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// Only `f64` is used by `tf-moments`; the kernels stay generic.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

pub(crate) fn check_len(data_len: usize, shape: &[usize; 2]) -> Result<()> {
    let size = shape[0] * shape[1];
    if data_len != size {
        return Err(KernelError::ShapeMismatch {
            expected: vec![size],
            got: vec![data_len],
        });
    }
    Ok(())
}
