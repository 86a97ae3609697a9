//! Pipeline-level error type.

use crate::config::ConfigError;
use crate::distributed::CollectiveError;
use crate::matrix::MatrixError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Collective(#[from] CollectiveError),
    /// A stage was handed slot state it cannot consume: stages ran out of order.
    #[error("stage {stage} cannot run on a slot in state {state}")]
    OutOfOrder {
        stage: &'static str,
        state: &'static str,
    },
    #[error("stage {stage}: slot state disagrees with the scheduled role (master: {is_master})")]
    RoleMismatch { stage: &'static str, is_master: bool },
    #[error("stage {stage}: expected a {expected} broadcast")]
    UnexpectedPayload {
        stage: &'static str,
        expected: &'static str,
    },
    #[error("document {document}: {reason}")]
    InvalidDocument { document: u64, reason: String },
    #[error("all {workers} worker partitions were already assigned")]
    PartitionsExhausted { workers: usize },
    #[error("degenerate input: {0}")]
    Degenerate(&'static str),
    #[error("execution slot {slot} panicked")]
    SlotPanicked { slot: String },
    #[error("the master slot finished without an estimate")]
    NoEstimate,
}

impl PipelineError {
    /// True for failures caused by a peer going away rather than by this slot.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            PipelineError::Collective(
                CollectiveError::Disconnected { .. } | CollectiveError::Aborted { .. }
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
