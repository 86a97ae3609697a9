//! Partition assignment: splits the latent dimension across workers.

use crate::document::Document;
use crate::error::{PipelineError, Result};
use std::ops::Range;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// A slot's share of the work: its documents and its band of latent rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub documents: Vec<Document>,
    pub range: Range<usize>,
}

/// Splits `[0, total)` into `parts` contiguous ranges.
///
/// Each chunk is the remaining size divided by the remaining part count,
/// rounded up, so chunk sizes never increase: `(10, 3)` gives `4, 3, 3`.
pub fn partition_ranges(total: usize, parts: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for left in (1..=parts).rev() {
        let chunk = (total - start).div_ceil(left);
        ranges.push(start..start + chunk);
        start += chunk;
    }
    ranges
}

struct Cursor {
    start: usize,
    workers_left: usize,
}

/// Hands out latent-dimension ranges to workers in arrival order.
///
/// The master always gets the full range `[0, dim_k)`. Worker ranges are
/// pairwise disjoint and together cover `[0, dim_k)`.
pub struct PartitionAssigner {
    dim_d: usize,
    dim_k: usize,
    workers: usize,
    cursor: Mutex<Cursor>,
}

impl PartitionAssigner {
    pub fn new(dim_d: usize, dim_k: usize, workers: usize) -> Self {
        Self {
            dim_d,
            dim_k,
            workers,
            cursor: Mutex::new(Cursor {
                start: 0,
                workers_left: workers,
            }),
        }
    }

    pub fn assign_master(&self) -> Partition {
        debug!(range = ?(0..self.dim_k), "assigned master partition");
        Partition {
            documents: Vec::new(),
            range: 0..self.dim_k,
        }
    }

    /// Validates `documents` and assigns the next range.
    pub fn assign_worker(&self, documents: Vec<Document>) -> Result<Partition> {
        for doc in &documents {
            self.validate(doc)?;
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if cursor.workers_left == 0 {
            return Err(PipelineError::PartitionsExhausted {
                workers: self.workers,
            });
        }
        let chunk = (self.dim_k - cursor.start).div_ceil(cursor.workers_left);
        let range = cursor.start..cursor.start + chunk;
        cursor.start += chunk;
        cursor.workers_left -= 1;

        debug!(?range, documents = documents.len(), "assigned worker partition");
        Ok(Partition { documents, range })
    }

    fn validate(&self, doc: &Document) -> Result<()> {
        for token in doc.tokens() {
            if token.id as usize >= self.dim_d {
                return Err(PipelineError::InvalidDocument {
                    document: doc.id(),
                    reason: format!(
                        "token id {} is outside the vocabulary of {}",
                        token.id, self.dim_d
                    ),
                });
            }
            if !(token.count.is_finite() && token.count >= 0.0) {
                return Err(PipelineError::InvalidDocument {
                    document: doc.id(),
                    reason: format!("token {} has count {}", token.id, token.count),
                });
            }
        }
        Ok(())
    }
}
