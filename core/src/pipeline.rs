//! In-process runtime: one thread per execution slot, driven by the
//! [`StageScheduler`].

use crate::config::{Config, ConfigError};
use crate::document::Document;
use crate::error::{PipelineError, Result};
use crate::scheduler::{Dispatch, StageScheduler};
use crate::stages::{Estimate, SlotState, Stage};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{error, info};

const MASTER_SLOT: &str = "master";

/// A validated configuration, ready to fit corpora.
///
/// ```rust,no_run
/// use tf_moments::{Config, Document, Pipeline};
///
/// # fn corpus() -> Vec<Vec<Document>> { unimplemented!() }
/// let pipeline = Pipeline::new(Config::new(20, 4, 6, 0.1, 2))?;
/// let estimate = pipeline.run(corpus())?;
/// assert_eq!(estimate.alpha.cols(), 4);
/// # Ok::<(), tf_moments::PipelineError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fits one corpus, given as one document list per worker.
    ///
    /// Spawns a master slot and one slot per partition. If any slot fails,
    /// every collective group is aborted so the others unblock, and the
    /// first failure that is not merely a peer disconnect is returned.
    pub fn run(&self, partitions: Vec<Vec<Document>>) -> Result<Estimate> {
        let expected = self.config.num_partitions();
        if partitions.len() != expected {
            return Err(ConfigError::PartitionCount {
                expected,
                got: partitions.len(),
            }
            .into());
        }

        let scheduler = StageScheduler::new(Stage::build_all(&self.config)?);
        info!(
            workers = expected,
            documents = partitions.iter().map(Vec::len).sum::<usize>(),
            stages = scheduler.len(),
            "pipeline started"
        );

        let mut slots = vec![(MASTER_SLOT.to_string(), true, Vec::new())];
        slots.extend(
            partitions
                .into_iter()
                .enumerate()
                .map(|(i, documents)| (format!("worker-{i}"), false, documents)),
        );

        let outcomes: Vec<(String, Result<SlotState>)> = thread::scope(|scope| {
            let handles: Vec<_> = slots
                .into_iter()
                .map(|(name, hint, documents)| {
                    let scheduler = &scheduler;
                    let config = &self.config;
                    let slot = name.clone();
                    let handle =
                        scope.spawn(move || drive(scheduler, config, &slot, hint, documents));
                    (name, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(PipelineError::SlotPanicked { slot: name.clone() })
                    });
                    (name, outcome)
                })
                .collect()
        });

        let mut estimate = None;
        let mut failure: Option<PipelineError> = None;
        for (slot, outcome) in outcomes {
            match outcome {
                Ok(state) => {
                    if let Some(found) = state.into_estimate() {
                        estimate = Some(found);
                    }
                }
                Err(err) => {
                    error!(slot, error = %err, "slot failed");
                    failure = match failure {
                        Some(first) if first.is_disconnect() && !err.is_disconnect() => Some(err),
                        Some(first) => Some(first),
                        None => Some(err),
                    };
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        let estimate = estimate.ok_or(PipelineError::NoEstimate)?;
        info!(topics = estimate.num_topics(), "pipeline finished");
        Ok(estimate)
    }
}

/// Runs one slot until the scheduler closes it.
fn drive(
    scheduler: &StageScheduler,
    config: &Config,
    slot: &str,
    master_hint: bool,
    documents: Vec<Document>,
) -> Result<SlotState> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<SlotState> {
        let mut state = SlotState::Idle { documents };
        let mut hint = master_hint;
        loop {
            match scheduler.next(slot, hint) {
                Dispatch::Close => return Ok(state),
                Dispatch::Submit {
                    stage, is_master, ..
                } => {
                    hint = false;
                    state = stage.submit(state, is_master, config)?;
                }
            }
        }
    }));

    let result = outcome.unwrap_or_else(|_| {
        Err(PipelineError::SlotPanicked {
            slot: slot.to_string(),
        })
    });
    if result.is_err() {
        scheduler.abort();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let err = Pipeline::new(Config::new(10, 4, 3, 0.5, 1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::InconsistentDimensions { .. })
        ));
    }

    #[test]
    fn test_partition_count_must_match() {
        let pipeline = Pipeline::new(Config::new(10, 2, 3, 0.5, 2)).unwrap();
        let err = pipeline.run(vec![Vec::new()]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::PartitionCount {
                expected: 2,
                got: 1
            })
        ));
    }
}
