//! The stage protocols and the per-slot state they hand to each other.
//!
//! A pipeline is the fixed sequence
//!
//! ```text
//! Partition -> Whiten -> FirstMoment -> ThirdMoment -> Als -> Unwhiten
//! ```
//!
//! Every stage after `Partition` owns a [`CollectiveGroup`] and a pair of
//! functions, one for the master role and one for the worker role. A slot's
//! state is moved into the stage and the stage's output becomes the slot's
//! new state, so a value produced by one stage is consumed exactly once by
//! the next and cannot be read before it exists.

use crate::config::Config;
use crate::distributed::{CollectiveError, CollectiveGroup, MasterEndpoint, WorkerEndpoint};
use crate::document::Document;
use crate::error::{PipelineError, Result};
use crate::partition::{Partition, PartitionAssigner};
use tracing::{info, warn};

pub mod als;
pub mod m1;
pub mod m3;
pub mod unwhiten;
pub mod whiten;

pub use als::{AlsModel, FactorizedMaster, FactorizedWorker};
pub use m1::{FirstMomentMaster, FirstMomentWorker};
pub use m3::{M3Model, MomentPartial, ThirdMomentMaster, ThirdMomentWorker};
pub use unwhiten::Estimate;
pub use whiten::{WhitenStats, WhitenedMaster, WhitenedWorker};

type MasterFn<B, R, I, O> = fn(I, &mut MasterEndpoint<B, R>, &Config) -> Result<O>;
type WorkerFn<B, R, I, O> = fn(I, &mut WorkerEndpoint<B, R>, &Config) -> Result<O>;

/// A collective group together with the master and worker logic that runs on it.
///
/// * `B`, `R` - broadcast and reduce payloads.
/// * `MI`, `MO` - master input and output state.
/// * `WI`, `WO` - worker input and output state.
pub struct StageGroup<B, R, MI, MO, WI, WO> {
    group: CollectiveGroup<B, R>,
    master: MasterFn<B, R, MI, MO>,
    worker: WorkerFn<B, R, WI, WO>,
}

impl<B, R, MI, MO, WI, WO> StageGroup<B, R, MI, MO, WI, WO> {
    pub fn new(
        group: CollectiveGroup<B, R>,
        master: MasterFn<B, R, MI, MO>,
        worker: WorkerFn<B, R, WI, WO>,
    ) -> Self {
        Self {
            group,
            master,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        self.group.name()
    }

    pub fn run_master(&self, input: MI, config: &Config) -> Result<MO> {
        let mut endpoint = self.group.join_master()?;
        (self.master)(input, &mut endpoint, config)
    }

    pub fn run_worker(&self, input: WI, config: &Config) -> Result<WO> {
        let mut endpoint = self.group.join_worker()?;
        (self.worker)(input, &mut endpoint, config)
    }

    pub fn abort(&self) {
        self.group.abort();
    }
}

/// One step of the pipeline.
pub enum Stage {
    Partition(PartitionAssigner),
    Whiten(whiten::WhitenGroup),
    FirstMoment(m1::FirstMomentGroup),
    ThirdMoment(m3::ThirdMomentGroup),
    Als(als::AlsGroup),
    Unwhiten(unwhiten::UnwhitenGroup),
}

impl Stage {
    /// Builds the full stage list for `config`, one group per stage.
    pub fn build_all(config: &Config) -> std::result::Result<Vec<Stage>, CollectiveError> {
        let workers = config.num_partitions();
        Ok(vec![
            Stage::Partition(PartitionAssigner::new(
                config.dim_d(),
                config.dim_k(),
                workers,
            )),
            Stage::Whiten(whiten::group(workers)?),
            Stage::FirstMoment(m1::group(workers)?),
            Stage::ThirdMoment(m3::group(workers)?),
            Stage::Als(als::group(workers)?),
            Stage::Unwhiten(unwhiten::group(workers)?),
        ])
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Partition(_) => "partition",
            Stage::Whiten(_) => "whiten",
            Stage::FirstMoment(_) => "m1",
            Stage::ThirdMoment(_) => "m3",
            Stage::Als(_) => "als",
            Stage::Unwhiten(_) => "unwhiten",
        }
    }

    /// Drops the stage's unclaimed endpoints so that nobody blocks on it.
    pub fn abort(&self) {
        match self {
            Stage::Partition(_) => {}
            Stage::Whiten(g) => g.abort(),
            Stage::FirstMoment(g) => g.abort(),
            Stage::ThirdMoment(g) => g.abort(),
            Stage::Als(g) => g.abort(),
            Stage::Unwhiten(g) => g.abort(),
        }
    }

    /// Runs this stage on one slot and returns the slot's next state.
    ///
    /// # Errors
    ///
    /// `RoleMismatch` if the slot's state belongs to the other role, and
    /// `OutOfOrder` if the state is not the one this stage consumes.
    pub fn submit(&self, state: SlotState, is_master: bool, config: &Config) -> Result<SlotState> {
        let stage = self.name();
        if let Some(slot_is_master) = state.role() {
            if slot_is_master != is_master {
                return Err(PipelineError::RoleMismatch { stage, is_master });
            }
        }
        info!(stage, is_master, "stage started");

        use MasterSlot as M;
        use SlotState::{Master, Worker};
        use WorkerSlot as W;

        let next = match (self, state) {
            (Stage::Partition(p), SlotState::Idle { documents }) => {
                if is_master {
                    if !documents.is_empty() {
                        warn!(
                            documents = documents.len(),
                            "master slot was given documents; ignoring them"
                        );
                    }
                    Master(M::Ready(p.assign_master()))
                } else {
                    Worker(W::Ready(p.assign_worker(documents)?))
                }
            }
            (Stage::Whiten(g), Master(M::Ready(p))) => Master(M::Whitened(g.run_master(p, config)?)),
            (Stage::Whiten(g), Worker(W::Ready(p))) => Worker(W::Whitened(g.run_worker(p, config)?)),
            (Stage::FirstMoment(g), Master(M::Whitened(s))) => {
                Master(M::FirstMoment(g.run_master(s, config)?))
            }
            (Stage::FirstMoment(g), Worker(W::Whitened(s))) => {
                Worker(W::FirstMoment(g.run_worker(s, config)?))
            }
            (Stage::ThirdMoment(g), Master(M::FirstMoment(s))) => {
                Master(M::ThirdMoment(g.run_master(s, config)?))
            }
            (Stage::ThirdMoment(g), Worker(W::FirstMoment(s))) => {
                Worker(W::ThirdMoment(g.run_worker(s, config)?))
            }
            (Stage::Als(g), Master(M::ThirdMoment(s))) => {
                Master(M::Factorized(g.run_master(s, config)?))
            }
            (Stage::Als(g), Worker(W::ThirdMoment(s))) => {
                Worker(W::Factorized(g.run_worker(s, config)?))
            }
            (Stage::Unwhiten(g), Master(M::Factorized(s))) => {
                Master(M::Finished(g.run_master(s, config)?))
            }
            (Stage::Unwhiten(g), Worker(W::Factorized(s))) => {
                g.run_worker(s, config)?;
                Worker(W::Finished)
            }
            (_, state) => {
                return Err(PipelineError::OutOfOrder {
                    stage,
                    state: state.label(),
                })
            }
        };

        info!(stage, is_master, "stage complete");
        Ok(next)
    }
}

/// Everything an execution slot carries from one stage to the next.
#[derive(Debug)]
pub enum SlotState {
    /// Before partition assignment.
    Idle { documents: Vec<Document> },
    Master(MasterSlot),
    Worker(WorkerSlot),
}

#[derive(Debug)]
pub enum MasterSlot {
    Ready(Partition),
    Whitened(WhitenedMaster),
    FirstMoment(FirstMomentMaster),
    ThirdMoment(ThirdMomentMaster),
    Factorized(FactorizedMaster),
    Finished(Estimate),
}

#[derive(Debug)]
pub enum WorkerSlot {
    Ready(Partition),
    Whitened(WhitenedWorker),
    FirstMoment(FirstMomentWorker),
    ThirdMoment(ThirdMomentWorker),
    Factorized(FactorizedWorker),
    Finished,
}

impl SlotState {
    /// `Some(true)` for master state, `Some(false)` for worker state, `None`
    /// before a role has been assigned.
    pub fn role(&self) -> Option<bool> {
        match self {
            SlotState::Idle { .. } => None,
            SlotState::Master(_) => Some(true),
            SlotState::Worker(_) => Some(false),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SlotState::Idle { .. } => "idle",
            SlotState::Master(m) => match m {
                MasterSlot::Ready(_) => "master/ready",
                MasterSlot::Whitened(_) => "master/whitened",
                MasterSlot::FirstMoment(_) => "master/first-moment",
                MasterSlot::ThirdMoment(_) => "master/third-moment",
                MasterSlot::Factorized(_) => "master/factorized",
                MasterSlot::Finished(_) => "master/finished",
            },
            SlotState::Worker(w) => match w {
                WorkerSlot::Ready(_) => "worker/ready",
                WorkerSlot::Whitened(_) => "worker/whitened",
                WorkerSlot::FirstMoment(_) => "worker/first-moment",
                WorkerSlot::ThirdMoment(_) => "worker/third-moment",
                WorkerSlot::Factorized(_) => "worker/factorized",
                WorkerSlot::Finished => "worker/finished",
            },
        }
    }

    /// Takes the final estimate out of a finished master slot.
    pub fn into_estimate(self) -> Option<Estimate> {
        match self {
            SlotState::Master(MasterSlot::Finished(estimate)) => Some(estimate),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let config = Config::new(10, 2, 3, 0.5, 2);
        let names: Vec<_> = Stage::build_all(&config)
            .unwrap()
            .iter()
            .map(Stage::name)
            .collect();
        assert_eq!(names, ["partition", "whiten", "m1", "m3", "als", "unwhiten"]);
    }

    #[test]
    fn test_out_of_order_state_is_rejected() {
        let config = Config::new(10, 2, 3, 0.5, 1);
        let stages = Stage::build_all(&config).unwrap();

        // An idle slot cannot skip partition assignment.
        let err = stages[2]
            .submit(SlotState::Idle { documents: vec![] }, false, &config)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrder {
                stage: "m1",
                state: "idle"
            }
        ));
    }

    #[test]
    fn test_role_mismatch_is_rejected() {
        let config = Config::new(10, 2, 3, 0.5, 1);
        let stages = Stage::build_all(&config).unwrap();

        let state = stages[0]
            .submit(SlotState::Idle { documents: vec![] }, true, &config)
            .unwrap();
        assert_eq!(state.label(), "master/ready");

        let err = stages[1].submit(state, false, &config).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RoleMismatch {
                stage: "whiten",
                is_master: false
            }
        ));
    }
}
