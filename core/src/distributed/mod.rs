//! # Collective groups
//!
//! Every pipeline stage runs as one master and `N` workers that talk over a
//! [`CollectiveGroup`]: a **broadcast** channel (master to every worker) and
//! a **reduce** channel (every worker to the master, folded with an
//! associative [`Reducer`]).
//!
//! ## Round semantics
//!
//! *   Nothing moves until every participant has joined: the first operation on
//!     any endpoint waits on the group's entry barrier.
//! *   A reduce round completes only after each worker has contributed exactly
//!     one value for that round. Contributions are combined in arrival order,
//!     so combiners must be commutative as well as associative.
//! *   A worker cannot start round `r + 1` before it has received round `r`'s
//!     broadcast, because it blocks on that receive.
//! *   [`Frame::End`] is the reserved end-of-loop sentinel.
//!
//! ## Transport
//!
//! Point-to-point `crossbeam` channels: one broadcast sender per worker and
//! one reduce receiver per worker on the master side, collected with
//! `crossbeam::channel::Select`. A participant that goes away drops its
//! channel ends, and its peers observe [`CollectiveError::Disconnected`]
//! instead of waiting forever.

use thiserror::Error;

pub mod collective;
pub mod reducer;

pub use collective::{CollectiveGroup, Frame, GroupBuilder, MasterEndpoint, WorkerEndpoint};
pub use reducer::{Concat, ElementwiseSum, Reducer, Summable};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectiveError {
    #[error("group {group}: topology is missing a {missing} operator")]
    IncompleteTopology {
        group: String,
        missing: &'static str,
    },
    #[error("group {group}: a group needs at least one worker")]
    NoWorkers { group: String },
    #[error("group {group}: the master endpoint was already claimed")]
    MasterTaken { group: String },
    #[error("group {group}: all {workers} worker endpoints were already claimed")]
    Exhausted { group: String, workers: usize },
    #[error("group {group}: the group was aborted")]
    Aborted { group: String },
    #[error("group {group}: participant {participant} disconnected")]
    Disconnected { group: String, participant: String },
    #[error("group {group}: unexpected end-of-loop sentinel")]
    UnexpectedEnd { group: String },
    #[error("group {group}: combine failed: {reason}")]
    Combine { group: String, reason: String },
}
