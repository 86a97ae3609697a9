//! Steps every execution slot through the stage list exactly once.

use crate::stages::Stage;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// What a slot should do next.
pub enum Dispatch<'a> {
    /// Run `stage`, the `index`-th of the pipeline, in the given role.
    Submit {
        index: usize,
        stage: &'a Stage,
        is_master: bool,
    },
    /// Every stage has run on this slot; release it.
    Close,
}

#[derive(Default)]
struct Cursors {
    positions: HashMap<String, usize>,
    master: Option<String>,
}

/// Owns the ordered stages and one cursor per evaluator.
///
/// Roles are keyed on the evaluator identity rather than on any per-stage
/// context, so a slot keeps its role for the whole run. The first evaluator
/// activated with the master hint becomes the master; later hints naming a
/// different evaluator are ignored.
pub struct StageScheduler {
    stages: Vec<Stage>,
    cursors: Mutex<Cursors>,
}

impl StageScheduler {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            cursors: Mutex::new(Cursors::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Advances `evaluator` by one stage.
    ///
    /// Called on slot activation and after every completed stage.
    pub fn next(&self, evaluator: &str, master_hint: bool) -> Dispatch<'_> {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);

        if master_hint && cursors.master.is_none() {
            cursors.master = Some(evaluator.to_string());
        } else if master_hint && cursors.master.as_deref() != Some(evaluator) {
            warn!(evaluator, master = ?cursors.master, "master hint ignored; master already chosen");
        }
        let is_master = cursors.master.as_deref() == Some(evaluator);

        let cursor = cursors.positions.entry(evaluator.to_string()).or_insert(0);
        if *cursor >= self.stages.len() {
            debug!(evaluator, "all stages done; closing slot");
            return Dispatch::Close;
        }

        let index = *cursor;
        *cursor += 1;
        let stage = &self.stages[index];
        debug!(evaluator, stage = stage.name(), index, is_master, "dispatching stage");
        Dispatch::Submit {
            index,
            stage,
            is_master,
        }
    }

    pub fn is_master(&self, evaluator: &str) -> bool {
        let cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        cursors.master.as_deref() == Some(evaluator)
    }

    /// Number of stages already dispatched to `evaluator`.
    pub fn position(&self, evaluator: &str) -> usize {
        let cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        cursors.positions.get(evaluator).copied().unwrap_or(0)
    }

    /// Aborts every stage so that slots blocked in a collective group fail
    /// instead of waiting for a peer that is gone.
    pub fn abort(&self) {
        warn!("aborting all stages");
        for stage in &self.stages {
            stage.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;
    use std::thread;

    fn scheduler(workers: usize) -> StageScheduler {
        let config = Config::new(10, 2, 3, 0.5, workers);
        StageScheduler::new(Stage::build_all(&config).unwrap())
    }

    fn drain(s: &StageScheduler, evaluator: &str, hint: bool) -> Vec<(&'static str, bool)> {
        let mut seen = Vec::new();
        let mut hint = hint;
        while let Dispatch::Submit {
            stage, is_master, ..
        } = s.next(evaluator, hint)
        {
            seen.push((stage.name(), is_master));
            hint = false;
        }
        seen
    }

    #[test]
    fn test_each_stage_dispatched_once_then_closed() {
        let s = scheduler(1);
        let seen = drain(&s, "a", false);
        let names: Vec<_> = seen.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["partition", "whiten", "m1", "m3", "als", "unwhiten"]);
        assert!(matches!(s.next("a", false), Dispatch::Close));
        assert_eq!(s.position("a"), s.len());
    }

    #[test]
    fn test_master_role_sticks_to_evaluator() {
        let s = scheduler(1);
        let seen = drain(&s, "m", true);
        assert!(seen.iter().all(|&(_, is_master)| is_master));
        assert!(s.is_master("m"));

        let seen = drain(&s, "w", false);
        assert!(seen.iter().all(|&(_, is_master)| !is_master));
    }

    #[test]
    fn test_first_master_hint_wins() {
        let s = scheduler(2);
        assert!(matches!(
            s.next("first", true),
            Dispatch::Submit { is_master: true, .. }
        ));
        assert!(matches!(
            s.next("second", true),
            Dispatch::Submit {
                is_master: false,
                ..
            }
        ));
        assert!(!s.is_master("second"));
    }

    #[test]
    fn test_concurrent_cursors_are_independent() {
        let s = Arc::new(scheduler(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = Arc::clone(&s);
                thread::spawn(move || drain(&s, &format!("slot-{i}"), false).len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 6);
        }
        for i in 0..8 {
            assert_eq!(s.position(&format!("slot-{i}")), 6);
        }
    }
}
