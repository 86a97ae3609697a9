use super::{CollectiveError, Reducer};
use crossbeam::channel::{unbounded, Receiver, Select, Sender};
use crossbeam::sync::WaitGroup;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

pub type Result<T> = std::result::Result<T, CollectiveError>;

/// A broadcast message: a shared payload or the end-of-loop sentinel.
#[derive(Debug)]
pub enum Frame<T> {
    Data(Arc<T>),
    End,
}

impl<T> Clone for Frame<T> {
    fn clone(&self) -> Self {
        match self {
            Frame::Data(value) => Frame::Data(Arc::clone(value)),
            Frame::End => Frame::End,
        }
    }
}

/// Builds a [`CollectiveGroup`].
///
/// Both operators must be registered before [`GroupBuilder::finalize`];
/// the topology is frozen afterwards.
///
/// ```rust
/// use tf_moments::distributed::{CollectiveGroup, ElementwiseSum, GroupBuilder};
///
/// let group: CollectiveGroup<Vec<f64>, Vec<f64>> = GroupBuilder::new("m1", 2)
///     .broadcast()
///     .reduce(ElementwiseSum)
///     .finalize()
///     .unwrap();
/// assert_eq!(group.workers(), 2);
/// ```
pub struct GroupBuilder<B, R> {
    name: String,
    workers: usize,
    broadcast: bool,
    reducer: Option<Arc<dyn Reducer<R>>>,
    _marker: PhantomData<fn() -> B>,
}

impl<B, R> GroupBuilder<B, R>
where
    B: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
            broadcast: false,
            reducer: None,
            _marker: PhantomData,
        }
    }

    /// Registers the broadcast operator (sender: master).
    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Registers the reduce operator (receiver: master) with its combiner.
    pub fn reduce(mut self, reducer: impl Reducer<R> + 'static) -> Self {
        let reducer: Arc<dyn Reducer<R>> = Arc::new(reducer);
        self.reducer = Some(reducer);
        self
    }

    /// Freezes the topology and wires one master plus `workers` endpoints.
    pub fn finalize(self) -> Result<CollectiveGroup<B, R>> {
        if self.workers == 0 {
            return Err(CollectiveError::NoWorkers { group: self.name });
        }
        if !self.broadcast {
            return Err(CollectiveError::IncompleteTopology {
                group: self.name,
                missing: "broadcast",
            });
        }
        let Some(reducer) = self.reducer else {
            return Err(CollectiveError::IncompleteTopology {
                group: self.name,
                missing: "reduce",
            });
        };

        let name: Arc<str> = Arc::from(self.name);
        let barrier = WaitGroup::new();

        let mut broadcast_tx = Vec::with_capacity(self.workers);
        let mut reduce_rx = Vec::with_capacity(self.workers);
        let mut workers = VecDeque::with_capacity(self.workers);

        for index in 0..self.workers {
            let (b_tx, b_rx) = unbounded();
            let (r_tx, r_rx) = unbounded();
            broadcast_tx.push(b_tx);
            reduce_rx.push(r_rx);
            workers.push_back(WorkerEndpoint {
                group: Arc::clone(&name),
                index,
                broadcast: b_rx,
                reduce: r_tx,
                barrier: Some(barrier.clone()),
            });
        }

        let master = MasterEndpoint {
            group: Arc::clone(&name),
            broadcast: broadcast_tx,
            reduce: reduce_rx,
            reducer,
            barrier: Some(barrier.clone()),
            rounds: 0,
        };
        drop(barrier);

        debug!(group = %name, workers = self.workers, "collective group finalized");
        Ok(CollectiveGroup {
            name,
            workers: self.workers,
            pool: Mutex::new(Some(Pool {
                master: Some(master),
                workers,
            })),
        })
    }
}

struct Pool<B, R> {
    master: Option<MasterEndpoint<B, R>>,
    workers: VecDeque<WorkerEndpoint<B, R>>,
}

/// One master and a fixed number of workers joined by a broadcast channel
/// and a reduce channel.
///
/// Participants claim their endpoint with [`join_master`](Self::join_master)
/// or [`join_worker`](Self::join_worker). Endpoints are handed out at most
/// once; dropping one disconnects that participant.
pub struct CollectiveGroup<B, R> {
    name: Arc<str>,
    workers: usize,
    pool: Mutex<Option<Pool<B, R>>>,
}

impl<B, R> CollectiveGroup<B, R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn join_master(&self) -> Result<MasterEndpoint<B, R>> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let pool = pool.as_mut().ok_or_else(|| self.aborted())?;
        pool.master.take().ok_or_else(|| CollectiveError::MasterTaken {
            group: self.name.to_string(),
        })
    }

    /// Claims the next free worker endpoint, in index order.
    pub fn join_worker(&self) -> Result<WorkerEndpoint<B, R>> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let pool = pool.as_mut().ok_or_else(|| self.aborted())?;
        pool.workers
            .pop_front()
            .ok_or_else(|| CollectiveError::Exhausted {
                group: self.name.to_string(),
                workers: self.workers,
            })
    }

    /// Drops every endpoint nobody has claimed yet and refuses later joins.
    ///
    /// Participants already inside the group see their peers disconnect.
    pub fn abort(&self) {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.take().is_some() {
            debug!(group = %self.name, "collective group aborted");
        }
    }

    fn aborted(&self) -> CollectiveError {
        CollectiveError::Aborted {
            group: self.name.to_string(),
        }
    }
}

/// The master's side of a group: broadcast sender and reduce receiver.
pub struct MasterEndpoint<B, R> {
    group: Arc<str>,
    broadcast: Vec<Sender<Frame<B>>>,
    reduce: Vec<Receiver<R>>,
    reducer: Arc<dyn Reducer<R>>,
    barrier: Option<WaitGroup>,
    rounds: u64,
}

impl<B, R> MasterEndpoint<B, R> {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn workers(&self) -> usize {
        self.broadcast.len()
    }

    /// Sends `value` to every worker.
    pub fn broadcast(&mut self, value: B) -> Result<()> {
        self.send_frame(Frame::Data(Arc::new(value)))
    }

    /// Sends the end-of-loop sentinel to every worker.
    pub fn broadcast_end(&mut self) -> Result<()> {
        self.send_frame(Frame::End)
    }

    /// Blocks until every worker has contributed one value for this round and
    /// returns their combination.
    pub fn reduce(&mut self) -> Result<R> {
        self.enter();

        let mut pending: Vec<usize> = (0..self.reduce.len()).collect();
        let mut acc: Option<R> = None;

        while !pending.is_empty() {
            let mut select = Select::new();
            for &worker in &pending {
                select.recv(&self.reduce[worker]);
            }
            let op = select.select();
            let slot = op.index();
            let worker = pending[slot];
            let value = op
                .recv(&self.reduce[worker])
                .map_err(|_| self.disconnected(worker))?;
            pending.swap_remove(slot);

            acc = Some(match acc {
                None => value,
                Some(prev) => {
                    self.reducer
                        .combine(prev, value)
                        .map_err(|e| CollectiveError::Combine {
                            group: self.group.to_string(),
                            reason: e.to_string(),
                        })?
                }
            });
        }

        trace!(group = %self.group, round = self.rounds, "reduce round complete");
        self.rounds += 1;
        acc.ok_or_else(|| CollectiveError::NoWorkers {
            group: self.group.to_string(),
        })
    }

    fn send_frame(&mut self, frame: Frame<B>) -> Result<()> {
        self.enter();
        for (worker, tx) in self.broadcast.iter().enumerate() {
            tx.send(frame.clone())
                .map_err(|_| self.disconnected(worker))?;
        }
        Ok(())
    }

    fn enter(&mut self) {
        if let Some(barrier) = self.barrier.take() {
            trace!(group = %self.group, "master waiting for full membership");
            barrier.wait();
        }
    }

    fn disconnected(&self, worker: usize) -> CollectiveError {
        CollectiveError::Disconnected {
            group: self.group.to_string(),
            participant: format!("worker {worker}"),
        }
    }
}

/// A worker's side of a group: broadcast receiver and reduce sender.
pub struct WorkerEndpoint<B, R> {
    group: Arc<str>,
    index: usize,
    broadcast: Receiver<Frame<B>>,
    reduce: Sender<R>,
    barrier: Option<WaitGroup>,
}

impl<B, R> WorkerEndpoint<B, R> {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Contributes this worker's value to the current reduce round.
    pub fn send(&mut self, value: R) -> Result<()> {
        self.enter();
        self.reduce
            .send(value)
            .map_err(|_| self.master_disconnected())
    }

    /// Receives the next broadcast payload. The end-of-loop sentinel is an
    /// error here; loops that expect it use [`receive_until_end`](Self::receive_until_end).
    pub fn receive(&mut self) -> Result<Arc<B>> {
        match self.receive_frame()? {
            Frame::Data(value) => Ok(value),
            Frame::End => Err(CollectiveError::UnexpectedEnd {
                group: self.group.to_string(),
            }),
        }
    }

    /// Receives the next broadcast payload, or `None` on the sentinel.
    pub fn receive_until_end(&mut self) -> Result<Option<Arc<B>>> {
        match self.receive_frame()? {
            Frame::Data(value) => Ok(Some(value)),
            Frame::End => Ok(None),
        }
    }

    fn receive_frame(&mut self) -> Result<Frame<B>> {
        self.enter();
        self.broadcast
            .recv()
            .map_err(|_| self.master_disconnected())
    }

    fn enter(&mut self) {
        if let Some(barrier) = self.barrier.take() {
            trace!(group = %self.group, worker = self.index, "worker waiting for full membership");
            barrier.wait();
        }
    }

    fn master_disconnected(&self) -> CollectiveError {
        CollectiveError::Disconnected {
            group: self.group.to_string(),
            participant: "master".to_string(),
        }
    }
}
