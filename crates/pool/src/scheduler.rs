//! Batch scheduler: admission control over a bounded number of workers.
//!
//! The scheduler runs on the caller's thread. It starts the [`Collector`],
//! launches workers while fewer than `concurrency_limit` are active, and
//! otherwise blocks on a completion channel that every supervisor signals
//! exactly once. With a limit of 1 no worker is spawned at all: jobs run
//! inline, one after the other, and still deliver through the mailbox.

use std::collections::HashMap;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use fmupool_core::{
    BatchId, DiagnosticSink, Failure, JobIndex, JobSpec, ModelHandle, Outcome, SimulationEngine,
};

use crate::aggregator::{self, BatchReport};
use crate::collector::Collector;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::job::Job;
use crate::launcher::{Launcher, RunningWorker, ThreadLauncher};
use crate::mailbox::{Outbox, mailbox};
use crate::worker::WorkerRequest;

/// Lifecycle of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Dispatching,
    Draining,
    /// Dispatch stopped early; the batch returns an error.
    Aborted,
    Done,
}

/// Admission-control bookkeeping for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchState {
    pub phase: Phase,
    pub concurrency_limit: usize,
    pub total: usize,
    pub launched: usize,
    pub active: usize,
    pub peak_active: usize,
}

impl BatchState {
    fn new(concurrency_limit: usize, total: usize) -> Self {
        Self {
            phase: Phase::Idle,
            concurrency_limit,
            total,
            launched: 0,
            active: 0,
            peak_active: 0,
        }
    }

    fn advance(&mut self, batch: BatchId, next: Phase) {
        debug!(
            batch = %batch,
            from = ?self.phase,
            to = ?next,
            launched = self.launched,
            active = self.active,
            "batch phase"
        );
        self.phase = next;
    }

    /// Every job was launched and none is still running.
    fn is_drained(&self) -> bool {
        self.launched == self.total && self.active == 0
    }

    /// Leave `Dispatching`: `Draining` only when dispatch completed and
    /// nothing is running, `Aborted` otherwise.
    fn end_dispatch(&mut self, batch: BatchId, dispatched: &PoolResult<()>) {
        let next = if dispatched.is_ok() && self.is_drained() {
            Phase::Draining
        } else {
            Phase::Aborted
        };
        self.advance(batch, next);
    }

    fn has_capacity(&self) -> bool {
        self.active < self.concurrency_limit
    }

    fn started(&mut self) {
        self.launched += 1;
        self.active += 1;
        self.peak_active = self.peak_active.max(self.active);
    }

    fn finished(&mut self) {
        self.active = self.active.saturating_sub(1);
    }
}

/// Bounded-concurrency executor for batches of simulation jobs.
///
/// One pool can run any number of batches, one at a time per call.
pub struct FmuPool<E, L> {
    model: ModelHandle,
    engine: Arc<E>,
    launcher: L,
    config: PoolConfig,
    concurrency_limit: usize,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl<E> FmuPool<E, ThreadLauncher<E>>
where
    E: SimulationEngine + 'static,
{
    /// A pool whose workers are threads of the current process.
    pub fn in_process(
        model: ModelHandle,
        engine: Arc<E>,
        config: PoolConfig,
    ) -> PoolResult<Self> {
        let launcher = ThreadLauncher::new(Arc::clone(&engine));
        Self::new(model, engine, launcher, config)
    }
}

impl<E, L> FmuPool<E, L>
where
    E: SimulationEngine,
    L: Launcher,
{
    /// `engine` runs jobs inline when the concurrency limit is 1; `launcher`
    /// starts isolated workers otherwise.
    pub fn new(
        model: ModelHandle,
        engine: Arc<E>,
        launcher: L,
        config: PoolConfig,
    ) -> PoolResult<Self> {
        config.validate()?;
        let concurrency_limit = config.effective_workers();
        info!(
            pool = %config.name,
            requested = config.max_workers,
            concurrency_limit,
            mailbox_capacity = config.mailbox_capacity,
            "pool created"
        );
        Ok(Self {
            model,
            engine,
            launcher,
            config,
            concurrency_limit,
            sink: None,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Run every job and return their outcomes in submission order.
    ///
    /// Failed jobs are `Outcome::Failure` in their slot; an `Err` means the
    /// batch itself broke and no partial results are returned.
    pub fn run(&self, specs: Vec<JobSpec>) -> PoolResult<Vec<Outcome>> {
        self.run_report(specs).map(|report| report.outcomes)
    }

    /// [`FmuPool::run`] for legacy keyword-style job descriptions.
    ///
    /// Every description is parsed before anything runs.
    pub fn run_values(&self, values: Vec<Value>) -> PoolResult<Vec<Outcome>> {
        let specs = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                JobSpec::from_value(value).map_err(|source| PoolError::InvalidJob {
                    index: JobIndex::new(i),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.run(specs)
    }

    /// [`FmuPool::run`], plus statistics about the batch.
    pub fn run_report(&self, specs: Vec<JobSpec>) -> PoolResult<BatchReport> {
        let batch = BatchId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut state = BatchState::new(self.concurrency_limit, specs.len());

        info!(
            pool = %self.config.name,
            batch = %batch,
            jobs = state.total,
            concurrency_limit = state.concurrency_limit,
            "starting batch"
        );
        self.log(&format!("New run. n_simulation={}", state.total));

        let outcomes = if specs.is_empty() {
            Vec::new()
        } else {
            let (outbox, inbox) = mailbox(self.config.mailbox_capacity);
            let collector = Collector::spawn(&self.config.name, batch, inbox, state.total)?;
            state.advance(batch, Phase::Dispatching);

            let jobs = specs
                .into_iter()
                .enumerate()
                .map(|(i, spec)| Job::new(JobIndex::new(i), spec));
            let dispatched = if state.concurrency_limit == 1 {
                self.dispatch_inline(jobs, &outbox, &mut state)
            } else {
                self.dispatch_workers(batch, jobs, &outbox, &mut state)
            };
            drop(outbox);

            state.end_dispatch(batch, &dispatched);
            let table = collector.join();
            dispatched?;
            aggregator::aggregate(batch, table?, self.sink.as_deref())?
        };

        state.advance(batch, Phase::Done);
        let stats = aggregator::stats(
            batch,
            &outcomes,
            state.peak_active,
            started_at,
            clock.elapsed(),
        );
        info!(
            pool = %self.config.name,
            batch = %batch,
            jobs = stats.jobs,
            succeeded = stats.succeeded,
            failed = stats.failed,
            crashed = stats.crashed,
            peak_active = stats.peak_active,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "batch finished"
        );

        Ok(BatchReport { outcomes, stats })
    }

    fn log(&self, message: &str) {
        if let Some(sink) = &self.sink {
            sink.log(message);
        }
    }

    /// Run each job on the calling thread.
    fn dispatch_inline(
        &self,
        jobs: impl Iterator<Item = Job>,
        outbox: &Outbox,
        state: &mut BatchState,
    ) -> PoolResult<()> {
        for job in jobs {
            state.started();
            debug!(index = %job.index(), "running job inline");
            let outcome =
                job.execute_contained(self.engine.as_ref(), &self.model, self.sink.as_deref());
            outbox.post(job.index(), outcome)?;
            state.finished();
        }
        Ok(())
    }

    /// Launch one supervised worker per job, never more than the limit at once.
    ///
    /// On a launch failure nothing further is launched; the workers already
    /// running are waited for before the error is returned.
    fn dispatch_workers(
        &self,
        batch: BatchId,
        jobs: impl Iterator<Item = Job>,
        outbox: &Outbox,
        state: &mut BatchState,
    ) -> PoolResult<()> {
        let (done_tx, done_rx) = mpsc::channel::<JobIndex>();
        let mut supervisors = HashMap::new();
        let mut aborted = None;

        for job in jobs {
            while !state.has_capacity() {
                reap(batch, &done_rx, &mut supervisors, state)?;
            }

            let index = job.index();
            let request = WorkerRequest {
                index,
                model: self.model.clone(),
                spec: job.spec().clone(),
            };
            let worker = match self.launcher.launch(request, self.sink.clone()) {
                Ok(worker) => worker,
                Err(source) => {
                    warn!(batch = %batch, index = %index, error = %source, "worker launch failed; aborting batch");
                    aborted = Some(PoolError::Launch { index, source });
                    break;
                }
            };

            match supervise(batch, index, worker, outbox.clone(), done_tx.clone()) {
                Ok(handle) => {
                    supervisors.insert(index, handle);
                    state.started();
                    debug!(batch = %batch, index = %index, active = state.active, "worker launched");
                }
                Err(err) => {
                    aborted = Some(err);
                    break;
                }
            }
        }

        while state.active > 0 {
            reap(batch, &done_rx, &mut supervisors, state)?;
        }

        match aborted {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Block until one supervisor signals completion, then join it.
fn reap(
    batch: BatchId,
    done: &mpsc::Receiver<JobIndex>,
    supervisors: &mut HashMap<JobIndex, thread::JoinHandle<()>>,
    state: &mut BatchState,
) -> PoolResult<()> {
    let index = done
        .recv()
        .map_err(|_| PoolError::channel("completion channel closed with workers still active"))?;
    state.finished();

    if let Some(handle) = supervisors.remove(&index) {
        if handle.join().is_err() {
            warn!(batch = %batch, index = %index, "supervisor thread panicked");
        }
    }
    debug!(batch = %batch, index = %index, active = state.active, "worker finished");
    Ok(())
}

/// Watch `worker` on its own thread and deliver exactly one outcome for it.
fn supervise(
    batch: BatchId,
    index: JobIndex,
    worker: Box<dyn RunningWorker>,
    outbox: Outbox,
    done: mpsc::Sender<JobIndex>,
) -> PoolResult<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("fmupool-supervisor-{index}"))
        .spawn(move || {
            let mut slot = Slot {
                index,
                outbox,
                done,
                posted: false,
            };
            let outcome = worker.wait().into_outcome(index);
            if let Some(failure) = outcome.failure_reason().filter(|f| f.is_crash()) {
                warn!(batch = %batch, index = %index, error = %failure, "worker crashed");
            }
            slot.fill(outcome);
        })
        .map_err(|source| PoolError::Thread {
            what: "supervisor",
            source,
        })
}

/// One job's place in the mailbox.
///
/// Dropping an unfilled slot posts a crash outcome, and every drop signals
/// completion, so the scheduler and the collector never wait on a job whose
/// supervisor went away.
struct Slot {
    index: JobIndex,
    outbox: Outbox,
    done: mpsc::Sender<JobIndex>,
    posted: bool,
}

impl Slot {
    fn fill(&mut self, outcome: Outcome) {
        self.posted = true;
        if let Err(err) = self.outbox.post(self.index, outcome) {
            warn!(index = %self.index, error = %err, "could not deliver outcome");
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if !self.posted {
            let crash = Failure::crashed(None, "supervisor ended without an outcome");
            let _ = self.outbox.post(self.index, Outcome::failure(crash));
        }
        let _ = self.done.send(self.index);
    }
}
