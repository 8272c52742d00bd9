//! `fmupool`: bounded-concurrency batch executor for simulation jobs.
//!
//! A batch of N jobs runs with at most K workers active at once. Each worker
//! runs exactly one job through a bounded retry loop and delivers exactly one
//! outcome into a bounded mailbox, which a collector thread drains into an
//! index-keyed table. Outcomes come back in submission order whatever order
//! the workers finished in; a worker that crashes yields a failed outcome
//! instead of a missing one.
//!
//! - [`FmuPool`]: entry point (scheduler + admission control)
//! - [`launcher`]: how workers are started (OS processes or threads)
//! - [`worker`]: the worker-side protocol for worker binaries
//! - [`job`]: the retry wrapper shared by every execution path

pub mod aggregator;
pub mod collector;
pub mod config;
pub mod error;
pub mod job;
pub mod launcher;
pub mod mailbox;
pub mod scheduler;
pub mod scripted;
pub mod worker;

pub use aggregator::{BatchReport, BatchStats};
pub use config::{ConfigError, PoolConfig};
pub use error::{PoolError, PoolResult};
pub use job::Job;
pub use launcher::{Launcher, ProcessLauncher, RunningWorker, ThreadLauncher, WorkerExit};
pub use scheduler::{BatchState, FmuPool, Phase};
pub use worker::{WorkerReply, WorkerRequest};

pub use fmupool_core::{
    DiagnosticSink, EngineError, Failure, JobIndex, JobSpec, ModelHandle, Outcome, Payload,
    SimulationEngine, SimulationOptions,
};
