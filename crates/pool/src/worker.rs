//! Worker-side protocol.
//!
//! A worker process receives exactly one [`WorkerRequest`] as a JSON line on
//! stdin, runs the job through the retry wrapper and answers with exactly one
//! [`WorkerReply`] JSON line on stdout. Logs go to stderr.
//!
//! ```ignore
//! fn main() -> std::process::ExitCode {
//!     if fmupool::worker::is_worker_invocation() {
//!         return fmupool::worker::worker_main(MyEngine::load());
//!     }
//!     // ... controller code building an `FmuPool` with `ProcessLauncher::reexec()`
//! }
//! ```

use std::ffi::OsStr;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use fmupool_core::{DiagnosticSink, JobIndex, JobSpec, ModelHandle, Outcome, SimulationEngine};
use fmupool_observability::TracingSink;

use crate::job::Job;

/// Command-line flag marking a re-executed binary as a worker.
pub const WORKER_FLAG: &str = "--fmupool-worker";

/// Exit status of a worker that could not speak the protocol.
pub const PROTOCOL_ERROR_EXIT: u8 = 2;

/// Everything a worker needs to run one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub index: JobIndex,
    pub model: ModelHandle,
    pub spec: JobSpec,
}

/// The single message a worker sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub index: JobIndex,
    pub outcome: Outcome,
    /// Diagnostics the job emitted, for the controller to replay.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl WorkerReply {
    pub fn new(index: JobIndex, outcome: Outcome) -> Self {
        Self {
            index,
            outcome,
            diagnostics: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("no request received on stdin")]
    EmptyRequest,

    #[error("malformed request: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode reply: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Whether this process was started with [`WORKER_FLAG`].
pub fn is_worker_invocation() -> bool {
    is_worker_args(std::env::args_os())
}

/// Whether a full argument vector (program name first) carries [`WORKER_FLAG`].
pub fn is_worker_args<I, S>(args: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter()
        .skip(1)
        .any(|arg| arg.as_ref() == OsStr::new(WORKER_FLAG))
}

/// Keeps every diagnostic for the reply and passes it on to `forward`.
struct Recorder<'a> {
    forward: Option<&'a dyn DiagnosticSink>,
    entries: Mutex<Vec<String>>,
}

impl Recorder<'_> {
    fn into_entries(self) -> Vec<String> {
        self.entries.into_inner().unwrap_or_default()
    }
}

impl DiagnosticSink for Recorder<'_> {
    fn log(&self, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(message.to_string());
        }
        if let Some(forward) = self.forward {
            forward.log(message);
        }
    }
}

/// Read one request from `input`, execute it, write one reply to `output`.
///
/// Diagnostics go to `sink` and are also carried in the reply.
pub fn serve<E, R, W>(
    engine: &E,
    mut input: R,
    mut output: W,
    sink: Option<&dyn DiagnosticSink>,
) -> Result<WorkerReply, WorkerError>
where
    E: SimulationEngine + ?Sized,
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 || line.trim().is_empty() {
        return Err(WorkerError::EmptyRequest);
    }
    let request: WorkerRequest = serde_json::from_str(&line).map_err(WorkerError::Decode)?;
    debug!(index = %request.index, retry_limit = request.spec.retry_limit(), "worker received job");

    let job = Job::new(request.index, request.spec);
    let recorder = Recorder {
        forward: sink,
        entries: Mutex::new(Vec::new()),
    };
    let recording: &dyn DiagnosticSink = &recorder;
    let outcome = job.execute(engine, &request.model, Some(recording));
    let reply = WorkerReply {
        index: job.index(),
        outcome,
        diagnostics: recorder.into_entries(),
    };

    serde_json::to_writer(&mut output, &reply).map_err(WorkerError::Encode)?;
    output.write_all(b"\n")?;
    output.flush()?;

    Ok(reply)
}

/// Entry point for worker binaries: serve stdin/stdout with `engine`.
///
/// Exits successfully whenever a reply was written, whatever the outcome;
/// the controller treats any other exit as a crash.
pub fn worker_main<E: SimulationEngine>(engine: E) -> ExitCode {
    fmupool_observability::init_worker();

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let sink: &dyn DiagnosticSink = &TracingSink;
    match serve(&engine, stdin, stdout, Some(sink)) {
        Ok(reply) => {
            debug!(index = %reply.index, success = reply.outcome.is_success(), "worker done");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "worker protocol failure");
            ExitCode::from(PROTOCOL_ERROR_EXIT)
        }
    }
}
