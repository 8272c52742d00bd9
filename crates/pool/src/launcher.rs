//! Worker launchers.
//!
//! A [`Launcher`] starts one isolated worker for one job; the returned
//! [`RunningWorker`] is waited on by that job's supervisor thread. Whatever
//! happens inside the worker, `wait` reports it as a [`WorkerExit`] and never
//! panics, which is what lets a crash become an ordinary failed outcome.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use fmupool_core::{DiagnosticSink, Failure, JobIndex, Outcome, SimulationEngine};

use crate::job::{Job, panic_message};
use crate::worker::{WORKER_FLAG, WorkerReply, WorkerRequest};

/// Starts workers. Shared by the scheduler and every supervisor thread.
pub trait Launcher: Send + Sync {
    /// Start a worker for `request`. An error here aborts the batch.
    ///
    /// `sink` is the pool's diagnostic sink. Every diagnostic the job emits
    /// must reach it, whichever process the job runs in.
    fn launch(
        &self,
        request: WorkerRequest,
        sink: Option<Arc<dyn DiagnosticSink>>,
    ) -> io::Result<Box<dyn RunningWorker>>;
}

/// A started worker, owned by exactly one supervisor.
pub trait RunningWorker: Send {
    /// Block until the worker is gone.
    fn wait(self: Box<Self>) -> WorkerExit;
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    Replied(WorkerReply),
    Crashed {
        exit_code: Option<i32>,
        detail: String,
    },
}

impl WorkerExit {
    fn crashed(exit_code: Option<i32>, detail: impl Into<String>) -> Self {
        Self::Crashed {
            exit_code,
            detail: detail.into(),
        }
    }

    /// The outcome to record for `expected`. A reply for another job counts
    /// as a crash of this one.
    pub fn into_outcome(self, expected: JobIndex) -> Outcome {
        match self {
            WorkerExit::Replied(reply) if reply.index == expected => reply.outcome,
            WorkerExit::Replied(reply) => Outcome::failure(Failure::crashed(
                None,
                format!("worker replied for job {} instead of {expected}", reply.index),
            )),
            WorkerExit::Crashed { exit_code, detail } => {
                Outcome::failure(Failure::crashed(exit_code, detail))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OS processes
// ---------------------------------------------------------------------------

/// Runs each job in a fresh OS process speaking the [`crate::worker`] protocol.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-execute the current binary with [`WORKER_FLAG`].
    pub fn reexec() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(WORKER_FLAG))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        request: WorkerRequest,
        sink: Option<Arc<dyn DiagnosticSink>>,
    ) -> io::Result<Box<dyn RunningWorker>> {
        let mut line = serde_json::to_vec(&request).map_err(io::Error::other)?;
        line.push(b'\n');

        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        debug!(index = %request.index, pid = child.id(), program = %self.program.display(), "worker process started");

        Ok(Box::new(ChildWorker {
            index: request.index,
            child,
            request: line,
            sink,
            reaped: false,
        }))
    }
}

/// A worker process. Killed and reaped on drop unless it was waited for.
struct ChildWorker {
    index: JobIndex,
    child: Child,
    request: Vec<u8>,
    sink: Option<Arc<dyn DiagnosticSink>>,
    reaped: bool,
}

impl fmt::Debug for ChildWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildWorker")
            .field("index", &self.index)
            .field("pid", &self.child.id())
            .finish()
    }
}

impl ChildWorker {
    /// Hand over the request and read everything the worker prints.
    fn exchange(&mut self) -> io::Result<String> {
        if let Some(mut stdin) = self.child.stdin.take() {
            // A worker that dies before reading shows up as a broken pipe;
            // its exit status below says more.
            if let Err(err) = stdin.write_all(&self.request) {
                debug!(index = %self.index, error = %err, "could not deliver request to worker");
            }
        }

        let mut stdout = String::new();
        if let Some(mut pipe) = self.child.stdout.take() {
            pipe.read_to_string(&mut stdout)?;
        }
        Ok(stdout)
    }
}

impl RunningWorker for ChildWorker {
    fn wait(mut self: Box<Self>) -> WorkerExit {
        let stdout = self.exchange();

        let status = match self.child.wait() {
            Ok(status) => status,
            Err(err) => return WorkerExit::crashed(None, format!("failed to wait for worker: {err}")),
        };
        self.reaped = true;
        if !status.success() {
            warn!(index = %self.index, status = %status, "worker process exited abnormally");
            return WorkerExit::crashed(status.code(), format!("worker process {status}"));
        }

        let stdout = match stdout {
            Ok(stdout) => stdout,
            Err(err) => {
                return WorkerExit::crashed(status.code(), format!("failed to read worker output: {err}"));
            }
        };
        let Some(line) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
            return WorkerExit::crashed(status.code(), "worker exited without a reply");
        };
        match serde_json::from_str::<WorkerReply>(line) {
            Ok(reply) => {
                if let Some(sink) = &self.sink {
                    for message in &reply.diagnostics {
                        sink.log(message);
                    }
                }
                WorkerExit::Replied(reply)
            }
            Err(err) => WorkerExit::crashed(status.code(), format!("malformed worker reply: {err}")),
        }
    }
}

impl Drop for ChildWorker {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        debug!(index = %self.index, pid = self.child.id(), "killing unsupervised worker process");
        if let Err(err) = self.child.kill() {
            debug!(index = %self.index, error = %err, "worker process already gone");
        }
        if let Err(err) = self.child.wait() {
            warn!(index = %self.index, error = %err, "failed to reap worker process");
        }
    }
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

/// Runs each job on its own thread inside the controller process.
///
/// Isolation stops at panics: an engine that aborts or corrupts memory takes
/// the controller down with it. Use [`ProcessLauncher`] for real models.
pub struct ThreadLauncher<E> {
    engine: Arc<E>,
}

impl<E> ThreadLauncher<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }
}

impl<E> Clone for ThreadLauncher<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E> fmt::Debug for ThreadLauncher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLauncher").finish_non_exhaustive()
    }
}

impl<E> Launcher for ThreadLauncher<E>
where
    E: SimulationEngine + 'static,
{
    fn launch(
        &self,
        request: WorkerRequest,
        sink: Option<Arc<dyn DiagnosticSink>>,
    ) -> io::Result<Box<dyn RunningWorker>> {
        let engine = Arc::clone(&self.engine);
        let index = request.index;

        let handle = thread::Builder::new()
            .name(format!("fmupool-job-{index}"))
            .spawn(move || {
                let job = Job::new(request.index, request.spec);
                job.execute(engine.as_ref(), &request.model, sink.as_deref())
            })?;

        Ok(Box::new(ThreadWorker { index, handle }))
    }
}

struct ThreadWorker {
    index: JobIndex,
    handle: thread::JoinHandle<Outcome>,
}

impl RunningWorker for ThreadWorker {
    fn wait(self: Box<Self>) -> WorkerExit {
        match self.handle.join() {
            Ok(outcome) => WorkerExit::Replied(WorkerReply::new(self.index, outcome)),
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                warn!(index = %self.index, panic = %detail, "worker thread panicked");
                WorkerExit::crashed(None, format!("panicked: {detail}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedEngine, scripted_spec};
    use fmupool_core::{JobSpec, ModelHandle};
    use serde_json::json;

    fn request(index: usize, spec: JobSpec) -> WorkerRequest {
        WorkerRequest {
            index: JobIndex::new(index),
            model: ModelHandle::new(json!("model.fmu")),
            spec,
        }
    }

    #[test]
    fn thread_worker_replies_with_the_job_outcome() {
        let launcher = ThreadLauncher::new(Arc::new(ScriptedEngine::new()));
        let exit = launcher.launch(request(2, scripted_spec(2)), None).unwrap().wait();

        let outcome = exit.into_outcome(JobIndex::new(2));
        assert_eq!(outcome.payload().unwrap()["job"], json!(2));
    }

    #[test]
    fn thread_worker_panic_is_a_crash() {
        let launcher = ThreadLauncher::new(Arc::new(ScriptedEngine::new()));
        let spec = scripted_spec(1).with_arg("panic", json!(true));

        let exit = launcher.launch(request(1, spec), None).unwrap().wait();

        match exit {
            WorkerExit::Crashed { exit_code, detail } => {
                assert_eq!(exit_code, None);
                assert!(detail.contains("scripted panic in job 1"), "{detail}");
            }
            other => panic!("expected a crash, got {other:?}"),
        }
    }

    #[test]
    fn reply_for_another_job_is_a_crash() {
        let exit = WorkerExit::Replied(WorkerReply::new(
            JobIndex::new(3),
            Outcome::success(json!(null)),
        ));

        let outcome = exit.into_outcome(JobIndex::new(4));
        assert!(outcome.failure_reason().unwrap().is_crash());
    }

    #[test]
    fn reexec_runs_the_current_binary_as_a_worker() {
        let launcher = ProcessLauncher::reexec().unwrap();

        assert_eq!(launcher.program(), std::env::current_exe().unwrap().as_path());
        assert_eq!(launcher.args().last().map(String::as_str), Some(WORKER_FLAG));
        assert!(crate::worker::is_worker_args(
            std::iter::once(launcher.program().as_os_str().to_owned())
                .chain(launcher.args().iter().map(Into::into))
        ));
    }

    #[test]
    fn missing_program_fails_to_launch() {
        let launcher = ProcessLauncher::new("/nonexistent/fmupool-worker-binary");
        assert!(launcher.launch(request(0, scripted_spec(0)), None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_a_crash_with_its_code() {
        let launcher = ProcessLauncher::new("sh").arg("-c").arg("cat >/dev/null; exit 3");
        let exit = launcher.launch(request(0, scripted_spec(0)), None).unwrap().wait();

        assert!(matches!(exit, WorkerExit::Crashed { exit_code: Some(3), .. }));
    }

    #[cfg(unix)]
    #[test]
    fn garbled_reply_is_a_crash() {
        let launcher = ProcessLauncher::new("sh")
            .arg("-c")
            .arg("cat >/dev/null; echo 'not a reply'");
        let exit = launcher.launch(request(0, scripted_spec(0)), None).unwrap().wait();

        match exit {
            WorkerExit::Crashed { exit_code, detail } => {
                assert_eq!(exit_code, Some(0));
                assert!(detail.contains("malformed worker reply"), "{detail}");
            }
            other => panic!("expected a crash, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn silent_exit_is_a_crash() {
        let launcher = ProcessLauncher::new("sh").arg("-c").arg("cat >/dev/null");
        let exit = launcher.launch(request(0, scripted_spec(0)), None).unwrap().wait();

        assert!(matches!(
            exit,
            WorkerExit::Crashed { detail, .. } if detail.contains("without a reply")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn reply_diagnostics_are_replayed_into_the_pool_sink() {
        let memory = Arc::new(fmupool_core::MemorySink::new());
        let sink: Arc<dyn DiagnosticSink> = memory.clone();
        let reply = r#"{"index":0,"outcome":{"status":"success","payload":1},"diagnostics":["from the worker"]}"#;
        let launcher = ProcessLauncher::new("sh")
            .arg("-c")
            .arg(format!("cat >/dev/null; echo '{reply}'"));

        let exit = launcher
            .launch(request(0, scripted_spec(0)), Some(sink))
            .unwrap()
            .wait();

        assert!(matches!(exit, WorkerExit::Replied(_)));
        assert_eq!(memory.entries(), vec!["from the worker".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn dropping_an_unwaited_worker_kills_its_process() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("sleep 5")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let pid = child.id().to_string();
        let worker = ChildWorker {
            index: JobIndex::new(0),
            child,
            request: Vec::new(),
            sink: None,
            reaped: false,
        };

        let started = std::time::Instant::now();
        drop(worker);

        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        let alive = Command::new("kill")
            .arg("-0")
            .arg(&pid)
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(!alive.success(), "worker process {pid} survived its owner");
    }
}
