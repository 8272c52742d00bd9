//! Deterministic scripted engine for exercising pools and worker binaries.
//!
//! Behaviour is read from the job's forwarded simulation arguments, so the same
//! script drives in-process tests and real worker processes alike:
//!
//! | key | effect |
//! |---|---|
//! | `job` | tag used for bookkeeping and echoed in the payload |
//! | `fail_attempts` | the first N `run_simulation` calls for this tag fail |
//! | `fail_extract_attempts` | the first N `extract_result` calls for this tag fail |
//! | `sleep_ms` | sleep inside `run_simulation` |
//! | `panic` | panic inside `run_simulation` |
//! | `abort` | abort the whole process inside `run_simulation` |
//!
//! Attempt counters live in the engine instance; inside a worker process that
//! is exactly one job's retry sequence.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Value, json};

use fmupool_core::{
    EngineError, JobSpec, ModelHandle, Payload, SimulationEngine, SimulationOptions,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Script {
    job: u64,
    fail_attempts: u32,
    fail_extract_attempts: u32,
    sleep_ms: u64,
    panic: bool,
    abort: bool,
}

impl Script {
    fn parse(options: &SimulationOptions) -> anyhow::Result<Self> {
        let args = Value::Object(options.args.clone());
        serde_json::from_value(args).context("reading scripted engine arguments")
    }
}

/// One finished scripted run.
#[derive(Debug)]
pub struct ScriptedRun {
    job: u64,
    attempt: u32,
    fail_extract_attempts: u32,
    result_handling: Value,
}

#[derive(Debug, Default)]
pub struct ScriptedEngine {
    attempts: Mutex<HashMap<u64, u32>>,
    extracts: Mutex<HashMap<u64, u32>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `run_simulation` calls seen so far for `job`.
    pub fn attempts(&self, job: u64) -> u32 {
        self.attempts
            .lock()
            .map(|a| a.get(&job).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Highest number of simultaneous `run_simulation` calls observed.
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn bump(counter: &Mutex<HashMap<u64, u32>>, job: u64) -> Result<u32, EngineError> {
        let mut counter = counter
            .lock()
            .map_err(|_| EngineError::internal("scripted engine counter poisoned"))?;
        let n = counter.entry(job).or_insert(0);
        *n += 1;
        Ok(*n)
    }
}

/// Decrements the active counter on every exit path, including panics.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulationEngine for ScriptedEngine {
    type Simulation = ScriptedRun;

    fn run_simulation(
        &self,
        _model: &ModelHandle,
        options: &SimulationOptions,
    ) -> Result<ScriptedRun, EngineError> {
        let script =
            Script::parse(options).map_err(|e| EngineError::invalid_input(format!("{e:#}")))?;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveGuard(&self.active);
        self.peak_active.fetch_max(now, Ordering::SeqCst);

        let attempt = Self::bump(&self.attempts, script.job)?;

        if script.sleep_ms > 0 {
            thread::sleep(Duration::from_millis(script.sleep_ms));
        }
        if script.abort {
            std::process::abort();
        }
        if script.panic {
            panic!("scripted panic in job {}", script.job);
        }
        if attempt <= script.fail_attempts {
            return Err(EngineError::diverged(format!(
                "scripted failure on attempt {attempt}"
            )));
        }

        let result_handling = options
            .args
            .get("options")
            .and_then(|o| o.get("result_handling"))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(ScriptedRun {
            job: script.job,
            attempt,
            fail_extract_attempts: script.fail_extract_attempts,
            result_handling,
        })
    }

    fn extract_result(
        &self,
        run: &ScriptedRun,
        output_selection: &[String],
        final_only: bool,
    ) -> Result<Payload, EngineError> {
        let extract = Self::bump(&self.extracts, run.job)?;
        if extract <= run.fail_extract_attempts {
            return Err(EngineError::internal(format!(
                "scripted extraction failure on attempt {}",
                run.attempt
            )));
        }

        Ok(json!({
            "job": run.job,
            "attempt": run.attempt,
            "outputs": output_selection,
            "final": final_only,
            "result_handling": run.result_handling,
            "pid": std::process::id(),
        }))
    }
}

/// A spec selecting output `y`, tagged with `job` for the scripted engine.
pub fn scripted_spec(job: u64) -> JobSpec {
    JobSpec::single("y").with_arg("job", json!(job))
}
