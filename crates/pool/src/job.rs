//! Jobs and the bounded-retry execution wrapper.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use fmupool_core::{
    DiagnosticSink, EngineError, Failure, JobIndex, JobSpec, ModelHandle, Outcome, Payload,
    SimulationEngine, SimulationOptions,
};

/// One unit of simulation work, identified by its submission index.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    index: JobIndex,
    spec: JobSpec,
}

/// Progress of one job through its retry budget.
///
/// `Attempting(n) → Succeeded`, `Attempting(n) → Attempting(n + 1)` or
/// `Attempting(limit) → Exhausted`. Only the latest error is kept.
#[derive(Debug)]
enum RetryState {
    Attempting {
        attempt: u32,
        last_error: Option<EngineError>,
    },
    Succeeded {
        attempt: u32,
        payload: Payload,
    },
    Exhausted {
        attempts: u32,
        last_error: EngineError,
    },
}

impl Job {
    pub fn new(index: JobIndex, spec: JobSpec) -> Self {
        Self { index, spec }
    }

    pub fn index(&self) -> JobIndex {
        self.index
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// Run the job to an outcome, retrying up to the job's retry limit.
    ///
    /// Attempts are strictly sequential. Never panics on engine errors; a
    /// panicking engine unwinds out of this call (see [`Job::execute_contained`]).
    pub fn execute<E>(
        &self,
        engine: &E,
        model: &ModelHandle,
        sink: Option<&dyn DiagnosticSink>,
    ) -> Outcome
    where
        E: SimulationEngine + ?Sized,
    {
        let options = self.spec.simulation_options();
        let limit = self.spec.retry_limit();
        let mut state = RetryState::Attempting {
            attempt: 1,
            last_error: None,
        };

        loop {
            state = match state {
                RetryState::Attempting {
                    attempt,
                    last_error,
                } => {
                    if let Some(err) = &last_error {
                        debug!(index = %self.index, attempt, previous_error = %err, "retrying simulation");
                    }
                    match self.attempt(engine, model, &options) {
                        Ok(payload) => RetryState::Succeeded { attempt, payload },
                        Err(err) if attempt < limit => {
                            debug!(index = %self.index, attempt, limit, error = %err, "simulation attempt failed");
                            RetryState::Attempting {
                                attempt: attempt + 1,
                                last_error: Some(err),
                            }
                        }
                        Err(err) => RetryState::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        },
                    }
                }
                RetryState::Succeeded { attempt, payload } => {
                    debug!(index = %self.index, attempt, "simulation succeeded");
                    return Outcome::success(payload);
                }
                RetryState::Exhausted {
                    attempts,
                    last_error,
                } => {
                    warn!(index = %self.index, attempts, error = %last_error, "maximum number of retries reached");
                    if self.spec.log_exhaustion() {
                        if let Some(sink) = sink {
                            sink.log(&format!(
                                "Maximum number of retries reached. index={} (input arguments: {})",
                                self.index,
                                serde_json::Value::Object(self.spec.simulation_args().clone())
                            ));
                        }
                    }
                    return Outcome::failure(Failure::RetriesExhausted {
                        attempts,
                        last_error: last_error.to_string(),
                    });
                }
            };
        }
    }

    /// [`Job::execute`], with an engine panic turned into a crash outcome.
    ///
    /// Used where there is no process boundary to absorb the panic.
    pub fn execute_contained<E>(
        &self,
        engine: &E,
        model: &ModelHandle,
        sink: Option<&dyn DiagnosticSink>,
    ) -> Outcome
    where
        E: SimulationEngine + ?Sized,
    {
        panic::catch_unwind(AssertUnwindSafe(|| self.execute(engine, model, sink))).unwrap_or_else(
            |panic| {
                let detail = panic_message(panic.as_ref());
                warn!(index = %self.index, panic = %detail, "simulation panicked");
                Outcome::failure(Failure::crashed(None, format!("panicked: {detail}")))
            },
        )
    }

    fn attempt<E>(
        &self,
        engine: &E,
        model: &ModelHandle,
        options: &SimulationOptions,
    ) -> Result<Payload, EngineError>
    where
        E: SimulationEngine + ?Sized,
    {
        let simulation = engine.run_simulation(model, options)?;
        engine.extract_result(
            &simulation,
            self.spec.output_selection(),
            self.spec.final_only(),
        )
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedEngine, scripted_spec};
    use fmupool_core::MemorySink;
    use serde_json::json;

    fn model() -> ModelHandle {
        ModelHandle::new(json!("model.fmu"))
    }

    #[test]
    fn first_attempt_success_stops_immediately() {
        let engine = ScriptedEngine::new();
        let job = Job::new(JobIndex::new(0), scripted_spec(0).with_retry_limit(5).unwrap());

        let outcome = job.execute(&engine, &model(), None);

        assert_eq!(outcome.payload().unwrap()["attempt"], json!(1));
        assert_eq!(engine.attempts(0), 1);
    }

    #[test]
    fn always_failing_job_uses_exactly_the_retry_limit() {
        let engine = ScriptedEngine::new();
        let spec = scripted_spec(4)
            .with_arg("fail_attempts", json!(u32::MAX))
            .with_retry_limit(4)
            .unwrap();
        let job = Job::new(JobIndex::new(4), spec);

        let outcome = job.execute(&engine, &model(), None);

        assert_eq!(engine.attempts(4), 4);
        match outcome.failure_reason() {
            Some(Failure::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(*attempts, 4);
                assert!(last_error.contains("attempt 4"), "{last_error}");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn succeeds_on_attempt_m_and_stops() {
        let engine = ScriptedEngine::new();
        let spec = scripted_spec(1)
            .with_arg("fail_attempts", json!(2))
            .with_retry_limit(5)
            .unwrap();
        let job = Job::new(JobIndex::new(1), spec);

        let outcome = job.execute(&engine, &model(), None);

        assert!(outcome.is_success());
        assert_eq!(outcome.payload().unwrap()["attempt"], json!(3));
        assert_eq!(engine.attempts(1), 3);
    }

    #[test]
    fn extraction_errors_are_retried_too() {
        let engine = ScriptedEngine::new();
        let spec = scripted_spec(2)
            .with_arg("fail_extract_attempts", json!(1))
            .with_retry_limit(2)
            .unwrap();
        let job = Job::new(JobIndex::new(2), spec);

        let outcome = job.execute(&engine, &model(), None);

        assert_eq!(outcome.payload().unwrap()["attempt"], json!(2));
    }

    #[test]
    fn engine_sees_memory_result_handling() {
        let engine = ScriptedEngine::new();
        let spec = scripted_spec(0).with_arg("options", json!({"result_handling": "file"}));
        let outcome = Job::new(JobIndex::new(0), spec).execute(&engine, &model(), None);

        assert_eq!(outcome.payload().unwrap()["result_handling"], json!("memory"));
    }

    #[test]
    fn exhaustion_is_logged_only_when_requested() {
        let engine = ScriptedEngine::new();
        let memory = MemorySink::new();
        let sink: &dyn DiagnosticSink = &memory;
        let failing = |tag: u64| {
            scripted_spec(tag)
                .with_arg("fail_attempts", json!(u32::MAX))
                .with_retry_limit(1)
                .unwrap()
        };

        Job::new(JobIndex::new(0), failing(0)).execute(&engine, &model(), Some(sink));
        assert!(memory.entries().is_empty());

        Job::new(JobIndex::new(7), failing(7).with_exhaustion_log(true)).execute(
            &engine,
            &model(),
            Some(sink),
        );
        let entries = memory.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("index=7"));
        assert!(entries[0].contains("\"job\":7"));
    }

    #[test]
    fn contained_execution_turns_panics_into_crashes() {
        let engine = ScriptedEngine::new();
        let spec = scripted_spec(3).with_arg("panic", json!(true));
        let outcome = Job::new(JobIndex::new(3), spec).execute_contained(&engine, &model(), None);

        let failure = outcome.failure_reason().unwrap();
        assert!(failure.is_crash());
        assert!(failure.to_string().contains("scripted panic"));
    }
}
