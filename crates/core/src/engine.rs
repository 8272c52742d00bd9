//! Collaborator seams: the simulation engine and the diagnostic sink.

use std::sync::Mutex;

use crate::error::EngineError;
use crate::model::ModelHandle;
use crate::outcome::Payload;
use crate::spec::SimulationOptions;

/// The external simulation engine.
///
/// Implementations live outside the pool. Both calls may fail for any reason
/// (bad input, divergence, extraction errors); the pool retries the pair as a
/// unit.
pub trait SimulationEngine: Send + Sync {
    /// Whatever the engine hands back from a run, before trimming.
    type Simulation;

    fn run_simulation(
        &self,
        model: &ModelHandle,
        options: &SimulationOptions,
    ) -> Result<Self::Simulation, EngineError>;

    fn extract_result(
        &self,
        simulation: &Self::Simulation,
        output_selection: &[String],
        final_only: bool,
    ) -> Result<Payload, EngineError>;
}

impl<E: SimulationEngine + ?Sized> SimulationEngine for std::sync::Arc<E> {
    type Simulation = E::Simulation;

    fn run_simulation(
        &self,
        model: &ModelHandle,
        options: &SimulationOptions,
    ) -> Result<Self::Simulation, EngineError> {
        (**self).run_simulation(model, options)
    }

    fn extract_result(
        &self,
        simulation: &Self::Simulation,
        output_selection: &[String],
        final_only: bool,
    ) -> Result<Payload, EngineError> {
        (**self).extract_result(simulation, output_selection, final_only)
    }
}

/// Best-effort, human-oriented log of notable batch events.
///
/// Optional everywhere: a missing sink never changes results.
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, message: &str);
}

/// Sink that keeps every message in memory (tests, embedding UIs).
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticSink for MemorySink {
    fn log(&self, message: &str) {
        // A poisoned sink just stops recording.
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.log("first");
        sink.log("second");
        assert_eq!(sink.entries(), vec!["first".to_string(), "second".to_string()]);
    }
}
