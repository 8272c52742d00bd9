//! `fmupool-core`: data model shared by the controller and worker processes.
//!
//! This crate contains **no execution machinery**: jobs, outcomes and the
//! collaborator traits only. The executor lives in `fmupool`.

pub mod engine;
pub mod error;
pub mod id;
pub mod model;
pub mod outcome;
pub mod spec;

pub use engine::{DiagnosticSink, MemorySink, SimulationEngine};
pub use error::{EngineError, SpecError, SpecResult};
pub use id::{BatchId, JobIndex};
pub use model::ModelHandle;
pub use outcome::{Failure, Outcome, Payload};
pub use spec::{DEFAULT_RETRY_LIMIT, JobSpec, SimulationOptions};
