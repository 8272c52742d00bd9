//! Worker binary driven by the scripted engine.
//!
//! Speaks the worker protocol on stdin/stdout; used by the integration tests
//! and benchmarks to exercise real worker processes.

use std::process::ExitCode;

use fmupool::scripted::ScriptedEngine;

fn main() -> ExitCode {
    fmupool::worker::worker_main(ScriptedEngine::new())
}
