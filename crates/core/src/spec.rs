//! Per-job simulation configuration.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SpecError, SpecResult};

/// Attempts per job when the caller does not say otherwise.
pub const DEFAULT_RETRY_LIMIT: u32 = 10;

/// Key of the engine option sub-map inside the forwarded arguments.
pub const OPTIONS_KEY: &str = "options";

/// Engine option that selects where results are stored.
pub const RESULT_HANDLING_KEY: &str = "result_handling";

/// The only result handling mode the pool allows; file-backed results are
/// ambiguous when several workers simulate the same model.
pub const RESULT_HANDLING_MEMORY: &str = "memory";

const DEFAULT_RETRY: NonZeroU32 = match NonZeroU32::new(DEFAULT_RETRY_LIMIT) {
    Some(limit) => limit,
    None => panic!("default retry limit must be non-zero"),
};

/// Configuration of one job, immutable once handed to the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    output_selection: Vec<String>,
    final_only: bool,
    retry_limit: NonZeroU32,
    initialization_script: Option<PathBuf>,
    log_exhaustion: bool,
    simulation_args: Map<String, Value>,
}

/// What the engine receives for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    /// Forwarded arguments, with `options.result_handling` forced to memory.
    pub args: Map<String, Value>,
    pub initialization_script: Option<PathBuf>,
}

impl JobSpec {
    /// Create a job that extracts `output_selection` from the final state,
    /// with the default retry limit and no extra simulation arguments.
    pub fn new<I, S>(output_selection: I) -> SpecResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let output_selection: Vec<String> = output_selection.into_iter().map(Into::into).collect();
        if output_selection.is_empty() {
            return Err(SpecError::MissingOutputSelection);
        }
        Ok(Self::with_selection(output_selection))
    }

    /// Like [`JobSpec::new`] for exactly one output, which cannot fail.
    pub fn single(output: impl Into<String>) -> Self {
        Self::with_selection(vec![output.into()])
    }

    fn with_selection(output_selection: Vec<String>) -> Self {
        Self {
            output_selection,
            final_only: true,
            retry_limit: DEFAULT_RETRY,
            initialization_script: None,
            log_exhaustion: false,
            simulation_args: Map::new(),
        }
    }

    /// Parse the keyword-argument layout used by existing callers.
    ///
    /// Recognised keys: `name_output`, `final`, `max_retry`,
    /// `initialization_script`, `logger`. Every other key is forwarded to the
    /// engine untouched. `name_output` falls back to `options.filter`.
    pub fn from_value(value: Value) -> SpecResult<Self> {
        let Value::Object(mut args) = value else {
            return Err(SpecError::malformed("job configuration must be a JSON object"));
        };

        let output_selection = match args.remove("name_output") {
            Some(v) => string_list("name_output", v)?,
            None => args
                .get(OPTIONS_KEY)
                .and_then(|o| o.get("filter"))
                .cloned()
                .map(|v| string_list("options.filter", v))
                .transpose()?
                .unwrap_or_default(),
        };

        let mut spec = Self::new(output_selection)?;

        if let Some(v) = args.remove("final") {
            spec.final_only = v
                .as_bool()
                .ok_or_else(|| SpecError::malformed("`final` must be a boolean"))?;
        }

        if let Some(v) = args.remove("max_retry") {
            let limit = v
                .as_u64()
                .ok_or_else(|| SpecError::malformed("`max_retry` must be a non-negative integer"))?;
            let limit = u32::try_from(limit)
                .map_err(|_| SpecError::malformed("`max_retry` is out of range"))?;
            spec = spec.with_retry_limit(limit)?;
        }

        match args.remove("initialization_script") {
            None | Some(Value::Null) => {}
            Some(Value::String(path)) => spec.initialization_script = Some(PathBuf::from(path)),
            Some(_) => {
                return Err(SpecError::malformed("`initialization_script` must be a path string"));
            }
        }

        if let Some(v) = args.remove("logger") {
            spec.log_exhaustion = v
                .as_bool()
                .ok_or_else(|| SpecError::malformed("`logger` must be a boolean"))?;
        }

        spec.simulation_args = args;
        Ok(spec)
    }

    pub fn with_final_only(mut self, final_only: bool) -> Self {
        self.final_only = final_only;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> SpecResult<Self> {
        self.retry_limit =
            NonZeroU32::new(retry_limit).ok_or(SpecError::InvalidRetryLimit(retry_limit))?;
        Ok(self)
    }

    pub fn with_initialization_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.initialization_script = Some(path.into());
        self
    }

    /// Emit a diagnostic naming this job when its retries run out.
    pub fn with_exhaustion_log(mut self, enabled: bool) -> Self {
        self.log_exhaustion = enabled;
        self
    }

    /// Add one forwarded simulation argument (e.g. `final_time`).
    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.simulation_args.insert(key.into(), value);
        self
    }

    pub fn output_selection(&self) -> &[String] {
        &self.output_selection
    }

    pub fn final_only(&self) -> bool {
        self.final_only
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit.get()
    }

    pub fn initialization_script(&self) -> Option<&Path> {
        self.initialization_script.as_deref()
    }

    pub fn log_exhaustion(&self) -> bool {
        self.log_exhaustion
    }

    /// Arguments exactly as the caller supplied them.
    pub fn simulation_args(&self) -> &Map<String, Value> {
        &self.simulation_args
    }

    /// Arguments as the engine sees them.
    pub fn simulation_options(&self) -> SimulationOptions {
        let mut args = self.simulation_args.clone();
        let options = args
            .entry(OPTIONS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !options.is_object() {
            *options = Value::Object(Map::new());
        }
        if let Value::Object(options) = options {
            options.insert(
                RESULT_HANDLING_KEY.to_string(),
                Value::String(RESULT_HANDLING_MEMORY.to_string()),
            );
        }

        SimulationOptions {
            args,
            initialization_script: self.initialization_script.clone(),
        }
    }
}

fn string_list(field: &str, value: Value) -> SpecResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(SpecError::malformed(format!(
                    "`{field}` entries must be strings, got {other}"
                ))),
            })
            .collect(),
        other => Err(SpecError::malformed(format!(
            "`{field}` must be a string or a list of strings, got {other}"
        ))),
    }
}
