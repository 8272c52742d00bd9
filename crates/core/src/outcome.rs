//! Job outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque result extracted from a successful simulation.
pub type Payload = Value;

/// Why a job has no payload.
///
/// A plain description, never a live error object, so it can travel back
/// from a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// Every attempt failed; `last_error` is the final attempt's error.
    #[error("maximum number of retries reached after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The worker ended without reporting an outcome.
    #[error("worker crashed (exit code {exit_code:?}): {detail}")]
    WorkerCrashed {
        exit_code: Option<i32>,
        detail: String,
    },
}

impl Failure {
    pub fn crashed(exit_code: Option<i32>, detail: impl Into<String>) -> Self {
        Self::WorkerCrashed {
            exit_code,
            detail: detail.into(),
        }
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, Failure::WorkerCrashed { .. })
    }
}

/// Exactly one of these is produced per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { payload: Payload },
    Failure { failure: Failure },
}

impl Outcome {
    pub fn success(payload: Payload) -> Self {
        Self::Success { payload }
    }

    pub fn failure(failure: Failure) -> Self {
        Self::Failure { failure }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Outcome::Success { payload } => Some(payload),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&Failure> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { failure } => Some(failure),
        }
    }

    /// Legacy view: the payload, or the failure in its place.
    pub fn into_result(self) -> Result<Payload, Failure> {
        match self {
            Outcome::Success { payload } => Ok(payload),
            Outcome::Failure { failure } => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_is_tagged() {
        let ok = Outcome::success(json!({"y": [1.0]}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "success", "payload": {"y": [1.0]}})
        );

        let failed = Outcome::failure(Failure::RetriesExhausted {
            attempts: 2,
            last_error: "diverged".into(),
        });
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "status": "failure",
                "failure": {"kind": "retries_exhausted", "attempts": 2, "last_error": "diverged"}
            })
        );
    }

    #[test]
    fn into_result_surfaces_failure_in_place_of_payload() {
        let crash = Failure::crashed(Some(134), "no reply");
        assert_eq!(Outcome::failure(crash.clone()).into_result(), Err(crash));
        assert_eq!(Outcome::success(json!(1)).into_result(), Ok(json!(1)));
    }

    #[test]
    fn failure_messages_name_the_cause() {
        let msg = Failure::RetriesExhausted {
            attempts: 3,
            last_error: "boom".into(),
        }
        .to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("boom"));
    }
}
