//! Turning a completed result table into the caller-facing output.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use fmupool_core::{BatchId, DiagnosticSink, Outcome};

use crate::collector::ResultTable;
use crate::error::PoolError;

/// Summary of one finished batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStats {
    pub batch_id: BatchId,
    pub jobs: usize,
    pub succeeded: usize,
    /// Failed jobs, crashes included.
    pub failed: usize,
    pub crashed: usize,
    pub peak_active: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Ordered outcomes together with their [`BatchStats`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<Outcome>,
    pub stats: BatchStats,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.stats.failed == 0
    }
}

/// Order `table` by job index and report every failure.
///
/// Each failed job gets one diagnostic naming its index and error, followed
/// by one summary line when anything failed. Nothing is reordered, dropped or
/// merged.
pub fn aggregate(
    batch: BatchId,
    table: ResultTable,
    sink: Option<&dyn DiagnosticSink>,
) -> Result<Vec<Outcome>, PoolError> {
    let outcomes = table.into_ordered()?;

    let mut failed = 0usize;
    for (index, outcome) in outcomes.iter().enumerate() {
        if let Some(failure) = outcome.failure_reason() {
            failed += 1;
            warn!(batch = %batch, index, error = %failure, "simulation failed");
            if let Some(sink) = sink {
                sink.log(&format!(
                    "Failed simulation with index {index} (error: {failure})"
                ));
            }
        }
    }

    if failed > 0 {
        warn!(batch = %batch, failed, jobs = outcomes.len(), "some simulations failed");
        if let Some(sink) = sink {
            sink.log("Some simulations failed.");
        }
    } else {
        info!(batch = %batch, jobs = outcomes.len(), "all simulations succeeded");
    }

    Ok(outcomes)
}

/// Count outcomes into a [`BatchStats`].
pub fn stats(
    batch_id: BatchId,
    outcomes: &[Outcome],
    peak_active: usize,
    started_at: DateTime<Utc>,
    elapsed: Duration,
) -> BatchStats {
    let crashed = outcomes
        .iter()
        .filter(|o| o.failure_reason().is_some_and(|f| f.is_crash()))
        .count();
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();

    BatchStats {
        batch_id,
        jobs: outcomes.len(),
        succeeded,
        failed: outcomes.len() - succeeded,
        crashed,
        peak_active,
        started_at,
        elapsed,
    }
}
