//! Strongly-typed identifiers used across the pool.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SpecError;

/// Position of a job inside its batch.
///
/// Indices are dense over `[0, N)` and unique within one batch invocation;
/// the final output is ordered by this value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobIndex(usize);

impl JobIndex {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for JobIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<usize> for JobIndex {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<JobIndex> for usize {
    fn from(value: JobIndex) -> Self {
        value.0
    }
}

/// Identifier of one batch invocation (log correlation only).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered) so batches sort by start time in logs.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for BatchId {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s).map_err(|e| SpecError::malformed(format!("BatchId: {e}")))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_index_orders_numerically() {
        let mut indices = vec![JobIndex::new(10), JobIndex::new(2), JobIndex::new(0)];
        indices.sort();
        assert_eq!(indices, vec![JobIndex::new(0), JobIndex::new(2), JobIndex::new(10)]);
    }

    #[test]
    fn job_index_serializes_transparently() {
        let json = serde_json::to_string(&JobIndex::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn batch_id_round_trips_through_display() {
        let id = BatchId::new();
        let parsed: BatchId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn batch_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<BatchId>().is_err());
    }
}
