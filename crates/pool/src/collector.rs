//! Result table and the background collector draining the mailbox into it.

use std::thread;

use tracing::{debug, warn};

use fmupool_core::{BatchId, JobIndex, Outcome};

use crate::error::{PoolError, PoolResult};
use crate::mailbox::Inbox;

/// Index-keyed outcomes of one batch. A slot is written at most once.
#[derive(Debug)]
pub struct ResultTable {
    slots: Vec<Option<Outcome>>,
    filled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InsertError {
    #[error("job index {0} is outside the batch")]
    OutOfRange(JobIndex),
    #[error("job {0} already has an outcome")]
    Duplicate(JobIndex),
}

impl ResultTable {
    pub fn new(expected: usize) -> Self {
        Self {
            slots: (0..expected).map(|_| None).collect(),
            filled: 0,
        }
    }

    /// Record `outcome` for `index`; the first write wins.
    pub fn insert(&mut self, index: JobIndex, outcome: Outcome) -> Result<(), InsertError> {
        let slot = self
            .slots
            .get_mut(index.get())
            .ok_or(InsertError::OutOfRange(index))?;
        if slot.is_some() {
            return Err(InsertError::Duplicate(index));
        }
        *slot = Some(outcome);
        self.filled += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Outcomes in index order. Fails if any slot is still empty.
    pub fn into_ordered(self) -> PoolResult<Vec<Outcome>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.ok_or(PoolError::MissingOutcome(JobIndex::new(i))))
            .collect()
    }
}

/// Background thread that owns the [`Inbox`] for one batch.
#[derive(Debug)]
pub struct Collector {
    join: thread::JoinHandle<PoolResult<ResultTable>>,
}

impl Collector {
    /// Start draining `inbox` until `expected` distinct outcomes arrived.
    pub fn spawn(
        pool: &str,
        batch: BatchId,
        inbox: Inbox,
        expected: usize,
    ) -> PoolResult<Self> {
        let join = thread::Builder::new()
            .name(format!("{pool}-collector"))
            .spawn(move || collect(batch, inbox, expected))
            .map_err(|source| PoolError::Thread {
                what: "collector",
                source,
            })?;
        Ok(Self { join })
    }

    /// Wait for the collector to finish and hand over the table.
    pub fn join(self) -> PoolResult<ResultTable> {
        self.join
            .join()
            .map_err(|_| PoolError::channel("collector thread panicked"))?
    }
}

fn collect(batch: BatchId, inbox: Inbox, expected: usize) -> PoolResult<ResultTable> {
    let mut table = ResultTable::new(expected);
    debug!(batch = %batch, expected, "collector started");

    while !table.is_complete() {
        let Some(delivery) = inbox.recv() else {
            return Err(PoolError::channel(format!(
                "all producers hung up after {} of {} outcomes",
                table.len(),
                table.expected()
            )));
        };
        if let Err(err) = table.insert(delivery.index, delivery.outcome) {
            warn!(batch = %batch, error = %err, "dropping unexpected delivery");
        }
    }

    debug!(batch = %batch, collected = table.len(), "collector finished");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::mailbox;
    use serde_json::json;

    #[test]
    fn table_orders_by_index_regardless_of_arrival() {
        let mut table = ResultTable::new(3);
        table.insert(JobIndex::new(2), Outcome::success(json!(2))).unwrap();
        table.insert(JobIndex::new(0), Outcome::success(json!(0))).unwrap();
        table.insert(JobIndex::new(1), Outcome::success(json!(1))).unwrap();

        let ordered = table.into_ordered().unwrap();
        let payloads: Vec<_> = ordered.iter().map(|o| o.payload().cloned().unwrap()).collect();
        assert_eq!(payloads, vec![json!(0), json!(1), json!(2)]);
    }

    #[test]
    fn table_never_overwrites() {
        let mut table = ResultTable::new(1);
        table.insert(JobIndex::new(0), Outcome::success(json!("first"))).unwrap();
        assert_eq!(
            table.insert(JobIndex::new(0), Outcome::success(json!("second"))),
            Err(InsertError::Duplicate(JobIndex::new(0)))
        );
        assert_eq!(
            table.insert(JobIndex::new(5), Outcome::success(json!("x"))),
            Err(InsertError::OutOfRange(JobIndex::new(5)))
        );
        assert_eq!(table.into_ordered().unwrap()[0].payload(), Some(&json!("first")));
    }

    #[test]
    fn incomplete_table_reports_the_missing_index() {
        let mut table = ResultTable::new(2);
        table.insert(JobIndex::new(0), Outcome::success(json!(0))).unwrap();
        assert!(matches!(
            table.into_ordered(),
            Err(PoolError::MissingOutcome(i)) if i == JobIndex::new(1)
        ));
    }

    #[test]
    fn collector_stops_after_expected_outcomes() {
        let (outbox, inbox) = mailbox(1);
        let collector = Collector::spawn("test", BatchId::new(), inbox, 3).unwrap();

        for i in [1, 0, 1, 2] {
            // The repeated index 1 is dropped and does not count.
            outbox.post(JobIndex::new(i), Outcome::success(json!(i))).unwrap();
        }

        let table = collector.join().unwrap();
        assert!(table.is_complete());
        assert_eq!(table.expected(), 3);
        assert_eq!(table.into_ordered().unwrap()[1].payload(), Some(&json!(1)));
    }

    #[test]
    fn collector_reports_channel_failure_when_producers_vanish() {
        let (outbox, inbox) = mailbox(4);
        let collector = Collector::spawn("test", BatchId::new(), inbox, 2).unwrap();
        outbox.post(JobIndex::new(0), Outcome::success(json!(0))).unwrap();
        drop(outbox);

        let err = collector.join().unwrap_err();
        assert!(matches!(err, PoolError::Channel(msg) if msg.contains("1 of 2")));
    }
}
