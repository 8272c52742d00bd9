//! Bounded result mailbox between workers and the collector.
//!
//! Producers block while the mailbox is full; the collector is the only
//! consumer and drains continuously, so backlog stays bounded by `capacity`
//! without ever stalling a producer for long.

use std::sync::mpsc::{self, Receiver, SyncSender};

use fmupool_core::{JobIndex, Outcome};

use crate::error::PoolError;

/// One job's outcome on its way to the result table.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub index: JobIndex,
    pub outcome: Outcome,
}

/// Producer side; cloned once per worker.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: SyncSender<Delivery>,
}

/// Consumer side; owned by the collector.
#[derive(Debug)]
pub struct Inbox {
    rx: Receiver<Delivery>,
}

/// Create a mailbox holding at most `capacity` undelivered outcomes.
pub fn mailbox(capacity: usize) -> (Outbox, Inbox) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (Outbox { tx }, Inbox { rx })
}

impl Outbox {
    /// Post an outcome, blocking while the mailbox is full.
    pub fn post(&self, index: JobIndex, outcome: Outcome) -> Result<(), PoolError> {
        self.tx
            .send(Delivery { index, outcome })
            .map_err(|_| PoolError::channel(format!("mailbox closed before job {index} was delivered")))
    }
}

impl Inbox {
    /// Block until the next delivery; `None` once every producer is gone.
    pub fn recv(&self) -> Option<Delivery> {
        self.rx.recv().ok()
    }
}
