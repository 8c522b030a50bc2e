//! Change notification payloads and observer handles.

use crate::error::{Result, StoreError};
use crate::record::Record;
use crossbeam_channel::Receiver;
use std::time::Duration;

/// One committed batch of changes to a single entity.
#[derive(Clone, Debug)]
pub struct ChangeSet<R> {
    pub inserted: Vec<R>,
    pub updated: Vec<R>,
    pub deleted: Vec<R>,
    /// Records reloaded in place without a field change. No built-in
    /// operation emits these; the slot exists for embedders.
    pub refreshed: Vec<R>,
}

impl<R> Default for ChangeSet<R> {
    fn default() -> Self {
        Self {
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            refreshed: Vec::new(),
        }
    }
}

impl<R> ChangeSet<R> {
    pub fn inserted(records: Vec<R>) -> Self {
        Self {
            inserted: records,
            ..Default::default()
        }
    }

    pub fn updated(records: Vec<R>) -> Self {
        Self {
            updated: records,
            ..Default::default()
        }
    }

    pub fn deleted(records: Vec<R>) -> Self {
        Self {
            deleted: records,
            ..Default::default()
        }
    }

    /// Empty sets are never published.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.refreshed.is_empty()
    }
}

impl<R: Record> ChangeSet<R> {
    /// The subset of this change set touching one record id.
    pub(crate) fn filtered_to_id(&self, id: &str) -> Self {
        let keep = |records: &[R]| -> Vec<R> {
            records
                .iter()
                .filter(|record| record.record_id() == id)
                .cloned()
                .collect()
        };
        Self {
            inserted: keep(&self.inserted),
            updated: keep(&self.updated),
            deleted: keep(&self.deleted),
            refreshed: keep(&self.refreshed),
        }
    }
}

/// A subscriber's end of a change stream.
///
/// The stream never completes on its own; after the store is destroyed it
/// yields a single terminal `Err(StoreDestroyed)`.
pub struct Observer<R: Record> {
    pub(crate) receiver: Receiver<Result<ChangeSet<R>>>,
}

impl<R: Record> Observer<R> {
    /// Block until the next change set arrives.
    pub fn recv(&self) -> Result<ChangeSet<R>> {
        match self.receiver.recv() {
            Ok(item) => item,
            Err(_) => Err(StoreError::StoreDestroyed),
        }
    }

    /// The next change set, if one is already queued.
    pub fn try_recv(&self) -> Option<Result<ChangeSet<R>>> {
        match self.receiver.try_recv() {
            Ok(item) => Some(item),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                Some(Err(StoreError::StoreDestroyed))
            }
        }
    }

    /// Block up to `timeout` for the next change set; `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Result<ChangeSet<R>>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Some(Err(StoreError::StoreDestroyed))
            }
        }
    }
}
