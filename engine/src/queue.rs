//! Pending operation queue.
//!
//! A FIFO log of mutations the server has not acknowledged yet. Entries are
//! kept in `seq` order at all times; entries handed back after a failed
//! replay are merged in by `seq`, so they land ahead of anything recorded
//! after them.

use crate::{
    error::Result, Error, FailedOp, PendingOperation, QueuedOp, Seq, TaskDraft, TaskStore,
};
use std::collections::VecDeque;

/// Ordered log of operations waiting for the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingQueue {
    entries: VecDeque<QueuedOp>,
    failed: Vec<FailedOp>,
    next_seq: Seq,
}

impl PendingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted entries.
    pub fn from_parts(entries: Vec<QueuedOp>, failed: Vec<FailedOp>, next_seq: Seq) -> Self {
        let highest = entries
            .iter()
            .map(|e| e.seq)
            .chain(failed.iter().map(|f| f.entry.seq))
            .max()
            .map_or(0, |seq| seq + 1);

        let mut queue = Self {
            entries: VecDeque::new(),
            failed,
            next_seq: next_seq.max(highest),
        };
        queue.restore(entries);
        queue
    }

    /// Append an operation. Returns its sequence number.
    pub fn enqueue(&mut self, operation: PendingOperation) -> Seq {
        self.enqueue_attempted(operation, 0, None)
    }

    /// Append an operation that already failed `attempts` times.
    pub fn enqueue_attempted(
        &mut self,
        operation: PendingOperation,
        attempts: u32,
        last_error: Option<String>,
    ) -> Seq {
        let seq = self.allocate_seq();
        self.entries.push_back(QueuedOp {
            seq,
            operation,
            attempts,
            last_error,
        });
        seq
    }

    /// Reserve the next sequence number without queueing anything.
    pub fn allocate_seq(&mut self) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Drop the queued add for `temp_id` along with every later entry that
    /// targets the same temporary id. A failed add for it is dropped as well.
    ///
    /// Returns `true` if an add was found.
    pub fn cancel_pending_add(&mut self, temp_id: &str) -> bool {
        let queued = self.entries.iter().any(|e| e.operation.is_add_of(temp_id));
        if queued {
            self.entries.retain(|e| e.task_id() != temp_id);
        }
        let before = self.failed.len();
        self.failed.retain(|f| !f.entry.operation.is_add_of(temp_id));
        queued || self.failed.len() != before
    }

    /// Replace the draft carried by the add for `temp_id`, queued or failed.
    pub fn amend_pending_add(&mut self, temp_id: &str, new_draft: TaskDraft) -> bool {
        amend_add(
            self.entries
                .iter_mut()
                .chain(self.failed.iter_mut().map(|f| &mut f.entry)),
            temp_id,
            new_draft,
        )
    }

    /// Check whether an add for `temp_id` is queued.
    pub fn has_pending_add(&self, temp_id: &str) -> bool {
        self.entries.iter().any(|e| e.operation.is_add_of(temp_id))
    }

    /// Take every entry, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<QueuedOp> {
        self.entries.drain(..).collect()
    }

    /// Put entries back, keeping `seq` order.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = QueuedOp>) {
        self.entries.extend(entries);
        self.entries.make_contiguous().sort_by_key(|e| e.seq);
    }

    /// Queued entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedOp> {
        self.entries.iter()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The sequence number the next entry will get.
    pub fn next_seq(&self) -> Seq {
        self.next_seq
    }

    /// Move an entry to the failed list.
    pub fn park(&mut self, failed: FailedOp) {
        self.failed.push(failed);
        self.failed.sort_by_key(|f| f.entry.seq);
    }

    /// Entries that exhausted their retries.
    pub fn failed(&self) -> &[FailedOp] {
        &self.failed
    }

    /// Drop a failed entry after the user has seen it.
    pub fn acknowledge(&mut self, seq: Seq) -> Result<FailedOp> {
        let index = self
            .failed
            .iter()
            .position(|f| f.entry.seq == seq)
            .ok_or(Error::OperationNotFound(seq))?;
        Ok(self.failed.remove(index))
    }

    /// Give a failed entry a fresh set of attempts.
    pub fn retry(&mut self, seq: Seq) -> Result<()> {
        let mut failed = self.acknowledge(seq)?;
        failed.entry.attempts = 0;
        self.restore(std::iter::once(failed.entry));
        Ok(())
    }
}

/// Amend the draft of the add for `temp_id` among `entries`.
pub fn amend_add<'a>(
    entries: impl Iterator<Item = &'a mut QueuedOp>,
    temp_id: &str,
    new_draft: TaskDraft,
) -> bool {
    for entry in entries {
        if let PendingOperation::Add { draft, temp_id: id, .. } = &mut entry.operation {
            if id == temp_id {
                *draft = new_draft;
                return true;
            }
        }
    }
    false
}

/// Lay the local effect of pending operations over the store.
///
/// Used after a fetch replaced server data, so unsynced edits stay visible:
/// placeholders come back, queued updates win over fetched copies, and
/// queued deletes hide their task.
pub fn overlay<'a>(store: &mut TaskStore, entries: impl IntoIterator<Item = &'a QueuedOp>) {
    for entry in entries {
        match &entry.operation {
            PendingOperation::Add { temp_id, .. } => {
                if !store.contains(temp_id) {
                    if let Some(task) = entry.operation.local_task() {
                        store.upsert(task);
                    }
                }
            }
            PendingOperation::Update { task } => {
                store.replace_existing(task.clone());
            }
            PendingOperation::Delete { task_id } => {
                store.remove_by_id(task_id);
            }
        }
    }
}
