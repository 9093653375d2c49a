//! Replay bookkeeping for one pass over the pending queue.
//!
//! A [`ReplayBatch`] owns the entries drained from the queue while they are
//! being sent. It hands them out one at a time in `seq` order and records how
//! each one ended:
//!
//! - success drops the entry
//! - a transient failure defers it to the next pass and holds back every later
//!   entry for the same task id, so one id's operations are never reordered
//! - a rejection defers it too, until it has failed `max_rejected_attempts`
//!   times; then it is parked for the user to acknowledge
//! - losing the network defers everything left
//!
//! The batch performs no IO; the caller sends each entry and reports back.

use crate::{FailedOp, FailureKind, QueuedOp, Seq, TaskDraft, TaskId};
use std::collections::{HashSet, VecDeque};

/// Default bound on attempts for rejected operations.
pub const DEFAULT_MAX_REJECTED_ATTEMPTS: u32 = 3;

/// What happened to a failed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Goes back to the queue for the next pass
    Deferred,
    /// Moved to the failed list
    Parked,
}

/// Outcome of a finished replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries acknowledged by the server
    pub synced: usize,
    /// Entries to put back in the queue
    pub deferred: Vec<QueuedOp>,
    /// Entries that exhausted their retries
    pub parked: Vec<FailedOp>,
}

/// Entries of one replay pass.
#[derive(Debug, Clone)]
pub struct ReplayBatch {
    remaining: VecDeque<QueuedOp>,
    in_flight: Option<QueuedOp>,
    deferred: Vec<QueuedOp>,
    parked: Vec<FailedOp>,
    blocked: HashSet<TaskId>,
    max_rejected_attempts: u32,
    synced: usize,
}

impl ReplayBatch {
    /// Start a pass over drained entries.
    pub fn new(mut entries: Vec<QueuedOp>, max_rejected_attempts: u32) -> Self {
        entries.sort_by_key(|e| e.seq);
        Self {
            remaining: entries.into(),
            in_flight: None,
            deferred: Vec::new(),
            parked: Vec::new(),
            blocked: HashSet::new(),
            max_rejected_attempts: max_rejected_attempts.max(1),
            synced: 0,
        }
    }

    /// Take the next entry to send.
    ///
    /// Entries whose task id is held back by an earlier failure are deferred
    /// without being handed out. Returns `None` while an entry is in flight.
    pub fn next(&mut self) -> Option<QueuedOp> {
        if self.in_flight.is_some() {
            return None;
        }
        while let Some(entry) = self.remaining.pop_front() {
            if self.blocked.contains(entry.task_id()) {
                self.deferred.push(entry);
                continue;
            }
            self.in_flight = Some(entry.clone());
            return Some(entry);
        }
        None
    }

    /// The entry currently being sent.
    pub fn in_flight(&self) -> Option<&QueuedOp> {
        self.in_flight.as_ref()
    }

    /// Record that the in-flight entry reached the server.
    pub fn complete(&mut self, seq: Seq) -> bool {
        match self.take_in_flight(seq) {
            Some(_) => {
                self.synced += 1;
                true
            }
            None => false,
        }
    }

    /// Drop the in-flight entry without counting it as synced.
    ///
    /// Used when the entry became moot while it was being sent.
    pub fn discard(&mut self, seq: Seq) -> bool {
        self.take_in_flight(seq).is_some()
    }

    /// Record that the in-flight entry failed.
    ///
    /// Returns `None` if `seq` is not the entry in flight.
    pub fn fail(&mut self, seq: Seq, kind: FailureKind, message: String) -> Option<Disposition> {
        let mut entry = self.take_in_flight(seq)?;
        entry.attempts += 1;
        entry.last_error = Some(message.clone());

        if kind == FailureKind::Rejected && entry.attempts >= self.max_rejected_attempts {
            self.parked.push(FailedOp {
                entry,
                reason: message,
            });
            return Some(Disposition::Parked);
        }

        self.blocked.insert(entry.task_id().clone());
        self.deferred.push(entry);
        if kind == FailureKind::NetworkUnavailable {
            self.abort();
        }
        Some(Disposition::Deferred)
    }

    /// Defer every entry for `task_id` without sending it.
    ///
    /// Used when an operation on that task is already being sent outside
    /// this pass.
    pub fn hold_back(&mut self, task_id: &str) {
        self.blocked.insert(task_id.to_string());
    }

    /// Stop handing out entries; everything not yet sent is deferred.
    pub fn abort(&mut self) {
        self.deferred.extend(self.remaining.drain(..));
    }

    /// Drop a not-yet-sent add for `temp_id` and every later entry for it.
    ///
    /// An add that is already in flight cannot be cancelled here.
    pub fn cancel_pending_add(&mut self, temp_id: &str) -> bool {
        let found = self
            .remaining
            .iter()
            .chain(self.deferred.iter())
            .any(|e| e.operation.is_add_of(temp_id));
        if found {
            self.remaining.retain(|e| e.task_id() != temp_id);
            self.deferred.retain(|e| e.task_id() != temp_id);
        }
        found
    }

    /// Replace the draft of the add for `temp_id`.
    ///
    /// An add already in flight is amended too, so that if it fails the retry
    /// carries the latest content.
    pub fn amend_pending_add(&mut self, temp_id: &str, draft: TaskDraft) -> bool {
        crate::queue::amend_add(
            self.in_flight
                .iter_mut()
                .chain(self.remaining.iter_mut())
                .chain(self.deferred.iter_mut()),
            temp_id,
            draft,
        )
    }

    /// Every entry this batch still owns, in `seq` order.
    ///
    /// Includes the in-flight entry, so a persisted copy taken mid-pass loses
    /// nothing.
    pub fn pending(&self) -> Vec<&QueuedOp> {
        let mut entries: Vec<&QueuedOp> = self
            .in_flight
            .iter()
            .chain(self.remaining.iter())
            .chain(self.deferred.iter())
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Check if nothing is left to send.
    pub fn is_done(&self) -> bool {
        self.in_flight.is_none() && self.remaining.is_empty()
    }

    /// Close the pass.
    ///
    /// An entry still in flight is treated as deferred.
    pub fn finish(mut self) -> ReplayReport {
        self.abort();
        if let Some(entry) = self.in_flight.take() {
            self.deferred.push(entry);
        }
        self.deferred.sort_by_key(|e| e.seq);
        ReplayReport {
            synced: self.synced,
            deferred: self.deferred,
            parked: self.parked,
        }
    }

    fn take_in_flight(&mut self, seq: Seq) -> Option<QueuedOp> {
        if self.in_flight.as_ref().map(|e| e.seq) == Some(seq) {
            self.in_flight.take()
        } else {
            None
        }
    }
}
