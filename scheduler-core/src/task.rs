//! The queued-task table.
//!
//! Holds every task that has been enqueued but not yet matched to a
//! worker. Running tasks live on the [`crate::worker::WorkerTable`]
//! instead — a task is in exactly one of those two places, never both.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::balance::Balance;
use crate::error::{SchedulerError, SchedulerResult};
use crate::time::Timestamp;

/// Opaque task identifier.
pub type TaskId = String;

/// A queued, unassigned unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: TaskId,
    pub account_id: AccountId,
    /// Required labels: a worker must carry all of these to be eligible.
    pub base_labels: HashSet<String>,
    /// Preferred labels: bias worker selection, never gate eligibility.
    pub provisionable_labels: HashSet<String>,
    pub enqueue_time: Timestamp,
    /// Last time the matcher examined this request; starts at `enqueue_time`.
    pub examined_time: Timestamp,
}

impl TaskRequest {
    pub fn new(
        id: impl Into<TaskId>,
        account_id: impl Into<AccountId>,
        base_labels: HashSet<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            base_labels,
            provisionable_labels: HashSet::new(),
            enqueue_time: now,
            examined_time: now,
        }
    }

    pub fn with_provisionable_labels(mut self, labels: HashSet<String>) -> Self {
        self.provisionable_labels = labels;
        self
    }

    /// Number of `other`'s labels this request's provisionable set also names.
    pub fn provisionable_overlap(&self, other_labels: &HashSet<String>) -> usize {
        self.provisionable_labels.intersection(other_labels).count()
    }

    pub fn base_labels_subset_of(&self, worker_labels: &HashSet<String>) -> bool {
        self.base_labels.is_subset(worker_labels)
    }
}

/// Sort key used everywhere the spec calls for "(account priority class,
/// enqueueTime ascending, taskID ascending)" deterministic order.
pub(crate) fn queued_sort_key(priority_class: usize, req: &TaskRequest) -> (usize, i64, String) {
    // Timestamps are f64 seconds; multiply into a stable integer ordering
    // key so floating point equality quirks never affect tie-breaking.
    let micros = (req.enqueue_time.as_seconds() * 1_000_000.0).round() as i64;
    (priority_class, micros, req.id.clone())
}

/// The queued-task table.
#[derive(Debug, Default)]
pub struct TaskTable {
    queued: HashMap<TaskId, TaskRequest>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_queued(&self, id: &str) -> bool {
        self.queued.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&TaskRequest> {
        self.queued.get(id)
    }

    /// Insert a new queued request. Fails if the id is already queued;
    /// the caller (`Engine`) is responsible for also checking the worker
    /// table so a running task's id can't be re-enqueued.
    pub fn enqueue(&mut self, request: TaskRequest) -> SchedulerResult<()> {
        if self.queued.contains_key(&request.id) {
            return Err(SchedulerError::TaskAlreadyExists { id: request.id });
        }
        self.queued.insert(request.id.clone(), request);
        Ok(())
    }

    /// Remove a queued task. Fails if it isn't queued.
    pub fn dequeue(&mut self, id: &str) -> SchedulerResult<TaskRequest> {
        self.queued
            .remove(id)
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })
    }

    /// Re-insert a task returned to the queue by preemption, preserving
    /// its original `enqueue_time` but refreshing `examined_time`.
    pub(crate) fn requeue_preempted(&mut self, mut request: TaskRequest, now: Timestamp) {
        request.examined_time = now;
        self.queued.insert(request.id.clone(), request);
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// All queued requests, each paired with the account's priority class
    /// it would currently be considered at, in the deterministic
    /// (priority class, enqueue_time, task id) order.
    pub fn queued_sorted(&self, balances: &HashMap<AccountId, &Balance>) -> Vec<TaskRequest> {
        let mut entries: Vec<_> = self
            .queued
            .values()
            .map(|req| {
                let class = balances
                    .get(&req.account_id)
                    .map(|b| b.priority_class())
                    .unwrap_or_else(|| {
                        // An unknown account is treated as free-bucket-only (§3).
                        usize::MAX
                    });
                (class, req.clone())
            })
            .collect();
        entries.sort_by(|(ca, a), (cb, b)| queued_sort_key(*ca, a).cmp(&queued_sort_key(*cb, b)));
        entries.into_iter().map(|(_, req)| req).collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &TaskRequest> {
        self.queued.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn enqueue_rejects_duplicate_id() {
        let mut table = TaskTable::new();
        let req = TaskRequest::new("t1", "acct", labels(&["x"]), Timestamp::ZERO);
        table.enqueue(req.clone()).unwrap();
        assert!(table.enqueue(req).is_err());
    }

    #[test]
    fn dequeue_missing_task_errors() {
        let mut table = TaskTable::new();
        assert!(table.dequeue("missing").is_err());
    }

    #[test]
    fn base_labels_must_be_subset() {
        let req = TaskRequest::new("t1", "acct", labels(&["x", "y"]), Timestamp::ZERO);
        assert!(req.base_labels_subset_of(&labels(&["x", "y", "z"])));
        assert!(!req.base_labels_subset_of(&labels(&["x"])));
    }
}
