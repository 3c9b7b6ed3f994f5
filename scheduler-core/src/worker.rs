//! The worker table: everything the matcher can hand a task to.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::balance::Balance;
use crate::error::{SchedulerError, SchedulerResult};
use crate::task::{TaskId, TaskRequest};
use crate::time::Timestamp;

/// Opaque worker identifier.
pub type WorkerId = String;

/// A task currently running on a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningTask {
    pub task_id: TaskId,
    pub account_id: AccountId,
    /// Priority bucket (`0..=P`) this task is being charged against.
    pub priority: usize,
    pub start_time: Timestamp,
    /// Accrued cost so far, one entry per priority bucket charged to date.
    /// Used to issue a conservative refund if this task is preempted.
    pub cost: Balance,
    pub last_cost_update: Timestamp,
    /// The request this task was matched from, kept so preemption or
    /// abort can return it to the queue with its original labels and
    /// `enqueue_time` intact.
    pub request: TaskRequest,
}

/// A known worker, idle or busy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub labels: HashSet<String>,
    pub running_task: Option<RunningTask>,
    /// When this worker last became idle; `None` while busy. Used to
    /// break selection ties in favor of the longest-idle worker.
    pub idle_since: Option<Timestamp>,
}

impl Worker {
    pub fn is_idle(&self) -> bool {
        self.running_task.is_none()
    }

    pub fn can_run(&self, base_labels: &HashSet<String>) -> bool {
        base_labels.is_subset(&self.labels)
    }

    pub fn idle_duration(&self, now: Timestamp) -> f64 {
        self.idle_since.map(|since| since.elapsed_until(now)).unwrap_or(0.0)
    }
}

#[derive(Debug, Default)]
pub struct WorkerTable {
    workers: HashMap<WorkerId, Worker>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Worker> {
        self.workers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workers.contains_key(id)
    }

    pub fn running_task_id(&self, worker_id: &str) -> Option<&TaskId> {
        self.workers
            .get(worker_id)
            .and_then(|w| w.running_task.as_ref())
            .map(|t| &t.task_id)
    }

    /// Find which worker (if any) is running a given task.
    pub fn find_running(&self, task_id: &str) -> Option<&Worker> {
        self.workers
            .values()
            .find(|w| w.running_task.as_ref().map(|t| t.task_id.as_str()) == Some(task_id))
    }

    /// Register a new worker, or mark an existing one idle. Any currently
    /// running task is detached and returned to the caller as "completed
    /// at `now`" (the caller decides whether to requeue it).
    pub fn mark_idle(
        &mut self,
        id: impl Into<WorkerId>,
        labels: HashSet<String>,
        now: Timestamp,
    ) -> Option<RunningTask> {
        let id = id.into();
        let previous = self.workers.get_mut(&id);
        match previous {
            Some(worker) => {
                let detached = worker.running_task.take();
                worker.labels = labels;
                worker.idle_since = Some(now);
                detached
            }
            None => {
                self.workers.insert(
                    id.clone(),
                    Worker {
                        id,
                        labels,
                        running_task: None,
                        idle_since: Some(now),
                    },
                );
                None
            }
        }
    }

    pub fn notify_task_running(&mut self, worker_id: &str, task_id: &str) -> SchedulerResult<()> {
        let worker = self
            .workers
            .get(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: worker_id.to_string(),
            })?;
        match &worker.running_task {
            Some(t) if t.task_id == task_id => Ok(()),
            _ => Err(SchedulerError::precondition(format!(
                "worker {worker_id} is not running task {task_id}"
            ))),
        }
    }

    /// Forcibly detach a worker's running task, returning it to the caller.
    /// The task is not automatically requeued; callers that want it back
    /// in the queue must do so explicitly.
    pub fn abort_task(&mut self, worker_id: &str, now: Timestamp) -> SchedulerResult<RunningTask> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: worker_id.to_string(),
            })?;
        let task = worker
            .running_task
            .take()
            .ok_or_else(|| SchedulerError::precondition(format!("worker {worker_id} is idle")))?;
        worker.idle_since = Some(now);
        Ok(task)
    }

    pub fn remove(&mut self, id: &str) -> SchedulerResult<()> {
        self.workers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::WorkerNotFound { id: id.to_string() })
    }

    pub(crate) fn assign(&mut self, worker_id: &str, task: RunningTask) -> SchedulerResult<()> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: worker_id.to_string(),
            })?;
        worker.running_task = Some(task);
        worker.idle_since = None;
        Ok(())
    }

    pub(crate) fn detach(&mut self, worker_id: &str) -> Option<RunningTask> {
        self.workers.get_mut(worker_id).and_then(|w| w.running_task.take())
    }

    /// Deterministic iteration order.
    pub fn ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<_> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn idle_workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values().filter(|w| w.is_idle())
    }

    pub fn busy_workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values().filter(|w| !w.is_idle())
    }

    /// Visit every currently-running task, for per-pass cost accrual.
    pub(crate) fn for_each_running_mut(&mut self, mut f: impl FnMut(&mut RunningTask)) {
        for worker in self.workers.values_mut() {
            if let Some(task) = worker.running_task.as_mut() {
                f(task);
            }
        }
    }

    pub fn running_count_for_account(&self, account_id: &str) -> usize {
        self.workers
            .values()
            .filter(|w| {
                w.running_task
                    .as_ref()
                    .map(|t| t.account_id == account_id)
                    .unwrap_or(false)
            })
            .count()
    }
}
