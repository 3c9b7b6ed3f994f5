//! The scheduler: a single-threaded, cooperative engine with no internal
//! locking and no background threads. Every operation takes an explicit
//! `now` and returns synchronously; callers that want concurrent access
//! wrap an `Engine` in a mutex themselves (see [`crate::SharedEngine`]).

use std::collections::HashSet;

use tracing::{debug, info};

use crate::account::{AccountConfig, AccountId, AccountRegistry};
use crate::balance::Balance;
use crate::cancel::CancellationToken;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{CompletionReason, Event, EventSink};
use crate::labels::LabelCounter;
use crate::matcher::{assign, preempt, Action};
use crate::snapshot::{AccountSnapshot, QueuedTaskSnapshot, StateSnapshot, WorkerSnapshot};
use crate::task::{TaskRequest, TaskTable};
use crate::time::Timestamp;
use crate::worker::{WorkerId, WorkerTable};

/// Maximum number of extra assignment re-runs performed inside a single
/// `run_once` call after the preemption phase, per §4.7's termination
/// bound. Preemption can only free up workers, never create more queued
/// work, so this converges quickly in practice; the cap exists so a
/// pathological input can never make one call loop unboundedly.
const MAX_ASSIGNMENT_RERUNS: usize = 2;

/// Fold one matcher phase's result into the actions accumulated so far.
/// On success, appends and continues. On `Cancelled`, appends the
/// phase's own partial actions too, then hands back a `Cancelled` error
/// carrying the *entire* action list collected this `run_once` call —
/// nothing decided before cancellation fired is ever dropped.
fn merge_phase(actions: &mut Vec<Action>, result: SchedulerResult<Vec<Action>>) -> SchedulerResult<()> {
    match result {
        Ok(more) => {
            actions.extend(more);
            Ok(())
        }
        Err(SchedulerError::Cancelled { actions: partial }) => {
            actions.extend(partial);
            Err(SchedulerError::Cancelled {
                actions: std::mem::take(actions),
            })
        }
        Err(e) => Err(e),
    }
}

/// The scheduler core. Owns every account, queued request, and worker
/// known to one pool.
#[derive(Debug, Default)]
pub struct Engine {
    accounts: AccountRegistry,
    tasks: TaskTable,
    workers: WorkerTable,
    labels: LabelCounter,
    last_pass_time: Timestamp,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(
        &mut self,
        id: impl Into<AccountId>,
        config: AccountConfig,
        initial_balance: Option<Balance>,
    ) -> SchedulerResult<()> {
        let id = id.into();
        if self.accounts.contains(&id) {
            return Err(SchedulerError::AccountAlreadyExists { id });
        }
        self.accounts.add_account(id, config, initial_balance)
    }

    pub fn remove_account(&mut self, id: &str) -> SchedulerResult<()> {
        self.accounts.remove_account(id)
    }

    pub fn set_account_config(&mut self, id: &str, config: AccountConfig) -> SchedulerResult<()> {
        self.accounts.set_account_config(id, config)
    }

    pub fn set_balance(&mut self, id: &str, balance: Balance) -> SchedulerResult<()> {
        self.accounts.set_balance(id, balance)
    }

    pub fn account_balance(&self, id: &str) -> SchedulerResult<&Balance> {
        self.accounts.balance(id)
    }

    /// Admit a new request into the queue. Fails if the id is already
    /// queued or running. An unknown `account_id` is accepted, not
    /// rejected — per §3, such a task is matched as if at priority `P`,
    /// the free bucket, rather than refused outright.
    pub fn enqueue(&mut self, request: TaskRequest, sink: &mut dyn EventSink) -> SchedulerResult<()> {
        if self.tasks.is_queued(&request.id) || self.workers.find_running(&request.id).is_some() {
            return Err(SchedulerError::TaskAlreadyExists { id: request.id });
        }
        let id = request.id.clone();
        let account_id = request.account_id.clone();
        let at = request.enqueue_time;
        self.tasks.enqueue(request)?;
        debug!(task_id = %id, account_id = %account_id, "enqueued");
        sink.on_event(Event::Enqueued {
            task_id: id,
            account_id,
            at,
        });
        Ok(())
    }

    /// Remove a still-queued request without ever matching it. Errors if
    /// the task is running (use [`Engine::abort_task`] instead) or unknown.
    pub fn cancel_queued(&mut self, task_id: &str) -> SchedulerResult<TaskRequest> {
        self.tasks.dequeue(task_id)
    }

    /// A worker reports it has no running task (either newly joining the
    /// pool, or having just finished whatever it was running). Any task
    /// it was running is considered finished, not requeued.
    pub fn mark_idle(
        &mut self,
        worker_id: impl Into<WorkerId>,
        labels: HashSet<String>,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> SchedulerResult<()> {
        let worker_id = worker_id.into();
        let detached = self.workers.mark_idle(worker_id.clone(), labels, now);
        if let Some(running) = detached {
            self.release_labels(&running.request, &running.account_id)?;
            sink.on_event(Event::Completed {
                task_id: running.task_id,
                worker_id,
                reason: CompletionReason::Finished,
                at: now,
            });
        }
        Ok(())
    }

    /// Confirm a worker has taken up the task the matcher assigned it.
    /// A no-op on success; errors if the worker isn't running that task.
    pub fn notify_task_running(&mut self, worker_id: &str, task_id: &str) -> SchedulerResult<()> {
        self.workers.notify_task_running(worker_id, task_id)
    }

    /// Forcibly stop whatever a worker is running. The task is dropped,
    /// not requeued — callers that want it retried must re-enqueue it.
    pub fn abort_task(
        &mut self,
        worker_id: &str,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> SchedulerResult<()> {
        let running = self.workers.abort_task(worker_id, now)?;
        self.release_labels(&running.request, &running.account_id)?;
        sink.on_event(Event::Completed {
            task_id: running.task_id,
            worker_id: worker_id.to_string(),
            reason: CompletionReason::Aborted,
            at: now,
        });
        Ok(())
    }

    /// Deregister a worker entirely. Whatever it was running is reported
    /// as completed via `WorkerRemoved`, not requeued.
    pub fn remove_worker(
        &mut self,
        worker_id: &str,
        now: Timestamp,
        sink: &mut dyn EventSink,
    ) -> SchedulerResult<()> {
        if let Some(task_id) = self.workers.running_task_id(worker_id).cloned() {
            let running = self
                .workers
                .abort_task(worker_id, now)
                .map_err(|_| SchedulerError::internal("worker vanished mid-removal"))?;
            self.release_labels(&running.request, &running.account_id)?;
            sink.on_event(Event::Completed {
                task_id,
                worker_id: worker_id.to_string(),
                reason: CompletionReason::WorkerRemoved,
                at: now,
            });
        }
        self.workers.remove(worker_id)
    }

    fn release_labels(&mut self, request: &TaskRequest, account_id: &str) -> SchedulerResult<()> {
        if let Ok(config) = self.accounts.config(account_id) {
            let task_labels = assign::match_labels(request);
            self.labels
                .release(&task_labels, account_id, &config.per_label_task_limits);
        }
        Ok(())
    }

    /// Advance account balances to `now`, then run the assignment and
    /// preemption phases. Returns every [`Action`] taken, in the order
    /// the spec's external-interface contract promises: the initial
    /// assignment sweep first, then each `(Preempt, Assign)` pair, then
    /// any further assignment re-runs preemption made possible.
    ///
    /// If `cancel` fires partway through, returns `Err(Cancelled)`
    /// carrying every action decided up to that point, per §5/§7 — the
    /// caller never has a completed action thrown away out from under it.
    pub fn run_once(
        &mut self,
        now: Timestamp,
        cancel: &CancellationToken,
        sink: &mut dyn EventSink,
    ) -> SchedulerResult<Vec<Action>> {
        let dt = self.last_pass_time.elapsed_until(now);
        if dt < 0.0 {
            return Err(SchedulerError::invalid(
                "run_once called with a time before the last pass",
            ));
        }

        self.advance(dt, now, sink)?;

        let mut actions = Vec::new();

        let assign_result = assign::run_pass(
            &self.accounts,
            &mut self.tasks,
            &mut self.workers,
            &mut self.labels,
            now,
            cancel,
            sink,
        );
        if let Err(e) = merge_phase(&mut actions, assign_result) {
            // Balances were already advanced to `now` above; that part of
            // the pass is not cancellable, so the timestamp still moves
            // forward even though the action list is partial.
            self.last_pass_time = now;
            return Err(e);
        }

        let preempt_result = preempt::run_pass(
            &mut self.accounts,
            &mut self.tasks,
            &mut self.workers,
            &mut self.labels,
            now,
            cancel,
            sink,
        );
        let preempted_any = matches!(&preempt_result, Ok(a) if !a.is_empty());
        if let Err(e) = merge_phase(&mut actions, preempt_result) {
            self.last_pass_time = now;
            return Err(e);
        }

        if preempted_any {
            for _ in 0..MAX_ASSIGNMENT_RERUNS {
                let more_result = assign::run_pass(
                    &self.accounts,
                    &mut self.tasks,
                    &mut self.workers,
                    &mut self.labels,
                    now,
                    cancel,
                    sink,
                );
                let is_empty = matches!(&more_result, Ok(a) if a.is_empty());
                if let Err(e) = merge_phase(&mut actions, more_result) {
                    self.last_pass_time = now;
                    return Err(e);
                }
                if is_empty {
                    break;
                }
            }
        }

        self.last_pass_time = now;
        info!(actions = actions.len(), "run_once complete");
        Ok(actions)
    }

    /// Recharge every account and charge running-task cost for the
    /// `dt` seconds elapsed since the last pass, per §4.1.
    fn advance(&mut self, dt: f64, now: Timestamp, sink: &mut dyn EventSink) -> SchedulerResult<()> {
        let levels = self.accounts.priority_levels().unwrap_or(0);
        let ids = self.accounts.ids();

        let mut charges: std::collections::HashMap<AccountId, Vec<f64>> = ids
            .iter()
            .map(|id| (id.clone(), vec![0.0; levels]))
            .collect();
        self.workers.for_each_running_mut(|task| {
            if task.priority < levels {
                if let Some(bucket) = charges.get_mut(&task.account_id) {
                    bucket[task.priority] += dt;
                }
                task.cost.charge(task.priority, dt);
            }
            task.last_cost_update = now;
        });

        for id in &ids {
            let account_charges = charges.get(id).cloned().unwrap_or_default();
            self.accounts.advance_account(id, dt, &account_charges)?;
            let balance = self.accounts.balance(id)?.clone();
            sink.on_event(Event::AccountUpdated {
                account_id: id.clone(),
                balance,
                at: now,
            });
        }
        Ok(())
    }

    /// A deep-copy, point-in-time view of all accounts, queued requests,
    /// and workers. Safe to hold onto after the engine mutates further.
    pub fn snapshot(&self) -> StateSnapshot {
        let accounts = self
            .accounts
            .iter_sorted()
            .map(|(id, config, balance)| AccountSnapshot {
                id: id.clone(),
                balance: balance.as_slice().to_vec(),
                charge_rate: config.charge_rate.clone(),
                max_balance: config.max_balance,
                max_fanout: config.max_fanout,
                disable_preemption: config.disable_preemption,
                per_label_task_limits: config.per_label_task_limits.clone(),
            })
            .collect();

        let mut queued_tasks: Vec<QueuedTaskSnapshot> = self
            .tasks
            .all()
            .map(|req| QueuedTaskSnapshot {
                id: req.id.clone(),
                account_id: req.account_id.clone(),
                base_labels: req.base_labels.clone(),
                provisionable_labels: req.provisionable_labels.clone(),
                enqueue_time: req.enqueue_time,
            })
            .collect();
        queued_tasks.sort_by(|a, b| a.id.cmp(&b.id));

        let workers = self
            .workers
            .ids()
            .into_iter()
            .filter_map(|id| {
                self.workers.get(&id).map(|w| WorkerSnapshot {
                    id: w.id.clone(),
                    labels: w.labels.clone(),
                    running_task: w.running_task.clone(),
                })
            })
            .collect();

        StateSnapshot {
            accounts,
            queued_tasks,
            workers,
            last_pass_time: self.last_pass_time,
        }
    }
}
