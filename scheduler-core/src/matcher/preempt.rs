//! Preemption phase: a queued request too poor to wait any longer bumps
//! a lower-priority running task back onto the queue.
//!
//! Runs after the assignment phase, over whatever remains queued. Each
//! request is considered at most once per call; a preempted task is
//! requeued for the *next* pass (or the assignment re-run inside the
//! same `run_once`), never matched inline here.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::account::{AccountConfig, AccountRegistry};
use crate::balance::Balance;
use crate::cancel::CancellationToken;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{Event, EventSink};
use crate::labels::LabelCounter;
use crate::matcher::assign::match_labels;
use crate::matcher::Action;
use crate::task::{TaskRequest, TaskTable};
use crate::time::Timestamp;
use crate::worker::{RunningTask, WorkerTable};

/// A worker running a task eligible to be preempted on `req`'s behalf.
struct Candidate<'a> {
    worker_id: &'a str,
    priority: usize,
    running_duration: f64,
}

fn select_victim<'a>(candidates: &[Candidate<'a>]) -> Option<&'a str> {
    let mut best: Option<&Candidate> = None;
    for c in candidates {
        best = Some(match best {
            None => c,
            Some(current) => {
                let better = match c.priority.cmp(&current.priority) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => match c
                        .running_duration
                        .partial_cmp(&current.running_duration)
                        .unwrap_or(Ordering::Equal)
                    {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => c.worker_id < current.worker_id,
                    },
                };
                if better {
                    c
                } else {
                    current
                }
            }
        });
    }
    best.map(|c| c.worker_id)
}

/// Run one preemption pass. Returns the ordered `(Preempt, Assign)`
/// action pairs produced, one pair per successful preemption.
#[allow(clippy::too_many_arguments)]
pub fn run_pass(
    accounts: &mut AccountRegistry,
    tasks: &mut TaskTable,
    workers: &mut WorkerTable,
    labels: &mut LabelCounter,
    now: Timestamp,
    cancel: &CancellationToken,
    sink: &mut dyn EventSink,
) -> SchedulerResult<Vec<Action>> {
    let levels = accounts.priority_levels().unwrap_or(0);
    let mut actions = Vec::new();
    // A task naming no registered account is matched as if at priority
    // `P`, the free bucket, per §3 — it can never itself cause a
    // preemption (nothing beats the lowest standing), but it must still
    // be reachable here rather than silently skipped.
    let fallback_config = AccountConfig::unregistered_default();

    let mut balances: HashMap<String, &Balance> = HashMap::new();
    for id in accounts.ids() {
        if let Ok(b) = accounts.balance(&id) {
            balances.insert(id, b);
        }
    }

    let candidates: Vec<TaskRequest> = tasks.queued_sorted(&balances);

    for req in candidates {
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled { actions });
        }
        if !tasks.is_queued(&req.id) {
            continue;
        }

        let config = accounts.config(&req.account_id).unwrap_or(&fallback_config);
        // An unregistered account can only ever afford the free bucket.
        let p_r = match accounts.balance(&req.account_id) {
            Ok(b) => b.affordable_priority(),
            Err(_) => levels,
        };

        // `disable_preemption` protects an account from ever *causing*
        // preemption; it does nothing to protect it as a victim (see
        // the scenario-5 resolution in DESIGN.md — the algorithm text
        // names the wrong side of this check).
        if config.disable_preemption {
            continue;
        }

        if config.max_fanout > 0
            && workers.running_count_for_account(&req.account_id) as u32 >= config.max_fanout
        {
            continue;
        }
        let req_labels = match_labels(&req);
        if labels.is_at_any_limit(&req_labels, &req.account_id, &config.per_label_task_limits) {
            continue;
        }

        let mut pool = Vec::new();
        for w in workers.busy_workers() {
            if !w.can_run(&req.base_labels) {
                continue;
            }
            let running = w.running_task.as_ref().expect("busy_workers yields running tasks");
            if running.account_id == req.account_id {
                continue;
            }
            // The victim's *effective* priority is its account's current
            // priority class, not the static priority it was assigned
            // at — spillover demotes a running task's standing for
            // future decisions without ever rewriting `running.priority`
            // (see the scenario-6 resolution in DESIGN.md).
            let effective_priority = match accounts.balance(&running.account_id) {
                Ok(b) => b.priority_class(),
                Err(_) => continue,
            };
            if effective_priority <= p_r {
                continue;
            }
            pool.push(Candidate {
                worker_id: w.id.as_str(),
                priority: effective_priority,
                running_duration: running.start_time.elapsed_until(now),
            });
        }

        let Some(worker_id) = select_victim(&pool).map(|s| s.to_string()) else {
            continue;
        };

        let victim: RunningTask = workers.abort_task(&worker_id, now)?;
        let victim_config = accounts.config(&victim.account_id)?;
        labels.release(
            &match_labels(&victim.request),
            &victim.account_id,
            &victim_config.per_label_task_limits,
        );

        // §4.6 step 5: any cost already accrued on the victim at its
        // running priority is credited back, not forfeited, so preemption
        // churn never costs an account quota for work that never finished.
        if victim.priority < levels {
            let accrued = -victim.cost.get(victim.priority);
            accounts.refund_account(&victim.account_id, victim.priority, accrued);
        }

        tasks.dequeue(&req.id)?;
        workers.assign(
            &worker_id,
            RunningTask {
                task_id: req.id.clone(),
                account_id: req.account_id.clone(),
                priority: p_r,
                start_time: now,
                cost: Balance::zero(levels),
                last_cost_update: now,
                request: req.clone(),
            },
        )?;
        labels.count(&req_labels, &req.account_id, &config.per_label_task_limits);
        tasks.requeue_preempted(victim.request.clone(), now);

        debug!(
            task_id = %victim.task_id,
            worker_id = %worker_id,
            by_task_id = %req.id,
            "preempted"
        );
        sink.on_event(Event::Preempted {
            task_id: victim.task_id.clone(),
            worker_id: worker_id.clone(),
            by_task_id: req.id.clone(),
            at: now,
        });
        sink.on_event(Event::Assigned {
            task_id: req.id.clone(),
            worker_id: worker_id.clone(),
            account_id: req.account_id.clone(),
            priority: p_r,
            at: now,
        });
        actions.push(Action::Preempt {
            worker_id: worker_id.clone(),
            task_id: victim.task_id,
        });
        actions.push(Action::Assign {
            worker_id,
            task_id: req.id,
            priority: p_r,
        });
    }

    Ok(actions)
}
