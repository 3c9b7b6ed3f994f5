//! Assignment phase: match queued requests to idle workers, one priority
//! level at a time, highest priority first.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::account::{AccountConfig, AccountRegistry};
use crate::balance::Balance;
use crate::cancel::CancellationToken;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{Event, EventSink};
use crate::labels::LabelCounter;
use crate::matcher::Action;
use crate::task::{TaskRequest, TaskTable};
use crate::time::Timestamp;
use crate::worker::{RunningTask, WorkerTable};

/// The label set a candidate is checked and counted against: required and
/// preferred labels together, since either may carry the resource-class
/// prefix a `per_label_task_limits` entry matches on.
pub(crate) fn match_labels(req: &TaskRequest) -> HashSet<String> {
    req.base_labels.union(&req.provisionable_labels).cloned().collect()
}

/// Pick the best idle, eligible worker for `req`: most provisionable-label
/// overlap, then longest idle, then lexicographically smallest id.
fn select_worker<'a>(
    req: &TaskRequest,
    workers: &'a WorkerTable,
    now: Timestamp,
) -> Option<&'a str> {
    let mut best: Option<(usize, f64, &str)> = None;
    for w in workers.idle_workers() {
        if !w.can_run(&req.base_labels) {
            continue;
        }
        let key = (req.provisionable_overlap(&w.labels), w.idle_duration(now), w.id.as_str());
        best = Some(match best {
            None => key,
            Some(current) => {
                let better = match key.0.cmp(&current.0) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => match key.1.partial_cmp(&current.1).unwrap_or(Ordering::Equal) {
                        Ordering::Greater => true,
                        Ordering::Less => false,
                        Ordering::Equal => key.2 < current.2,
                    },
                };
                if better {
                    key
                } else {
                    current
                }
            }
        });
    }
    best.map(|(_, _, id)| id)
}

/// Run one assignment pass. Returns the ordered list of `Assign` actions
/// made. Checked for cancellation between priority levels, per §5.
#[allow(clippy::too_many_arguments)]
pub fn run_pass(
    accounts: &AccountRegistry,
    tasks: &mut TaskTable,
    workers: &mut WorkerTable,
    labels: &mut LabelCounter,
    now: Timestamp,
    cancel: &CancellationToken,
    sink: &mut dyn EventSink,
) -> SchedulerResult<Vec<Action>> {
    let levels = accounts.priority_levels().unwrap_or(0);
    let mut actions = Vec::new();
    let mut fanout_used: HashMap<String, u32> = HashMap::new();
    // A task naming no registered account is matched as if at priority
    // `P`, the free bucket, per §3 — never refused, never unconstrained.
    let fallback_config = AccountConfig::unregistered_default();

    for p in 0..=levels {
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled { actions });
        }

        let mut candidates: Vec<TaskRequest> = tasks
            .all()
            .filter(|req| match accounts.balance(&req.account_id) {
                Ok(b) => b.can_afford(p),
                Err(_) => p == levels,
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            let ka = (a.enqueue_time.as_seconds(), a.id.clone());
            let kb = (b.enqueue_time.as_seconds(), b.id.clone());
            ka.partial_cmp(&kb).unwrap_or(Ordering::Equal)
        });

        for req in candidates {
            let config = accounts.config(&req.account_id).unwrap_or(&fallback_config);

            if config.max_fanout > 0 {
                let used = fanout_used
                    .entry(req.account_id.clone())
                    .or_insert_with(|| workers.running_count_for_account(&req.account_id) as u32);
                if *used >= config.max_fanout {
                    continue;
                }
            }

            let task_labels = match_labels(&req);
            if labels.is_at_any_limit(&task_labels, &req.account_id, &config.per_label_task_limits) {
                continue;
            }

            let Some(worker_id) = select_worker(&req, workers, now).map(|s| s.to_string()) else {
                continue;
            };

            tasks.dequeue(&req.id)?;
            workers.assign(
                &worker_id,
                RunningTask {
                    task_id: req.id.clone(),
                    account_id: req.account_id.clone(),
                    priority: p,
                    start_time: now,
                    cost: Balance::zero(levels),
                    last_cost_update: now,
                    request: req.clone(),
                },
            )?;
            labels.count(&task_labels, &req.account_id, &config.per_label_task_limits);
            *fanout_used
                .entry(req.account_id.clone())
                .or_insert(0) += 1;

            debug!(task_id = %req.id, worker_id = %worker_id, priority = p, "assigned");
            sink.on_event(Event::Assigned {
                task_id: req.id.clone(),
                worker_id: worker_id.clone(),
                account_id: req.account_id.clone(),
                priority: p,
                at: now,
            });
            actions.push(Action::Assign {
                worker_id,
                task_id: req.id,
                priority: p,
            });
        }
    }

    Ok(actions)
}
