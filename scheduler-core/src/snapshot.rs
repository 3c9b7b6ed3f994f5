//! Deep-copy state snapshots for external exporters.
//!
//! A [`StateSnapshot`] is a value type with no references back into the
//! engine: once returned, the engine assumes it survives and mutates
//! independently of whatever happens next inside `run_once`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::account::{AccountId, LabelLimits};
use crate::task::TaskId;
use crate::time::Timestamp;
use crate::worker::{RunningTask, WorkerId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub balance: Vec<f64>,
    pub charge_rate: Vec<f64>,
    pub max_balance: f64,
    pub max_fanout: u32,
    pub disable_preemption: bool,
    pub per_label_task_limits: LabelLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTaskSnapshot {
    pub id: TaskId,
    pub account_id: AccountId,
    pub base_labels: HashSet<String>,
    pub provisionable_labels: HashSet<String>,
    pub enqueue_time: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub labels: HashSet<String>,
    pub running_task: Option<RunningTask>,
}

/// A deep-copy, point-in-time view of all engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub accounts: Vec<AccountSnapshot>,
    pub queued_tasks: Vec<QueuedTaskSnapshot>,
    pub workers: Vec<WorkerSnapshot>,
    pub last_pass_time: Timestamp,
}
