//! The scheduling pass: assignment, then preemption.
//!
//! Both phases are stateless policy operating on tables the caller
//! (`Engine`) owns and passes in by mutable reference — there is no
//! `Matcher` struct to hold state between passes, mirroring the
//! teacher's framework/policy split where the scheduling policy never
//! owns the run queues itself.

pub mod assign;
pub mod preempt;

use serde::{Deserialize, Serialize};

use crate::task::TaskId;
use crate::worker::WorkerId;

/// A scheduling decision produced by one `run_once` pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Assign {
        worker_id: WorkerId,
        task_id: TaskId,
        priority: usize,
    },
    Preempt {
        worker_id: WorkerId,
        task_id: TaskId,
    },
}
