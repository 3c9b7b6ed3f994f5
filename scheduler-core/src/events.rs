//! The event sink: a narrow, non-blocking capability the engine calls
//! inline while holding its state, never a place that owns storage.
//!
//! The sink interface is intentionally thin — `onEvent` and nothing
//! else — so the concrete backend (in-memory capture for tests, a
//! batched forwarder in production) stays entirely outside the core,
//! per the "polymorphic event sink" design note.

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::balance::Balance;
use crate::task::TaskId;
use crate::time::Timestamp;
use crate::worker::WorkerId;

/// A reason a running task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionReason {
    Finished,
    Aborted,
    WorkerRemoved,
}

/// A structured, totally-ordered scheduling event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Enqueued {
        task_id: TaskId,
        account_id: AccountId,
        at: Timestamp,
    },
    Assigned {
        task_id: TaskId,
        worker_id: WorkerId,
        account_id: AccountId,
        priority: usize,
        at: Timestamp,
    },
    Preempted {
        task_id: TaskId,
        worker_id: WorkerId,
        by_task_id: TaskId,
        at: Timestamp,
    },
    Completed {
        task_id: TaskId,
        worker_id: WorkerId,
        reason: CompletionReason,
        at: Timestamp,
    },
    AccountUpdated {
        account_id: AccountId,
        balance: Balance,
        at: Timestamp,
    },
}

/// A total, non-blocking sink for scheduling events.
///
/// Implementations must not perform network I/O or block: the engine
/// calls `on_event` inline while holding its internal state.
pub trait EventSink {
    fn on_event(&mut self, event: Event);
}

/// An in-memory sink that simply appends every event it sees. Useful in
/// tests, and as a minimal embedder-facing default.
#[derive(Debug, Default)]
pub struct VecSink {
    events: Vec<Event>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

impl EventSink for VecSink {
    fn on_event(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// A sink that discards every event. Useful when a caller only wants
/// the returned `Action` list and has no use for the event stream.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&mut self, _event: Event) {}
}
