//! A pool-level, quota-based task scheduler.
//!
//! The engine matches pending tasks to idle workers under per-account
//! balance constraints, preempting lower-priority running work when a
//! poorer account's request would otherwise starve, and continuously
//! ages every account's balance toward its configured charge rate. It
//! is single-threaded and cooperative: no background tasks, no
//! internal locking, and no clock of its own — every operation that
//! needs "now" is handed one explicitly, which is what makes a call to
//! [`Engine::run_once`] deterministic and replayable from a snapshot.
//!
//! Wrap an [`Engine`] in [`SharedEngine`] to share it across threads;
//! the engine itself assumes single-threaded, sequential access.

mod account;
mod balance;
mod cancel;
mod engine;
mod error;
mod events;
mod labels;
pub mod matcher;
mod snapshot;
mod task;
mod time;
mod worker;

use std::sync::{Arc, Mutex};

pub use account::{AccountConfig, AccountId, LabelLimits};
pub use balance::Balance;
pub use cancel::CancellationToken;
pub use engine::Engine;
pub use error::{SchedulerError, SchedulerResult};
pub use events::{CompletionReason, Event, EventSink, NullSink, VecSink};
pub use matcher::Action;
pub use snapshot::{AccountSnapshot, QueuedTaskSnapshot, StateSnapshot, WorkerSnapshot};
pub use task::{TaskId, TaskRequest};
pub use time::Timestamp;
pub use worker::{RunningTask, WorkerId};

/// An [`Engine`] shared across threads behind a single coarse lock. The
/// engine itself never locks anything internally — callers that need
/// concurrent access pick the granularity, typically one `run_once`
/// call's worth at a time.
pub type SharedEngine = Arc<Mutex<Engine>>;
