//! Drives upload jobs through their state machine.
//!
//! Jobs are queued by id onto a crossbeam channel and picked up by a fixed
//! pool of worker threads. One worker owns a job from pickup to its
//! terminal state and processes its chunks strictly in file order.

pub mod cancel;
pub mod dispatch;
pub mod pool;
pub mod progress;
pub mod runner;
pub mod waiter;

pub use cancel::CancelRegistry;
pub use dispatch::{Recovery, Scheduler};
pub use pool::WorkerPool;
pub use progress::{BroadcastProgress, NoopProgress, ProgressReporter};
pub use runner::{JobRunner, RunOutcome};
pub use waiter::{BroadcastWaiter, CompletionWaiter, PollingWaiter};
