

mod queue;
mod runner;

pub use queue::{HttpPendingQueue, LookupReport, PendingLookup, PendingQueue, QueueError};
pub use runner::{QueueWorker, WorkerSettings, WorkerStats};
