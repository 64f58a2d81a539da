

pub mod maintenance;
mod manager;
mod models;
mod store;

pub use maintenance::{PurgeReport, TaskFilter, TaskStats};
pub use manager::{BulkTaskManager, ManagerSettings};
pub use models::{BulkTask, TaskKind, TaskProgress, TaskStatus, TaskSummary};
pub use store::{FileTaskStore, MemoryTaskStore, TaskStore};
