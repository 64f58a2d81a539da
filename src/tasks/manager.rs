

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{BulkTask, TaskKind, TaskStatus, TaskSummary};
use super::store::TaskStore;
use crate::core::config::ResolverConfig;
use crate::core::error::{ResolverError, Result};
use crate::resolution::{FaultKind, ResolutionFault, ResolutionResult, Resolver};
use crate::utils::mask_identifier;


#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    /// Wall-clock bound on one item, independent of source timeouts.
    pub item_timeout: Duration,
    pub pacing: Duration,
    pub max_items: usize,
}

impl ManagerSettings {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            item_timeout: config.item_timeout(),
            pacing: config.item_pacing(),
            max_items: config.max_bulk_items,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&ResolverConfig::default())
    }
}


/// Creates, runs and exposes bulk lookup tasks. Cloning shares state.
#[derive(Clone)]
pub struct BulkTaskManager {
    store: Arc<dyn TaskStore>,
    resolver: Arc<dyn Resolver>,
    settings: ManagerSettings,
    running: Arc<Mutex<HashSet<Uuid>>>,
}

impl BulkTaskManager {

    pub fn new(store: Arc<dyn TaskStore>, resolver: Arc<dyn Resolver>, settings: ManagerSettings) -> Self {
        info!(
            "BulkTaskManager initialized: item_timeout={}s, pacing={}ms, max_items={}",
            settings.item_timeout.as_secs(),
            settings.pacing.as_millis(),
            settings.max_items
        );

        Self {
            store,
            resolver,
            settings,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }


    /// Validates and persists a pending task. Does not start it.
    pub async fn create_task(&self, identifiers: Vec<String>, kind: TaskKind) -> Result<Uuid> {
        if identifiers.is_empty() {
            return Err(ResolverError::validation("identifier list is empty"));
        }
        if identifiers.len() > self.settings.max_items {
            return Err(ResolverError::validation(format!(
                "too many identifiers: {} (max {})",
                identifiers.len(),
                self.settings.max_items
            )));
        }

        let items: Vec<String> = identifiers.iter().map(|i| i.trim().to_string()).collect();
        if let Some(position) = items.iter().position(|i| i.is_empty()) {
            return Err(ResolverError::validation(format!(
                "identifier at position {} is blank",
                position
            )));
        }

        let task = BulkTask::new(kind, items);
        self.store.put(&task).await?;

        info!(
            "Created bulk task {}: kind={}, items={}",
            task.task_id, task.kind, task.progress.total
        );
        Ok(task.task_id)
    }


    /// Runs a pending task to a terminal state.
    ///
    /// Items are processed strictly one at a time inside a spawned worker so
    /// that a panic or storage failure is caught here and the task is marked
    /// `failed` rather than left in `processing`.
    pub async fn run_task(&self, task_id: Uuid) -> Result<TaskStatus> {
        if !self.running.lock().insert(task_id) {
            return Err(ResolverError::validation(format!("task {} is busy", task_id)));
        }

        let mut task = match self.get_task(task_id).await {
            Ok(task) if task.status == TaskStatus::Pending => task,
            Ok(task) => {
                self.running.lock().remove(&task_id);
                return Err(ResolverError::validation(format!(
                    "task {} is {}, only pending tasks can run",
                    task_id, task.status
                )));
            }
            Err(e) => {
                self.running.lock().remove(&task_id);
                return Err(e);
            }
        };

        task.mark_processing();
        if let Err(e) = self.store.put(&task).await {
            self.running.lock().remove(&task_id);
            return Err(e);
        }
        info!("Bulk task {} processing {} items", task_id, task.progress.total);

        let worker = tokio::spawn(process_items(
            Arc::clone(&self.store),
            Arc::clone(&self.resolver),
            self.settings,
            task.clone(),
        ));

        let outcome = match worker.await {
            Ok(Ok(mut finished)) => {
                finished.mark_completed();
                info!(
                    "Bulk task {} completed: {} ok, {} failed",
                    task_id, finished.progress.successful, finished.progress.failed
                );
                finished
            }
            Ok(Err(e)) => {
                error!("Bulk task {} failed: {}", task_id, e);
                self.failed_snapshot(task, e.to_string()).await
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    "worker panicked".to_string()
                } else {
                    format!("worker aborted: {}", join_error)
                };
                error!("Bulk task {} failed: {}", task_id, reason);
                self.failed_snapshot(task, reason).await
            }
        };

        let persisted = self.store.put(&outcome).await;
        self.running.lock().remove(&task_id);
        persisted?;

        Ok(outcome.status)
    }


    /// Detached [`run_task`](Self::run_task); errors are logged.
    pub fn spawn_task(&self, task_id: Uuid) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.run_task(task_id).await {
                warn!("Bulk task {} did not run: {}", task_id, e);
            }
        })
    }


    pub async fn get_task(&self, task_id: Uuid) -> Result<BulkTask> {
        self.store
            .get(task_id)
            .await?
            .ok_or(ResolverError::TaskNotFound(task_id))
    }


    /// Refuses to delete a task this process is still running. The id is
    /// claimed for the duration of the delete so a concurrent run cannot start.
    pub async fn delete_task(&self, task_id: Uuid) -> Result<bool> {
        if !self.running.lock().insert(task_id) {
            return Err(ResolverError::validation(format!(
                "task {} is processing and cannot be deleted",
                task_id
            )));
        }
        let deleted = self.store.delete(task_id).await;
        self.running.lock().remove(&task_id);

        let deleted = deleted?;
        if deleted {
            info!("Deleted bulk task {}", task_id);
        }
        Ok(deleted)
    }


    /// Newest first.
    pub async fn list_tasks(&self, kind: Option<TaskKind>) -> Result<Vec<TaskSummary>> {
        let mut summaries: Vec<TaskSummary> = self
            .store
            .list("")
            .await?
            .iter()
            .filter(|t| kind.is_none_or(|k| t.kind == k))
            .map(BulkTask::summary)
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }


    async fn failed_snapshot(&self, fallback: BulkTask, reason: String) -> BulkTask {
        let mut latest = match self.store.get(fallback.task_id).await {
            Ok(Some(task)) => task,
            _ => fallback,
        };
        latest.mark_failed(reason);
        latest
    }
}


async fn process_items(
    store: Arc<dyn TaskStore>,
    resolver: Arc<dyn Resolver>,
    settings: ManagerSettings,
    mut task: BulkTask,
) -> Result<BulkTask> {
    let items = task.items.clone();

    for (index, identifier) in items.iter().enumerate() {
        if index > 0 && !settings.pacing.is_zero() {
            tokio::time::sleep(settings.pacing).await;
        }

        let request = task.kind.request_for(identifier);
        let result = match tokio::time::timeout(settings.item_timeout, resolver.resolve(&request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Item {}/{} ({}) exceeded {}s",
                    index + 1,
                    items.len(),
                    mask_identifier(identifier),
                    settings.item_timeout.as_secs()
                );
                ResolutionResult::failed(
                    identifier.as_str(),
                    ResolutionFault::new(
                        FaultKind::Timeout,
                        format!("item exceeded {}s", settings.item_timeout.as_secs()),
                    ),
                )
            }
        };

        debug!("Item {}/{} finished: {}", index + 1, items.len(), result.status);
        task.record(result);
        store.put(&task).await?;
    }

    Ok(task)
}
