

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{BulkTask, TaskKind, TaskStatus, TaskSummary};
use super::store::TaskStore;
use crate::core::error::Result;


/// Selects stored tasks for operator listing and purging.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    /// Only tasks whose last activity is older than this.
    pub older_than: Option<Duration>,
}

impl TaskFilter {

    pub fn matches(&self, task: &BulkTask, now: DateTime<Utc>) -> bool {
        if self.status.is_some_and(|s| s != task.status) {
            return false;
        }
        if self.kind.is_some_and(|k| k != task.kind) {
            return false;
        }
        if let Some(age) = self.older_than {
            if now - last_activity(task) < age {
                return false;
            }
        }
        true
    }
}


pub fn last_activity(task: &BulkTask) -> DateTime<Utc> {
    task.completed_at
        .or(task.started_at)
        .unwrap_or(task.created_at)
}


/// Oldest activity first.
pub async fn list_tasks(store: &dyn TaskStore, filter: &TaskFilter) -> Result<Vec<TaskSummary>> {
    let now = Utc::now();
    let mut tasks: Vec<BulkTask> = store
        .list("")
        .await?
        .into_iter()
        .filter(|t| filter.matches(t, now))
        .collect();
    tasks.sort_by_key(last_activity);
    Ok(tasks.iter().map(BulkTask::summary).collect())
}


#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub matched: Vec<Uuid>,
    pub deleted: usize,
    pub dry_run: bool,
}


/// Deletes matching tasks; with `dry_run` only reports what would go.
/// `processing` tasks are purged only when the filter names that status.
pub async fn purge(store: &dyn TaskStore, filter: &TaskFilter, dry_run: bool) -> Result<PurgeReport> {
    let now = Utc::now();
    let explicit_processing = filter.status == Some(TaskStatus::Processing);

    let matched: Vec<Uuid> = store
        .list("")
        .await?
        .into_iter()
        .filter(|t| filter.matches(t, now))
        .filter(|t| explicit_processing || t.status != TaskStatus::Processing)
        .map(|t| t.task_id)
        .collect();

    let mut report = PurgeReport {
        matched,
        deleted: 0,
        dry_run,
    };
    if dry_run {
        info!("Purge dry run: {} tasks would be deleted", report.matched.len());
        return Ok(report);
    }

    for task_id in &report.matched {
        match store.delete(*task_id).await {
            Ok(true) => report.deleted += 1,
            Ok(false) => {}
            Err(e) => warn!("Could not delete task {}: {}", task_id, e),
        }
    }
    info!("Purged {} of {} matching tasks", report.deleted, report.matched.len());
    Ok(report)
}


#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub total_items: usize,
    pub oldest: Option<TaskSummary>,
    pub newest: Option<TaskSummary>,
}


pub async fn stats(store: &dyn TaskStore) -> Result<TaskStats> {
    let tasks = store.list("").await?;

    let mut stats = TaskStats {
        total: tasks.len(),
        ..Default::default()
    };
    for task in &tasks {
        *stats.by_status.entry(task.status.to_string()).or_default() += 1;
        *stats.by_kind.entry(task.kind.to_string()).or_default() += 1;
        stats.total_items += task.progress.total;
    }
    stats.oldest = tasks.iter().min_by_key(|t| last_activity(t)).map(BulkTask::summary);
    stats.newest = tasks.iter().max_by_key(|t| last_activity(t)).map(BulkTask::summary);

    Ok(stats)
}
