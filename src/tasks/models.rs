

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::resolution::{ResolutionRequest, ResolutionResult};


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TaskKind {
    NameOnly,
    Combined,
}

impl TaskKind {

    pub fn request_for(&self, identifier: &str) -> ResolutionRequest {
        match self {
            Self::NameOnly => ResolutionRequest::name_only(identifier),
            Self::Combined => ResolutionRequest::combined(identifier),
        }
    }
}


#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkTask {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub items: Vec<String>,
    pub progress: TaskProgress,
    #[serde(default)]
    pub results: Vec<ResolutionResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BulkTask {

    pub fn new(kind: TaskKind, items: Vec<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            kind,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: TaskProgress {
                total: items.len(),
                ..Default::default()
            },
            items,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn mark_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
    }


    pub fn record(&mut self, result: ResolutionResult) {
        self.progress.processed += 1;
        if result.is_successful() {
            self.progress.successful += 1;
        } else {
            self.progress.failed += 1;
        }
        self.results.push(result);
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id,
            kind: self.kind,
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
            progress: self.progress,
        }
    }
}


/// Listing view of a task without items or results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: TaskProgress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::{FaultKind, ResolutionFault, ResolutionStatus};
    use std::str::FromStr;

    fn result(identifier: &str, status: ResolutionStatus) -> ResolutionResult {
        ResolutionResult {
            status,
            ..ResolutionResult::failed(identifier, ResolutionFault::new(FaultKind::Internal, "x"))
        }
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = BulkTask::new(TaskKind::Combined, vec!["1".into(), "2".into()]);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress.total, 2);
        assert_eq!(task.progress.processed, 0);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_partial_success_counts_as_successful() {
        let mut task = BulkTask::new(TaskKind::Combined, vec!["1".into(), "2".into(), "3".into()]);
        task.record(result("1", ResolutionStatus::PartialSuccess));
        task.record(result("2", ResolutionStatus::NotFound));
        task.record(result("3", ResolutionStatus::Success));

        assert_eq!(task.progress.processed, 3);
        assert_eq!(task.progress.successful, 2);
        assert_eq!(task.progress.failed, 1);
    }

    #[test]
    fn test_kind_and_status_wire_names() {
        assert_eq!(TaskKind::NameOnly.to_string(), "nameOnly");
        assert_eq!(TaskKind::from_str("combined").ok(), Some(TaskKind::Combined));
        assert_eq!(serde_json::to_string(&TaskStatus::Processing).unwrap(), "\"processing\"");
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn test_kind_maps_to_requested_capabilities() {
        let name = TaskKind::NameOnly.request_for("123");
        assert!(name.want_name && !name.want_voting_place);
        let both = TaskKind::Combined.request_for("123");
        assert!(both.want_name && both.want_voting_place);
    }
}
