

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::BulkTask;
use crate::core::error::{ResolverError, Result};


/// Keyed durable storage for task records, one record per task id.
#[async_trait]
pub trait TaskStore: Send + Sync {

    async fn get(&self, task_id: Uuid) -> Result<Option<BulkTask>>;

    /// Inserts or overwrites the record.
    async fn put(&self, task: &BulkTask) -> Result<()>;

    async fn delete(&self, task_id: Uuid) -> Result<bool>;

    /// Every record whose key (hyphenated task id) starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<BulkTask>>;
}


#[async_trait]
impl TaskStore for Arc<dyn TaskStore> {
    async fn get(&self, task_id: Uuid) -> Result<Option<BulkTask>> {
        (**self).get(task_id).await
    }

    async fn put(&self, task: &BulkTask) -> Result<()> {
        (**self).put(task).await
    }

    async fn delete(&self, task_id: Uuid) -> Result<bool> {
        (**self).delete(task_id).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BulkTask>> {
        (**self).list(prefix).await
    }
}


/// One `<task_id>.json` file per task under a directory.
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {

    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ResolverError::storage(format!("failed to prepare task directory {}: {}", dir.display(), e))
        })?;
        info!("FileTaskStore initialized: dir={}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, task_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn get(&self, task_id: Uuid) -> Result<Option<BulkTask>> {
        match tokio::fs::read(self.path_for(task_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, task: &BulkTask) -> Result<()> {
        let path = self.path_for(task.task_id);
        let payload = serde_json::to_vec_pretty(task)?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload).await.map_err(|e| {
            ResolverError::storage(format!("failed to write task {}: {}", task.task_id, e))
        })?;

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(ResolverError::storage(format!(
                "failed to finalize task {}: {}",
                task.task_id, e
            )));
        }

        debug!("Persisted task {} ({})", task.task_id, task.status);
        Ok(())
    }

    async fn delete(&self, task_id: Uuid) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(task_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BulkTask>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut tasks = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !stem.starts_with(prefix) {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable task file {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<BulkTask>(&bytes) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("Skipping corrupt task file {}: {}", path.display(), e),
            }
        }

        Ok(tasks)
    }
}


#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, BulkTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, task_id: Uuid) -> Result<Option<BulkTask>> {
        Ok(self.tasks.read().get(&task_id).cloned())
    }

    async fn put(&self, task: &BulkTask) -> Result<()> {
        self.tasks.write().insert(task.task_id, task.clone());
        Ok(())
    }

    async fn delete(&self, task_id: Uuid) -> Result<bool> {
        Ok(self.tasks.write().remove(&task_id).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BulkTask>> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|t| t.task_id.to_string().starts_with(prefix))
            .cloned()
            .collect())
    }
}
