use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

use mrva_core::models::RepoTask;
use mrva_core::storage::RepoTaskStore;
use mrva_core::MrvaError;

pub const REPO_TASK_FILENAME: &str = "repo_task.json";

/// File-backed repo task metadata, one JSON file per repository directory.
#[derive(Clone, Default)]
pub struct FileRepoTaskStore;

impl FileRepoTaskStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RepoTaskStore for FileRepoTaskStore {
    async fn read_repo_task(&self, repo_dir: &Path) -> anyhow::Result<RepoTask> {
        let path = repo_dir.join(REPO_TASK_FILENAME);
        let bytes = fs::read(&path)
            .await
            .map_err(|source| MrvaError::ReadFile {
                path: path.clone(),
                source,
            })?;
        let task =
            serde_json::from_slice(&bytes).map_err(|source| MrvaError::JsonParse { path, source })?;
        Ok(task)
    }

    async fn write_repo_task(&self, repo_dir: &Path, task: &RepoTask) -> anyhow::Result<()> {
        let path = repo_dir.join(REPO_TASK_FILENAME);
        let bytes = serde_json::to_vec_pretty(task).map_err(|source| MrvaError::JsonParse {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes)
            .await
            .map_err(|source| MrvaError::WriteFile { path, source })?;
        Ok(())
    }
}
