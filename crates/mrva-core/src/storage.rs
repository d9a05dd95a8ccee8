//! Storage traits implemented by the state crate.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::models::{RepoDownloadState, RepoTask};

/// Name of the per-run download-state file inside a run's storage directory.
pub const REPO_STATES_FILENAME: &str = "repo-states.json";

/// Durable per-run state: the storage directory itself and the whole-file
/// mapping of repository id to download state.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Create a run's storage directory, including the timestamp marker
    /// consumed by the external retention sweep.
    async fn prepare_run_directory(&self, run_dir: &Path) -> anyhow::Result<()>;

    /// Read the full download-state mapping. A missing file is an empty
    /// mapping, not an error: a fresh run has no persisted state yet.
    async fn read_repo_states(
        &self,
        path: &Path,
    ) -> anyhow::Result<HashMap<u64, RepoDownloadState>>;

    /// Replace the whole file with this mapping. A concurrent reader must
    /// never observe a half-written file.
    async fn write_repo_states(
        &self,
        path: &Path,
        states: &HashMap<u64, RepoDownloadState>,
    ) -> anyhow::Result<()>;
}

/// Per-repository task metadata persisted at download time so that result
/// interpretation never needs a re-fetch.
#[async_trait]
pub trait RepoTaskStore: Send + Sync {
    async fn read_repo_task(&self, repo_dir: &Path) -> anyhow::Result<RepoTask>;

    async fn write_repo_task(&self, repo_dir: &Path, task: &RepoTask) -> anyhow::Result<()>;
}
