use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use mrva_core::models::RepoDownloadState;
use mrva_core::storage::RunStateStore;
use mrva_core::MrvaError;

use crate::timestamp::write_timestamp_file;

/// File-backed run state. The download-state mapping for a run lives in a
/// single JSON file that is always replaced wholesale, never edited in
/// place.
#[derive(Clone, Default)]
pub struct FileRunStore;

impl FileRunStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RunStateStore for FileRunStore {
    async fn prepare_run_directory(&self, run_dir: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(run_dir)
            .await
            .map_err(|source| MrvaError::WriteFile {
                path: run_dir.to_path_buf(),
                source,
            })?;
        write_timestamp_file(run_dir).await?;
        Ok(())
    }

    async fn read_repo_states(
        &self,
        path: &Path,
    ) -> anyhow::Result<HashMap<u64, RepoDownloadState>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(source) => {
                return Err(MrvaError::ReadFile {
                    path: path.to_path_buf(),
                    source,
                }
                .into())
            }
        };
        let states = serde_json::from_slice(&bytes).map_err(|source| MrvaError::JsonParse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(states)
    }

    async fn write_repo_states(
        &self,
        path: &Path,
        states: &HashMap<u64, RepoDownloadState>,
    ) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(states).map_err(|source| MrvaError::JsonParse {
            path: path.to_path_buf(),
            source,
        })?;

        // Write to a sibling temp file and rename so a crash mid-write never
        // leaves a truncated state file behind.
        let tmp_path = tmp_sibling(path);
        fs::write(&tmp_path, bytes)
            .await
            .map_err(|source| MrvaError::WriteFile {
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|source| MrvaError::WriteFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
