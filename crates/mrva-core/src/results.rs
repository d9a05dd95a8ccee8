//! Result acquisition and caching for one repository at a time.
//!
//! The download side streams an artifact to disk in chunks, extracts it,
//! and announces completion. The load side decodes extracted result files
//! and keeps decoded payloads in an in-memory cache keyed by
//! (variant analysis id, repository full name). Cache entries live until
//! the run is removed; there is no other eviction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::artifacts::{ArtifactTransport, ArtifactUnzipper, ResultDecoder};
use crate::error::MrvaError;
use crate::events::EventEmitter;
use crate::models::{RepoResult, RepoTask, VariantAnalysis};
use crate::storage::RepoTaskStore;

pub const RESULTS_DIRECTORY: &str = "results";
pub const ARTIFACT_FILENAME: &str = "results.zip";
pub const SARIF_RESULTS_FILENAME: &str = "results.sarif";
pub const BQRS_RESULTS_FILENAME: &str = "results.bqrs";

#[derive(Debug, Clone)]
pub struct ResultDownloadedEvent {
    pub variant_analysis_id: u64,
    pub repo_task: RepoTask,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadResultsOptions {
    /// Skip populating the cache on a disk load. Used by one-shot export
    /// flows that would otherwise pin large payloads in memory for results
    /// never shown again.
    pub skip_cache_store: bool,
}

type CacheKey = (u64, String);

pub struct ResultsManager {
    transport: Arc<dyn ArtifactTransport>,
    unzipper: Arc<dyn ArtifactUnzipper>,
    decoder: Arc<dyn ResultDecoder>,
    repo_task_store: Arc<dyn RepoTaskStore>,
    cached_results: Mutex<HashMap<CacheKey, RepoResult>>,
    on_result_downloaded: EventEmitter<ResultDownloadedEvent>,
    on_result_loaded: EventEmitter<RepoResult>,
}

impl ResultsManager {
    pub fn new(
        transport: Arc<dyn ArtifactTransport>,
        unzipper: Arc<dyn ArtifactUnzipper>,
        decoder: Arc<dyn ResultDecoder>,
        repo_task_store: Arc<dyn RepoTaskStore>,
    ) -> Self {
        Self {
            transport,
            unzipper,
            decoder,
            repo_task_store,
            cached_results: Mutex::new(HashMap::new()),
            on_result_downloaded: EventEmitter::new(),
            on_result_loaded: EventEmitter::new(),
        }
    }

    pub fn subscribe_result_downloaded(&self) -> mpsc::UnboundedReceiver<ResultDownloadedEvent> {
        self.on_result_downloaded.subscribe()
    }

    pub fn subscribe_result_loaded(&self) -> mpsc::UnboundedReceiver<RepoResult> {
        self.on_result_loaded.subscribe()
    }

    /// Stream one repository's artifact to disk, extract it, and record the
    /// repo task for later interpretation.
    ///
    /// The progress callback fires once per received chunk, unthrottled;
    /// rate limiting is the caller's concern. Any network or I/O error
    /// propagates unmodified so the caller can classify it for retry.
    pub async fn download(
        &self,
        variant_analysis_id: u64,
        repo_task: &RepoTask,
        storage_path: &Path,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> anyhow::Result<()> {
        let full_name = &repo_task.repository.full_name;
        let artifact_url = repo_task
            .artifact_url
            .as_deref()
            .ok_or_else(|| MrvaError::MissingArtifactUrl {
                repository: full_name.clone(),
            })?;

        let repo_dir = self.repo_storage_directory(storage_path, full_name);
        tokio::fs::create_dir_all(&repo_dir).await?;

        // Persist the task first so interpretation never needs a re-fetch.
        self.repo_task_store
            .write_repo_task(&repo_dir, repo_task)
            .await?;

        // A leftover artifact from an aborted download must not survive.
        let zip_path = repo_dir.join(ARTIFACT_FILENAME);
        match tokio::fs::remove_file(&zip_path).await {
            Ok(()) => debug!("Removed stale artifact at {}", zip_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let response = self.transport.fetch(artifact_url).await?;
        // A missing declared length degrades percentages, not the download.
        let total_bytes = response.content_length.filter(|&n| n > 0).unwrap_or(1);

        let mut file = tokio::fs::File::create(&zip_path).await?;
        let mut body = response.body;
        let mut downloaded: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            let percentage = (downloaded.saturating_mul(100) / total_bytes).min(100) as u8;
            on_progress(percentage);
        }
        file.flush().await?;
        drop(file);

        self.unzipper
            .unzip(&zip_path, &repo_dir.join(RESULTS_DIRECTORY))
            .await?;

        info!(
            "Downloaded results for {} ({} bytes) in variant analysis {}",
            full_name, downloaded, variant_analysis_id
        );

        self.on_result_downloaded.emit(ResultDownloadedEvent {
            variant_analysis_id,
            repo_task: repo_task.clone(),
        });

        Ok(())
    }

    /// Return one repository's decoded results, from cache when present,
    /// otherwise from disk. A disk load populates the cache unless the
    /// caller opted out.
    pub async fn load_results(
        &self,
        variant_analysis_id: u64,
        storage_path: &Path,
        repository_full_name: &str,
        options: LoadResultsOptions,
    ) -> anyhow::Result<RepoResult> {
        let key = (variant_analysis_id, repository_full_name.to_string());
        let cached = {
            let cache = self.cached_results.lock().expect("results cache lock poisoned");
            cache.get(&key).cloned()
        };
        if let Some(result) = cached {
            self.on_result_loaded.emit(result.clone());
            return Ok(result);
        }

        let result = self
            .load_results_from_storage(variant_analysis_id, storage_path, repository_full_name)
            .await?;

        if !options.skip_cache_store {
            self.cached_results
                .lock()
                .expect("results cache lock poisoned")
                .insert(key, result.clone());
            self.on_result_loaded.emit(result.clone());
        }

        Ok(result)
    }

    async fn load_results_from_storage(
        &self,
        variant_analysis_id: u64,
        storage_path: &Path,
        repository_full_name: &str,
    ) -> anyhow::Result<RepoResult> {
        if !self
            .is_repo_downloaded(storage_path, repository_full_name)
            .await
        {
            return Err(MrvaError::ResultsNotDownloaded {
                repository: repository_full_name.to_string(),
            }
            .into());
        }

        let repo_dir = self.repo_storage_directory(storage_path, repository_full_name);
        let repo_task = self.repo_task_store.read_repo_task(&repo_dir).await?;

        let commit_sha = repo_task.database_commit_sha.as_deref().ok_or_else(|| {
            MrvaError::MissingRepoTaskField {
                repository: repository_full_name.to_string(),
                field: "database_commit_sha",
            }
        })?;
        let source_location_prefix =
            repo_task.source_location_prefix.as_deref().ok_or_else(|| {
                MrvaError::MissingRepoTaskField {
                    repository: repository_full_name.to_string(),
                    field: "source_location_prefix",
                }
            })?;

        let file_link_prefix = file_link_prefix(repository_full_name, commit_sha);

        let results_dir = repo_dir.join(RESULTS_DIRECTORY);
        let sarif_path = results_dir.join(SARIF_RESULTS_FILENAME);
        let bqrs_path = results_dir.join(BQRS_RESULTS_FILENAME);

        if path_exists(&sarif_path).await {
            let interpreted_results = self
                .decoder
                .decode_sarif(&sarif_path, &file_link_prefix)
                .await?;
            return Ok(RepoResult {
                variant_analysis_id,
                repository_id: repo_task.repository.id,
                interpreted_results: Some(interpreted_results),
                raw_results: None,
            });
        }

        if path_exists(&bqrs_path).await {
            let raw_results = self
                .decoder
                .decode_bqrs(&bqrs_path, &file_link_prefix, source_location_prefix)
                .await?;
            return Ok(RepoResult {
                variant_analysis_id,
                repository_id: repo_task.repository.id,
                interpreted_results: None,
                raw_results: Some(raw_results),
            });
        }

        // The directory exists but holds neither results file: a corrupt or
        // partial extract.
        Err(MrvaError::MissingResultsFile {
            repository: repository_full_name.to_string(),
        }
        .into())
    }

    /// Whether this repository's artifact has been downloaded and extracted,
    /// judged by its storage directory existing.
    pub async fn is_repo_downloaded(
        &self,
        storage_path: &Path,
        repository_full_name: &str,
    ) -> bool {
        path_exists(&self.repo_storage_directory(storage_path, repository_full_name)).await
    }

    pub fn repo_storage_directory(&self, storage_path: &Path, full_name: &str) -> PathBuf {
        storage_path.join(full_name)
    }

    /// Evict every cached entry belonging to this run's scanned repos.
    pub fn remove_analysis_results(&self, variant_analysis: &VariantAnalysis) {
        let mut cache = self.cached_results.lock().expect("results cache lock poisoned");
        for scanned_repo in &variant_analysis.scanned_repos {
            cache.remove(&(
                variant_analysis.id,
                scanned_repo.repository.full_name.clone(),
            ));
        }
    }

    pub fn cached_result_count(&self) -> usize {
        self.cached_results
            .lock()
            .expect("results cache lock poisoned")
            .len()
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn file_link_prefix(full_name: &str, commit_sha: &str) -> String {
    format!("https://github.com/{}/blob/{}", full_name, commit_sha)
}
