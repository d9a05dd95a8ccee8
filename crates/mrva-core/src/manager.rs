//! The orchestrating manager: owns the run registry, reacts to monitor and
//! download events, fans per-repo downloads into the bounded queue, and
//! exposes the query/command surface other components depend on.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::VariantAnalysisApi;
use crate::config::ManagerConfig;
use crate::error::{is_transient_network_error, MrvaError};
use crate::events::EventEmitter;
use crate::models::{
    DownloadStatus, RepoDownloadState, RepoResult, ScannedRepo, VariantAnalysis,
    VariantAnalysisStatus, VariantAnalysisSubmission,
};
use crate::monitor::{MonitorConfig, VariantAnalysisMonitor};
use crate::queue::DownloadQueue;
use crate::results::{LoadResultsOptions, ResultsManager};
use crate::storage::{RunStateStore, REPO_STATES_FILENAME};

#[derive(Debug, Clone)]
pub struct RepoStateUpdatedEvent {
    pub variant_analysis_id: u64,
    pub repo_state: RepoDownloadState,
}

pub struct VariantAnalysisManager {
    api: Arc<dyn VariantAnalysisApi>,
    results: Arc<ResultsManager>,
    run_store: Arc<dyn RunStateStore>,
    storage_path: PathBuf,
    config: ManagerConfig,
    monitor: Arc<VariantAnalysisMonitor>,
    queue: DownloadQueue,

    // Single-writer registries; all mutation goes through this manager.
    variant_analyses: Arc<Mutex<HashMap<u64, VariantAnalysis>>>,
    repo_states: Mutex<HashMap<u64, HashMap<u64, RepoDownloadState>>>,
    // Repos already handed to the queue by the monitor pump, so each repo
    // is auto-downloaded at most once per run.
    scheduled_downloads: Mutex<HashMap<u64, HashSet<u64>>>,

    monitor_rx: Mutex<Option<mpsc::UnboundedReceiver<VariantAnalysis>>>,

    on_added: EventEmitter<VariantAnalysis>,
    on_status_updated: EventEmitter<VariantAnalysis>,
    on_removed: EventEmitter<VariantAnalysis>,
    on_repo_state_updated: EventEmitter<RepoStateUpdatedEvent>,
}

impl VariantAnalysisManager {
    pub fn new(
        api: Arc<dyn VariantAnalysisApi>,
        results: Arc<ResultsManager>,
        run_store: Arc<dyn RunStateStore>,
        storage_path: impl Into<PathBuf>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let variant_analyses: Arc<Mutex<HashMap<u64, VariantAnalysis>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // Monitoring stops once the run is no longer tracked locally.
        let registry = Arc::clone(&variant_analyses);
        let should_cancel = Arc::new(move |variant_analysis_id: u64| {
            !registry
                .lock()
                .expect("variant analysis registry lock poisoned")
                .contains_key(&variant_analysis_id)
        });

        let monitor = Arc::new(VariantAnalysisMonitor::new(
            Arc::clone(&api),
            should_cancel,
            MonitorConfig {
                poll_interval: config.poll_interval(),
                max_poll_attempts: config.max_poll_attempts,
            },
        ));
        let monitor_rx = monitor.subscribe();

        Arc::new(Self {
            api,
            results,
            run_store,
            storage_path: storage_path.into(),
            queue: DownloadQueue::new(config.max_concurrent_downloads),
            config,
            monitor,
            variant_analyses,
            repo_states: Mutex::new(HashMap::new()),
            scheduled_downloads: Mutex::new(HashMap::new()),
            monitor_rx: Mutex::new(Some(monitor_rx)),
            on_added: EventEmitter::new(),
            on_status_updated: EventEmitter::new(),
            on_removed: EventEmitter::new(),
            on_repo_state_updated: EventEmitter::new(),
        })
    }

    /// Spawn the event pump that applies monitor updates to the registry
    /// and fans out downloads for newly available artifacts.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut rx = self
            .monitor_rx
            .lock()
            .expect("monitor receiver lock poisoned")
            .take()
            .expect("manager already started");
        tokio::spawn(async move {
            while let Some(variant_analysis) = rx.recv().await {
                manager.handle_monitor_update(variant_analysis);
            }
        })
    }

    pub fn subscribe_added(&self) -> mpsc::UnboundedReceiver<VariantAnalysis> {
        self.on_added.subscribe()
    }

    pub fn subscribe_status_updated(&self) -> mpsc::UnboundedReceiver<VariantAnalysis> {
        self.on_status_updated.subscribe()
    }

    pub fn subscribe_removed(&self) -> mpsc::UnboundedReceiver<VariantAnalysis> {
        self.on_removed.subscribe()
    }

    pub fn subscribe_repo_state_updated(&self) -> mpsc::UnboundedReceiver<RepoStateUpdatedEvent> {
        self.on_repo_state_updated.subscribe()
    }

    /// Submit a run for remote execution, register it, prepare its storage
    /// directory, and start monitoring.
    pub async fn submit(
        self: &Arc<Self>,
        submission: &VariantAnalysisSubmission,
    ) -> anyhow::Result<VariantAnalysis> {
        let variant_analysis = self.api.submit(submission).await?;
        let id = variant_analysis.id;

        self.set_variant_analysis(variant_analysis.clone());
        self.run_store
            .prepare_run_directory(&self.storage_location(id))
            .await?;
        self.repo_states
            .lock()
            .expect("repo states lock poisoned")
            .insert(id, HashMap::new());

        info!(
            "Variant analysis {} ({}) submitted for processing",
            id, variant_analysis.query.name
        );
        self.on_added.emit(variant_analysis.clone());

        self.monitor.monitor(variant_analysis.clone());
        Ok(variant_analysis)
    }

    /// Re-register a run after process restart. If its storage directory is
    /// gone the run was deleted externally: a removed event fires instead.
    /// Otherwise persisted download state is loaded and, unless the run is
    /// already complete, monitoring resumes.
    pub async fn rehydrate(
        self: &Arc<Self>,
        variant_analysis: VariantAnalysis,
    ) -> anyhow::Result<()> {
        let id = variant_analysis.id;
        let run_dir = self.storage_location(id);

        if !tokio::fs::try_exists(&run_dir).await.unwrap_or(false) {
            debug!("Storage for variant analysis {} is gone; treating as removed", id);
            self.on_removed.emit(variant_analysis);
            return Ok(());
        }

        self.set_variant_analysis(variant_analysis.clone());

        let states = self
            .run_store
            .read_repo_states(&self.repo_states_path(id))
            .await?;
        self.repo_states
            .lock()
            .expect("repo states lock poisoned")
            .insert(id, states);

        if !self.is_complete(&variant_analysis).await {
            self.monitor.monitor(variant_analysis);
        }

        Ok(())
    }

    /// Whether the run is final and every downloadable artifact is on disk.
    async fn is_complete(&self, variant_analysis: &VariantAnalysis) -> bool {
        if !variant_analysis.status.is_final() {
            return false;
        }
        let run_dir = self.storage_location(variant_analysis.id);
        for scanned_repo in &variant_analysis.scanned_repos {
            if !scanned_repo.scan_completed() {
                return false;
            }
            if scanned_repo.has_downloadable_artifact()
                && !self
                    .results
                    .is_repo_downloaded(&run_dir, &scanned_repo.repository.full_name)
                    .await
            {
                return false;
            }
        }
        true
    }

    fn handle_monitor_update(self: &Arc<Self>, variant_analysis: VariantAnalysis) {
        {
            let mut registry = self
                .variant_analyses
                .lock()
                .expect("variant analysis registry lock poisoned");
            // A stray update for a removed run is dropped.
            if !registry.contains_key(&variant_analysis.id) {
                return;
            }
            registry.insert(variant_analysis.id, variant_analysis.clone());
        }
        self.on_status_updated.emit(variant_analysis.clone());
        self.schedule_new_downloads(&variant_analysis);
    }

    /// Queue a download for every scanned repo whose artifact became
    /// available and has not been scheduled yet.
    fn schedule_new_downloads(self: &Arc<Self>, variant_analysis: &VariantAnalysis) {
        let to_download: Vec<ScannedRepo> = {
            let mut scheduled = self
                .scheduled_downloads
                .lock()
                .expect("scheduled downloads lock poisoned");
            let run_scheduled = scheduled.entry(variant_analysis.id).or_default();
            variant_analysis
                .scanned_repos
                .iter()
                .filter(|repo| {
                    repo.has_downloadable_artifact()
                        && run_scheduled.insert(repo.repository.id)
                })
                .cloned()
                .collect()
        };

        for scanned_repo in to_download {
            let manager = Arc::clone(self);
            let variant_analysis = variant_analysis.clone();
            tokio::spawn(async move {
                // Failures are recorded as repo state; one repo's failure
                // must not affect the queue or other repos.
                if let Err(e) = manager
                    .enqueue_download(&scanned_repo, &variant_analysis)
                    .await
                {
                    warn!(
                        "Download failed for {} in variant analysis {}: {}",
                        scanned_repo.repository.full_name, variant_analysis.id, e
                    );
                }
            });
        }
    }

    /// Push one repository's download onto the bounded queue. A no-op when
    /// the repo's recorded download already succeeded.
    pub async fn enqueue_download(
        &self,
        scanned_repo: &ScannedRepo,
        variant_analysis: &VariantAnalysis,
    ) -> anyhow::Result<()> {
        let already_succeeded = {
            let repo_states = self.repo_states.lock().expect("repo states lock poisoned");
            repo_states
                .get(&variant_analysis.id)
                .and_then(|states| states.get(&scanned_repo.repository.id))
                .is_some_and(|state| state.download_status == DownloadStatus::Succeeded)
        };
        if already_succeeded {
            return Ok(());
        }

        self.queue
            .run(self.auto_download(scanned_repo, variant_analysis))
            .await
    }

    /// The per-repo download state machine, run inside a queued task.
    async fn auto_download(
        &self,
        scanned_repo: &ScannedRepo,
        variant_analysis: &VariantAnalysis,
    ) -> anyhow::Result<()> {
        let run_id = variant_analysis.id;
        let repository_id = scanned_repo.repository.id;

        self.update_repo_state(
            run_id,
            RepoDownloadState {
                repository_id,
                download_status: DownloadStatus::Pending,
                download_percentage: None,
            },
        );

        let repo_task = match self
            .api
            .get_repo_task(variant_analysis.controller_repo.id, run_id, repository_id)
            .await
        {
            Ok(repo_task) => repo_task,
            Err(e) => {
                self.update_repo_state(
                    run_id,
                    RepoDownloadState {
                        repository_id,
                        download_status: DownloadStatus::Failed,
                        download_percentage: None,
                    },
                );
                self.persist_repo_states(run_id).await?;
                return Err(e.context(format!(
                    "could not fetch repo task for {} in variant analysis {}",
                    scanned_repo.repository.full_name, run_id
                )));
            }
        };

        if repo_task.artifact_url.is_none() {
            // Nothing to download; drop the transient tracking entry so it
            // never reaches the persisted state file.
            self.clear_repo_state(run_id, repository_id);
            return Ok(());
        }

        self.update_repo_state(
            run_id,
            RepoDownloadState {
                repository_id,
                download_status: DownloadStatus::InProgress,
                download_percentage: None,
            },
        );

        let storage_location = self.storage_location(run_id);
        let progress_interval = self.config.progress_update_interval();
        let last_progress_update = Mutex::new(Instant::now() - progress_interval);
        let on_progress = |download_percentage: u8| {
            let mut last = last_progress_update
                .lock()
                .expect("progress throttle lock poisoned");
            if last.elapsed() < progress_interval {
                return;
            }
            *last = Instant::now();
            self.update_repo_state(
                run_id,
                RepoDownloadState {
                    repository_id,
                    download_status: DownloadStatus::InProgress,
                    download_percentage: Some(download_percentage),
                },
            );
        };

        let mut retry = 0;
        loop {
            match self
                .results
                .download(run_id, &repo_task, &storage_location, &on_progress)
                .await
            {
                Ok(()) => break,
                Err(e)
                    if retry < self.config.max_download_retries
                        && is_transient_network_error(&e) =>
                {
                    retry += 1;
                    warn!(
                        "Transient error downloading {} for variant analysis {} \
                         (attempt {}): {}. Retrying...",
                        scanned_repo.repository.full_name, run_id, retry, e
                    );
                }
                Err(e) => {
                    self.update_repo_state(
                        run_id,
                        RepoDownloadState {
                            repository_id,
                            download_status: DownloadStatus::Failed,
                            download_percentage: None,
                        },
                    );
                    self.persist_repo_states(run_id).await?;
                    return Err(e.context(format!(
                        "could not download results for {} in variant analysis {}",
                        scanned_repo.repository.full_name, run_id
                    )));
                }
            }
        }

        self.update_repo_state(
            run_id,
            RepoDownloadState {
                repository_id,
                download_status: DownloadStatus::Succeeded,
                download_percentage: None,
            },
        );
        self.persist_repo_states(run_id).await?;

        Ok(())
    }

    fn update_repo_state(&self, variant_analysis_id: u64, repo_state: RepoDownloadState) {
        {
            let mut repo_states = self.repo_states.lock().expect("repo states lock poisoned");
            repo_states
                .entry(variant_analysis_id)
                .or_default()
                .insert(repo_state.repository_id, repo_state.clone());
        }
        self.on_repo_state_updated.emit(RepoStateUpdatedEvent {
            variant_analysis_id,
            repo_state,
        });
    }

    fn clear_repo_state(&self, variant_analysis_id: u64, repository_id: u64) {
        let mut repo_states = self.repo_states.lock().expect("repo states lock poisoned");
        if let Some(states) = repo_states.get_mut(&variant_analysis_id) {
            states.remove(&repository_id);
        }
    }

    /// Write the run's full in-memory state map to disk. Always serializes
    /// the authoritative in-memory map, never a stale disk snapshot, so
    /// concurrent per-repo completions cannot lose updates.
    async fn persist_repo_states(&self, variant_analysis_id: u64) -> anyhow::Result<()> {
        let states = {
            let repo_states = self.repo_states.lock().expect("repo states lock poisoned");
            repo_states
                .get(&variant_analysis_id)
                .cloned()
                .unwrap_or_default()
        };
        self.run_store
            .write_repo_states(&self.repo_states_path(variant_analysis_id), &states)
            .await
    }

    pub fn get_variant_analysis(&self, variant_analysis_id: u64) -> Option<VariantAnalysis> {
        self.variant_analyses
            .lock()
            .expect("variant analysis registry lock poisoned")
            .get(&variant_analysis_id)
            .cloned()
    }

    pub fn get_repo_states(&self, variant_analysis_id: u64) -> Vec<RepoDownloadState> {
        self.repo_states
            .lock()
            .expect("repo states lock poisoned")
            .get(&variant_analysis_id)
            .map(|states| states.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn registry_size(&self) -> usize {
        self.variant_analyses
            .lock()
            .expect("variant analysis registry lock poisoned")
            .len()
    }

    pub fn downloads_queue_size(&self) -> usize {
        self.queue.pending_count()
    }

    pub fn is_monitoring(&self, variant_analysis_id: u64) -> bool {
        self.monitor.is_monitoring(variant_analysis_id)
    }

    pub fn storage_location(&self, variant_analysis_id: u64) -> PathBuf {
        self.storage_path.join(variant_analysis_id.to_string())
    }

    fn repo_states_path(&self, variant_analysis_id: u64) -> PathBuf {
        self.storage_location(variant_analysis_id)
            .join(REPO_STATES_FILENAME)
    }

    /// Load one repository's decoded results for this run.
    pub async fn load_results(
        &self,
        variant_analysis_id: u64,
        repository_full_name: &str,
        options: LoadResultsOptions,
    ) -> anyhow::Result<RepoResult> {
        if self.get_variant_analysis(variant_analysis_id).is_none() {
            return Err(MrvaError::NoVariantAnalysis(variant_analysis_id).into());
        }
        self.results
            .load_results(
                variant_analysis_id,
                &self.storage_location(variant_analysis_id),
                repository_full_name,
                options,
            )
            .await
    }

    /// Drop a run: evict its cache entries, delete its storage directory,
    /// and remove it from the registry. In-flight downloads are left to
    /// finish; their stray completions are ignored because the registry
    /// entry is gone.
    pub async fn remove_variant_analysis(
        &self,
        variant_analysis: &VariantAnalysis,
    ) -> anyhow::Result<()> {
        self.results.remove_analysis_results(variant_analysis);

        let run_dir = self.storage_location(variant_analysis.id);
        match tokio::fs::remove_dir_all(&run_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.variant_analyses
            .lock()
            .expect("variant analysis registry lock poisoned")
            .remove(&variant_analysis.id);
        self.repo_states
            .lock()
            .expect("repo states lock poisoned")
            .remove(&variant_analysis.id);
        self.scheduled_downloads
            .lock()
            .expect("scheduled downloads lock poisoned")
            .remove(&variant_analysis.id);

        self.on_removed.emit(variant_analysis.clone());
        Ok(())
    }

    /// Ask the remote system to cancel a run. Requires the run to have an
    /// assigned workflow run id; local download state is untouched. The
    /// status optimistically flips to Canceling and is restored on failure.
    pub async fn cancel_variant_analysis(&self, variant_analysis_id: u64) -> anyhow::Result<()> {
        let variant_analysis = self
            .get_variant_analysis(variant_analysis_id)
            .ok_or(MrvaError::NoVariantAnalysis(variant_analysis_id))?;

        if variant_analysis.actions_workflow_run_id.is_none() {
            return Err(MrvaError::NoWorkflowRunId(variant_analysis_id).into());
        }

        let mut canceling = variant_analysis.clone();
        canceling.status = VariantAnalysisStatus::Canceling;
        self.set_variant_analysis(canceling.clone());
        self.on_status_updated.emit(canceling);

        info!("Canceling variant analysis {}. This may take a while.", variant_analysis_id);
        if let Err(e) = self
            .api
            .cancel(variant_analysis.controller_repo.id, variant_analysis_id)
            .await
        {
            let mut restored = variant_analysis.clone();
            restored.status = VariantAnalysisStatus::InProgress;
            self.set_variant_analysis(restored.clone());
            self.on_status_updated.emit(restored);
            return Err(e);
        }

        Ok(())
    }

    fn set_variant_analysis(&self, variant_analysis: VariantAnalysis) {
        self.variant_analyses
            .lock()
            .expect("variant analysis registry lock poisoned")
            .insert(variant_analysis.id, variant_analysis);
    }
}
