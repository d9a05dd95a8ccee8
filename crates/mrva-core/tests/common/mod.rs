#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::time::sleep;

use mrva_core::api::VariantAnalysisApi;
use mrva_core::artifacts::{ArtifactResponse, ArtifactTransport, ArtifactUnzipper, ResultDecoder};
use mrva_core::config::ManagerConfig;
use mrva_core::models::{
    AnalysisAlert, AnalysisRepoStatus, DatabaseSelection, QueryLanguage, RawResults,
    RepoDownloadState, RepoTask, Repository, ScannedRepo, SkippedRepos, VariantAnalysis,
    VariantAnalysisQuery, VariantAnalysisStatus, VariantAnalysisSubmission,
};
use mrva_core::results::{ResultsManager, BQRS_RESULTS_FILENAME, SARIF_RESULTS_FILENAME};
use mrva_core::storage::REPO_STATES_FILENAME;
use mrva_core::VariantAnalysisManager;
use mrva_state::{FileRepoTaskStore, FileRunStore};

pub fn init_tracing() -> tracing::dispatcher::DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .finish();
    tracing::subscriber::set_default(subscriber)
}

pub fn test_config() -> ManagerConfig {
    ManagerConfig {
        poll_interval_secs: 0.01,
        max_poll_attempts: 1000,
        max_concurrent_downloads: 3,
        max_download_retries: 3,
        progress_update_interval_ms: 0,
    }
}

// ---------------------------------------------------------------------------
// Remote API fake

pub struct MockApi {
    submit_response: Mutex<Option<VariantAnalysis>>,
    snapshots: Mutex<VecDeque<VariantAnalysis>>,
    last_snapshot: Mutex<Option<VariantAnalysis>>,
    repo_tasks: Mutex<HashMap<u64, RepoTask>>,
    fail_cancel: AtomicBool,
    pub poll_calls: AtomicUsize,
    pub repo_task_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            submit_response: Mutex::new(None),
            snapshots: Mutex::new(VecDeque::new()),
            last_snapshot: Mutex::new(None),
            repo_tasks: Mutex::new(HashMap::new()),
            fail_cancel: AtomicBool::new(false),
            poll_calls: AtomicUsize::new(0),
            repo_task_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_submit_response(&self, variant_analysis: VariantAnalysis) {
        *self.submit_response.lock().unwrap() = Some(variant_analysis);
    }

    /// Queue a status snapshot. Once the queue drains, the last snapshot is
    /// repeated on every subsequent poll.
    pub fn push_snapshot(&self, variant_analysis: VariantAnalysis) {
        self.snapshots.lock().unwrap().push_back(variant_analysis);
    }

    pub fn set_repo_task(&self, task: RepoTask) {
        self.repo_tasks
            .lock()
            .unwrap()
            .insert(task.repository.id, task);
    }

    pub fn fail_cancel(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl VariantAnalysisApi for MockApi {
    async fn submit(
        &self,
        _submission: &VariantAnalysisSubmission,
    ) -> anyhow::Result<VariantAnalysis> {
        self.submit_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no submit response configured"))
    }

    async fn get_variant_analysis(
        &self,
        _controller_repo_id: u64,
        _variant_analysis_id: u64,
    ) -> anyhow::Result<VariantAnalysis> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let popped = self.snapshots.lock().unwrap().pop_front();
        let mut last = self.last_snapshot.lock().unwrap();
        if let Some(snapshot) = popped {
            *last = Some(snapshot.clone());
            return Ok(snapshot);
        }
        last.clone()
            .ok_or_else(|| anyhow::anyhow!("no status snapshot configured"))
    }

    async fn get_repo_task(
        &self,
        _controller_repo_id: u64,
        _variant_analysis_id: u64,
        repository_id: u64,
    ) -> anyhow::Result<RepoTask> {
        self.repo_task_calls.fetch_add(1, Ordering::SeqCst);
        self.repo_tasks
            .lock()
            .unwrap()
            .get(&repository_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no repo task for repository {repository_id}"))
    }

    async fn cancel(
        &self,
        _controller_repo_id: u64,
        _variant_analysis_id: u64,
    ) -> anyhow::Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("remote cancellation rejected"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Artifact transport fake

pub struct MockTransport {
    payload: Vec<u8>,
    failures_remaining: AtomicUsize,
    failure_kind: std::io::ErrorKind,
    hold: Duration,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            payload: b"PK\x03\x04 fake artifact payload bytes".to_vec(),
            failures_remaining: AtomicUsize::new(0),
            failure_kind: std::io::ErrorKind::ConnectionReset,
            hold: Duration::ZERO,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the first `count` fetches with an I/O error of this kind.
    pub fn fail_first(self, count: usize, kind: std::io::ErrorKind) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        Self {
            failure_kind: kind,
            ..self
        }
    }

    /// Keep each fetch open for this long, so concurrency is observable.
    pub fn hold_for(self, hold: Duration) -> Self {
        Self { hold, ..self }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

#[async_trait]
impl ArtifactTransport for MockTransport {
    async fn fetch(&self, _url: &str) -> anyhow::Result<ArtifactResponse> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(std::io::Error::new(self.failure_kind, "injected transport failure").into());
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let mid = self.payload.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&self.payload[..mid])),
            Ok(Bytes::copy_from_slice(&self.payload[mid..])),
        ];
        Ok(ArtifactResponse {
            content_length: Some(self.payload.len() as u64),
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }
}

// ---------------------------------------------------------------------------
// Unzipper and decoder fakes

#[derive(Clone, Copy)]
pub enum ExtractedResults {
    Sarif,
    Bqrs,
    Nothing,
}

pub struct MockUnzipper {
    extracted: ExtractedResults,
    pub unzip_calls: AtomicUsize,
}

impl MockUnzipper {
    pub fn new(extracted: ExtractedResults) -> Self {
        Self {
            extracted,
            unzip_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactUnzipper for MockUnzipper {
    async fn unzip(&self, zip_path: &Path, dest_dir: &Path) -> anyhow::Result<()> {
        self.unzip_calls.fetch_add(1, Ordering::SeqCst);
        if !tokio::fs::try_exists(zip_path).await.unwrap_or(false) {
            return Err(anyhow::anyhow!("archive not found at {}", zip_path.display()));
        }
        tokio::fs::create_dir_all(dest_dir).await?;
        match self.extracted {
            ExtractedResults::Sarif => {
                tokio::fs::write(dest_dir.join(SARIF_RESULTS_FILENAME), b"{\"runs\":[]}").await?;
            }
            ExtractedResults::Bqrs => {
                tokio::fs::write(dest_dir.join(BQRS_RESULTS_FILENAME), b"BQRS").await?;
            }
            ExtractedResults::Nothing => {}
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDecoder {
    pub sarif_calls: AtomicUsize,
    pub bqrs_calls: AtomicUsize,
}

#[async_trait]
impl ResultDecoder for MockDecoder {
    async fn decode_sarif(
        &self,
        _path: &Path,
        file_link_prefix: &str,
    ) -> anyhow::Result<Vec<AnalysisAlert>> {
        self.sarif_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![AnalysisAlert {
            message: "test alert".to_string(),
            file_path: format!("{file_link_prefix}/src/main.js"),
            severity: "warning".to_string(),
            code_flows: None,
        }])
    }

    async fn decode_bqrs(
        &self,
        _path: &Path,
        file_link_prefix: &str,
        source_location_prefix: &str,
    ) -> anyhow::Result<RawResults> {
        self.bqrs_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawResults {
            schema: serde_json::json!({ "columns": [] }),
            rows: vec![],
            file_link_prefix: file_link_prefix.to_string(),
            source_location_prefix: source_location_prefix.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures

pub fn repository(id: u64, full_name: &str) -> Repository {
    Repository {
        id,
        full_name: full_name.to_string(),
        private: false,
    }
}

pub fn scanned_repo(
    id: u64,
    full_name: &str,
    analysis_status: AnalysisRepoStatus,
    result_count: Option<u64>,
) -> ScannedRepo {
    ScannedRepo {
        repository: repository(id, full_name),
        analysis_status,
        result_count,
        artifact_size_in_bytes: None,
        failure_message: None,
    }
}

pub fn variant_analysis(
    id: u64,
    status: VariantAnalysisStatus,
    scanned_repos: Vec<ScannedRepo>,
) -> VariantAnalysis {
    VariantAnalysis {
        id,
        controller_repo: repository(999, "octo/controller"),
        query: VariantAnalysisQuery {
            name: "FindEval".to_string(),
            file_path: "queries/find-eval.ql".to_string(),
            language: QueryLanguage::Javascript,
            text: "import javascript\nselect 1".to_string(),
        },
        databases: DatabaseSelection::default(),
        status,
        failure_reason: None,
        actions_workflow_run_id: Some(777),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        completed_at: None,
        scanned_repos,
        skipped_repos: SkippedRepos::default(),
    }
}

pub fn repo_task(id: u64, full_name: &str, artifact_url: Option<&str>) -> RepoTask {
    RepoTask {
        repository: repository(id, full_name),
        analysis_status: AnalysisRepoStatus::Succeeded,
        result_count: Some(5),
        artifact_size_in_bytes: Some(2048),
        failure_message: None,
        database_commit_sha: Some("abc123".to_string()),
        source_location_prefix: Some("/work".to_string()),
        artifact_url: artifact_url.map(str::to_string),
    }
}

pub fn submission() -> VariantAnalysisSubmission {
    VariantAnalysisSubmission {
        controller_repo_id: 999,
        action_repo_ref: "main".to_string(),
        query: VariantAnalysisQuery {
            name: "FindEval".to_string(),
            file_path: "queries/find-eval.ql".to_string(),
            language: QueryLanguage::Javascript,
            text: "import javascript\nselect 1".to_string(),
        },
        databases: DatabaseSelection::default(),
        pack: "cGFjaw==".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct TestHarness {
    pub manager: Arc<VariantAnalysisManager>,
    pub results: Arc<ResultsManager>,
    pub api: Arc<MockApi>,
    pub transport: Arc<MockTransport>,
    pub unzipper: Arc<MockUnzipper>,
    pub decoder: Arc<MockDecoder>,
    pub storage: tempfile::TempDir,
}

pub fn build_harness(
    api: Arc<MockApi>,
    transport: Arc<MockTransport>,
    unzipper: Arc<MockUnzipper>,
) -> TestHarness {
    let decoder = Arc::new(MockDecoder::default());
    let storage = tempfile::tempdir().expect("tempdir");
    let results = Arc::new(ResultsManager::new(
        Arc::clone(&transport) as Arc<dyn ArtifactTransport>,
        Arc::clone(&unzipper) as Arc<dyn ArtifactUnzipper>,
        Arc::clone(&decoder) as Arc<dyn ResultDecoder>,
        Arc::new(FileRepoTaskStore::new()),
    ));
    let manager = VariantAnalysisManager::new(
        Arc::clone(&api) as Arc<dyn VariantAnalysisApi>,
        Arc::clone(&results),
        Arc::new(FileRunStore::new()),
        storage.path(),
        test_config(),
    );
    TestHarness {
        manager,
        results,
        api,
        transport,
        unzipper,
        decoder,
        storage,
    }
}

pub fn default_harness() -> TestHarness {
    build_harness(
        Arc::new(MockApi::new()),
        Arc::new(MockTransport::new()),
        Arc::new(MockUnzipper::new(ExtractedResults::Sarif)),
    )
}

/// The persisted download-state file for a run, parsed.
pub async fn read_persisted_states(
    manager: &VariantAnalysisManager,
    variant_analysis_id: u64,
) -> HashMap<u64, RepoDownloadState> {
    let path = manager
        .storage_location(variant_analysis_id)
        .join(REPO_STATES_FILENAME);
    let bytes = tokio::fs::read(&path).await.expect("persisted state file");
    serde_json::from_slice(&bytes).expect("persisted state json")
}

pub async fn persisted_states_file_exists(
    manager: &VariantAnalysisManager,
    variant_analysis_id: u64,
) -> bool {
    let path = manager
        .storage_location(variant_analysis_id)
        .join(REPO_STATES_FILENAME);
    tokio::fs::try_exists(&path).await.unwrap_or(false)
}
