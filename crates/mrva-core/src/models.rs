// Models for a variant analysis run and its per-repository sub-tasks.
//
// A run spans many repositories; each repository carries two independent
// status dimensions: the remote analysis status (what the job reported) and
// the local download status (how far artifact acquisition has progressed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level status of a variant analysis run, as reported by the remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariantAnalysisStatus {
    InProgress,
    Succeeded,
    Failed,
    Canceling,
    Canceled,
}

impl VariantAnalysisStatus {
    /// Whether the run has completed and cannot change status anymore.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "inProgress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariantAnalysisFailureReason {
    NoReposQueried,
    WorkflowRunFailed,
    InternalError,
}

/// Remote verdict for one repository's query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnalysisRepoStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
    TimedOut,
}

impl AnalysisRepoStatus {
    /// Whether the repository scan has completed and cannot change anymore.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Canceled | Self::TimedOut
        )
    }
}

/// Local state of fetching and extracting one repository's result artifact.
/// Independent of the remote analysis status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryLanguage {
    Cpp,
    Csharp,
    Go,
    Java,
    Javascript,
    Python,
    Ruby,
    Swift,
}

impl QueryLanguage {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpp" => Some(Self::Cpp),
            "csharp" => Some(Self::Csharp),
            "go" => Some(Self::Go),
            "java" => Some(Self::Java),
            "javascript" => Some(Self::Javascript),
            "python" => Some(Self::Python),
            "ruby" => Some(Self::Ruby),
            "swift" => Some(Self::Swift),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpp => "cpp",
            Self::Csharp => "csharp",
            Self::Go => "go",
            Self::Java => "java",
            Self::Javascript => "javascript",
            Self::Python => "python",
            Self::Ruby => "ruby",
            Self::Swift => "swift",
        }
    }
}

impl std::str::FromStr for QueryLanguage {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: u64,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
}

/// The query submitted with the run. Immutable for the run's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAnalysisQuery {
    pub name: String,
    pub file_path: String,
    pub language: QueryLanguage,
    pub text: String,
}

/// Which repositories the run was asked to scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repositories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_lists: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_owners: Option<Vec<String>>,
}

/// One repository the remote job attempted to analyze.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedRepo {
    pub repository: Repository,
    pub analysis_status: AnalysisRepoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_size_in_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ScannedRepo {
    /// Whether the scan reached a state it cannot normally leave.
    pub fn scan_completed(&self) -> bool {
        self.analysis_status.is_completed()
    }

    /// Whether the remote job produced an artifact worth downloading.
    pub fn has_downloadable_artifact(&self) -> bool {
        self.analysis_status == AnalysisRepoStatus::Succeeded
            && self.result_count.is_some_and(|count| count > 0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRepoGroup {
    pub repository_count: u64,
    pub repositories: Vec<Repository>,
}

/// Repositories the remote job declined to scan, grouped by reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRepos {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_mismatch_repos: Option<SkippedRepoGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_found_repos: Option<SkippedRepoGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_database_repos: Option<SkippedRepoGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_limit_repos: Option<SkippedRepoGroup>,
}

impl SkippedRepos {
    pub fn total_count(&self) -> u64 {
        [
            &self.access_mismatch_repos,
            &self.not_found_repos,
            &self.no_database_repos,
            &self.over_limit_repos,
        ]
        .into_iter()
        .flatten()
        .map(|group| group.repository_count)
        .sum()
    }
}

/// One remote variant analysis run spanning many repositories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAnalysis {
    pub id: u64,
    pub controller_repo: Repository,
    pub query: VariantAnalysisQuery,
    #[serde(default)]
    pub databases: DatabaseSelection,
    pub status: VariantAnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<VariantAnalysisFailureReason>,
    /// Identity of the remote workflow run; present once the remote system
    /// has accepted the submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions_workflow_run_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scanned_repos: Vec<ScannedRepo>,
    #[serde(default)]
    pub skipped_repos: SkippedRepos,
}

impl VariantAnalysis {
    /// Merge a freshly-polled snapshot into this run, keeping the fields
    /// that only exist client-side (the submitted query and repo selection).
    pub fn with_update(&self, update: VariantAnalysis) -> VariantAnalysis {
        VariantAnalysis {
            id: self.id,
            controller_repo: self.controller_repo.clone(),
            query: self.query.clone(),
            databases: self.databases.clone(),
            created_at: self.created_at,
            status: update.status,
            failure_reason: update.failure_reason,
            actions_workflow_run_id: update
                .actions_workflow_run_id
                .or(self.actions_workflow_run_id),
            updated_at: update.updated_at,
            completed_at: update.completed_at,
            scanned_repos: update.scanned_repos,
            skipped_repos: update.skipped_repos,
        }
    }

    pub fn total_result_count(&self) -> Option<u64> {
        let counts: Vec<u64> = self
            .scanned_repos
            .iter()
            .filter_map(|repo| repo.result_count)
            .collect();
        if counts.is_empty() {
            None
        } else {
            Some(counts.into_iter().sum())
        }
    }

    /// URL of the remote workflow run, for surfacing logs.
    pub fn workflow_run_url(&self, remote_url: &str) -> Option<String> {
        self.actions_workflow_run_id.map(|run_id| {
            format!(
                "{}/{}/actions/runs/{}",
                remote_url.trim_end_matches('/'),
                self.controller_repo.full_name,
                run_id
            )
        })
    }
}

/// Per-repository task metadata fetched from the remote job just before a
/// download. Carries everything interpretation needs later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoTask {
    pub repository: Repository,
    pub analysis_status: AnalysisRepoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_size_in_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
}

/// Local download tracking for one repository within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoDownloadState {
    pub repository_id: u64,
    pub download_status: DownloadStatus,
    /// Only meaningful while the download is in progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_percentage: Option<u8>,
}

/// Everything a caller provides to start a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAnalysisSubmission {
    pub controller_repo_id: u64,
    pub action_repo_ref: String,
    pub query: VariantAnalysisQuery,
    pub databases: DatabaseSelection,
    /// Base64-encoded query pack, prepared by the out-of-scope bundling
    /// pipeline.
    pub pack: String,
}

/// Decoded alert from an interpreted (SARIF) results file. The decoding
/// itself is an external collaborator; this is just the payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisAlert {
    pub message: String,
    pub file_path: String,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_flows: Option<serde_json::Value>,
}

/// Decoded raw (BQRS) results. Opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResults {
    pub schema: serde_json::Value,
    pub rows: Vec<serde_json::Value>,
    pub file_link_prefix: String,
    pub source_location_prefix: String,
}

/// Decoded results for one repository of one run. The cache entry payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoResult {
    pub variant_analysis_id: u64,
    pub repository_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreted_results: Option<Vec<AnalysisAlert>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_results: Option<RawResults>,
}
