//! Remote job API boundary.
//!
//! The engine treats submission, status polling, repo-task lookup and
//! cancellation as a black box behind this trait. Implementations talk to
//! the actual job execution service; tests use in-memory fakes.

use async_trait::async_trait;

use crate::models::{RepoTask, VariantAnalysis, VariantAnalysisSubmission};

#[async_trait]
pub trait VariantAnalysisApi: Send + Sync {
    /// Submit a run for remote execution. The returned run carries the
    /// remote-assigned id and initial status.
    async fn submit(
        &self,
        submission: &VariantAnalysisSubmission,
    ) -> anyhow::Result<VariantAnalysis>;

    /// Fetch the current top-level snapshot of a run.
    async fn get_variant_analysis(
        &self,
        controller_repo_id: u64,
        variant_analysis_id: u64,
    ) -> anyhow::Result<VariantAnalysis>;

    /// Fetch one repository's task metadata, including the artifact URL
    /// when results are ready for download.
    async fn get_repo_task(
        &self,
        controller_repo_id: u64,
        variant_analysis_id: u64,
        repository_id: u64,
    ) -> anyhow::Result<RepoTask>;

    /// Ask the remote system to cancel the run. Purely a remote-state
    /// change; local download state is untouched.
    async fn cancel(
        &self,
        controller_repo_id: u64,
        variant_analysis_id: u64,
    ) -> anyhow::Result<()>;
}
