use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MrvaError {
    #[error("no variant analysis with id {0}")]
    NoVariantAnalysis(u64),

    #[error("no workflow run id for variant analysis with id {0}")]
    NoWorkflowRunId(u64),

    #[error("missing artifact URL for repository {repository}")]
    MissingArtifactUrl { repository: String },

    #[error("variant analysis results not downloaded for repository {repository}")]
    ResultsNotDownloaded { repository: String },

    #[error("missing results file for repository {repository}")]
    MissingResultsFile { repository: String },

    #[error("repo task for {repository} is missing required field {field}")]
    MissingRepoTaskField {
        repository: String,
        field: &'static str,
    },

    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("json parse error in {path}: {source}")]
    JsonParse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type MrvaResult<T> = Result<T, MrvaError>;

/// Whether an artifact download failure is worth retrying.
///
/// Only connection resets and timeouts qualify; anything else (bad status,
/// disk errors, corrupt archives) is structural and retrying cannot fix it.
pub fn is_transient_network_error(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() || reqwest_err.is_connect() {
                return true;
            }
        }
    }
    false
}
