use std::time::Duration;

use serde::Deserialize;

/// Manager configuration for polling and download tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Interval between remote status polls in seconds (supports fractional
    /// seconds like 0.5).
    pub poll_interval_secs: f64,

    /// Maximum number of polls before a monitor gives up. With the default
    /// 5 second interval this is just over 2 days of monitoring.
    pub max_poll_attempts: usize,

    /// Maximum concurrent artifact downloads, process-wide.
    pub max_concurrent_downloads: usize,

    /// Retry budget for transient download failures.
    pub max_download_retries: usize,

    /// Minimum milliseconds between forwarded download-progress updates.
    pub progress_update_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: std::env::var("MRVA_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5.0),
            max_poll_attempts: std::env::var("MRVA_MAX_POLL_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(17280),
            max_concurrent_downloads: std::env::var("MRVA_MAX_CONCURRENT_DOWNLOADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            max_download_retries: std::env::var("MRVA_MAX_DOWNLOAD_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            progress_update_interval_ms: std::env::var("MRVA_PROGRESS_UPDATE_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
        }
    }
}

impl ManagerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn progress_update_interval(&self) -> Duration {
        Duration::from_millis(self.progress_update_interval_ms)
    }
}
