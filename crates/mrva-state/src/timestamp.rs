//! Retention marker written into every run directory.
//!
//! An external sweep deletes run directories whose marker is older than the
//! retention window, so the marker must exist before any other file in the
//! directory does.

use std::path::Path;

use chrono::Utc;

use mrva_core::MrvaError;

pub const TIMESTAMP_FILENAME: &str = "timestamp";

/// Write (or refresh) the retention marker in `run_dir`.
pub async fn write_timestamp_file(run_dir: &Path) -> Result<(), MrvaError> {
    let path = run_dir.join(TIMESTAMP_FILENAME);
    tokio::fs::write(&path, Utc::now().to_rfc3339())
        .await
        .map_err(|source| MrvaError::WriteFile { path, source })
}
