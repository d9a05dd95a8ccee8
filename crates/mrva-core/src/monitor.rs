//! Per-run polling of the remote job's top-level status.
//!
//! Each monitored run gets its own lightweight polling loop. The loop ends
//! when the run reaches a final status, the caller's cancellation predicate
//! fires (the run is no longer tracked locally), or the attempt budget runs
//! out. Transient poll errors are retried on the next tick.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::VariantAnalysisApi;
use crate::events::EventEmitter;
use crate::models::VariantAnalysis;

/// Decides each tick whether monitoring should stop because the run is no
/// longer tracked locally.
pub type ShouldCancelMonitor = Arc<dyn Fn(u64) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// With the default 5 second interval, this takes monitoring to just
    /// over 2 days.
    pub max_poll_attempts: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 17280,
        }
    }
}

pub struct VariantAnalysisMonitor {
    api: Arc<dyn VariantAnalysisApi>,
    config: MonitorConfig,
    should_cancel: ShouldCancelMonitor,
    monitoring: Arc<Mutex<HashSet<u64>>>,
    on_change: EventEmitter<VariantAnalysis>,
}

impl VariantAnalysisMonitor {
    pub fn new(
        api: Arc<dyn VariantAnalysisApi>,
        should_cancel: ShouldCancelMonitor,
        config: MonitorConfig,
    ) -> Self {
        Self {
            api,
            config,
            should_cancel,
            monitoring: Arc::new(Mutex::new(HashSet::new())),
            on_change: EventEmitter::new(),
        }
    }

    /// Receive every changed run snapshot this monitor observes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VariantAnalysis> {
        self.on_change.subscribe()
    }

    pub fn is_monitoring(&self, variant_analysis_id: u64) -> bool {
        self.monitoring
            .lock()
            .expect("monitoring set lock poisoned")
            .contains(&variant_analysis_id)
    }

    /// Start polling a run. Re-entrant calls for a run already being
    /// monitored are no-ops.
    pub fn monitor(self: &Arc<Self>, variant_analysis: VariantAnalysis) {
        let id = variant_analysis.id;
        {
            let mut monitoring = self
                .monitoring
                .lock()
                .expect("monitoring set lock poisoned");
            if !monitoring.insert(id) {
                debug!("Already monitoring variant analysis {}", id);
                return;
            }
        }

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.poll_loop(variant_analysis).await;
            monitor
                .monitoring
                .lock()
                .expect("monitoring set lock poisoned")
                .remove(&id);
        });
    }

    async fn poll_loop(&self, mut variant_analysis: VariantAnalysis) {
        let id = variant_analysis.id;
        let mut last_error_logged: Option<String> = None;

        for _attempt in 0..self.config.max_poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            if (self.should_cancel)(id) {
                info!("Stopping monitor for variant analysis {}: no longer tracked", id);
                return;
            }

            let summary = match self
                .api
                .get_variant_analysis(variant_analysis.controller_repo.id, id)
                .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    let message = e.to_string();
                    // Repeats of the same error only get logged at debug.
                    if last_error_logged.as_deref() == Some(&message) {
                        debug!(
                            "Error while monitoring variant analysis {} ({}): {}",
                            id, variant_analysis.query.name, message
                        );
                    } else {
                        warn!(
                            "Error while monitoring variant analysis {} ({}): {}",
                            id, variant_analysis.query.name, message
                        );
                        last_error_logged = Some(message);
                    }
                    continue;
                }
            };
            last_error_logged = None;

            variant_analysis = variant_analysis.with_update(summary);
            self.on_change.emit(variant_analysis.clone());

            if variant_analysis.status.is_final() {
                info!(
                    "Variant analysis {} reached final status {}",
                    id,
                    variant_analysis.status.as_str()
                );
                return;
            }
        }

        warn!(
            "Monitor for variant analysis {} gave up after {} attempts",
            id, self.config.max_poll_attempts
        );
    }
}
