use std::sync::Arc;

use common::config::Settings;
use common::db::repositories::JobRepository;
use common::scheduler::ScheduleManager;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn JobRepository>,
    pub manager: Arc<ScheduleManager>,
    pub metrics: Option<PrometheusHandle>,
    pub config: Arc<Settings>,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(
        repo: Arc<dyn JobRepository>,
        manager: Arc<ScheduleManager>,
        metrics: Option<PrometheusHandle>,
        config: Settings,
    ) -> Self {
        Self {
            repo,
            manager,
            metrics,
            config: Arc::new(config),
        }
    }

    /// Rebuild the schedule after a job mutation.
    ///
    /// The mutation itself already succeeded, so a failed reload is only
    /// logged; the next successful reload picks the change up.
    pub async fn reload_schedule(&self) {
        if let Err(e) = self.manager.load_and_schedule_jobs().await {
            tracing::error!(error = %e, "Failed to reload schedule after job change");
        }
    }
}
