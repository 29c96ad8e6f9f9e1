use std::sync::Arc;

use common::auth::JwtService;
use common::config::Settings;
use common::lifecycle::ScheduleService;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScheduleService>,
    pub jwt: JwtService,
    pub config: Arc<Settings>,
    /// Absent when no recorder was installed (tests)
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(service: ScheduleService, config: Settings, metrics: Option<PrometheusHandle>) -> Self {
        let jwt = JwtService::new(&config.auth.jwt_secret, config.auth.jwt_expiration_hours);

        Self {
            service: Arc::new(service),
            jwt,
            config: Arc::new(config),
            metrics,
        }
    }
}
