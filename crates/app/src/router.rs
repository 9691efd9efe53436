use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use famdomain_storage::Database;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::error;

use crate::provisioning::ProvisioningService;
use crate::rate_limit::{self, FixedWindowRateLimiter};
use crate::search::{self, DomainSearchEngine};
use crate::telemetry;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    search: DomainSearchEngine,
    provisioning: ProvisioningService,
    limiter: FixedWindowRateLimiter,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        search: DomainSearchEngine,
        provisioning: ProvisioningService,
        limiter: FixedWindowRateLimiter,
    ) -> Self {
        Self {
            metrics,
            storage,
            search,
            provisioning,
            limiter,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn search(&self) -> &DomainSearchEngine {
        &self.search
    }

    /// Entry point for the payment confirmation flow to queue new orders.
    pub fn provisioning(&self) -> &ProvisioningService {
        &self.provisioning
    }

    pub fn limiter(&self) -> &FixedWindowRateLimiter {
        &self.limiter
    }
}

pub fn app_router(state: AppState) -> Router {
    let search_routes = Router::new()
        .route("/search", get(search::handle))
        .route_layer(middleware::from_fn_with_state(
            state.limiter().clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .merge(search_routes)
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    match state.storage().ping().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            error!(stage = "app", error = %err, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
