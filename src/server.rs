use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::batch::BatchContext;
use crate::config::AppConfig;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ctx: Arc<BatchContext>,
    /// Held for the duration of a run; at most one run at a time.
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> crate::error::Result<Self> {
        let config = Arc::new(config);
        let ctx = Arc::new(BatchContext::from_config(config.clone())?);
        Ok(Self::with_context(ctx))
    }

    pub fn with_context(ctx: Arc<BatchContext>) -> Self {
        Self {
            config: ctx.config.clone(),
            ctx,
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/drci/update", post(crate::trigger::handler::trigger_update))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
