pub mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;

/// 构建路由
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/runs", post(submit_run).get(list_runs))
        .route("/api/runs/:job_id", get(get_run))
        .route("/api/invoices/pending", get(pending_invoices))
        .route("/api/invoices/pending/export", get(export_pending))
        .route("/api/invoices/:key/sent", post(mark_sent))
        .layer(ServiceBuilder::new())
        .with_state(state)
}
