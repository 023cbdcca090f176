use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{export_pending_csv, InvoiceLedger};
use crate::models::JobStatus;
use crate::service::{JobError, JobManager};

/// 共享状态
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobManager,
    pub ledger: Arc<dyn InvoiceLedger>,
}

/// 请求体: 发起一次开票运行
#[derive(Debug, Deserialize)]
pub struct SubmitRunRequest {
    pub company: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitRunResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct CompanyQuery {
    pub company: String,
}

#[derive(Debug, Serialize)]
pub struct MarkSentResponse {
    pub key: String,
    pub updated: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: code,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        match &self {
            JobError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", self.to_string()),
            JobError::AlreadyRunning { .. } => {
                json_error(StatusCode::CONFLICT, "already_running", self.to_string())
            }
        }
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 发起运行 (立即返回, 后台执行)
pub async fn submit_run(State(state): State<AppState>, Json(req): Json<SubmitRunRequest>) -> Response {
    if req.company.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_request", "company is required");
    }
    match state.jobs.submit(&req.company, req.webhook_url) {
        Ok(job_id) => {
            let response = SubmitRunResponse {
                job_id,
                status: JobStatus::Started,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// 查询作业状态
pub async fn get_run(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.jobs.get_status(&job_id) {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// 作业列表, 最新的在前
pub async fn list_runs(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.jobs.list())).into_response()
}

/// 已生成、待发送的发票
pub async fn pending_invoices(State(state): State<AppState>, Query(q): Query<CompanyQuery>) -> Response {
    match state.ledger.list_pending_to_send(&q.company).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => {
            tracing::error!("Listing pending invoices for {} failed: {}", q.company, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "ledger_error", e.to_string())
        }
    }
}

/// 待发送发票导出为 CSV
pub async fn export_pending(State(state): State<AppState>, Query(q): Query<CompanyQuery>) -> Response {
    let rows = match state.ledger.list_pending_to_send(&q.company).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("Listing pending invoices for {} failed: {}", q.company, e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "ledger_error", e.to_string());
        }
    };
    let mut buf = Vec::new();
    if let Err(e) = export_pending_csv(&rows, &mut buf) {
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "export_error", e.to_string());
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        buf,
    )
        .into_response()
}

/// 标记已发送; 找不到不算错误
pub async fn mark_sent(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.ledger.mark_sent(&key).await {
        Ok(updated) => (StatusCode::OK, Json(MarkSentResponse { key, updated })).into_response(),
        Err(e) => {
            tracing::error!("mark_sent {} failed: {}", key, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "ledger_error", e.to_string())
        }
    }
}
