use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::models::{Job, JobStatus, RunSummary, WebhookDelivery};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook endpoint returned {0}")]
    Status(u16),
}

/// 作业结束后 POST 给调用方的负载
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub job_id: String,
    pub status: JobStatus,
    pub company: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub success: bool,
    /// 没有报告时各项为零
    pub summary: RunSummary,
    /// 渲染后的运行报告
    pub logs: Vec<String>,
    /// 运行期间捕获的全部日志
    pub full_log: String,
}

impl WebhookPayload {
    pub fn from_job(job: &Job) -> Self {
        let summary = job.report.as_ref().map(|r| r.summary()).unwrap_or_default();
        let success = job.status == JobStatus::Completed && summary.failed == 0;

        let mut logs = job.report.as_ref().map(|r| r.render()).unwrap_or_default();
        if let Some(err) = &job.error {
            logs.push(format!("Error: {err}"));
        }

        let full_log = job
            .log
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            company: job.company.clone(),
            started_at: job.started_at,
            finished_at: job.finished_at,
            duration_seconds: job.duration_seconds,
            success,
            summary,
            logs,
            full_log,
        }
    }
}

/// 作业完成通知 (尽力而为, 单次投递)
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<u16, WebhookError> {
        let resp = self.client.post(url).json(payload).send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(WebhookError::Status(status));
        }
        Ok(status)
    }

    /// 投递结果只记录, 失败不会改变作业终态
    pub async fn deliver(&self, url: Option<&str>, payload: &WebhookPayload) -> WebhookDelivery {
        let attempted_at = Utc::now();
        let Some(url) = url else {
            tracing::info!(job_id = %payload.job_id, "no webhook configured, skipping notification");
            return WebhookDelivery {
                url: None,
                attempted_at,
                delivered: false,
                status_code: None,
                error: Some("no webhook url".to_string()),
            };
        };

        match self.post(url, payload).await {
            Ok(code) => {
                tracing::info!(job_id = %payload.job_id, "✓ webhook delivered to {} ({})", url, code);
                WebhookDelivery {
                    url: Some(url.to_string()),
                    attempted_at,
                    delivered: true,
                    status_code: Some(code),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %payload.job_id, "✗ webhook delivery to {} failed: {}", url, e);
                let status_code = match &e {
                    WebhookError::Status(code) => Some(*code),
                    WebhookError::Http(_) => None,
                };
                WebhookDelivery {
                    url: Some(url.to_string()),
                    attempted_at,
                    delivered: false,
                    status_code,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
