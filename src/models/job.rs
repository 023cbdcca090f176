use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::report::{RunReport, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Running,
    Completed,
    Failed,
    Timeout,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Started | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// 运行期间捕获的一行诊断日志
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:5} {}",
            self.at.format("%Y-%m-%d %H:%M:%S%.3f"),
            format!("{:?}", self.level).to_uppercase(),
            self.message
        )
    }
}

/// webhook 投递结果 (只记录, 不影响作业终态)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub url: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub delivered: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub company: String,
    pub status: JobStatus,
    pub webhook_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    /// 运行级错误 (会话失败 / 数据源失败 / 超时)
    pub error: Option<String>,
    pub log: Vec<LogLine>,
    pub report: Option<RunReport>,
    pub webhook: Option<WebhookDelivery>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, company: impl Into<String>, webhook_url: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            company: company.into(),
            status: JobStatus::Started,
            webhook_url,
            started_at: Utc::now(),
            finished_at: None,
            duration_seconds: None,
            error: None,
            log: Vec::new(),
            report: None,
            webhook: None,
        }
    }

    pub fn finish(&mut self, status: JobStatus) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.duration_seconds = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            company: self.company.clone(),
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_seconds: self.duration_seconds,
            summary: self.report.as_ref().map(RunReport::summary),
        }
    }
}

/// 列表接口返回的作业摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub company: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub summary: Option<RunSummary>,
}
