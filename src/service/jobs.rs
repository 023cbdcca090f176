//! 异步作业管理
//!
//! 作业只保存在进程内存中, 重启后历史丢失。

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::AbortHandle;

use super::batch::{BatchRunner, RunError, RunProgress};
use super::run_log::RunLog;
use crate::clients::webhook::{WebhookNotifier, WebhookPayload};
use crate::models::{Job, JobStatus, JobSummary, RunReport};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("company {company} already has an active run ({job_id})")]
    AlreadyRunning { company: String, job_id: String },
}

struct JobEntry {
    job: Job,
    log: RunLog,
    handle: Option<AbortHandle>,
}

/// 作业注册表: 每个 key 只由其所属的后台任务写入
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobEntry>,
    /// company -> 活动作业 id
    active: DashMap<String, String>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut JobEntry)) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            f(entry.value_mut());
        }
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id).map(|entry| {
            let mut job = entry.job.clone();
            if !job.status.is_terminal() {
                job.log = entry.log.snapshot();
            }
            job
        })
    }

    /// 最新的在前
    pub fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self.jobs.iter().map(|e| e.job.summary()).collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

struct Inner {
    registry: JobRegistry,
    runner: Arc<BatchRunner>,
    notifier: WebhookNotifier,
    default_webhook: Option<String>,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn status_for(report: &RunReport) -> JobStatus {
    if report.timed_out {
        JobStatus::Timeout
    } else if report.aborted {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    }
}

impl JobManager {
    pub fn new(runner: Arc<BatchRunner>, notifier: WebhookNotifier, default_webhook: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: JobRegistry::new(),
                runner,
                notifier,
                default_webhook,
            }),
        }
    }

    /// 登记作业并在后台启动, 立即返回 job_id
    pub fn submit(&self, company: &str, webhook_url: Option<String>) -> Result<String, JobError> {
        let company = company.trim().to_string();
        let job_id = uuid::Uuid::new_v4().to_string();

        match self.inner.registry.active.entry(company.clone()) {
            Entry::Occupied(active) => {
                return Err(JobError::AlreadyRunning {
                    company,
                    job_id: active.get().clone(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(job_id.clone());
            }
        }

        let webhook_url = webhook_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.inner.default_webhook.clone());
        let log = RunLog::new(job_id.clone(), company.clone());
        self.inner.registry.jobs.insert(
            job_id.clone(),
            JobEntry {
                job: Job::new(job_id.clone(), company.clone(), webhook_url),
                log: log.clone(),
                handle: None,
            },
        );
        tracing::info!(job_id = %job_id, "Run submitted for {}", company);

        let inner = self.inner.clone();
        let id = job_id.clone();
        let task = tokio::spawn(async move { inner.execute(id, company, log).await });
        self.inner
            .registry
            .update(&job_id, |entry| entry.handle = Some(task.abort_handle()));

        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &str) -> Result<Job, JobError> {
        self.inner
            .registry
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub fn list(&self) -> Vec<JobSummary> {
        self.inner.registry.list()
    }

    /// 中止所有进行中的作业并清空注册表
    pub fn shutdown(&self) {
        let registry = &self.inner.registry;
        let mut aborted = 0;
        for entry in registry.jobs.iter() {
            if let (Some(handle), false) = (&entry.handle, entry.job.status.is_terminal()) {
                handle.abort();
                aborted += 1;
            }
        }
        registry.jobs.clear();
        registry.active.clear();
        tracing::info!("Job manager shut down, {} in-flight runs aborted", aborted);
    }
}

impl Inner {
    /// 运行被打断后取回部分报告, 并关闭遗留的 UI 会话
    async fn salvage(&self, progress: &RunProgress, reason: &str, timed_out: bool, log: &RunLog) -> Option<RunReport> {
        let (report, session) = progress.interrupt(reason, timed_out);
        if let Some(session) = session {
            match tokio::time::timeout(self.runner.step_timeout(), session.close()).await {
                Ok(Ok(())) => log.info("UI session closed after interrupted run"),
                Ok(Err(e)) => log.warn(format!("closing UI session failed: {}", e)),
                Err(_) => log.warn("closing UI session timed out"),
            }
        }
        report
    }

    async fn execute(&self, job_id: String, company: String, log: RunLog) {
        self.registry
            .update(&job_id, |entry| entry.job.status = JobStatus::Running);
        log.info(format!("Run {} started", job_id));

        let hard_limit = self.runner.hard_limit();
        let progress = RunProgress::new();
        let run = AssertUnwindSafe(self.runner.run_tracked(&company, &log, &progress)).catch_unwind();

        let outcome = tokio::time::timeout(hard_limit, run).await;

        let (status, report, error) = match outcome {
            Ok(Ok(Ok(report))) => (status_for(&report), Some(report), None),
            Ok(Ok(Err(e))) => {
                let status = match e {
                    RunError::Session(_) => JobStatus::Failed,
                    RunError::Source(_) => JobStatus::Error,
                };
                let message = match std::error::Error::source(&e) {
                    Some(cause) => format!("{e}: {cause}"),
                    None => e.to_string(),
                };
                (status, None, Some(message))
            }
            Ok(Err(panic)) => {
                let message = format!("run panicked: {}", panic_message(panic.as_ref()));
                log.error(format!("✗ {}", message));
                let report = self.salvage(&progress, &message, false, &log).await;
                (JobStatus::Error, report, Some(message))
            }
            Err(_) => {
                let message = format!("run exceeded hard limit of {:?}", hard_limit);
                log.error(format!("✗ {}", message));
                let report = self.salvage(&progress, &message, true, &log).await;
                (JobStatus::Timeout, report, Some(message))
            }
        };

        log.info(format!("Run {} finished with status {}", job_id, status));

        let mut finished: Option<Job> = None;
        self.registry.update(&job_id, |entry| {
            entry.job.report = report;
            entry.job.error = error;
            entry.job.log = log.snapshot();
            entry.job.finish(status);
            entry.handle = None;
            finished = Some(entry.job.clone());
        });
        self.registry
            .active
            .remove_if(&company, |_, active_id| active_id == &job_id);

        let Some(job) = finished else {
            return;
        };
        let payload = WebhookPayload::from_job(&job);
        let delivery = self
            .notifier
            .deliver(job.webhook_url.as_deref(), &payload)
            .await;
        self.registry
            .update(&job_id, |entry| entry.job.webhook = Some(delivery));
    }
}
