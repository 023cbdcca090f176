//! 异步作业: 提交 / 轮询 / 终态 / webhook

mod common;

use common::*;
use remito_invoicer::clients::{WebhookNotifier, WebhookPayload};
use remito_invoicer::models::{Job, JobStatus};
use remito_invoicer::service::{JobError, JobManager};
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manager(h: &Harness, default_webhook: Option<String>) -> JobManager {
    let notifier = WebhookNotifier::new(Duration::from_secs(5)).unwrap();
    JobManager::new(h.runner.clone(), notifier, default_webhook)
}

async fn wait_for(jobs: &JobManager, job_id: &str, done: impl Fn(&Job) -> bool) -> Job {
    for _ in 0..200 {
        let job = jobs.get_status(job_id).unwrap();
        if done(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not reach the expected state");
}

async fn wait_terminal(jobs: &JobManager, job_id: &str) -> Job {
    wait_for(jobs, job_id, |j| j.status.is_terminal() && j.webhook.is_some()).await
}

#[tokio::test]
async fn submit_returns_immediately_and_job_completes_with_report() {
    let sales = FixedSales {
        items: vec![line("D-1", json!(150))],
        delay: Duration::from_millis(300),
        fail: false,
    };
    let h = harness_with(sales, ScriptedDriver::new(), rates(), test_config());
    let jobs = manager(&h, None);

    let start = Instant::now();
    let job_id = jobs.submit(COMPANY, None).unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));

    let early = jobs.get_status(&job_id).unwrap();
    assert!(matches!(early.status, JobStatus::Started | JobStatus::Running));
    assert!(early.report.is_none());

    let job = wait_terminal(&jobs, &job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    let report = job.report.expect("report attached");
    assert_eq!(report.succeeded.len(), 1);
    assert!(job.finished_at.is_some());
    assert!(job.duration_seconds.unwrap() >= 0.0);
    assert!(job.log.iter().any(|l| l.message.contains("D-1")));

    // 无 webhook 地址: 记录为跳过
    let delivery = job.webhook.unwrap();
    assert!(!delivery.delivered);
    assert!(delivery.url.is_none());
}

#[tokio::test]
async fn scenario_d_job_is_failed_and_webhook_carries_the_summary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/run"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let items = (1..=5).map(|i| line(&format!("D-{i}"), json!(100))).collect();
    let h = harness(items, ScriptedDriver::new().with("D-2", Behavior::NoAuthCode));
    let jobs = manager(&h, None);

    let job_id = jobs
        .submit(COMPANY, Some(format!("{}/hooks/run", server.uri())))
        .unwrap();
    let job = wait_terminal(&jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let summary = job.summary().summary.unwrap();
    assert_eq!((summary.succeeded, summary.failed, summary.not_attempted), (1, 1, 3));

    let delivery = job.webhook.unwrap();
    assert!(delivery.delivered);
    assert_eq!(delivery.status_code, Some(200));

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["job_id"], job_id);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["company"], COMPANY);
    assert_eq!(body["success"], false);
    assert_eq!(body["summary"]["total"], 5);
    assert_eq!(body["summary"]["succeeded"], 1);
    assert_eq!(body["summary"]["failed"], 1);
    assert!(body["logs"].as_array().unwrap().iter().any(|l| l == "NOT ATTEMPTED:"));
    assert!(body["full_log"].as_str().unwrap().contains("FATAL"));
}

#[tokio::test]
async fn webhook_failure_is_recorded_without_changing_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let h = harness(vec![line("D-1", json!(10))], ScriptedDriver::new());
    // 未指定 URL 时使用默认 webhook
    let jobs = manager(&h, Some(format!("{}/default", server.uri())));

    let job_id = jobs.submit(COMPANY, None).unwrap();
    let job = wait_terminal(&jobs, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let delivery = job.webhook.unwrap();
    assert!(!delivery.delivered);
    assert_eq!(delivery.status_code, Some(503));
    assert!(delivery.url.unwrap().ends_with("/default"));
}

#[tokio::test]
async fn second_run_for_an_active_company_is_rejected() {
    let sales = FixedSales {
        items: vec![line("D-1", json!(10))],
        delay: Duration::from_millis(300),
        fail: false,
    };
    let h = harness_with(sales, ScriptedDriver::new(), rates(), test_config());
    let jobs = manager(&h, None);

    let first = jobs.submit(COMPANY, None).unwrap();
    match jobs.submit(COMPANY, None) {
        Err(JobError::AlreadyRunning { job_id, .. }) => assert_eq!(job_id, first),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }

    wait_terminal(&jobs, &first).await;
    let again = jobs.submit(COMPANY, None).unwrap();
    assert_ne!(again, first);
    wait_terminal(&jobs, &again).await;

    let list = jobs.list();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].job_id, again);
}

#[tokio::test]
async fn source_failure_and_panics_end_in_error_status() {
    let sales = FixedSales {
        fail: true,
        ..Default::default()
    };
    let h = harness_with(sales, ScriptedDriver::new(), rates(), test_config());
    let jobs = manager(&h, None);
    let job = wait_terminal(&jobs, &jobs.submit(COMPANY, None).unwrap()).await;
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("failed to fetch pending documents"));
    assert!(job.report.is_none());

    let h = harness(
        vec![line("D-1", json!(10))],
        ScriptedDriver::new().with("D-1", Behavior::Panic),
    );
    let jobs = manager(&h, None);
    let job = wait_terminal(&jobs, &jobs.submit(COMPANY, None).unwrap()).await;
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap().contains("automation worker crashed"));
    // 部分报告保留, 会话被关闭
    let report = job.report.expect("partial report");
    assert_eq!(report.failed[0].document_id, "D-1");
    assert_eq!(h.driver.log.lock().unwrap().sessions_closed, 1);
}

#[tokio::test]
async fn hard_limit_keeps_the_partial_report_and_closes_the_session() {
    let mut config = test_config();
    config.runner.run_timeout_secs = 1;
    config.runner.hard_limit_grace_secs = 0;
    let items = (1..=3).map(|i| line(&format!("D-{i}"), json!(10))).collect();
    let ledger = FlakyLedger {
        hang_lookup: Some(("D-2".into(), Duration::from_secs(30))),
        ..Default::default()
    };
    let h = harness_with_ledger(FixedSales::new(items), ScriptedDriver::new(), config, ledger);
    let jobs = manager(&h, None);

    let job = wait_terminal(&jobs, &jobs.submit(COMPANY, None).unwrap()).await;

    assert_eq!(job.status, JobStatus::Timeout);
    assert!(job.error.as_deref().unwrap().starts_with("run exceeded hard limit"));
    let report = job.report.clone().expect("partial report");
    assert!(report.timed_out);
    assert_eq!(report.succeeded[0].document_id, "D-1");
    assert_eq!(report.failed[0].document_id, "D-2");
    assert_eq!(report.not_attempted, vec!["D-3"]);
    assert_eq!(h.ledger.len(), 1);
    assert_eq!(h.driver.log.lock().unwrap().sessions_closed, 1);

    let payload = WebhookPayload::from_job(&job);
    assert_eq!(payload.summary.total, 3);
    assert_eq!(payload.summary.succeeded, 1);
}

#[tokio::test]
async fn session_fatal_run_is_failed() {
    let mut driver = ScriptedDriver::new();
    driver.fail_open = true;
    let h = harness(vec![line("D-1", json!(10))], driver);
    let jobs = manager(&h, None);

    let job = wait_terminal(&jobs, &jobs.submit(COMPANY, None).unwrap()).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("login rejected"));

    // 没有报告时 webhook 摘要为全零
    let body = serde_json::to_value(WebhookPayload::from_job(&job)).unwrap();
    assert_eq!(body["summary"], json!({"total": 0, "succeeded": 0, "failed": 0, "skipped": 0, "not_attempted": 0}));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = harness(vec![], ScriptedDriver::new());
    let jobs = manager(&h, None);
    assert!(matches!(jobs.get_status("nope"), Err(JobError::NotFound(_))));
}

#[tokio::test]
async fn shutdown_clears_the_registry() {
    let sales = FixedSales {
        items: vec![line("D-1", json!(10))],
        delay: Duration::from_secs(30),
        fail: false,
    };
    let h = harness_with(sales, ScriptedDriver::new(), rates(), test_config());
    let jobs = manager(&h, None);

    let job_id = jobs.submit(COMPANY, None).unwrap();
    jobs.shutdown();

    assert!(jobs.list().is_empty());
    assert!(matches!(jobs.get_status(&job_id), Err(JobError::NotFound(_))));
    assert!(jobs.submit(COMPANY, None).is_ok());
    jobs.shutdown();
}
