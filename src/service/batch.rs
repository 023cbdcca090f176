use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::aggregator::aggregate;
use super::lifecycle::{DocumentOutcome, DocumentProcessor};
use super::run_log::RunLog;
use super::withholding::WithholdingCalculator;
use crate::clients::sales::{SalesSource, SalesSourceError};
use crate::config::AppConfig;
use crate::db::InvoiceLedger;
use crate::driver::{DriverError, DriverSession, UiDriver};
use crate::models::{FailedEntry, RunReport, SkippedEntry};

/// 运行级错误: 整批一张都没处理
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to fetch pending documents")]
    Source(#[from] SalesSourceError),
    #[error("could not open a UI session")]
    Session(#[source] DriverError),
}

/// 运行中的共享进度: 外层硬超时或 panic 之后仍能取回部分报告并关闭会话
#[derive(Clone, Default)]
pub struct RunProgress {
    state: Arc<Mutex<ProgressState>>,
}

#[derive(Default)]
struct ProgressState {
    report: Option<RunReport>,
    document_ids: Vec<String>,
    current: Option<String>,
    session: Option<Arc<dyn DriverSession>>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut ProgressState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    fn record(&self, f: impl FnOnce(&mut RunReport)) {
        self.with(|state| {
            if let Some(report) = state.report.as_mut() {
                f(report);
            }
        })
    }

    pub fn snapshot(&self) -> Option<RunReport> {
        self.with(|state| state.report.clone())
    }

    /// 运行被外部打断: 正在处理的单据记为失败, 其余记为未尝试; 交出仍打开的会话
    pub fn interrupt(&self, reason: &str, timed_out: bool) -> (Option<RunReport>, Option<Arc<dyn DriverSession>>) {
        self.with(|state| {
            let session = state.session.take();
            let current = state.current.take();
            let Some(report) = state.report.as_mut() else {
                return (None, session);
            };
            if let Some(document_id) = current {
                report.failed.push(FailedEntry {
                    document_id,
                    error: format!("{reason}\ncaused by: interrupted mid-document, check the ERP for a saved draft"),
                    fatal: false,
                });
            }
            let done: HashSet<&str> = report
                .succeeded
                .iter()
                .map(|e| e.document_id.as_str())
                .chain(report.skipped.iter().map(|e| e.document_id.as_str()))
                .chain(report.failed.iter().map(|e| e.document_id.as_str()))
                .chain(report.not_attempted.iter().map(String::as_str))
                .collect();
            let remaining: Vec<String> = state
                .document_ids
                .iter()
                .filter(|id| !done.contains(id.as_str()))
                .cloned()
                .collect();
            report.not_attempted.extend(remaining);
            report.timed_out |= timed_out;
            report.finished_at = Some(chrono::Utc::now());
            (Some(report.clone()), session)
        })
    }
}

/// 按公司顺序处理全部待开票单据
pub struct BatchRunner {
    sales: Arc<dyn SalesSource>,
    driver: Arc<dyn UiDriver>,
    ledger: Arc<dyn InvoiceLedger>,
    calculator: Arc<WithholdingCalculator>,
    config: Arc<AppConfig>,
}

impl BatchRunner {
    pub fn new(
        sales: Arc<dyn SalesSource>,
        driver: Arc<dyn UiDriver>,
        ledger: Arc<dyn InvoiceLedger>,
        calculator: Arc<WithholdingCalculator>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            sales,
            driver,
            ledger,
            calculator,
            config,
        }
    }

    pub fn hard_limit(&self) -> Duration {
        self.config.hard_limit()
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.config.driver.step_timeout_secs)
    }

    pub async fn run(&self, company: &str, log: &RunLog) -> Result<RunReport, RunError> {
        self.run_tracked(company, log, &RunProgress::new()).await
    }

    /// 同 `run`, 进度同步写入 `progress`
    pub async fn run_tracked(
        &self,
        company: &str,
        log: &RunLog,
        progress: &RunProgress,
    ) -> Result<RunReport, RunError> {
        let deadline = Instant::now() + self.config.run_timeout();

        // 1. 拉取并聚合
        log.info(format!("Fetching pending documents for {}", company));
        let items = self.sales.pending_line_items(company).await.map_err(|e| {
            log.error(format!("✗ Failed to fetch pending documents: {}", e));
            RunError::Source(e)
        })?;
        let documents = aggregate(&items);
        log.info(format!(
            "{} line items aggregated into {} documents",
            items.len(),
            documents.len()
        ));

        progress.with(|state| {
            state.report = Some(RunReport::new(company, documents.len()));
            state.document_ids = documents.iter().map(|d| d.document_id.clone()).collect();
        });
        if documents.is_empty() {
            log.info("No pending documents, nothing to do");
            return Ok(self.finish(progress, log));
        }

        // 2. 独占会话; 打不开则整批失败
        let step_timeout = self.step_timeout();
        let session: Arc<dyn DriverSession> =
            match tokio::time::timeout(step_timeout, self.driver.open_session(company)).await {
                Ok(Ok(session)) => Arc::from(session),
                Ok(Err(e)) => {
                    log.error(format!("✗ Could not open UI session: {}", e));
                    return Err(RunError::Session(e));
                }
                Err(_) => {
                    let e = DriverError::Session(format!("opening session timed out after {:?}", step_timeout));
                    log.error(format!("✗ Could not open UI session: {}", e));
                    return Err(RunError::Session(e));
                }
            };
        progress.with(|state| state.session = Some(session.clone()));

        let processor = DocumentProcessor {
            company: company.to_string(),
            rules: self.config.company_rules(company),
            ledger: self.ledger.clone(),
            calculator: self.calculator.clone(),
            auth_code_retry: self.config.auth_code_retry(),
            step_timeout,
            deadline: Some(deadline),
        };

        // 3. 逐张处理
        let total = documents.len();
        for (idx, doc) in documents.iter().enumerate() {
            if Instant::now() >= deadline {
                log.error(format!(
                    "✗ Run time limit reached, {} documents left unprocessed",
                    total - idx
                ));
                progress.record(|report| {
                    report.timed_out = true;
                    report.not_attempted = documents[idx..].iter().map(|d| d.document_id.clone()).collect();
                });
                break;
            }

            log.info(format!("[{}/{}] {}", idx + 1, total, doc.document_id));
            progress.with(|state| state.current = Some(doc.document_id.clone()));
            let outcome = processor.process(doc, session.as_ref(), log).await;
            progress.with(|state| state.current = None);
            match outcome {
                DocumentOutcome::Generated(entry) => progress.record(|report| report.succeeded.push(entry)),
                DocumentOutcome::Skipped(reason) => progress.record(|report| {
                    report.skipped.push(SkippedEntry {
                        document_id: doc.document_id.clone(),
                        reason,
                    })
                }),
                DocumentOutcome::Failed(error) => {
                    let fatal = error.is_fatal();
                    progress.record(|report| {
                        report.failed.push(FailedEntry {
                            document_id: doc.document_id.clone(),
                            error: error.chain(),
                            fatal,
                        })
                    });
                    if fatal {
                        let not_attempted: Vec<String> = documents[idx + 1..]
                            .iter()
                            .map(|d| d.document_id.clone())
                            .collect();
                        log.error(format!(
                            "✗ Run aborted after fatal failure on {}, {} documents not attempted",
                            doc.document_id,
                            not_attempted.len()
                        ));
                        progress.record(|report| {
                            report.aborted = true;
                            report.not_attempted = not_attempted;
                        });
                        break;
                    }
                }
            }
        }

        if let Some(session) = progress.with(|state| state.session.take()) {
            if let Err(e) = session.close().await {
                log.warn(format!("closing UI session failed: {}", e));
            }
        }

        Ok(self.finish(progress, log))
    }

    fn finish(&self, progress: &RunProgress, log: &RunLog) -> RunReport {
        progress.record(|report| report.finished_at = Some(chrono::Utc::now()));
        let report = progress
            .snapshot()
            .unwrap_or_else(|| RunReport::new(String::new(), 0));
        log.info(format!(
            "Run finished: {} succeeded, {} skipped, {} failed, {} not attempted",
            report.succeeded.len(),
            report.skipped.len(),
            report.failed.len(),
            report.not_attempted.len()
        ));
        report
    }
}
