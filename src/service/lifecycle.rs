//! 单张单据的处理状态机
//!
//! Pending -> Skipped | Processing -> Generated -> (Sent)
//! Processing -> Failed | FailedFatal

use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::run_log::RunLog;
use super::withholding::{Assessment, WithholdingCalculator, WithholdingError};
use crate::clients::retry::RetryPolicy;
use crate::config::CompanyRules;
use crate::db::{InvoiceLedger, LedgerError};
use crate::driver::{DriverError, DriverSession, InvoiceRequest};
use crate::models::{DateField, Document, NewInvoice, RecordOutcome, SkipReason, SucceededEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Skipped,
    Processing,
    Generated,
    Failed,
    FailedFatal,
    Sent,
}

/// 允许的状态迁移
const TRANSITIONS: &[(DocumentState, DocumentState)] = &[
    (DocumentState::Pending, DocumentState::Skipped),
    (DocumentState::Pending, DocumentState::Processing),
    (DocumentState::Processing, DocumentState::Generated),
    (DocumentState::Processing, DocumentState::Failed),
    (DocumentState::Processing, DocumentState::FailedFatal),
    (DocumentState::Generated, DocumentState::Sent),
];

impl DocumentState {
    pub fn can_transition_to(self, next: DocumentState) -> bool {
        TRANSITIONS.contains(&(self, next))
    }

    pub fn transition(self, next: DocumentState) -> Result<DocumentState, ProcessError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProcessError::InvalidTransition { from: self, to: next })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("withholding check failed for {document_id}")]
    Withholding {
        document_id: String,
        #[source]
        source: WithholdingError,
    },
    #[error("UI driver step '{step}' failed for {document_id}")]
    Driver {
        document_id: String,
        step: &'static str,
        #[source]
        source: DriverError,
    },
    #[error("ERP returned an empty invoice number for {0}")]
    MissingInvoiceNumber(String),
    #[error("ledger lookup failed for {document_id}")]
    LedgerLookup {
        document_id: String,
        #[source]
        source: LedgerError,
    },
    #[error("invoice {invoice_number} for {document_id} was saved in the ERP but could not be recorded")]
    LedgerWrite {
        document_id: String,
        invoice_number: String,
        #[source]
        source: LedgerError,
    },
    #[error("invalid document state transition {from:?} -> {to:?}")]
    InvalidTransition { from: DocumentState, to: DocumentState },
}

impl ProcessError {
    /// 致命错误会中止整批
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProcessError::Driver {
                source: DriverError::AuthCodeMissing { .. },
                ..
            } | ProcessError::LedgerWrite { .. }
        )
    }

    /// 第一行是摘要, 后续每行一个 cause
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

/// 单据处理结果
#[derive(Debug)]
pub enum DocumentOutcome {
    Generated(SucceededEntry),
    Skipped(SkipReason),
    Failed(ProcessError),
}

impl DocumentOutcome {
    pub fn state(&self) -> DocumentState {
        match self {
            DocumentOutcome::Generated(_) => DocumentState::Generated,
            DocumentOutcome::Skipped(_) => DocumentState::Skipped,
            DocumentOutcome::Failed(e) if e.is_fatal() => DocumentState::FailedFatal,
            DocumentOutcome::Failed(_) => DocumentState::Failed,
        }
    }
}

/// 业务跳过规则 (不访问任何外部系统)
pub fn skip_reason(doc: &Document, rules: &CompanyRules, today: NaiveDate) -> Option<SkipReason> {
    if doc.is_zero_amount() {
        return Some(SkipReason::ZeroAmount);
    }
    if rules.require_delivery_date {
        match doc.delivery_date {
            DateField::Missing => return Some(SkipReason::MissingDeliveryDate),
            DateField::Invalid => return Some(SkipReason::InvalidDeliveryDate),
            DateField::Valid(_) => {}
        }
    }
    if let (Some(max_age_days), Some(date)) = (rules.max_document_age_days, doc.delivery_date.date()) {
        let age_days = (today - date).num_days();
        if age_days > max_age_days {
            return Some(SkipReason::StaleDocument { age_days, max_age_days });
        }
    }
    None
}

/// 终态也按迁移表校验; 非法迁移记为失败
fn settle(state: DocumentState, outcome: DocumentOutcome) -> DocumentOutcome {
    match state.transition(outcome.state()) {
        Ok(_) => outcome,
        Err(e) => DocumentOutcome::Failed(e),
    }
}

/// 一次运行内共享的单据处理器 (会话由调用方持有)
pub struct DocumentProcessor {
    pub company: String,
    pub rules: CompanyRules,
    pub ledger: Arc<dyn InvoiceLedger>,
    pub calculator: Arc<WithholdingCalculator>,
    pub auth_code_retry: RetryPolicy,
    pub step_timeout: Duration,
    /// 运行截止时间; 每个驱动步骤都不会越过它
    pub deadline: Option<Instant>,
}

impl DocumentProcessor {
    /// 驱动步骤加超时; 超时视为可恢复的会话错误
    async fn step<T, F>(&self, document_id: &str, step: &'static str, fut: F) -> Result<T, ProcessError>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        let (limit, bounded_by_deadline) = match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (remaining.min(self.step_timeout), remaining < self.step_timeout)
            }
            None => (self.step_timeout, false),
        };
        let result = match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) if bounded_by_deadline => Err(DriverError::Session(
                "run time limit reached during step".to_string(),
            )),
            Err(_) => Err(DriverError::Session(format!(
                "step timed out after {:?}",
                self.step_timeout
            ))),
        };
        result.map_err(|source| ProcessError::Driver {
            document_id: document_id.to_string(),
            step,
            source,
        })
    }

    /// 业务跳过规则 + 台账查重
    async fn screen(&self, doc: &Document) -> Result<Option<SkipReason>, ProcessError> {
        if let Some(reason) = skip_reason(doc, &self.rules, Utc::now().date_naive()) {
            return Ok(Some(reason));
        }
        match self.ledger.find_by_document(&doc.document_id).await {
            Ok(Some(existing)) => Ok(Some(SkipReason::AlreadyInvoiced {
                invoice_number: existing.numero_factura,
            })),
            Ok(None) => Ok(None),
            Err(source) => Err(ProcessError::LedgerLookup {
                document_id: doc.document_id.clone(),
                source,
            }),
        }
    }

    pub async fn process(&self, doc: &Document, session: &dyn DriverSession, log: &RunLog) -> DocumentOutcome {
        let mut state = DocumentState::Pending;

        let outcome = match self.screen(doc).await {
            Ok(Some(reason)) => DocumentOutcome::Skipped(reason),
            screened => {
                // 查重失败也算进入了处理流程
                let result = match state.transition(DocumentState::Processing) {
                    Ok(next) => {
                        state = next;
                        match screened {
                            Ok(_) => self.generate(doc, session, log).await,
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                };
                match result {
                    Ok(entry) => DocumentOutcome::Generated(entry),
                    Err(e) => DocumentOutcome::Failed(e),
                }
            }
        };

        match settle(state, outcome) {
            DocumentOutcome::Skipped(reason) => {
                log.info(format!("⊘ {} skipped: {}", doc.document_id, reason));
                DocumentOutcome::Skipped(reason)
            }
            DocumentOutcome::Generated(entry) => {
                log.info(format!(
                    "✓ {} -> invoice {} (CAE {})",
                    entry.document_id, entry.invoice_number, entry.auth_code
                ));
                DocumentOutcome::Generated(entry)
            }
            DocumentOutcome::Failed(e) => self.fail(log, e),
        }
    }

    fn fail(&self, log: &RunLog, error: ProcessError) -> DocumentOutcome {
        if error.is_fatal() {
            log.error(format!("✗ FATAL: {}", error.chain()));
        } else {
            log.error(format!("✗ {}", error.chain()));
        }
        DocumentOutcome::Failed(error)
    }

    async fn generate(
        &self,
        doc: &Document,
        session: &dyn DriverSession,
        log: &RunLog,
    ) -> Result<SucceededEntry, ProcessError> {
        let id = doc.document_id.as_str();
        log.info(format!(
            "Processing {} ({} line items, untaxed {})",
            id, doc.line_count, doc.untaxed_amount
        ));

        // 1. percepción
        let assessment: Assessment = self
            .calculator
            .assess(doc)
            .await
            .map_err(|source| ProcessError::Withholding {
                document_id: id.to_string(),
                source,
            })?;

        // 2. 填写表单, 读回 ERP 计算值
        let request = InvoiceRequest::for_document(doc, assessment.rate.clone(), assessment.amount.clone());
        let prepared = self.step(id, "prepare invoice", session.prepare_invoice(&request)).await?;

        // 3. 交叉校验; 不一致时放弃草稿
        if let Err(source) = self.calculator.cross_validate(
            id,
            &assessment,
            prepared.reported_withholding.as_ref(),
        ) {
            if let Err(e) = self.step(id, "discard draft", session.discard()).await {
                log.warn(format!("discarding draft for {} failed: {}", id, e.chain()));
            }
            return Err(ProcessError::Withholding {
                document_id: id.to_string(),
                source,
            });
        }

        // 4. 保存
        let invoice_number = self.step(id, "save invoice", session.save_invoice()).await?;
        let invoice_number = invoice_number.trim().to_string();
        if invoice_number.is_empty() {
            return Err(ProcessError::MissingInvoiceNumber(id.to_string()));
        }
        log.info(format!("{} saved as invoice {}", id, invoice_number));

        // 5. CAE, 有界重试
        let auth_code = self
            .auth_code_retry
            .poll_until_some(|attempt| {
                let number = invoice_number.as_str();
                async move {
                    // 发票已保存: 查询出错同样占用重试次数, 用完即致命
                    let code = match self.step(id, "fetch CAE", session.fetch_auth_code(number)).await {
                        Ok(code) => code,
                        Err(e) => {
                            log.warn(format!("CAE check for {} failed: {}", number, e.chain()));
                            None
                        }
                    };
                    if code.is_none() {
                        log.warn(format!(
                            "CAE for {} not available yet (attempt {}/{})",
                            number, attempt, self.auth_code_retry.max_attempts
                        ));
                    }
                    Ok::<_, ProcessError>(code)
                }
            })
            .await?
            .ok_or_else(|| ProcessError::Driver {
                document_id: id.to_string(),
                step: "fetch CAE",
                source: DriverError::AuthCodeMissing {
                    invoice_number: invoice_number.clone(),
                },
            })?;

        // 6. 入账; 只有发票号和 CAE 都有了才写
        let invoice = NewInvoice {
            generated_at: Utc::now(),
            document_id: id.to_string(),
            tax_id: assessment.tax_id.clone().or_else(|| doc.normalized_tax_id()),
            company: self.company.clone(),
            region: doc.region.clone(),
            rate: assessment.rate.clone(),
            invoice_number: invoice_number.clone(),
            auth_code: auth_code.clone(),
        };
        match self.ledger.record_generated(&invoice).await {
            Ok(RecordOutcome::Inserted) => {}
            Ok(RecordOutcome::AlreadyRecorded) => {
                log.warn(format!("{} was already in the ledger, existing row kept", id))
            }
            Err(source) => {
                return Err(ProcessError::LedgerWrite {
                    document_id: id.to_string(),
                    invoice_number,
                    source,
                })
            }
        }

        Ok(SucceededEntry {
            document_id: id.to_string(),
            invoice_number,
            auth_code,
            rate: assessment.rate,
            withholding: assessment.amount,
        })
    }
}
