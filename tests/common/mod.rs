//! 集成测试共用的假协作方: 固定数据源、脚本化 UI 驱动、内存台账
#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use remito_invoicer::clients::{RateLookup, SalesSource, SalesSourceError, StaticRateLookup};
use remito_invoicer::db::{InMemoryLedger, InvoiceLedger, LedgerError};
use remito_invoicer::driver::{DriverError, DriverSession, InvoiceRequest, PreparedInvoice, UiDriver};
use remito_invoicer::models::{InvoiceRecord, LineItem, NewInvoice, RecordOutcome};
use remito_invoicer::service::{BatchRunner, WithholdingCalculator};
use remito_invoicer::AppConfig;

pub const COMPANY: &str = "Das Dach";

pub fn dec(s: &str) -> BigDecimal {
    s.parse().unwrap()
}

/// 一行 CUIT 客户的明细
pub fn line(document_id: &str, untaxed: Value) -> LineItem {
    LineItem::from(json!({
        "COMPROBANTE": document_id,
        "EMPRESA": COMPANY,
        "CLIENTE": "Ferretería Norte SRL",
        "IDENTIFICACIONTRIBUTARIA": "CUIT",
        "NRODEIDENTIFICACION": "30-71234567-8",
        "PROVINCIADESTINO": "Salta",
        "IMPORTE": untaxed,
        "TOTAL": untaxed,
        "FECHAENTREGA": "2025-05-02T00:00:00",
    }))
}

/// 固定返回一批明细的数据源
#[derive(Clone, Default)]
pub struct FixedSales {
    pub items: Vec<LineItem>,
    pub delay: Duration,
    pub fail: bool,
}

impl FixedSales {
    pub fn new(items: Vec<LineItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SalesSource for FixedSales {
    async fn pending_line_items(&self, _company: &str) -> Result<Vec<LineItem>, SalesSourceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(SalesSourceError::MissingCredentials);
        }
        Ok(self.items.clone())
    }
}

/// 脚本化行为 (按单据号)
#[derive(Debug, Clone)]
pub enum Behavior {
    /// 表单读回的 percepción 与请求一致
    Succeed,
    /// 表单读回指定值
    Reports(BigDecimal),
    NotFound,
    /// CAE 一直拿不到
    NoAuthCode,
    SessionError,
    /// 驱动 panic (模拟自动化层崩溃)
    Panic,
    /// 保存后 ERP 没有返回发票号
    EmptyNumber,
    /// 查询 CAE 时会话出错
    CaeError,
    /// 填表卡住指定时长
    Hang(Duration),
}

#[derive(Default)]
pub struct DriverLog {
    pub prepared: Vec<String>,
    pub saved: Vec<String>,
    pub discarded: Vec<String>,
    pub auth_code_polls: usize,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedDriver {
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    pub log: Arc<Mutex<DriverLog>>,
    counter: Arc<AtomicUsize>,
    pub fail_open: bool,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, document_id: &str, behavior: Behavior) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(document_id.to_string(), behavior);
        self
    }

    pub fn prepared(&self) -> Vec<String> {
        self.log.lock().unwrap().prepared.clone()
    }

    pub fn discarded(&self) -> Vec<String> {
        self.log.lock().unwrap().discarded.clone()
    }
}

struct ScriptedSession {
    driver: ScriptedDriver,
    current: Mutex<Option<(String, Behavior)>>,
}

impl ScriptedSession {
    fn current(&self) -> Result<(String, Behavior), DriverError> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DriverError::Session("no invoice in progress".into()))
    }
}

#[async_trait]
impl UiDriver for ScriptedDriver {
    async fn open_session(&self, _company: &str) -> Result<Box<dyn DriverSession>, DriverError> {
        if self.fail_open {
            return Err(DriverError::Session("login rejected".into()));
        }
        self.log.lock().unwrap().sessions_opened += 1;
        Ok(Box::new(ScriptedSession {
            driver: self.clone(),
            current: Mutex::new(None),
        }))
    }
}

#[async_trait]
impl DriverSession for ScriptedSession {
    async fn prepare_invoice(&self, request: &InvoiceRequest) -> Result<PreparedInvoice, DriverError> {
        let behavior = self
            .driver
            .behaviors
            .lock()
            .unwrap()
            .get(&request.document_id)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        self.driver
            .log
            .lock()
            .unwrap()
            .prepared
            .push(request.document_id.clone());

        if let Behavior::Hang(d) = &behavior {
            tokio::time::sleep(*d).await;
        }
        let reported = match &behavior {
            Behavior::NotFound => return Err(DriverError::NotFound(request.document_id.clone())),
            Behavior::SessionError => return Err(DriverError::Session("frame detached".into())),
            Behavior::Panic => panic!("automation worker crashed on {}", request.document_id),
            Behavior::Reports(v) => Some(v.clone()),
            Behavior::Succeed
            | Behavior::NoAuthCode
            | Behavior::EmptyNumber
            | Behavior::CaeError
            | Behavior::Hang(_) => Some(request.expected_withholding.clone()),
        };
        *self.current.lock().unwrap() = Some((request.document_id.clone(), behavior));
        Ok(PreparedInvoice {
            reported_withholding: reported,
        })
    }

    async fn save_invoice(&self) -> Result<String, DriverError> {
        let (document_id, behavior) = self.current()?;
        self.driver.log.lock().unwrap().saved.push(document_id);
        if matches!(behavior, Behavior::EmptyNumber) {
            return Ok("  ".to_string());
        }
        let n = self.driver.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("A-0005-{n:08}"))
    }

    async fn fetch_auth_code(&self, invoice_number: &str) -> Result<Option<String>, DriverError> {
        let (_, behavior) = self.current()?;
        self.driver.log.lock().unwrap().auth_code_polls += 1;
        match behavior {
            Behavior::NoAuthCode => Ok(None),
            Behavior::CaeError => Err(DriverError::Session("CAE frame detached".into())),
            _ => Ok(Some(format!("7512{}", invoice_number.replace('-', "")))),
        }
    }

    async fn discard(&self) -> Result<(), DriverError> {
        let (document_id, _) = self.current()?;
        self.driver.log.lock().unwrap().discarded.push(document_id);
        *self.current.lock().unwrap() = None;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.driver.log.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

/// 对指定单据失败或卡住的台账, 其余委托给内存台账
#[derive(Default)]
pub struct FlakyLedger {
    pub inner: Arc<InMemoryLedger>,
    pub fail_record: Option<String>,
    pub fail_lookup: Option<String>,
    pub hang_lookup: Option<(String, Duration)>,
}

#[async_trait]
impl InvoiceLedger for FlakyLedger {
    async fn record_generated(&self, invoice: &NewInvoice) -> Result<RecordOutcome, LedgerError> {
        if self.fail_record.as_deref() == Some(invoice.document_id.as_str()) {
            return Err(LedgerError::Timeout(Duration::from_secs(10)));
        }
        self.inner.record_generated(invoice).await
    }

    async fn mark_sent(&self, key: &str) -> Result<bool, LedgerError> {
        self.inner.mark_sent(key).await
    }

    async fn list_pending_to_send(&self, company: &str) -> Result<Vec<InvoiceRecord>, LedgerError> {
        self.inner.list_pending_to_send(company).await
    }

    async fn find_by_document(&self, document_id: &str) -> Result<Option<InvoiceRecord>, LedgerError> {
        if self.fail_lookup.as_deref() == Some(document_id) {
            return Err(LedgerError::Timeout(Duration::from_secs(10)));
        }
        if let Some((id, delay)) = &self.hang_lookup {
            if id == document_id {
                tokio::time::sleep(*delay).await;
            }
        }
        self.inner.find_by_document(document_id).await
    }
}

/// 零退避、短超时的测试配置
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.runner.auth_code_max_attempts = 3;
    config.runner.auth_code_initial_backoff_ms = 0;
    config.runner.auth_code_max_backoff_ms = 0;
    config.driver.step_timeout_secs = 5;
    config
}

pub fn rates() -> StaticRateLookup {
    StaticRateLookup::new().with_rate("30712345678", dec("5"))
}

pub struct Harness {
    pub runner: Arc<BatchRunner>,
    pub ledger: Arc<InMemoryLedger>,
    pub driver: ScriptedDriver,
}

pub fn harness_with(
    sales: FixedSales,
    driver: ScriptedDriver,
    rates: impl RateLookup + 'static,
    config: AppConfig,
) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    build(sales, driver, rates, config, ledger.clone(), ledger)
}

/// 使用会出错的台账; `Harness::ledger` 指向其内部的内存台账
pub fn harness_with_ledger(
    sales: FixedSales,
    driver: ScriptedDriver,
    config: AppConfig,
    ledger: FlakyLedger,
) -> Harness {
    let inner = ledger.inner.clone();
    build(sales, driver, rates(), config, Arc::new(ledger), inner)
}

fn build(
    sales: FixedSales,
    driver: ScriptedDriver,
    rates: impl RateLookup + 'static,
    config: AppConfig,
    ledger_dyn: Arc<dyn InvoiceLedger>,
    ledger: Arc<InMemoryLedger>,
) -> Harness {
    let calculator = Arc::new(WithholdingCalculator::new(
        Arc::new(rates),
        config.withholding.clone(),
    ));
    let runner = Arc::new(BatchRunner::new(
        Arc::new(sales),
        Arc::new(driver.clone()),
        ledger_dyn,
        calculator,
        Arc::new(config),
    ));
    Harness {
        runner,
        ledger,
        driver,
    }
}

pub fn harness(items: Vec<LineItem>, driver: ScriptedDriver) -> Harness {
    harness_with(FixedSales::new(items), driver, rates(), test_config())
}
