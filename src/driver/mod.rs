//! 开票 UI 驱动接口
//!
//! 核心流程只依赖这里的类型和四种错误结果, 不涉及任何页面元素细节。

pub mod remote;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::models::Document;

pub use remote::RemoteUiDriver;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// 单据在 ERP 中找不到
    #[error("document not found in ERP: {0}")]
    NotFound(String),
    /// 驱动侧自行校验失败 (表单计算结果与请求不一致)
    #[error("validation mismatch: expected {expected}, ERP reported {reported}")]
    ValidationMismatch { expected: String, reported: String },
    /// 重试后仍拿不到 CAE
    #[error("authorization code (CAE) missing for invoice {invoice_number}")]
    AuthCodeMissing { invoice_number: String },
    #[error("UI session error: {0}")]
    Session(String),
}

/// 提交给驱动的开票请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub document_id: String,
    pub internal_number: Option<String>,
    pub client: Option<String>,
    pub tax_id_type: Option<String>,
    pub tax_id_number: Option<String>,
    pub region: Option<String>,
    pub payment_terms: Option<String>,
    pub untaxed_amount: BigDecimal,
    pub taxed_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub rate: BigDecimal,
    pub expected_withholding: BigDecimal,
}

impl InvoiceRequest {
    pub fn for_document(doc: &Document, rate: BigDecimal, expected_withholding: BigDecimal) -> Self {
        Self {
            document_id: doc.document_id.clone(),
            internal_number: doc.internal_number.clone(),
            client: doc.client.clone(),
            tax_id_type: doc.tax_id_type.clone(),
            tax_id_number: doc.tax_id_number.clone(),
            region: doc.region.clone(),
            payment_terms: doc.payment_terms.clone(),
            untaxed_amount: doc.untaxed_amount.clone(),
            taxed_amount: doc.taxed_amount.clone(),
            total_amount: doc.total_amount.clone(),
            rate,
            expected_withholding,
        }
    }
}

/// 表单填写完成、尚未保存的草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedInvoice {
    /// ERP 表单自行计算出的 percepción (None 表示表单未显示)
    pub reported_withholding: Option<BigDecimal>,
}

/// 每次运行独占一个会话
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn open_session(&self, company: &str) -> Result<Box<dyn DriverSession>, DriverError>;
}

#[async_trait]
pub trait DriverSession: Send + Sync {
    /// 打开单据并填写发票表单, 返回表单计算出的 percepción
    async fn prepare_invoice(&self, request: &InvoiceRequest) -> Result<PreparedInvoice, DriverError>;

    /// 保存草稿, 返回分配的发票号
    async fn save_invoice(&self) -> Result<String, DriverError>;

    /// 查询 CAE; 尚未发放时返回 None
    async fn fetch_auth_code(&self, invoice_number: &str) -> Result<Option<String>, DriverError>;

    /// 放弃当前草稿
    async fn discard(&self) -> Result<(), DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}
