use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// 发票状态 (库内存西语原值)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Generated,
    Sent,
}

impl InvoiceStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Generated => "Generado",
            InvoiceStatus::Sent => "Enviado",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "Generado" => Some(InvoiceStatus::Generated),
            "Enviado" => Some(InvoiceStatus::Sent),
            _ => None,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// 已生成发票 (facturas_generadas)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: i32,
    pub fecha_hora: NaiveDateTime,
    pub comprobante: String,
    pub cuit: Option<String>,
    pub empresa: Option<String>,
    pub provincia_destino: Option<String>,
    pub alicuota: Option<BigDecimal>,
    pub numero_factura: Option<String>,
    pub nro_cae: Option<String>,
    pub estado: String,
    pub created_at: Option<NaiveDateTime>,
}

impl InvoiceRecord {
    pub fn status(&self) -> Option<InvoiceStatus> {
        InvoiceStatus::from_db_str(&self.estado)
    }

    /// 已生成且已拿到 CAE 才能发送
    pub fn is_pending_to_send(&self) -> bool {
        self.status() == Some(InvoiceStatus::Generated)
            && self.nro_cae.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// recordGenerated 的写入参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInvoice {
    pub generated_at: DateTime<Utc>,
    pub document_id: String,
    pub tax_id: Option<String>,
    pub company: String,
    pub region: Option<String>,
    pub rate: BigDecimal,
    pub invoice_number: String,
    pub auth_code: String,
}

/// 写入结果: 新插入或已存在 (幂等)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    AlreadyRecorded,
}
