use async_trait::async_trait;
use std::sync::RwLock;

use super::ledger::{check_complete, InvoiceLedger, LedgerError};
use crate::models::{InvoiceRecord, InvoiceStatus, NewInvoice, RecordOutcome};

/// 内存台账, 用于测试和本地开发
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    rows: RwLock<Vec<InvoiceRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<InvoiceRecord> {
        self.rows.read().map(|rows| rows.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InvoiceLedger for InMemoryLedger {
    async fn record_generated(&self, invoice: &NewInvoice) -> Result<RecordOutcome, LedgerError> {
        check_complete(invoice)?;
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        if rows.iter().any(|r| r.comprobante == invoice.document_id) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        let id = rows.len() as i32 + 1;
        rows.push(InvoiceRecord {
            id,
            fecha_hora: invoice.generated_at.naive_utc(),
            comprobante: invoice.document_id.clone(),
            cuit: invoice.tax_id.clone(),
            empresa: Some(invoice.company.clone()),
            provincia_destino: invoice.region.clone(),
            alicuota: Some(invoice.rate.clone()),
            numero_factura: Some(invoice.invoice_number.clone()),
            nro_cae: Some(invoice.auth_code.clone()),
            estado: InvoiceStatus::Generated.as_db_str().to_string(),
            created_at: Some(chrono::Utc::now().naive_utc()),
        });
        Ok(RecordOutcome::Inserted)
    }

    async fn mark_sent(&self, key: &str) -> Result<bool, LedgerError> {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let target = rows.iter_mut().find(|r| {
            r.status() == Some(InvoiceStatus::Generated)
                && (r.numero_factura.as_deref() == Some(key) || r.comprobante == key)
        });
        match target {
            Some(row) => {
                row.estado = InvoiceStatus::Sent.as_db_str().to_string();
                Ok(true)
            }
            None => {
                tracing::warn!("mark_sent: no Generated invoice matches {}", key);
                Ok(false)
            }
        }
    }

    async fn list_pending_to_send(&self, company: &str) -> Result<Vec<InvoiceRecord>, LedgerError> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .iter()
            .filter(|r| r.empresa.as_deref() == Some(company) && r.is_pending_to_send())
            .cloned()
            .collect())
    }

    async fn find_by_document(&self, document_id: &str) -> Result<Option<InvoiceRecord>, LedgerError> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows.iter().find(|r| r.comprobante == document_id).cloned())
    }
}
