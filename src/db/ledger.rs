use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use crate::models::{InvoiceRecord, InvoiceStatus, NewInvoice, RecordOutcome};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("ledger statement timed out after {0:?}")]
    Timeout(Duration),
    /// 发票号或 CAE 为空时不允许入账
    #[error("invoice for {document_id} is incomplete: {missing} is empty")]
    Incomplete {
        document_id: String,
        missing: &'static str,
    },
}

/// 发票台账: 幂等记录已生成的发票, 追踪 Generado -> Enviado
#[async_trait]
pub trait InvoiceLedger: Send + Sync {
    /// 幂等插入; 同一 remito 已有记录时返回 AlreadyRecorded, 不覆盖
    async fn record_generated(&self, invoice: &NewInvoice) -> Result<RecordOutcome, LedgerError>;

    /// key 可以是发票号或 remito 号; 找不到时只记日志, 返回 false
    async fn mark_sent(&self, key: &str) -> Result<bool, LedgerError>;

    /// 某公司已生成、有 CAE、尚未发送的发票
    async fn list_pending_to_send(&self, company: &str) -> Result<Vec<InvoiceRecord>, LedgerError>;

    async fn find_by_document(&self, document_id: &str) -> Result<Option<InvoiceRecord>, LedgerError>;
}

pub(crate) fn check_complete(invoice: &NewInvoice) -> Result<(), LedgerError> {
    if invoice.invoice_number.trim().is_empty() {
        return Err(LedgerError::Incomplete {
            document_id: invoice.document_id.clone(),
            missing: "invoice number",
        });
    }
    if invoice.auth_code.trim().is_empty() {
        return Err(LedgerError::Incomplete {
            document_id: invoice.document_id.clone(),
            missing: "authorization code",
        });
    }
    Ok(())
}

/// 单条语句超时: 30秒
const STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres 实现 (facturas_generadas)
#[derive(Clone)]
pub struct PgInvoiceLedger {
    pool: PgPool,
}

impl PgInvoiceLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceLedger for PgInvoiceLedger {
    async fn record_generated(&self, invoice: &NewInvoice) -> Result<RecordOutcome, LedgerError> {
        check_complete(invoice)?;

        let start_time = std::time::Instant::now();
        let query = sqlx::query(
            r#"
            INSERT INTO facturas_generadas
                (fecha_hora, comprobante, cuit, empresa, provincia_destino,
                 alicuota, numero_factura, nro_cae, estado)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (comprobante) DO NOTHING
            "#,
        )
        .bind(invoice.generated_at.naive_utc())
        .bind(&invoice.document_id)
        .bind(&invoice.tax_id)
        .bind(&invoice.company)
        .bind(&invoice.region)
        .bind(&invoice.rate)
        .bind(&invoice.invoice_number)
        .bind(&invoice.auth_code)
        .bind(InvoiceStatus::Generated.as_db_str());

        let result = match tokio::time::timeout(STATEMENT_TIMEOUT, query.execute(&self.pool)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!("✗ INSERT failed for {}: {:?}", invoice.document_id, e);
                return Err(e.into());
            }
            Err(_) => {
                tracing::error!("✗ INSERT timed out (>{:?}) for {}", STATEMENT_TIMEOUT, invoice.document_id);
                return Err(LedgerError::Timeout(STATEMENT_TIMEOUT));
            }
        };

        if result.rows_affected() == 0 {
            tracing::warn!(
                "Invoice for {} already recorded, keeping existing row",
                invoice.document_id
            );
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        tracing::info!(
            "✓ Invoice {} recorded for {} (CAE {}), took {:?}",
            invoice.invoice_number,
            invoice.document_id,
            invoice.auth_code,
            start_time.elapsed()
        );
        Ok(RecordOutcome::Inserted)
    }

    async fn mark_sent(&self, key: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE facturas_generadas
            SET estado = $1
            WHERE (numero_factura = $2 OR comprobante = $2)
              AND estado = $3
            "#,
        )
        .bind(InvoiceStatus::Sent.as_db_str())
        .bind(key)
        .bind(InvoiceStatus::Generated.as_db_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!("mark_sent: no Generated invoice matches {}", key);
            return Ok(false);
        }
        tracing::info!("Invoice {} marked as sent", key);
        Ok(true)
    }

    async fn list_pending_to_send(&self, company: &str) -> Result<Vec<InvoiceRecord>, LedgerError> {
        let rows = sqlx::query_as::<_, InvoiceRecord>(
            r#"
            SELECT id, fecha_hora, comprobante, cuit, empresa, provincia_destino,
                   alicuota, numero_factura, nro_cae, estado, created_at
            FROM facturas_generadas
            WHERE empresa = $1
              AND estado = $2
              AND nro_cae IS NOT NULL
              AND nro_cae <> ''
            ORDER BY fecha_hora, id
            "#,
        )
        .bind(company)
        .bind(InvoiceStatus::Generated.as_db_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_by_document(&self, document_id: &str) -> Result<Option<InvoiceRecord>, LedgerError> {
        let row = sqlx::query_as::<_, InvoiceRecord>(
            r#"
            SELECT id, fecha_hora, comprobante, cuit, empresa, provincia_destino,
                   alicuota, numero_factura, nro_cae, estado, created_at
            FROM facturas_generadas
            WHERE comprobante = $1
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
