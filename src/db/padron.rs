use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::time::Duration;

use crate::clients::rates::{RateLookup, RateLookupError, RateMap};

/// 直接读本地 padrón 表 (percepción 制度, 当日有效, 取最新发布)
#[derive(Clone)]
pub struct PadronRateLookup {
    pool: PgPool,
    timeout: Duration,
}

impl PadronRateLookup {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl RateLookup for PadronRateLookup {
    async fn get_rates(&self, tax_ids: &[String]) -> Result<RateMap, RateLookupError> {
        let mut rates: RateMap = tax_ids.iter().map(|id| (id.clone(), None)).collect();
        if tax_ids.is_empty() {
            return Ok(rates);
        }

        let query = sqlx::query_as::<_, (String, BigDecimal)>(
            r#"
            SELECT DISTINCT ON (cuit) cuit::text, alicuota
            FROM padron_rgs
            WHERE regimen = 'P'
              AND cuit = ANY($1)
              AND vigencia_desde <= CURRENT_DATE
              AND vigencia_hasta >= CURRENT_DATE
            ORDER BY cuit, fecha_emision DESC
            "#,
        )
        .bind(tax_ids);

        let rows = tokio::time::timeout(self.timeout, query.fetch_all(&self.pool))
            .await
            .map_err(|_| RateLookupError::Timeout(self.timeout))??;

        tracing::debug!("padron: {} of {} tax ids found", rows.len(), tax_ids.len());
        for (cuit, alicuota) in rows {
            rates.insert(cuit, Some(alicuota));
        }
        Ok(rates)
    }
}
