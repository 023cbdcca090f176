use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::models::line_item::parse_amount;

/// CUIT -> 税率 (None 表示 padrón 中查无此人)
pub type RateMap = HashMap<String, Option<BigDecimal>>;

#[derive(Debug, thiserror::Error)]
pub enum RateLookupError {
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("rate service {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode rate response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("padron query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("rate lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// 按税号批量查询 percepción 税率
#[async_trait]
pub trait RateLookup: Send + Sync {
    async fn get_rates(&self, tax_ids: &[String]) -> Result<RateMap, RateLookupError>;
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    #[serde(default)]
    resultados: Vec<RateResult>,
}

#[derive(Debug, Deserialize)]
struct RateResult {
    cuit: String,
    #[serde(default)]
    alicuota: serde_json::Value,
    #[serde(default)]
    encontrado: bool,
}

/// 外部税率服务: GET {url}?cuits=a,b
#[derive(Debug, Clone)]
pub struct HttpRateLookup {
    client: reqwest::Client,
    url: String,
}

impl HttpRateLookup {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RateLookup for HttpRateLookup {
    async fn get_rates(&self, tax_ids: &[String]) -> Result<RateMap, RateLookupError> {
        let mut rates: RateMap = tax_ids.iter().map(|id| (id.clone(), None)).collect();
        if tax_ids.is_empty() {
            return Ok(rates);
        }

        let resp = self
            .client
            .get(&self.url)
            .query(&[("cuits", tax_ids.join(","))])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| RateLookupError::Http {
                endpoint: self.url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RateLookupError::Status {
                endpoint: self.url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let body: RateResponse = resp.json().await.map_err(|source| RateLookupError::Decode {
            endpoint: self.url.clone(),
            source,
        })?;

        for r in body.resultados {
            if !r.encontrado {
                continue;
            }
            match parse_amount(&r.alicuota) {
                Some(rate) if !r.alicuota.is_null() => {
                    rates.insert(r.cuit, Some(rate));
                }
                _ => tracing::warn!("rate service returned no usable alicuota for {}", r.cuit),
            }
        }
        Ok(rates)
    }
}

/// 固定税率表, 用于测试和本地开发
#[derive(Debug, Clone, Default)]
pub struct StaticRateLookup {
    rates: HashMap<String, BigDecimal>,
}

impl StaticRateLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, tax_id: impl Into<String>, rate: BigDecimal) -> Self {
        self.rates.insert(tax_id.into(), rate);
        self
    }
}

#[async_trait]
impl RateLookup for StaticRateLookup {
    async fn get_rates(&self, tax_ids: &[String]) -> Result<RateMap, RateLookupError> {
        Ok(tax_ids
            .iter()
            .map(|id| (id.clone(), self.rates.get(id).cloned()))
            .collect())
    }
}
