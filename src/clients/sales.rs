use async_trait::async_trait;
use std::time::Duration;

use crate::config::SalesConfig;
use crate::models::LineItem;

#[derive(Debug, thiserror::Error)]
pub enum SalesSourceError {
    #[error("sales API credentials are not configured")]
    MissingCredentials,
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("sales API {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        source: reqwest::Error,
    },
}

/// 销售系统: 某公司待开票的 remito 明细行
#[async_trait]
pub trait SalesSource: Send + Sync {
    async fn pending_line_items(&self, company: &str) -> Result<Vec<LineItem>, SalesSourceError>;
}

/// 销售系统 REST 报表接口 (client-credentials token + analisisDespachoVenta)
#[derive(Debug, Clone)]
pub struct HttpSalesSource {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpSalesSource {
    pub fn new(config: &SalesConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SalesSourceError> {
        let resp = request.send().await.map_err(|source| SalesSourceError::Http {
            endpoint: endpoint.to_string(),
            source,
        })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SalesSourceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn token(&self) -> Result<String, SalesSourceError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(SalesSourceError::MissingCredentials);
        }
        let endpoint = format!("{}/oauth/token", self.base_url);
        let request = self.client.get(&endpoint).query(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ]);
        let resp = self.send(&endpoint, request).await?;
        let token = resp.text().await.map_err(|source| SalesSourceError::Decode {
            endpoint: endpoint.clone(),
            source,
        })?;
        Ok(token.trim().trim_matches('"').to_string())
    }
}

#[async_trait]
impl SalesSource for HttpSalesSource {
    async fn pending_line_items(&self, company: &str) -> Result<Vec<LineItem>, SalesSourceError> {
        let token = self.token().await?;
        tracing::info!("Fetching pending delivery notes for company: {}", company);

        let endpoint = format!("{}/reports/analisisDespachoVenta", self.base_url);
        let request = self.client.get(&endpoint).query(&[
            ("PARAMWEBREPORT_verPendientes", "2"),
            ("ACCESS_TOKEN", token.as_str()),
        ]);
        let resp = self.send(&endpoint, request).await?;
        let items: Vec<LineItem> = resp.json().await.map_err(|source| SalesSourceError::Decode {
            endpoint: endpoint.clone(),
            source,
        })?;

        let total = items.len();
        let for_company: Vec<LineItem> = items
            .into_iter()
            .filter(|item| item.company().as_deref() == Some(company))
            .collect();
        tracing::info!(
            "{} of {} pending line items belong to {}",
            for_company.len(),
            total,
            company
        );
        Ok(for_company)
    }
}
