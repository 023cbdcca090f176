use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{DriverError, DriverSession, InvoiceRequest, PreparedInvoice, UiDriver};
use crate::config::DriverConfig;
use crate::models::line_item::parse_amount;

/// 外部自动化 worker 返回的错误体
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    expected: Option<String>,
    #[serde(default)]
    reported: Option<String>,
    #[serde(default)]
    invoice_number: Option<String>,
}

impl ErrorBody {
    fn into_error(self, status: u16) -> DriverError {
        match self.kind.as_str() {
            "not_found" => DriverError::NotFound(self.message),
            "validation_mismatch" => DriverError::ValidationMismatch {
                expected: self.expected.unwrap_or_default(),
                reported: self.reported.unwrap_or_default(),
            },
            "auth_code_missing" => DriverError::AuthCodeMissing {
                invoice_number: self.invoice_number.unwrap_or_default(),
            },
            _ if self.message.is_empty() => DriverError::Session(format!("worker returned {status}")),
            _ => DriverError::Session(self.message),
        }
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, DriverError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: ErrorBody = resp.json().await.unwrap_or_default();
    Err(body.into_error(status.as_u16()))
}

fn transport(e: reqwest::Error) -> DriverError {
    DriverError::Session(format!("automation worker unreachable: {e}"))
}

/// 通过 HTTP 驱动外部浏览器自动化 worker
#[derive(Debug, Clone)]
pub struct RemoteUiDriver {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteUiDriver {
    pub fn new(config: &DriverConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.step_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    session_id: String,
}

#[async_trait]
impl UiDriver for RemoteUiDriver {
    async fn open_session(&self, company: &str) -> Result<Box<dyn DriverSession>, DriverError> {
        let resp = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&json!({ "company": company }))
            .send()
            .await
            .map_err(transport)?;
        let created: SessionCreated = check(resp).await?.json().await.map_err(transport)?;
        tracing::info!("UI session {} opened for {}", created.session_id, company);
        Ok(Box::new(RemoteSession {
            client: self.client.clone(),
            url: format!("{}/sessions/{}", self.base_url, created.session_id),
        }))
    }
}

struct RemoteSession {
    client: reqwest::Client,
    /// {base}/sessions/{id}
    url: String,
}

#[derive(Debug, Deserialize)]
struct PreparedBody {
    #[serde(default)]
    withholding: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SavedBody {
    invoice_number: String,
}

#[derive(Debug, Deserialize)]
struct AuthCodeBody {
    #[serde(default)]
    auth_code: Option<String>,
}

#[async_trait]
impl DriverSession for RemoteSession {
    async fn prepare_invoice(&self, request: &InvoiceRequest) -> Result<PreparedInvoice, DriverError> {
        let resp = self
            .client
            .post(format!("{}/invoices", self.url))
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let body: PreparedBody = check(resp).await?.json().await.map_err(transport)?;
        let reported_withholding = if body.withholding.is_null() {
            None
        } else {
            parse_amount(&body.withholding)
        };
        Ok(PreparedInvoice { reported_withholding })
    }

    async fn save_invoice(&self) -> Result<String, DriverError> {
        let resp = self
            .client
            .post(format!("{}/invoices/save", self.url))
            .send()
            .await
            .map_err(transport)?;
        let body: SavedBody = check(resp).await?.json().await.map_err(transport)?;
        Ok(body.invoice_number)
    }

    async fn fetch_auth_code(&self, invoice_number: &str) -> Result<Option<String>, DriverError> {
        let resp = self
            .client
            .get(format!("{}/invoices/{}/cae", self.url, invoice_number))
            .send()
            .await
            .map_err(transport)?;
        let body: AuthCodeBody = check(resp).await?.json().await.map_err(transport)?;
        Ok(body.auth_code.filter(|c| !c.trim().is_empty()))
    }

    async fn discard(&self) -> Result<(), DriverError> {
        let resp = self
            .client
            .post(format!("{}/invoices/discard", self.url))
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        let resp = self.client.delete(&self.url).send().await.map_err(transport)?;
        check(resp).await?;
        Ok(())
    }
}
