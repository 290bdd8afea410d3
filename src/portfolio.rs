//! Portfolio data client
//!
//! Fetches account holdings from the finance-data service. The service takes
//! a multipart form and answers with an opaque JSON document, which is
//! passed through untouched.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::PortfolioType;
use crate::retry::{self, RetryPolicy};
use crate::Result;
use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

pub const PORTFOLIO_SERVICE: &str = "portfolio";

/// Source of portfolio holdings
#[async_trait]
pub trait PortfolioSource: Send + Sync {
    async fn fetch(
        &self,
        client_id: &str,
        banker_id: &str,
        firm_name: &str,
        portfolio_type: PortfolioType,
    ) -> Result<Value>;
}

/// HTTP-backed portfolio client. No caching: every fetch is a fresh call.
pub struct HttpPortfolioClient {
    client: Client,
    url: Option<String>,
    policy: RetryPolicy,
}

impl HttpPortfolioClient {
    pub fn new(url: Option<String>, timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.map(|u| u.trim_end_matches('/').to_string()),
            policy,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            config.portfolio_api_url.clone(),
            config.http_timeout,
            config.retry_policy.clone(),
        )
    }

    async fn post_form(
        &self,
        url: &str,
        client_id: &str,
        banker_id: &str,
        firm_name: &str,
        portfolio_type: PortfolioType,
    ) -> Result<Value> {
        // Multipart forms are single-use, so one is built per attempt.
        let form = Form::new()
            .text("investment_banker_id", banker_id.to_string())
            .text("portfolio_type", portfolio_type.as_str())
            .text("firm_name", firm_name.to_string())
            .text("client_id", client_id.to_string());

        let response = self.client.post(url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(
                PORTFOLIO_SERVICE,
                status.as_u16(),
                &body,
            ));
        }

        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl PortfolioSource for HttpPortfolioClient {
    async fn fetch(
        &self,
        client_id: &str,
        banker_id: &str,
        firm_name: &str,
        portfolio_type: PortfolioType,
    ) -> Result<Value> {
        let url = self.url.as_deref().ok_or_else(|| {
            PipelineError::Config("PORTFOLIO_API_URL is not configured".to_string())
        })?;

        debug!(client_id, %portfolio_type, "Fetching portfolio data");

        let data = retry::execute(
            || self.post_form(url, client_id, banker_id, firm_name, portfolio_type),
            &self.policy,
        )
        .await?;

        info!(client_id, %portfolio_type, "Portfolio data received");
        Ok(data)
    }
}
