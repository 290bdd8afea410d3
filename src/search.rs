//! Live-search client
//!
//! Asks the search-answering service for current web and market information.
//! The service answers `{success, content, citations}`; `content` is either a
//! plain string or a list of answers, in which case the first one is used.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::{Citation, SearchResult};
use crate::retry::{self, RetryPolicy};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

pub const SEARCH_SERVICE: &str = "live-search";

/// Source of live web/market answers
#[async_trait]
pub trait LiveSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResult>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    content: Option<SearchContent>,
    #[serde(default)]
    citations: Option<Vec<RawCitation>>,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchContent {
    Text(String),
    Answers(Vec<SearchAnswer>),
}

#[derive(Debug, Deserialize)]
struct SearchAnswer {
    #[serde(alias = "content")]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCitation {
    Url(String),
    Titled {
        #[serde(default)]
        title: Option<String>,
        url: String,
    },
}

impl From<RawCitation> for Citation {
    fn from(raw: RawCitation) -> Self {
        match raw {
            RawCitation::Url(url) => Citation {
                title: url.clone(),
                url,
            },
            RawCitation::Titled { title, url } => Citation {
                title: title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| url.clone()),
                url,
            },
        }
    }
}

impl SearchResponse {
    fn into_result(self) -> Result<SearchResult> {
        if !self.success {
            return Err(PipelineError::Upstream {
                service: SEARCH_SERVICE,
                status: 502,
                message: self
                    .error
                    .unwrap_or_else(|| "search reported failure".to_string()),
            });
        }

        let content = match self.content {
            Some(SearchContent::Text(text)) => text,
            Some(SearchContent::Answers(answers)) => answers
                .into_iter()
                .next()
                .map(|a| a.text)
                .unwrap_or_default(),
            None => String::new(),
        };

        if content.trim().is_empty() {
            return Err(PipelineError::Upstream {
                service: SEARCH_SERVICE,
                status: 502,
                message: "search returned no answer".to_string(),
            });
        }

        Ok(SearchResult {
            content,
            citations: self
                .citations
                .unwrap_or_default()
                .into_iter()
                .map(Citation::from)
                .collect(),
        })
    }
}

/// HTTP-backed live-search client
pub struct HttpSearchClient {
    client: Client,
    url: Option<String>,
    policy: RetryPolicy,
}

impl HttpSearchClient {
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
            config.search_api_url.clone(),
            config.http_timeout,
            config.retry_policy.clone(),
        )
    }

    async fn post_query(&self, url: &str, query: &str) -> Result<SearchResponse> {
        let response = self
            .client
            .post(url)
            .json(&json!({ "query": query }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(SEARCH_SERVICE, status.as_u16(), &body));
        }

        Ok(response.json::<SearchResponse>().await?)
    }
}

#[async_trait]
impl LiveSearch for HttpSearchClient {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "Search query must not be empty".to_string(),
            ));
        }

        let url = self.url.as_deref().ok_or_else(|| {
            PipelineError::Config("SEARCH_API_URL is not configured".to_string())
        })?;

        debug!(query_chars = query.chars().count(), "Running live search");

        let response = retry::execute(|| self.post_query(url, query), &self.policy).await?;
        let result = response.into_result()?;

        info!(citations = result.citations.len(), "Live search completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tokio_test::{assert_err, assert_ok};

    fn test_client(url: String, max_attempts: u32) -> HttpSearchClient {
        HttpSearchClient::new(
            Some(url),
            Duration::from_secs(5),
            RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_blank_query_never_hits_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/search");
                then.status(200);
            })
            .await;

        let client = test_client(server.url("/search"), 3);
        let err = assert_err!(client.search("   \n ").await);

        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_search_with_citations() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/search")
                    .json_body(json!({ "query": "fed rate decision" }));
                then.status(200).json_body(json!({
                    "success": true,
                    "content": "The Fed held rates steady.",
                    "citations": [
                        { "title": "Reuters", "url": "https://reuters.com/a" },
                        "https://example.com/b"
                    ]
                }));
            })
            .await;

        let client = test_client(server.url("/search"), 3);
        let result = assert_ok!(client.search("  fed rate decision ").await);

        mock.assert_async().await;
        assert_eq!(result.content, "The Fed held rates steady.");
        assert_eq!(result.citations.len(), 2);
        assert_eq!(result.citations[0].title, "Reuters");
        assert_eq!(result.citations[1].title, "https://example.com/b");
    }

    #[tokio::test]
    async fn test_missing_citations_is_empty_list() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/search");
                then.status(200).json_body(json!({
                    "success": true,
                    "content": [{ "text": "First answer" }, { "text": "Second answer" }]
                }));
            })
            .await;

        let client = test_client(server.url("/search"), 3);
        let result = assert_ok!(client.search("markets today").await);

        assert_eq!(result.content, "First answer");
        assert!(result.citations.is_empty());
    }

    #[tokio::test]
    async fn test_unauthenticated_is_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/search");
                then.status(401).body("bad key");
            })
            .await;

        let client = test_client(server.url("/search"), 3);
        let err = assert_err!(client.search("anything").await);

        assert!(matches!(err, PipelineError::Unauthorized { .. }));
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_after_retries() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/search");
                then.status(429).body("slow down");
            })
            .await;

        let client = test_client(server.url("/search"), 2);
        let err = assert_err!(client.search("anything").await);

        assert!(matches!(err, PipelineError::RateLimited { .. }));
        mock.assert_calls_async(2).await;
    }

    #[tokio::test]
    async fn test_reported_failure_is_upstream_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/search");
                then.status(200)
                    .json_body(json!({ "success": false, "error": "provider offline" }));
            })
            .await;

        let client = test_client(server.url("/search"), 2);
        let err = assert_err!(client.search("anything").await);

        assert!(err.to_string().contains("provider offline"));
    }
}
