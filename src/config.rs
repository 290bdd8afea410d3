//! Environment-driven configuration
//!
//! Values come from the process environment, optionally seeded by a `.env`
//! file loaded in the binaries.

use crate::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub default_model: String,
    pub portfolio_api_url: Option<String>,
    pub search_api_url: Option<String>,
    pub port: u16,
    pub http_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            portfolio_api_url: None,
            search_api_url: None,
            port: 8080,
            http_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let retry_policy = RetryPolicy::new(
            parse_var("RETRY_MAX_ATTEMPTS").unwrap_or(defaults.retry_policy.max_attempts),
            parse_var("RETRY_INITIAL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_policy.initial_delay),
            parse_var("RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_policy.max_delay),
        );

        Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_base_url: non_empty_var("GEMINI_BASE_URL")
                .unwrap_or(defaults.gemini_base_url),
            default_model: non_empty_var("DEFAULT_MODEL").unwrap_or(defaults.default_model),
            portfolio_api_url: non_empty_var("PORTFOLIO_API_URL"),
            search_api_url: non_empty_var("SEARCH_API_URL"),
            port: parse_var("PORT")
                .or_else(|| parse_var("API_PORT"))
                .unwrap_or(defaults.port),
            http_timeout: parse_var("HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            request_timeout: parse_var("REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            retry_policy,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = non_empty_var(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}
