//! HTTP search collaborator: `POST {endpoint}` with `{"query": ...}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use vignette_shared::{AppConfig, Result, SearchClient, SearchResponse, VignetteError};

use crate::USER_AGENT;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl SearchConfig {
    /// Settings from the app config. A missing key is allowed.
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.search.endpoint.clone(),
            api_key: std::env::var(&config.search.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            timeout: Duration::from_secs(config.timeouts.search_call_secs),
        }
    }
}

pub struct HttpSearchClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpSearchClient {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            VignetteError::config(format!("search.endpoint {:?}: {e}", config.endpoint))
        })?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| VignetteError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
        })
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<SearchResponse> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&SearchRequest { query });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VignetteError::transport(format!("search {query:?}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VignetteError::transport(format!("search {query:?}: HTTP {status}")));
        }

        let answer: SearchResponse = response.json().await.map_err(|e| {
            VignetteError::validation(format!("search {query:?}: malformed response: {e}"))
        })?;
        if answer.answer.trim().is_empty() {
            return Err(VignetteError::validation(format!("search {query:?}: empty answer")));
        }

        debug!(citations = answer.citations.len(), "search answered");
        Ok(answer)
    }
}
