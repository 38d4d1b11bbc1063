//! OpenRouter (OpenAI-compatible chat completions) model client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use vignette_shared::{AppConfig, ModelClient, ModelRequest, ModelTask, Result, VignetteError};

use crate::USER_AGENT;

/// Connection settings for [`OpenRouterClient`].
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    /// Base URL, e.g. `https://openrouter.ai/api/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenRouterConfig {
    /// Settings from the app config, reading the key from its env var.
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        let var = &config.model.api_key_env;
        let api_key = std::env::var(var)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                VignetteError::config(format!(
                    "model API key not found. Set the {var} environment variable."
                ))
            })?;
        Ok(Self {
            base_url: config.model.base_url.clone(),
            api_key,
            model: config.model.default_model.clone(),
            timeout: Duration::from_secs(config.timeouts.model_call_secs),
        })
    }
}

pub struct OpenRouterClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Result<Self> {
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| VignetteError::config(format!("model.base_url {endpoint:?}: {e}")))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| VignetteError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            model: config.model,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Output contract sent as the system message for each task.
fn system_prompt(task: ModelTask) -> &'static str {
    match task {
        ModelTask::ExtractPatterns => {
            "You analyze a person's recent interactions and find recurring behavioral patterns. \
             Reply with a JSON object {\"patterns\": [...]} holding 4 to 8 entries. Each entry has \
             title (string), description (string), confidence (number 0-1), keywords (string array), \
             widget (one of hero, feature, timeline, card, stat, tip) and queries (at most 2 web \
             search queries that would add useful context)."
        }
        ModelTask::SynthesizeTheme => {
            "You design a color theme that fits the given behavioral patterns. Reply with a JSON \
             object with primary, secondary, accent, background, surface and text (each a #RRGGBB \
             hex color), mood (short label) and rationale (one sentence)."
        }
        ModelTask::GenerateWidget => {
            "You write the content of one widget on a personal page. Use the pattern and the \
             enrichment findings. Reply with a JSON object with title (string), body (string) and \
             highlights (string array, at most 3)."
        }
    }
}

/// Strip a surrounding Markdown code fence, if present.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse message content into a JSON object.
fn parse_object(task: ModelTask, content: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| VignetteError::validation(format!("{task}: content is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(VignetteError::validation(format!(
            "{task}: expected a JSON object"
        )));
    }
    Ok(value)
}

#[async_trait]
impl ModelClient for OpenRouterClient {
    #[instrument(skip_all, fields(task = %request.task, model = %self.model))]
    async fn generate(&self, request: ModelRequest) -> Result<serde_json::Value> {
        let task = request.task;
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(task).to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: request.context.to_string(),
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VignetteError::transport(format!("{task}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VignetteError::transport(format!("{task}: HTTP {status}")));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| VignetteError::validation(format!("{task}: unreadable response: {e}")))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VignetteError::validation(format!("{task}: response has no content")))?;

        debug!(bytes = content.len(), "model responded");
        parse_object(task, &content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vignette_shared::FailureKind;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> OpenRouterClient {
        OpenRouterClient::new(OpenRouterConfig {
            base_url: format!("{}/api/v1/", server.uri()),
            api_key: "test-key".into(),
            model: "test/model".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    fn request() -> ModelRequest {
        ModelRequest {
            task: ModelTask::SynthesizeTheme,
            context: json!({ "patterns": [] }),
        }
    }

    #[test]
    fn strips_code_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn returns_json_object_from_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "test/model",
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"mood":"calm"}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server).generate(request()).await.unwrap();
        assert_eq!(value["mood"], "calm");
    }

    #[tokio::test]
    async fn rate_limit_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server).generate(request()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transport);
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn non_json_content_is_validation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("sure, here you go")))
            .mount(&server)
            .await;

        let err = client(&server).generate(request()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[tokio::test]
    async fn json_array_is_validation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("[1, 2]")))
            .mount(&server)
            .await;

        let err = client(&server).generate(request()).await.unwrap_err();
        assert!(err.to_string().contains("expected a JSON object"));
    }

    #[tokio::test]
    async fn empty_choices_is_validation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client(&server).generate(request()).await.unwrap_err();
        assert!(err.to_string().contains("no content"));
    }

    #[test]
    fn missing_key_env_is_config_error() {
        let mut config = AppConfig::default();
        config.model.api_key_env = "VIGNETTE_TEST_MISSING_MODEL_KEY_98765".into();
        let err = OpenRouterConfig::from_app_config(&config).unwrap_err();
        assert!(matches!(err, VignetteError::Config { .. }));
    }
}
